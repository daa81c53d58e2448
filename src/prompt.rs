// src/prompt.rs - Operator prompt contract
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Actions an operator can pick. Each prompt site offers its own subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptAction {
    /// Setup is done, start accepting jobs.
    Ready,
    /// Start plotting the confirmed job.
    Start,
    /// Cancel the job at hand.
    Cancel,
    /// Raise the pen and release the motors.
    Align,
    /// Run a pen up/down cycle.
    Cycle,
    /// Continue a paused plot from its partial output.
    Resume,
    /// Walk the carriage back to home.
    Home,
    /// Restart a failed plot from the beginning.
    Retry,
    /// Plot the finished job once more.
    Repeat,
    /// Close out the finished job.
    Finish,
}

impl PromptAction {
    pub fn key(self) -> char {
        match self {
            Self::Ready | Self::Resume | Self::Retry | Self::Repeat => 'r',
            Self::Start => 's',
            Self::Cancel => 'c',
            Self::Align => 'a',
            Self::Cycle => 'y',
            Self::Home => 'h',
            Self::Finish => 'f',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Align => "align",
            Self::Cycle => "cycle",
            Self::Resume => "resume",
            Self::Home => "home",
            Self::Retry => "retry",
            Self::Repeat => "repeat",
            Self::Finish => "finish",
        }
    }
}

pub const SETUP_CHOICES: &[PromptAction] =
    &[PromptAction::Ready, PromptAction::Align, PromptAction::Cycle];
pub const IDLE_CHOICES: &[PromptAction] = &[PromptAction::Align, PromptAction::Cycle];
pub const CONFIRM_CHOICES: &[PromptAction] = &[
    PromptAction::Start,
    PromptAction::Align,
    PromptAction::Cycle,
    PromptAction::Cancel,
];
pub const PAUSED_CHOICES: &[PromptAction] = &[
    PromptAction::Resume,
    PromptAction::Home,
    PromptAction::Align,
    PromptAction::Cycle,
    PromptAction::Cancel,
];
pub const RETRY_CHOICES: &[PromptAction] = &[
    PromptAction::Retry,
    PromptAction::Align,
    PromptAction::Cycle,
    PromptAction::Cancel,
];
pub const REPEAT_CHOICES: &[PromptAction] = &[PromptAction::Repeat, PromptAction::Finish];

/// Operator prompt collaborator: present a choice set with a message and
/// resolve to one of the choices. `None` is an intentional dismissal,
/// distinct from choosing an action; it must never be treated as an error.
///
/// The engine drops a pending `ask` future whenever the prompt becomes
/// stale (a job arrived while idling, the current job was swapped), so
/// implementations must be cancel-safe.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn ask(&self, choices: &[PromptAction], message: &str) -> Option<PromptAction>;
}

/// Line-oriented prompt on stdin. Raw keystroke capture is deliberately out
/// of scope; the operator types the key and return.
pub struct StdinPrompt {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    fn menu(choices: &[PromptAction]) -> String {
        choices
            .iter()
            .map(|c| format!("{}={}", c.key(), c.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompt for StdinPrompt {
    async fn ask(&self, choices: &[PromptAction], message: &str) -> Option<PromptAction> {
        let menu = Self::menu(choices);
        println!("{message} [{menu}]");
        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let key = line.trim().to_lowercase().chars().next();
                    if let Some(key) = key {
                        if let Some(choice) = choices.iter().copied().find(|c| c.key() == key) {
                            return Some(choice);
                        }
                    }
                    println!("Please choose one of [{menu}]");
                }
                // stdin closed: hold forever rather than spinning; the
                // operator surface is simply gone.
                Ok(None) | Err(_) => std::future::pending::<()>().await,
            }
        }
    }
}
