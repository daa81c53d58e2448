#![allow(dead_code)]
// Shared test doubles: a scripted operator prompt and a scripted device.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plotspool::device::{PlotOutcome, PlotRequest, PlotterDriver, ResumeMode, ReturnCode};
use plotspool::doc::PlotDoc;
use plotspool::job::{EventReceiver, JobEvent, PlotStats};
use plotspool::persist::SpoolDir;
use plotspool::prompt::{Prompt, PromptAction};
use plotspool::spooler::{Phase, Spooler, SpoolerPolicy};

/// A plot document with the metadata the drawing tool embeds. The seed makes
/// each document's content hash distinct.
pub fn sample_payload(client: &str, seed: &str) -> String {
    format!(
        r#"<!-- Created with tg-plot (v4) at 20241010_210611.777_UTC+1 -->
<svg xmlns="http://www.w3.org/2000/svg"
     xmlns:tg="https://sketch.process.studio/turtle-graphics"
     tg:version="4" tg:count="8" tg:layer_count="1" tg:oob_count="0" tg:short_count="0" tg:travel="1762" tg:travel_ink="1236" tg:travel_blank="525" tg:format="A4 Landscape" tg:width_mm="297" tg:height_mm="210" tg:speed="100" tg:author="{client}" tg:timestamp="20241010_210611.777_UTC+1"
     width="297mm" height="210mm" viewBox="-148.5 -105 297 210">
    <g id="Layer 0"><path d="M -99.75 -99.75 L 99.75 -99.75 {seed}" /></g>
</svg>
"#
    )
}

/// Operator prompt that resolves only from scripted replies, keyed by the
/// offered choice set. Unscripted prompts stay pending, like an operator who
/// has not touched the keyboard yet.
pub struct ScriptedPrompt {
    replies: Mutex<HashMap<Vec<PromptAction>, VecDeque<Option<PromptAction>>>>,
    pushed: tokio::sync::Notify,
}

impl ScriptedPrompt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(HashMap::new()),
            pushed: tokio::sync::Notify::new(),
        })
    }

    pub fn push(&self, choices: &[PromptAction], reply: Option<PromptAction>) {
        self.replies
            .lock()
            .unwrap()
            .entry(choices.to_vec())
            .or_default()
            .push_back(reply);
        self.pushed.notify_waiters();
    }

    fn pop(&self, choices: &[PromptAction]) -> Option<Option<PromptAction>> {
        self.replies
            .lock()
            .unwrap()
            .get_mut(choices)?
            .pop_front()
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn ask(&self, choices: &[PromptAction], _message: &str) -> Option<PromptAction> {
        loop {
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();
            if let Some(reply) = self.pop(choices) {
                return reply;
            }
            pushed.await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlotCall {
    pub resume: Option<ResumeMode>,
    pub payload: String,
}

/// Device double returning scripted plot codes. A paused code leaves a
/// partial-output resume token behind, like the real driver does.
pub struct ScriptedDriver {
    plot_codes: Mutex<VecDeque<ReturnCode>>,
    pub plots: Mutex<Vec<PlotCall>>,
}

impl ScriptedDriver {
    pub fn new(codes: &[i32]) -> Arc<Self> {
        Arc::new(Self {
            plot_codes: Mutex::new(codes.iter().map(|c| ReturnCode(*c)).collect()),
            plots: Mutex::new(Vec::new()),
        })
    }

    pub fn plot_calls(&self) -> Vec<PlotCall> {
        self.plots.lock().unwrap().clone()
    }
}

impl PlotterDriver for ScriptedDriver {
    fn align(&self) -> ReturnCode {
        ReturnCode::NOMINAL
    }

    fn cycle(&self) -> ReturnCode {
        ReturnCode::NOMINAL
    }

    fn plot(&self, request: &PlotRequest) -> PlotOutcome {
        self.plots.lock().unwrap().push(PlotCall {
            resume: request.resume,
            payload: request.payload.clone(),
        });
        let code = self
            .plot_codes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ReturnCode::NOMINAL);
        let output = code.is_paused().then(|| "<svg>partial</svg>".to_string());
        PlotOutcome { code, output }
    }

    fn simulate(&self, doc: &PlotDoc) -> PlotStats {
        let meta = doc.meta();
        PlotStats {
            time_estimate: meta.travel / 50.0,
            distance_total: meta.travel,
            distance_pen_down: meta.travel_ink,
            pen_lifts: meta.line_count,
            layers: meta.layer_count,
        }
    }
}

pub fn spooler_with(
    dir: &Path,
    policy: SpoolerPolicy,
    codes: &[i32],
) -> (Arc<Spooler>, Arc<ScriptedDriver>) {
    let driver = ScriptedDriver::new(codes);
    let spooler = Spooler::new(policy, driver.clone(), SpoolDir::new(dir));
    (spooler, driver)
}

/// Poll until the engine reaches the expected phase.
pub async fn wait_for_phase(spooler: &Arc<Spooler>, phase: Phase) {
    wait_until(|| spooler.status().phase == phase).await;
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Receive the next job event, failing the test on a stall.
pub async fn next_event(rx: &mut EventReceiver) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for job event")
        .expect("event channel closed")
}

/// Drain whatever events are immediately available.
pub fn drain_events(rx: &mut EventReceiver) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
