// src/device/mod.rs - Plotter driver contract
//
// The engine drives the device exclusively through this trait. All methods
// are blocking and are run off the async scheduler; the run loop is the only
// caller and never issues two calls concurrently.
pub mod sim;

use serde::Serialize;
use std::fmt;

use crate::doc::PlotDoc;
use crate::job::PlotStats;

/// Numeric return code of a device operation. The values are a stable
/// contract with the driver library and the remote protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    /// No error; operation nominal.
    pub const NOMINAL: ReturnCode = ReturnCode(0);
    /// Stopped by a programmatic pause request.
    pub const PAUSED: ReturnCode = ReturnCode(1);
    /// Failed to connect to the device.
    pub const CONNECT_FAILED: ReturnCode = ReturnCode(101);
    /// Stopped by the physical pause button.
    pub const BUTTON_STOP: ReturnCode = ReturnCode(102);
    /// Stopped by keyboard interrupt.
    pub const KEYBOARD_INTERRUPT: ReturnCode = ReturnCode(103);
    /// Lost USB connectivity mid-operation.
    pub const USB_LOST: ReturnCode = ReturnCode(104);

    pub fn is_nominal(self) -> bool {
        self == Self::NOMINAL
    }

    /// Recoverable, operator-resumable stops. Everything else nonzero is a
    /// hard error subject to retry.
    pub fn is_paused(self) -> bool {
        matches!(
            self,
            Self::PAUSED | Self::BUTTON_STOP | Self::KEYBOARD_INTERRUPT
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NOMINAL => "no error; operation nominal",
            Self::PAUSED => "stopped by pause request",
            Self::CONNECT_FAILED => "failed to connect",
            Self::BUTTON_STOP => "stopped by pause button press",
            Self::KEYBOARD_INTERRUPT => "stopped by keyboard interrupt",
            Self::USB_LOST => "lost USB connectivity",
            _ => "device error",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.description())
    }
}

/// How a plot invocation relates to a previous partial run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Continue plotting from where the previous run stopped.
    Plot,
    /// Raise the pen and walk the carriage back home.
    Home,
}

#[derive(Debug, Clone)]
pub struct PlotRequest {
    /// Document to plot. For a resume this is the partial output of the
    /// previous run, not the original document.
    pub payload: String,
    /// Speed as a fraction of full speed, `0.0..=1.0`.
    pub speed_fraction: f64,
    /// Pen raise rate in percent.
    pub pen_up_percent: u32,
    /// Pen lower rate in percent.
    pub pen_down_percent: u32,
    pub resume: Option<ResumeMode>,
}

#[derive(Debug, Clone)]
pub struct PlotOutcome {
    pub code: ReturnCode,
    /// Remaining unplotted output of a paused run; the resume token.
    pub output: Option<String>,
}

pub trait PlotterDriver: Send + Sync {
    /// Raise the pen and release the motors for manual alignment.
    fn align(&self) -> ReturnCode;
    /// Run a pen up/down cycle.
    fn cycle(&self) -> ReturnCode;
    /// Execute a plot and report its outcome.
    fn plot(&self, request: &PlotRequest) -> PlotOutcome;
    /// Estimate plot statistics without touching the hardware.
    fn simulate(&self, doc: &PlotDoc) -> PlotStats;
}
