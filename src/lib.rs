//! Run Expo launcher core.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod paths;
pub mod picker;
pub mod port;
pub mod process;
pub mod provision;
pub mod readiness;
pub mod sequencer;
pub mod status;

pub use config::{LaunchConfig, LaunchRequest};
pub use error::{LaunchError, Result};
pub use process::{CommandSpec, Launcher, RunningProcess, SystemLauncher};
pub use readiness::{ReadinessResult, ReadinessScanner};
pub use sequencer::{CancelToken, DevServer, Flow, SequenceOutcome, Sequencer};
pub use status::{SequenceStatus, Stage, StatusCell, StatusSink};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
