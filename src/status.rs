use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::Serialize;

use crate::readiness::ReadinessResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provisioning,
    Scaffolding,
    Installing,
    PortReclaiming,
    Starting,
    AwaitingReadiness,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Scaffolding => "scaffolding",
            Self::Installing => "installing",
            Self::PortReclaiming => "port_reclaiming",
            Self::Starting => "starting",
            Self::AwaitingReadiness => "awaiting_readiness",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Provisioning => "Preparing Node.js...",
            Self::Scaffolding => "Creating...",
            Self::Installing => "Installing packages...",
            Self::PortReclaiming => "Freeing port...",
            Self::Starting => "Starting Expo development server...",
            Self::AwaitingReadiness => "Waiting for dev server...",
        }
    }

    pub(crate) fn command_name(self) -> &'static str {
        match self {
            Self::Provisioning => "tar",
            Self::Scaffolding => "create",
            Self::Installing => "install",
            Self::PortReclaiming => "port reclaim",
            Self::Starting | Self::AwaitingReadiness => "dev server",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a launch sequence currently stands. Overwritten on every
/// transition, never appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequenceStatus {
    #[default]
    Idle,
    Running {
        stage: Stage,
    },
    Ready {
        readiness: ReadinessResult,
    },
    Failed {
        stage: Stage,
        message: String,
    },
}

impl SequenceStatus {
    pub fn running(stage: Stage) -> Self {
        Self::Running { stage }
    }

    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Failed { .. })
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Ready { readiness } => Some(readiness.matched_address.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Running { stage } => f.write_str(stage.label()),
            Self::Ready { readiness } => write!(f, "Ready at {}", readiness.matched_address),
            Self::Failed { stage, message } => write!(f, "Failed while {stage}: {message}"),
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &SequenceStatus);
}

impl StatusSink for Sender<SequenceStatus> {
    fn publish(&self, status: &SequenceStatus) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.send(status.clone());
    }
}

#[derive(Debug, Default)]
pub struct StatusCell {
    current: Mutex<SequenceStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SequenceStatus {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StatusSink for StatusCell {
    fn publish(&self, status: &SequenceStatus) {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = status.clone();
    }
}
