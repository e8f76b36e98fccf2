use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::status::Stage;

/// Everything that can stop (or, for `PatternNotFound`, merely annotate) a
/// launch sequence.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0} is not found")]
    MissingBundledResource(String),
    #[error("cannot create directory {}: {source}", .path.display())]
    DirectoryCreationFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extraction failed: {}", describe_code(.0))]
    ExtractionFailure(Option<i32>),
    #[error("failed to start {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{} exited with {}", .stage.command_name(), describe_code(.code))]
    NonZeroExit { stage: Stage, code: Option<i32> },
    #[error("no directory selected")]
    NoDirectorySelected,
    #[error("dev server closed its output without printing a local address")]
    PatternNotFound,
    #[error("invalid readiness pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("dev server did not become ready within {0}s")]
    ReadinessTimeout(u64),
    #[error("launch cancelled")]
    Cancelled,
    #[error("another launch is already in progress")]
    SequenceInFlight,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LaunchError>;

pub(crate) fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_command() {
        let err = LaunchError::NonZeroExit {
            stage: Stage::Scaffolding,
            code: Some(3),
        };
        assert_eq!(err.to_string(), "create exited with code 3");

        let err = LaunchError::ExtractionFailure(None);
        assert_eq!(err.to_string(), "extraction failed: a signal");

        let err = LaunchError::MissingBundledResource("bun".into());
        assert_eq!(err.to_string(), "bun is not found");
    }
}
