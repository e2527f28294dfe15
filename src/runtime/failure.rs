use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Host cannot run a validator (insufficient memory). Not retryable.
    PreconditionFailure,
    /// Dependency download or install failed; the whole flow must restart.
    DependencyFailure,
    /// Node reported an error after it was launched.
    ProtocolError,
    /// A stage exceeded its configured limit.
    TimedOut,
}

impl FailureKind {
    /// Classify an error by the stage it arrived in.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::MemoryChecking | Stage::MemoryFailed => Self::PreconditionFailure,
            Stage::AwaitingStart | Stage::DependencyDownloading | Stage::DependencyInstalling => {
                Self::DependencyFailure
            }
            _ => Self::ProtocolError,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreconditionFailure => "precondition_failure",
            Self::DependencyFailure => "dependency_failure",
            Self::ProtocolError => "protocol_error",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: FailureKind,
    pub message: String,
    pub stage: Stage,
    pub at: String,
}

impl ErrorRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>, stage: Stage) -> Self {
        Self {
            kind,
            message: message.into(),
            stage,
            at: Utc::now().to_rfc3339(),
        }
    }
}

/// What the presentation layer should show right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum Presentation {
    Error(String),
    Status(String),
    Nothing,
}

/// Latest error and latest status, kept in independent slots.
///
/// A new status clears the error slot and a new error clears the status
/// slot. Once sealed (session terminal) the error slot is only ever replaced
/// by newer errors, and the terminating failure is kept separately.
#[derive(Debug, Clone, Default)]
pub struct FailureReporter {
    last_error: Option<ErrorRecord>,
    last_status: Option<String>,
    failure: Option<ErrorRecord>,
    sealed: bool,
}

impl FailureReporter {
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.last_status = None;
        self.last_error = Some(record);
    }

    pub fn record_status(&mut self, text: impl Into<String>) {
        if !self.sealed {
            self.last_error = None;
        }
        self.last_status = Some(text.into());
    }

    /// A non-error, non-status event arrived.
    pub fn note_progress(&mut self) {
        if !self.sealed {
            self.last_error = None;
        }
    }

    /// Record the error that ended the session. The first one wins.
    pub fn fail(&mut self, record: ErrorRecord) {
        if self.failure.is_none() {
            self.failure = Some(record.clone());
        }
        self.record_error(record);
        self.sealed = true;
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.last_error.as_ref()
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn failure(&self) -> Option<&ErrorRecord> {
        self.failure.as_ref()
    }

    pub fn presentation(&self) -> Presentation {
        if let Some(error) = &self.last_error {
            return Presentation::Error(error.message.clone());
        }
        match &self.last_status {
            Some(status) => Presentation::Status(status.clone()),
            None => Presentation::Nothing,
        }
    }
}
