use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::filter::{FilterKind, SlotDemand};
use crate::ipc::protocol::Reply;

/// Lifecycle of a job. `Pending` until admitted; the three terminal states
/// are reached exactly once, and only along the legal paths checked by
/// [`JobState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Monotonically increasing job identifier, never reused while the daemon
/// lives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where replies and progress notifications for one client connection go.
pub type ReplySink = mpsc::UnboundedSender<Reply>;

/// A submission as it arrives on the wire. Filter names are plain strings
/// here; the daemon resolves them against the catalogue so that an unknown
/// name is an ordinary rejection, not a framing error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub priority: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Filter names in pipeline order, unvalidated.
    pub filters: Vec<String>,
}

/// A validated submission: what the client asked for, with every filter
/// resolved to a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub priority: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub pipeline: Vec<FilterKind>,
}

impl JobSpec {
    pub fn demand(&self) -> SlotDemand {
        SlotDemand::from_pipeline(&self.pipeline)
    }
}

/// How a runner's pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { bytes_in: u64, bytes_out: u64 },
    Failed { reason: String },
    Cancelled,
}

impl JobOutcome {
    pub fn final_state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Registry entry for one job, alive from acceptance until its terminal
/// reply has been written.
#[derive(Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub spec: JobSpec,
    pub demand: SlotDemand,
    pub state: JobState,
    /// Connection the job was submitted on; its loss cancels the job.
    pub conn_id: u64,
    pub replies: ReplySink,
    /// Fired to stop a running pipeline; inert while pending.
    pub cancel: CancellationToken,
    pub submitted_at: DateTime<Utc>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Cancelled));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(!JobState::Pending.can_transition_to(JobState::Failed));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            for next in [
                JobState::Pending,
                JobState::Running,
                JobState::Completed,
                JobState::Failed,
                JobState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn outcome_maps_to_terminal_state() {
        let completed = JobOutcome::Completed { bytes_in: 1, bytes_out: 1 };
        assert_eq!(completed.final_state(), JobState::Completed);
        assert!(completed.final_state().is_terminal());
        assert_eq!(JobOutcome::Cancelled.final_state(), JobState::Cancelled);
    }
}
