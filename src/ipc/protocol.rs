use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::Result;
use crate::filter::FilterKind;
use crate::ledger::FilterBudget;
use crate::scheduler::{JobId, JobState, JobSubmission};

/// Client-to-daemon request frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Submit(JobSubmission),
    Status,
    Cancel { job_id: JobId },
    Shutdown,
}

/// Why a submission was refused without entering the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    EmptyPipeline,
    /// A filter name that is not one of the seven known kinds.
    UnknownFilter { name: String },
    /// The pipeline demands more instances of a kind than its budget
    /// allows, so it could never be admitted.
    InfeasibleDemand {
        kind: FilterKind,
        demanded: u32,
        max: u32,
    },
    InputUnreadable {
        path: PathBuf,
        error: String,
    },
    SameInputOutput,
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyPipeline => write!(f, "empty pipeline"),
            RejectReason::UnknownFilter { name } => write!(f, "unknown filter `{name}`"),
            RejectReason::InfeasibleDemand { kind, demanded, max } => write!(
                f,
                "pipeline needs {demanded} `{kind}` instances but the budget allows {max}"
            ),
            RejectReason::InputUnreadable { path, error } => {
                write!(f, "input {} is unreadable: {error}", path.display())
            }
            RejectReason::SameInputOutput => {
                write!(f, "input and output are the same path")
            }
            RejectReason::ShuttingDown => write!(f, "daemon is shutting down"),
        }
    }
}

/// Daemon-to-client reply frames. A submission sees `Accepted`, maybe
/// `Started`, then exactly one terminal reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Accepted { job_id: JobId },
    Rejected { reason: RejectReason },
    Started { job_id: JobId },
    Completed { job_id: JobId, bytes_in: u64, bytes_out: u64 },
    Failed { job_id: JobId, reason: String },
    Cancelled { job_id: JobId },
    /// Answer to the *canceller*; the job's owner gets `Cancelled`.
    CancelAck { job_id: JobId },
    NotCancellable { job_id: JobId },
    Status(StatusSnapshot),
    ShuttingDown,
}

impl Reply {
    /// Replies that end a submission's lifecycle on the client side.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Reply::Rejected { .. }
                | Reply::Completed { .. }
                | Reply::Failed { .. }
                | Reply::Cancelled { .. }
        )
    }
}

/// One active job as reported by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLine {
    pub id: JobId,
    pub state: JobState,
    pub priority: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub pipeline: Vec<FilterKind>,
}

/// Point-in-time view of every active job plus the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tasks: Vec<TaskLine>,
    /// In catalogue order, one entry per kind.
    pub filters: Vec<FilterBudget>,
}

impl StatusSnapshot {
    /// Render the status shape: one line per active job, then one line
    /// per filter kind.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for task in &self.tasks {
            let filters = task
                .pipeline
                .iter()
                .map(|kind| kind.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                out,
                "task #{}: proc-file {} {} {} {}",
                task.id,
                task.priority,
                task.input.display(),
                task.output.display(),
                filters
            );
        }
        for budget in &self.filters {
            let _ = writeln!(
                out,
                "transf {}: {}/{} (running/max)",
                budget.kind, budget.running, budget.max
            );
        }
        out
    }
}

/// Frame a raw stream with a length-delimited codec. Both sides of the
/// protocol use the same framing.
pub fn framed(stream: UnixStream) -> Framed<UnixStream, LengthDelimitedCodec> {
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub async fn send_frame<S, T>(sink: &mut S, msg: &T) -> Result<()>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(msg)?;
    sink.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Read one frame; `None` means the peer hung up cleanly.
pub async fn recv_frame<S, T>(stream: &mut S) -> Result<Option<T>>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
    T: DeserializeOwned,
{
    match stream.next().await {
        None => Ok(None),
        Some(frame) => Ok(Some(bincode::deserialize(&frame?)?)),
    }
}
