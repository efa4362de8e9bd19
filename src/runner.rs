//! Child-process pipeline execution.
//!
//! A runner owns one admitted job: it spawns every filter in the pipeline
//! before awaiting any of them, wires each stage's stdout to the next
//! stage's stdin, and connects the input file to the head and the output
//! file to the tail. Once `try_reserve` has succeeded the runner carries
//! the release obligation, discharged exactly once on every terminal path.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::filter::SlotDemand;
use crate::ipc::protocol::Reply;
use crate::ledger::BudgetLedger;
use crate::scheduler::{JobId, JobOutcome, JobSpec, ReplySink, SchedulerEvent};

/// An admitted job with its pipeline resolved to executable paths.
#[derive(Debug)]
pub struct RunningJob {
    pub id: JobId,
    pub spec: JobSpec,
    pub demand: SlotDemand,
    /// Catalogue-resolved executables, one per pipeline stage.
    pub executables: Vec<PathBuf>,
    pub replies: ReplySink,
    pub cancel: CancellationToken,
}

/// Drive one admitted job to a terminal state.
///
/// The ordering at the end is deliberate: slots are released first so the
/// next admission pass sees them, the scheduler learns of the finish
/// second, and the client reply always comes last.
pub async fn run_job(
    job: RunningJob,
    ledger: Arc<BudgetLedger>,
    events: mpsc::Sender<SchedulerEvent>,
) {
    tracing::debug!(job_id = %job.id, stages = job.executables.len(), "pipeline starting");
    let outcome = execute_pipeline(&job).await;

    ledger.release(&job.demand);
    let _ = events
        .send(SchedulerEvent::JobFinished {
            job_id: job.id,
            outcome: outcome.clone(),
        })
        .await;

    let reply = match outcome {
        JobOutcome::Completed { bytes_in, bytes_out } => {
            tracing::info!(job_id = %job.id, bytes_in, bytes_out, "pipeline completed");
            Reply::Completed { job_id: job.id, bytes_in, bytes_out }
        }
        JobOutcome::Failed { reason } => {
            tracing::warn!(job_id = %job.id, %reason, "pipeline failed");
            Reply::Failed { job_id: job.id, reason }
        }
        JobOutcome::Cancelled => {
            tracing::info!(job_id = %job.id, "pipeline cancelled");
            Reply::Cancelled { job_id: job.id }
        }
    };
    let _ = job.replies.send(reply);
}

async fn execute_pipeline(job: &RunningJob) -> JobOutcome {
    let mut children = Vec::with_capacity(job.executables.len());
    if let Err(err) = spawn_chain(&job.spec.input, &job.spec.output, &job.executables, &mut children) {
        // A half-spawned chain still has live children to put down.
        terminate_all(&mut children).await;
        return JobOutcome::Failed { reason: err.to_string() };
    }

    tokio::select! {
        failure = wait_all(&mut children) => match failure {
            None => completed_outcome(&job.spec),
            Some(reason) => JobOutcome::Failed { reason },
        },
        _ = job.cancel.cancelled() => {
            terminate_all(&mut children).await;
            JobOutcome::Cancelled
        }
    }
}

/// Spawn the whole chain, head to tail. Interior boundaries are pipes; no
/// endpoint is kept on the runner side, so end-of-file propagates from the
/// head to the tail when the input drains.
fn spawn_chain(
    input: &Path,
    output: &Path,
    executables: &[PathBuf],
    children: &mut Vec<Child>,
) -> std::io::Result<()> {
    let last = executables.len() - 1;
    let mut upstream: Option<ChildStdout> = None;

    for (i, exe) in executables.iter().enumerate() {
        let mut cmd = Command::new(exe);
        cmd.kill_on_drop(true);

        match upstream.take() {
            Some(prev) => {
                let stdin: Stdio = prev.try_into()?;
                cmd.stdin(stdin);
            }
            None => {
                cmd.stdin(Stdio::from(File::open(input)?));
            }
        }
        if i == last {
            cmd.stdout(Stdio::from(File::create(output)?));
        } else {
            cmd.stdout(Stdio::piped());
        }

        let mut child = cmd.spawn()?;
        if i < last {
            upstream = child.stdout.take();
        }
        children.push(child);
    }
    Ok(())
}

/// Await every child in pipeline order, reporting the first failure.
/// Later children are still awaited so nothing is left unreaped.
async fn wait_all(children: &mut [Child]) -> Option<String> {
    let mut failure = None;
    for (i, child) in children.iter_mut().enumerate() {
        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                if failure.is_none() {
                    failure = Some(match status.code() {
                        Some(code) => format!("pipeline stage {i} exited with code {code}"),
                        None => format!("pipeline stage {i} was killed by a signal"),
                    });
                }
            }
            Err(err) => {
                if failure.is_none() {
                    failure = Some(format!("waiting on pipeline stage {i}: {err}"));
                }
            }
        }
    }
    failure
}

/// Ask the whole chain to stop, then make sure every child is dead and
/// reaped: SIGTERM first, SIGKILL for anything that ignores it.
async fn terminate_all(children: &mut [Child]) {
    for child in children.iter_mut() {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    for child in children.iter_mut() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

fn completed_outcome(spec: &JobSpec) -> JobOutcome {
    match (std::fs::metadata(&spec.input), std::fs::metadata(&spec.output)) {
        (Ok(input), Ok(output)) => JobOutcome::Completed {
            bytes_in: input.len(),
            bytes_out: output.len(),
        },
        (Err(err), _) | (_, Err(err)) => JobOutcome::Failed {
            reason: format!("reading file sizes after completion: {err}"),
        },
    }
}
