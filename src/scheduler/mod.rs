//! Admission-controlled job scheduling.
//!
//! This module provides:
//! - **Job records**: ids, states with a checked transition table, and the
//!   registry of everything pending or running.
//! - **Admission passes**: on every event the pending queue is scanned in
//!   priority order and each job whose whole demand fits is promoted.
//! - **Head-of-line policy**: a job that does not fit blocks its filter
//!   kinds; later jobs touching a blocked kind are skipped, so unrelated
//!   work overtakes without starving anyone.
//!
//! The scheduler is a single task owning all admission state. Runners
//! report back through [`SchedulerEvent::JobFinished`] after releasing
//! their slots, so there are no back-pointers between the two sides.

mod job;
mod queue;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

pub use job::{JobId, JobOutcome, JobRecord, JobSpec, JobState, JobSubmission, ReplySink};
pub use queue::JobTable;

use crate::catalog::FilterCatalog;
use crate::filter::{FilterKind, SlotDemand};
use crate::ipc::protocol::{RejectReason, Reply, StatusSnapshot, TaskLine};
use crate::ledger::BudgetLedger;
use crate::runner::{run_job, RunningJob};

/// Everything that can wake the scheduler.
#[derive(Debug)]
pub enum SchedulerEvent {
    Submit {
        submission: JobSubmission,
        conn_id: u64,
        replies: ReplySink,
    },
    Status {
        replies: ReplySink,
    },
    Cancel {
        job_id: JobId,
        replies: ReplySink,
    },
    /// Sent by a runner after it has released the job's slots.
    JobFinished {
        job_id: JobId,
        outcome: JobOutcome,
    },
    /// A client connection went away; its jobs are implicitly cancelled.
    Disconnected {
        conn_id: u64,
    },
    Shutdown,
}

/// The control task's state: registry, pending queue, and the shared
/// ledger. All mutation happens in [`Scheduler::handle_event`], so
/// admission decisions are serialised by construction.
pub struct Scheduler {
    catalog: Arc<FilterCatalog>,
    ledger: Arc<BudgetLedger>,
    table: JobTable,
    /// Cloned into each runner so it can report `JobFinished`.
    events_tx: mpsc::Sender<SchedulerEvent>,
    draining: bool,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<FilterCatalog>,
        ledger: Arc<BudgetLedger>,
        events_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            table: JobTable::new(),
            events_tx,
            draining: false,
        }
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    /// Drive the scheduler until shutdown has drained every running job.
    pub async fn run(mut self, mut events: mpsc::Receiver<SchedulerEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle_event(event).await {
                break;
            }
        }
        tracing::info!("scheduler drained, exiting");
    }

    /// Apply one event. Returns true once a requested shutdown has fully
    /// drained, which ends the control task.
    pub async fn handle_event(&mut self, event: SchedulerEvent) -> bool {
        match event {
            SchedulerEvent::Submit { submission, conn_id, replies } => {
                self.handle_submit(submission, conn_id, replies).await;
                false
            }
            SchedulerEvent::Status { replies } => {
                self.handle_status(&replies);
                false
            }
            SchedulerEvent::Cancel { job_id, replies } => {
                self.handle_cancel(job_id, &replies);
                false
            }
            SchedulerEvent::JobFinished { job_id, outcome } => {
                self.handle_finished(job_id, outcome)
            }
            SchedulerEvent::Disconnected { conn_id } => {
                self.handle_disconnected(conn_id);
                false
            }
            SchedulerEvent::Shutdown => self.handle_shutdown(),
        }
    }

    async fn handle_submit(&mut self, submission: JobSubmission, conn_id: u64, replies: ReplySink) {
        if self.draining {
            let _ = replies.send(Reply::Rejected { reason: RejectReason::ShuttingDown });
            return;
        }
        let spec = match self.validate(&submission).await {
            Ok(spec) => spec,
            Err(reason) => {
                tracing::info!(%reason, "submission rejected");
                let _ = replies.send(Reply::Rejected { reason });
                return;
            }
        };

        let job_id = self.table.create(spec, conn_id, replies);
        tracing::info!(job_id = %job_id, "job accepted");
        if let Some(record) = self.table.get(job_id) {
            let _ = record.replies.send(Reply::Accepted { job_id });
        }
        self.admission_pass();
    }

    /// Rejection checks, applied before a submission enters the queue:
    /// non-empty pipeline, known filter names, feasible demand, distinct
    /// paths, readable input. A demand that exceeds some kind's budget
    /// could never be admitted.
    async fn validate(&self, submission: &JobSubmission) -> Result<JobSpec, RejectReason> {
        if submission.filters.is_empty() {
            return Err(RejectReason::EmptyPipeline);
        }
        let mut pipeline = Vec::with_capacity(submission.filters.len());
        for name in &submission.filters {
            match name.parse::<FilterKind>() {
                Ok(kind) => pipeline.push(kind),
                Err(_) => return Err(RejectReason::UnknownFilter { name: name.clone() }),
            }
        }
        if submission.input == submission.output {
            return Err(RejectReason::SameInputOutput);
        }
        let demand = SlotDemand::from_pipeline(&pipeline);
        for kind in FilterKind::ALL {
            let max = self.catalog.max_concurrent(kind);
            if demand.count(kind) > max {
                return Err(RejectReason::InfeasibleDemand {
                    kind,
                    demanded: demand.count(kind),
                    max,
                });
            }
        }
        // The probe runs on the blocking pool so a stalled filesystem
        // cannot wedge the control task.
        if let Err(err) = tokio::fs::metadata(&submission.input).await {
            return Err(RejectReason::InputUnreadable {
                path: submission.input.clone(),
                error: err.to_string(),
            });
        }
        Ok(JobSpec {
            priority: submission.priority,
            input: submission.input.clone(),
            output: submission.output.clone(),
            pipeline,
        })
    }

    /// Scan the pending queue in priority order and promote every job
    /// whose whole demand fits.
    ///
    /// A job that does not fit marks all kinds it demands as blocked, and
    /// later jobs touching a blocked kind are skipped even if they would
    /// fit. Jobs on disjoint kinds still get through.
    fn admission_pass(&mut self) {
        let mut blocked: HashSet<FilterKind> = HashSet::new();
        for job_id in self.table.pending_in_order() {
            let demand = match self.table.get(job_id) {
                Some(record) => record.demand.clone(),
                None => continue,
            };
            if !demand.is_disjoint(&blocked) {
                continue;
            }
            if self.ledger.try_reserve(&demand) {
                self.promote(job_id);
            } else {
                blocked.extend(demand.kinds());
            }
        }
    }

    /// Transition an admitted job to `Running` and hand it to a runner
    /// task. The runner owns the release obligation from here on.
    fn promote(&mut self, job_id: JobId) {
        self.table.set_state(job_id, JobState::Running);
        let record = match self.table.get(job_id) {
            Some(record) => record,
            None => return,
        };
        let _ = record.replies.send(Reply::Started { job_id });
        tracing::info!(job_id = %job_id, priority = record.spec.priority, "job admitted");

        let executables = record
            .spec
            .pipeline
            .iter()
            .map(|kind| self.catalog.entry(*kind).executable.clone())
            .collect();
        let job = RunningJob {
            id: job_id,
            spec: record.spec.clone(),
            demand: record.demand.clone(),
            executables,
            replies: record.replies.clone(),
            cancel: record.cancel.clone(),
        };
        tokio::spawn(run_job(job, Arc::clone(&self.ledger), self.events_tx.clone()));
    }

    fn handle_status(&self, replies: &ReplySink) {
        let mut tasks: Vec<TaskLine> = self
            .table
            .iter_active()
            .map(|record| TaskLine {
                id: record.id,
                state: record.state,
                priority: record.spec.priority,
                input: record.spec.input.clone(),
                output: record.spec.output.clone(),
                pipeline: record.spec.pipeline.clone(),
            })
            .collect();
        tasks.sort_by_key(|task| task.id);
        let snapshot = StatusSnapshot {
            tasks,
            filters: self.ledger.snapshot(),
        };
        let _ = replies.send(Reply::Status(snapshot));
    }

    fn handle_cancel(&mut self, job_id: JobId, requester: &ReplySink) {
        match self.table.get(job_id).map(|record| record.state) {
            Some(JobState::Pending) => {
                self.cancel_pending(job_id);
                let _ = requester.send(Reply::CancelAck { job_id });
                self.admission_pass();
            }
            Some(JobState::Running) => {
                if let Some(record) = self.table.get(job_id) {
                    record.cancel.cancel();
                }
                tracing::info!(job_id = %job_id, "cancelling running job");
                let _ = requester.send(Reply::CancelAck { job_id });
            }
            _ => {
                let _ = requester.send(Reply::NotCancellable { job_id });
            }
        }
    }

    /// Dequeue a pending job and send its terminal reply. No slots were
    /// ever reserved for it, so there is nothing to release.
    fn cancel_pending(&mut self, job_id: JobId) {
        self.table.set_state(job_id, JobState::Cancelled);
        if let Some(record) = self.table.remove(job_id) {
            tracing::info!(job_id = %job_id, "pending job cancelled");
            let _ = record.replies.send(Reply::Cancelled { job_id });
        }
    }

    fn handle_finished(&mut self, job_id: JobId, outcome: JobOutcome) -> bool {
        if self.table.get(job_id).is_some() {
            let state = outcome.final_state();
            self.table.set_state(job_id, state);
            self.table.remove(job_id);
            tracing::info!(job_id = %job_id, state = %state, "job finished");
        }
        if self.draining {
            return self.table.running_count() == 0;
        }
        self.admission_pass();
        false
    }

    fn handle_disconnected(&mut self, conn_id: u64) {
        let owned: Vec<(JobId, JobState)> = self
            .table
            .iter_active()
            .filter(|record| record.conn_id == conn_id)
            .map(|record| (record.id, record.state))
            .collect();
        if owned.is_empty() {
            return;
        }
        tracing::info!(conn_id, jobs = owned.len(), "client disconnected, cancelling its jobs");
        for (job_id, state) in owned {
            match state {
                JobState::Pending => self.cancel_pending(job_id),
                JobState::Running => {
                    if let Some(record) = self.table.get(job_id) {
                        record.cancel.cancel();
                    }
                }
                _ => {}
            }
        }
        self.admission_pass();
    }

    /// Refuse new submissions, cancel everything pending, and let running
    /// jobs drain. Returns true if there is nothing left to wait for.
    fn handle_shutdown(&mut self) -> bool {
        if self.draining {
            return self.table.running_count() == 0;
        }
        self.draining = true;
        let pending = self.table.pending_in_order();
        tracing::info!(
            pending = pending.len(),
            running = self.table.running_count(),
            "shutdown requested, cancelling pending jobs and draining running ones"
        );
        for job_id in pending {
            self.cancel_pending(job_id);
        }
        self.table.running_count() == 0
    }
}
