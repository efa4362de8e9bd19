use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::scheduler::job::{JobId, JobRecord, JobSpec, JobState, ReplySink};

/// Registry of all active jobs, pending and running alike.
///
/// A record enters on acceptance and leaves once its terminal reply has
/// been dispatched; terminal jobs are never kept around. Ids come from a
/// plain monotonic counter.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, JobRecord>,
    next_id: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Pending` record and assign it the next id.
    pub fn create(&mut self, spec: JobSpec, conn_id: u64, replies: ReplySink) -> JobId {
        self.next_id += 1;
        let id = JobId(self.next_id);
        let demand = spec.demand();
        self.jobs.insert(
            id,
            JobRecord {
                id,
                spec,
                demand,
                state: JobState::Pending,
                conn_id,
                replies,
                cancel: CancellationToken::new(),
                submitted_at: Utc::now(),
                admitted_at: None,
                finished_at: None,
            },
        );
        id
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<JobRecord> {
        self.jobs.remove(&id)
    }

    /// Apply a state transition, enforcing the legal-transition table and
    /// stamping the diagnostic timestamps. An illegal transition is a
    /// daemon bug and aborts.
    pub fn set_state(&mut self, id: JobId, next: JobState) {
        let record = match self.jobs.get_mut(&id) {
            Some(record) => record,
            None => panic!("state transition for unknown job #{id}"),
        };
        assert!(
            record.state.can_transition_to(next),
            "illegal state transition {} -> {} for job #{id}",
            record.state,
            next
        );
        record.state = next;
        if next == JobState::Running {
            record.admitted_at = Some(Utc::now());
        } else if next.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
    }

    /// Every job still in the table, in no particular order.
    pub fn iter_active(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    /// Pending job ids in selection order: higher priority first, then
    /// submission order within a priority.
    pub fn pending_in_order(&self) -> Vec<JobId> {
        let mut pending: Vec<(u32, JobId)> = self
            .jobs
            .values()
            .filter(|record| record.state == JobState::Pending)
            .map(|record| (record.spec.priority, record.id))
            .collect();
        pending.sort_by_key(|&(priority, id)| (Reverse(priority), id));
        pending.into_iter().map(|(_, id)| id).collect()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|record| record.state == JobState::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
