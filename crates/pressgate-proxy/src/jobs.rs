// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared job table: remote job id -> relay record.
//
// A `BTreeMap` under a readers-writer lock gives ordered iteration (the
// worker always picks the oldest runnable job) with concurrent reads from
// the poller.  The `Notify` beside it is the poller-to-worker signal that
// something changed.  Lock scopes never cross an await point.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use pressgate_core::types::{JobState, ProxyJob};

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<BTreeMap<i32, ProxyJob>>,
    changed: Notify,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for a newly fetchable job.  Returns `false` without
    /// touching the table when the id is already present, so replayed
    /// notifications cannot create duplicates.
    pub fn insert(&self, remote_job_id: i32, remote_job_state: JobState) -> bool {
        let mut jobs = self.jobs.write().expect("job table lock");
        if jobs.contains_key(&remote_job_id) {
            return false;
        }
        jobs.insert(remote_job_id, ProxyJob::new(remote_job_id, remote_job_state));
        true
    }

    pub fn get(&self, remote_job_id: i32) -> Option<ProxyJob> {
        self.jobs.read().expect("job table lock").get(&remote_job_id).copied()
    }

    pub fn contains(&self, remote_job_id: i32) -> bool {
        self.jobs.read().expect("job table lock").contains_key(&remote_job_id)
    }

    /// Record the infrastructure's view of the job.  Only the poller calls
    /// this; the worker owns the local fields.
    pub fn set_remote_state(&self, remote_job_id: i32, state: JobState) -> bool {
        let mut jobs = self.jobs.write().expect("job table lock");
        match jobs.get_mut(&remote_job_id) {
            Some(job) => {
                job.remote_job_state = state;
                true
            }
            None => false,
        }
    }

    /// Advance the relay state.  Regressions are ignored so the local state
    /// stays monotonic regardless of caller interleaving.
    pub fn set_local_state(&self, remote_job_id: i32, state: JobState) {
        let mut jobs = self.jobs.write().expect("job table lock");
        if let Some(job) = jobs.get_mut(&remote_job_id) {
            if state >= job.local_job_state {
                job.local_job_state = state;
            } else {
                debug!(
                    job_id = remote_job_id,
                    from = %job.local_job_state,
                    to = %state,
                    "ignoring local job-state regression"
                );
            }
        }
    }

    pub fn set_local_job_id(&self, remote_job_id: i32, local_job_id: i32) {
        let mut jobs = self.jobs.write().expect("job table lock");
        if let Some(job) = jobs.get_mut(&remote_job_id) {
            job.local_job_id = local_job_id;
        }
    }

    /// Oldest job that is still pending locally and not terminated remotely.
    pub fn next_runnable(&self) -> Option<ProxyJob> {
        self.jobs
            .read()
            .expect("job table lock")
            .values()
            .find(|job| job.is_runnable())
            .copied()
    }

    /// Drop every record whose remote state reached a terminal value.
    pub fn prune(&self) -> usize {
        let mut jobs = self.jobs.write().expect("job table lock");
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_prunable());
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake the worker.  A signal sent while the worker is busy is kept as
    /// a permit, so the next wait returns immediately.
    pub fn signal(&self) {
        self.changed.notify_one();
    }

    /// Wait for a signal, bounded by `timeout` as a liveness backstop.
    pub async fn wait_for_change(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.changed.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let table = JobTable::new();
        assert!(table.insert(42, JobState::Pending));
        assert!(!table.insert(42, JobState::Processing));
        assert_eq!(table.len(), 1);
        // The original record is untouched.
        assert_eq!(table.get(42).expect("job").remote_job_state, JobState::Pending);
    }

    #[test]
    fn next_runnable_returns_lowest_id_first() {
        let table = JobTable::new();
        table.insert(9, JobState::Pending);
        table.insert(3, JobState::Pending);
        table.insert(7, JobState::Pending);

        assert_eq!(table.next_runnable().expect("job").remote_job_id, 3);
    }

    #[test]
    fn running_and_remotely_terminal_jobs_are_skipped() {
        let table = JobTable::new();
        table.insert(1, JobState::Pending);
        table.insert(2, JobState::Pending);
        table.set_local_state(1, JobState::Processing);
        table.set_remote_state(2, JobState::Canceled);

        assert!(table.next_runnable().is_none());
    }

    #[test]
    fn prune_removes_only_terminal_remote_states() {
        let table = JobTable::new();
        table.insert(1, JobState::Pending);
        table.insert(2, JobState::Pending);
        table.insert(3, JobState::Pending);
        table.set_remote_state(1, JobState::Canceled);
        table.set_remote_state(2, JobState::Completed);

        assert_eq!(table.prune(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains(3));
    }

    #[test]
    fn local_state_is_monotonic() {
        let table = JobTable::new();
        table.insert(5, JobState::Pending);

        table.set_local_state(5, JobState::Processing);
        table.set_local_state(5, JobState::Pending); // regression, ignored
        assert_eq!(table.get(5).expect("job").local_job_state, JobState::Processing);

        table.set_local_state(5, JobState::Completed);
        assert_eq!(table.get(5).expect("job").local_job_state, JobState::Completed);
    }

    #[tokio::test]
    async fn signal_before_wait_is_not_lost() {
        let table = JobTable::new();
        table.signal();
        // Returns immediately thanks to the stored permit; the 5s bound
        // would otherwise dominate the test run.
        let start = std::time::Instant::now();
        table.wait_for_change(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_times_out_without_signal() {
        let table = JobTable::new();
        let start = std::time::Instant::now();
        table.wait_for_change(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
