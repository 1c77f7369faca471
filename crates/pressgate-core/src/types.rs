// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Pressgate infrastructure proxy.

use serde::{Deserialize, Serialize};

/// IPP `job-state` values (RFC 8011 §5.3.7).
///
/// Both the remote (infrastructure) job state and the local relay state use
/// this enum; the numeric values are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending = 3,
    PendingHeld = 4,
    Processing = 5,
    ProcessingStopped = 6,
    Canceled = 7,
    Aborted = 8,
    Completed = 9,
}

impl JobState {
    /// Decode a wire value, tolerating out-of-range integers.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::PendingHeld),
            5 => Some(Self::Processing),
            6 => Some(Self::ProcessingStopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Canceled, aborted, and completed are terminal.
    pub fn is_terminal(self) -> bool {
        self >= Self::Canceled
    }

    /// The standard keyword for this state.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingHeld => "pending-held",
            Self::Processing => "processing",
            Self::ProcessingStopped => "processing-stopped",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// IPP `document-state` values (PWG 5100.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentState {
    Pending = 3,
    Processing = 5,
    Canceled = 7,
    Aborted = 8,
    Completed = 9,
}

impl DocumentState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// One relayed job, keyed by the identifier the infrastructure assigned.
///
/// `remote_job_state` is owned by the event poller; the `local_*` fields are
/// owned by the job worker while it is executing the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyJob {
    /// Job identifier on the infrastructure printer.
    pub remote_job_id: i32,
    /// Last observed infrastructure job state.
    pub remote_job_state: JobState,
    /// Job identifier assigned by the local device (0 until known).
    pub local_job_id: i32,
    /// Relay lifecycle state; advances monotonically.
    pub local_job_state: JobState,
}

impl ProxyJob {
    /// A freshly observed fetchable job.
    pub fn new(remote_job_id: i32, remote_job_state: JobState) -> Self {
        Self {
            remote_job_id,
            remote_job_state,
            local_job_id: 0,
            local_job_state: JobState::Pending,
        }
    }

    /// Whether the worker should pick this job up.
    pub fn is_runnable(&self) -> bool {
        self.local_job_state == JobState::Pending && self.remote_job_state < JobState::Canceled
    }

    /// Whether the record may be dropped from the job table.
    pub fn is_prunable(&self) -> bool {
        self.remote_job_state >= JobState::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_ordering_matches_wire_values() {
        assert!(JobState::Pending < JobState::Processing);
        assert!(JobState::Processing < JobState::Canceled);
        assert!(JobState::Canceled < JobState::Aborted);
        assert!(JobState::Aborted < JobState::Completed);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(JobState::Completed.is_terminal());
    }

    #[test]
    fn from_i32_round_trips() {
        for v in 3..=9 {
            let state = JobState::from_i32(v).expect("valid state");
            assert_eq!(state.as_i32(), v);
        }
        assert!(JobState::from_i32(0).is_none());
        assert!(JobState::from_i32(10).is_none());
    }

    #[test]
    fn new_job_is_runnable() {
        let job = ProxyJob::new(42, JobState::Pending);
        assert!(job.is_runnable());
        assert!(!job.is_prunable());
        assert_eq!(job.local_job_id, 0);
    }

    #[test]
    fn canceled_remote_is_prunable_not_runnable() {
        let job = ProxyJob {
            remote_job_state: JobState::Canceled,
            ..ProxyJob::new(7, JobState::Pending)
        };
        assert!(!job.is_runnable());
        assert!(job.is_prunable());
    }
}
