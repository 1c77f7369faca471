// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Infrastructure event polling.
//
// The subscription is drained with Get-Notifications (`ippget` pull method,
// `notify-wait=false`).  Each event-notification group is one record; group
// boundaries are the only record separator.  Between polls the session is
// reset, because infrastructure printers routinely idle-close connections
// during the inter-poll sleep.
//
// The poller also owns the last attribute set the infrastructure accepted:
// the device is re-probed on a slow cadence and only deltas are pushed.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use pressgate_core::error::Result;
use pressgate_core::types::JobState;

use crate::client::IppSession;
use crate::jobs::JobTable;
use crate::proto::{
    IppAttribute, IppValue, Operation, TAG_EVENT_NOTIFICATION_ATTRIBUTES, TAG_JOB_ATTRIBUTES,
    TAG_OPERATION_ATTRIBUTES,
};
use crate::proto::message::IppMessage;
use crate::proxy::ProxyShared;
use crate::{probe, reconcile};

/// Poll cadence when the response does not name one.
const DEFAULT_GET_INTERVAL: u64 = 10;

/// Upper bound on the poll cadence.
const MAX_GET_INTERVAL: u64 = 30;

/// How often the local device is re-probed for capability changes.
const DEVICE_REPROBE_INTERVAL: Duration = Duration::from_secs(300);

/// One event-notification group, reduced to the fields the proxy acts on.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub event: Option<String>,
    pub job_id: i32,
    pub job_state: Option<JobState>,
    pub sequence_number: Option<i32>,
    pub identify_requested: bool,
}

/// Clamp `notify-get-interval` to `[0, 30]`, defaulting to 10 when absent.
pub fn clamp_interval(value: Option<i32>) -> u64 {
    match value {
        None => DEFAULT_GET_INTERVAL,
        Some(v) if v <= 0 => 0,
        Some(v) => (v as u64).min(MAX_GET_INTERVAL),
    }
}

/// Reduce a Get-Notifications response to one record per event group.
pub fn parse_events(response: &IppMessage) -> Vec<EventRecord> {
    response
        .groups_of(TAG_EVENT_NOTIFICATION_ATTRIBUTES)
        .map(|group| {
            let mut record = EventRecord::default();
            for attr in &group.attrs {
                match attr.name.as_str() {
                    "notify-subscribed-event" => {
                        record.event = attr.as_str().map(str::to_owned);
                    }
                    "job-id" | "notify-job-id" => {
                        if let Some(id) = attr.as_integer() {
                            record.job_id = id;
                        }
                    }
                    "job-state" => {
                        record.job_state =
                            attr.as_integer().filter(|v| *v > 0).and_then(JobState::from_i32);
                    }
                    "notify-sequence-number" => {
                        record.sequence_number = attr.as_integer();
                    }
                    "printer-state-reasons" => {
                        if attr.contains_str("identify-printer-requested") {
                            record.identify_requested = true;
                        }
                    }
                    _ => {}
                }
            }
            record
        })
        .collect()
}

/// Apply one job event to the table.  Returns `true` when the worker should
/// be signalled.
pub fn apply_job_event(jobs: &JobTable, record: &EventRecord) -> bool {
    let Some(event) = &record.event else {
        return false;
    };
    let job_id = record.job_id;
    if job_id <= 0 {
        return false;
    }

    match event.as_str() {
        "job-fetchable" => {
            let state = record.job_state.unwrap_or(JobState::Pending);
            if jobs.insert(job_id, state) {
                info!(job_id, "job is now fetchable, queuing up");
                true
            } else {
                false
            }
        }
        "job-state-changed" => {
            let Some(state) = record.job_state else {
                return false;
            };
            // If the worker is mid-relay and the job was canceled or
            // aborted, it observes this on its next table read.
            if jobs.set_remote_state(job_id, state) {
                info!(job_id, state = %state, "updated remote job-state");
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Poll the subscription until shutdown.  `device_attrs` is the attribute
/// set the infrastructure last accepted; it is refreshed in place as
/// re-probes land.
pub async fn run(
    session: &mut IppSession,
    shared: &ProxyShared,
    subscription_id: i32,
    mut device_attrs: Vec<IppAttribute>,
) {
    let mut seq_number: i32 = 1;
    let mut last_probe = Instant::now();

    while !shared.shutdown.is_set() {
        let mut request = shared.infra_request(Operation::GetNotifications);
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("notify-subscription-ids", IppValue::Integer(subscription_id)),
        );
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("notify-sequence-numbers", IppValue::Integer(seq_number)),
        );
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("notify-wait", IppValue::Boolean(false)),
        );

        let interval = match session.send(request).await {
            Ok(response) => {
                let interval = clamp_interval(
                    response.find("notify-get-interval").and_then(IppAttribute::as_integer),
                );
                let events = parse_events(&response);
                drop(response);

                for record in &events {
                    if record.identify_requested {
                        acknowledge_identify_printer(session, shared).await;
                    }
                    if let Some(seq) = record.sequence_number {
                        if seq >= seq_number {
                            seq_number = seq + 1;
                        }
                    }
                    if apply_job_event(&shared.jobs, record) {
                        shared.jobs.signal();
                    }
                }

                debug!(interval, seq_number, events = events.len(), "notification poll complete");
                interval
            }
            Err(err) => {
                warn!(error = %err, "Get-Notifications failed, retrying after the default interval");
                DEFAULT_GET_INTERVAL
            }
        };

        if shared.shutdown.sleep(Duration::from_secs(interval)).await {
            break;
        }

        // The peer may have idle-closed the connection while we slept.
        session.reset();

        if last_probe.elapsed() >= DEVICE_REPROBE_INTERVAL {
            last_probe = Instant::now();
            refresh_device_attrs(session, shared, &mut device_attrs).await;
        }
    }
}

/// Re-probe the device and push whatever changed since the last accepted
/// set.  Failures keep the old set and wait for the next cadence.
async fn refresh_device_attrs(
    session: &mut IppSession,
    shared: &ProxyShared,
    device_attrs: &mut Vec<IppAttribute>,
) {
    let probed = match probe::device_attributes_once(
        &shared.device,
        &shared.device_uri,
        &shared.username,
        shared.password.clone(),
    )
    .await
    {
        Ok(probed) => probed,
        Err(err) => {
            warn!(error = %err, "device re-probe failed, keeping last reported attributes");
            return;
        }
    };

    match reconcile::push_device_attrs(session, shared, device_attrs, probed).await {
        Ok(accepted) => *device_attrs = accepted,
        Err(err) => {
            warn!(error = %err, "device attribute update failed, keeping last reported attributes");
        }
    }
}

/// Answer an identify-printer request: acknowledge it, then make the
/// requested noise in the log.
async fn acknowledge_identify_printer(session: &mut IppSession, shared: &ProxyShared) {
    let request = shared.infra_request(Operation::AcknowledgeIdentifyPrinter);
    let response = match session.send(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "unable to acknowledge identify-printer");
            return;
        }
    };

    let actions = response.find("identify-actions");
    let message =
        response.find("message").and_then(IppAttribute::as_str).unwrap_or("No message supplied");

    if actions.is_some_and(|a| a.contains_str("display")) {
        info!("IDENTIFY-PRINTER: display ({message})");
    }
    if actions.is_none_or(|a| a.contains_str("sound")) {
        info!("IDENTIFY-PRINTER: sound\u{0007}");
    }
}

/// Startup scan: seed the table with jobs that became fetchable while the
/// proxy was away.
pub async fn seed_fetchable_jobs(session: &mut IppSession, shared: &ProxyShared) -> Result<()> {
    info!("getting fetchable jobs");

    let mut request = shared.infra_request(Operation::GetJobs);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("which-jobs", IppValue::Keyword("fetchable".into())),
    );

    let response = session.send_checked(Operation::GetJobs, request).await?;

    for group in response.groups_of(TAG_JOB_ATTRIBUTES) {
        let job_id = group.find("job-id").and_then(IppAttribute::as_integer).unwrap_or(0);
        let job_state = group
            .find("job-state")
            .and_then(IppAttribute::as_integer)
            .and_then(JobState::from_i32)
            .unwrap_or(JobState::Pending);

        if job_id > 0
            && matches!(job_state, JobState::Pending | JobState::ProcessingStopped)
            && shared.jobs.insert(job_id, job_state)
        {
            info!(job_id, "job is fetchable, queuing up");
            shared.jobs.signal();
        }
    }

    Ok(())
}
