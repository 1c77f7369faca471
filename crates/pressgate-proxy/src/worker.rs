// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The job worker: fetch, print, report.
//
// One worker drains the job table oldest-first.  Each job runs through an
// atomic state machine: Fetch-Job, Acknowledge-Job, then per document
// Update-Document-Status / Fetch-Document / local delivery /
// Acknowledge-Document, and finally Update-Job-Status with the terminal
// relay state.  A job that cannot be fetched because another output device
// claimed it first completes silently; every other failure aborts only the
// job at hand.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use pressgate_core::types::{DocumentState, JobState};

use crate::client::IppSession;
use crate::proto::{
    status_is_error, IppAttribute, IppMessage, IppValue, Operation,
    STATUS_CLIENT_ERROR_NOT_FETCHABLE, TAG_DOCUMENT_ATTRIBUTES, TAG_JOB_ATTRIBUTES,
    TAG_OPERATION_ATTRIBUTES,
};
use crate::proxy::ProxyShared;
use crate::transport::{self, Delivery};

/// Liveness backstop for the idle wait; the poller's signal normally wakes
/// the worker long before this.
const IDLE_WAIT: Duration = Duration::from_secs(15);

/// Formats tried, in order, when the device cannot take PDF and the caller
/// did not force a format.
const FALLBACK_FORMATS: &[&str] = &["image/urf", "image/pwg-raster", "application/vnd.hp-pcl"];

/// Pick the `document-format-accepted` value for Fetch-Document.  `None`
/// leaves the choice to the infrastructure printer.
pub fn select_output_format(
    preferred: Option<&str>,
    device_formats: &[String],
) -> Option<String> {
    if let Some(format) = preferred {
        return Some(format.to_owned());
    }
    if device_formats.iter().any(|f| f == "application/pdf") {
        return None;
    }
    FALLBACK_FORMATS
        .iter()
        .find(|wanted| device_formats.iter().any(|f| f == **wanted))
        .map(|s| (*s).to_string())
}

/// `number-of-documents`, defaulting to one when absent or nonsensical.
pub fn document_count(job_attrs: &IppMessage) -> i32 {
    job_attrs
        .find("number-of-documents")
        .and_then(IppAttribute::as_integer)
        .filter(|n| *n >= 1)
        .unwrap_or(1)
}

/// Worker task body: run jobs until shutdown, pruning terminal records
/// while idle.
pub async fn run(shared: Arc<ProxyShared>) {
    debug!("job worker starting");

    while !shared.shutdown.is_set() {
        match shared.jobs.next_runnable() {
            Some(job) => run_job(&shared, job.remote_job_id).await,
            None => {
                let pruned = shared.jobs.prune();
                if pruned > 0 {
                    debug!(pruned, "pruned terminal job records");
                }
                shared.jobs.wait_for_change(IDLE_WAIT).await;
            }
        }
    }

    debug!("job worker stopped");
}

/// The per-job state machine.
async fn run_job(shared: &ProxyShared, job_id: i32) {
    // The worker talks to the infrastructure over its own session so a slow
    // document transfer never blocks event polling.
    let mut session = match shared.connect_infra().await {
        Ok(session) => session,
        Err(_) => return, // only fails on shutdown
    };

    let accepted_format =
        select_output_format(shared.output_format.as_deref(), &shared.device_formats);

    // Fetch the job.
    let mut request = shared.infra_request(Operation::FetchJob);
    request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));

    let job_attrs = match session.send(request).await {
        Ok(response) => {
            let status = response.status();
            if status == STATUS_CLIENT_ERROR_NOT_FETCHABLE {
                // Another output device won the race; nothing to report.
                info!(job_id, "job already fetched by another printer");
                shared.jobs.set_local_state(job_id, JobState::Completed);
                return;
            }
            if status_is_error(status) {
                let status_hex = format!("0x{status:04x}");
                warn!(job_id, status = %status_hex, "unable to fetch job");
                shared.jobs.set_local_state(job_id, JobState::Aborted);
                update_job_status(&mut session, shared, job_id).await;
                return;
            }
            response
        }
        Err(err) => {
            warn!(job_id, error = %err, "unable to fetch job");
            shared.jobs.set_local_state(job_id, JobState::Aborted);
            update_job_status(&mut session, shared, job_id).await;
            return;
        }
    };

    // Claim it.
    let mut request = shared.infra_request(Operation::AcknowledgeJob);
    request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));
    if let Err(err) = session.send_checked(Operation::AcknowledgeJob, request).await {
        warn!(job_id, error = %err, "unable to acknowledge job");
        shared.jobs.set_local_state(job_id, JobState::Aborted);
        update_job_status(&mut session, shared, job_id).await;
        return;
    }

    let num_docs = document_count(&job_attrs);
    info!(job_id, num_docs, "fetched job");

    shared.jobs.set_local_state(job_id, JobState::Processing);
    update_job_status(&mut session, shared, job_id).await;

    for doc_number in 1..=num_docs {
        if remote_state(shared, job_id) >= JobState::Aborted {
            break;
        }

        update_document_status(&mut session, shared, job_id, doc_number, DocumentState::Processing)
            .await;

        // Fetch the document data.
        let mut request = shared.infra_request(Operation::FetchDocument);
        request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("document-number", IppValue::Integer(doc_number)),
        );
        if let Some(format) = &accepted_format {
            request.add(
                TAG_OPERATION_ATTRIBUTES,
                IppAttribute::new(
                    "document-format-accepted",
                    IppValue::MimeMediaType(format.clone()),
                ),
            );
        }

        let mut doc = match session.send_with_payload(request, None).await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(job_id, doc_number, error = %err, "unable to fetch document");
                shared.jobs.set_local_state(job_id, JobState::Aborted);
                break;
            }
        };
        if status_is_error(doc.message.status()) {
            let status_hex = format!("0x{:04x}", doc.message.status());
            let _ = doc.drain().await;
            warn!(job_id, doc_number, status = %status_hex, "unable to fetch document");
            shared.jobs.set_local_state(job_id, JobState::Aborted);
            break;
        }

        // Deliver to the local device unless the job died in the meantime.
        if remote_state(shared, job_id) < JobState::Aborted {
            match transport::send_document(shared, job_id, &job_attrs, &mut doc).await {
                Ok(Delivery::Completed) => {}
                Ok(Delivery::Canceled) => {
                    shared.jobs.set_local_state(job_id, JobState::Canceled);
                }
                Err(err) => {
                    warn!(job_id, doc_number, error = %err, "unable to print document");
                    shared.jobs.set_local_state(job_id, JobState::Aborted);
                }
            }
        }

        // Leave the session clean for the acknowledgement even when the
        // transport stopped short of the end of the payload.
        if let Err(err) = doc.drain().await {
            warn!(job_id, doc_number, error = %err, "unable to drain document stream");
            drop(doc);
            shared.jobs.set_local_state(job_id, JobState::Aborted);
            break;
        }
        drop(doc);

        // Acknowledge receipt of the document data.
        let mut request = shared.infra_request(Operation::AcknowledgeDocument);
        request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("document-number", IppValue::Integer(doc_number)),
        );
        if let Err(err) = session.send_checked(Operation::AcknowledgeDocument, request).await {
            warn!(job_id, doc_number, error = %err, "unable to acknowledge document");
        }

        // A document that aborted or was canceled ends the job here.
        let local = local_state(shared, job_id);
        if local >= JobState::Canceled && local != JobState::Completed {
            break;
        }

        update_document_status(&mut session, shared, job_id, doc_number, DocumentState::Completed)
            .await;
    }

    // Anything still in flight at this point finished cleanly.
    if local_state(shared, job_id) == JobState::Processing {
        shared.jobs.set_local_state(job_id, JobState::Completed);
    }

    update_job_status(&mut session, shared, job_id).await;
}

fn remote_state(shared: &ProxyShared, job_id: i32) -> JobState {
    shared.jobs.get(job_id).map(|j| j.remote_job_state).unwrap_or(JobState::Aborted)
}

fn local_state(shared: &ProxyShared, job_id: i32) -> JobState {
    shared.jobs.get(job_id).map(|j| j.local_job_state).unwrap_or(JobState::Aborted)
}

/// Report the relay state for the whole job.
async fn update_job_status(session: &mut IppSession, shared: &ProxyShared, job_id: i32) {
    let state = local_state(shared, job_id);

    let mut request = shared.infra_request(Operation::UpdateJobStatus);
    request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));
    request.begin_group(TAG_JOB_ATTRIBUTES);
    request.add(
        TAG_JOB_ATTRIBUTES,
        IppAttribute::new("output-device-job-state", IppValue::Enum(state.as_i32())),
    );

    if let Err(err) = session.send_checked(Operation::UpdateJobStatus, request).await {
        warn!(job_id, error = %err, "unable to update the job state");
    }
}

/// Report the relay state for one document.
async fn update_document_status(
    session: &mut IppSession,
    shared: &ProxyShared,
    job_id: i32,
    doc_number: i32,
    state: DocumentState,
) {
    let mut request = shared.infra_request(Operation::UpdateDocumentStatus);
    request.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(job_id)));
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("document-number", IppValue::Integer(doc_number)),
    );
    request.begin_group(TAG_DOCUMENT_ATTRIBUTES);
    request.add(
        TAG_DOCUMENT_ATTRIBUTES,
        IppAttribute::new("output-device-document-state", IppValue::Enum(state.as_i32())),
    );

    if let Err(err) = session.send_checked(Operation::UpdateDocumentStatus, request).await {
        warn!(job_id, doc_number, error = %err, "unable to update the document state");
    }
}
