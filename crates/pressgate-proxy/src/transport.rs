// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local device transports.
//
// `socket://` is AppSocket/JetDirect: open TCP, write the document bytes,
// close.  `ipp://`/`ipps://` devices get a proper job: Create-Job plus
// Send-Document when the device supports the pair, Print-Job otherwise,
// followed by a job-state watch so remote cancellation can be relayed.
//
// Document bytes stream straight from the infrastructure response into the
// device connection in 16 KiB chunks.  The single exception is compression
// the device cannot accept: those documents are inflated in memory first,
// the framing changes, the page data does not.

use std::io::Read;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use pressgate_core::error::{PressgateError, Result};
use pressgate_core::types::JobState;

use crate::client::{IppResponse, IppSession, CHUNK_SIZE, CONNECT_TIMEOUT};
use crate::proto::{
    status_is_error, IppAttribute, IppMessage, IppValue, Operation, TAG_JOB_ATTRIBUTES,
    TAG_OPERATION_ATTRIBUTES,
};
use crate::proxy::ProxyShared;
use crate::source::DocumentSource;
use crate::uri::Scheme;

/// Operation attributes copied from the fetched job to the local device.
const COPIED_OPERATION_ATTRS: &[&str] =
    &["job-name", "job-password", "job-password-encryption", "job-priority"];

/// Job template attributes copied from the fetched job to the local device.
const COPIED_JOB_TEMPLATE_ATTRS: &[&str] = &[
    "copies",
    "finishings",
    "finishings-col",
    "job-account-id",
    "job-accounting-user-id",
    "media",
    "media-col",
    "multiple-document-handling",
    "orientation-requested",
    "page-ranges",
    "print-color-mode",
    "print-quality",
    "sides",
];

/// How a delivered document left the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The document was printed (or handed off) successfully.
    Completed,
    /// The remote job was canceled; the local job was canceled too.
    Canceled,
}

/// Relay one fetched document to the local device.
pub async fn send_document(
    shared: &ProxyShared,
    remote_job_id: i32,
    job_attrs: &IppMessage,
    doc: &mut IppResponse<'_>,
) -> Result<Delivery> {
    let compression = doc
        .message
        .find("compression")
        .and_then(IppAttribute::as_str)
        .filter(|c| *c != "none")
        .map(str::to_owned);
    let doc_format = doc
        .message
        .find("document-format")
        .and_then(IppAttribute::as_str)
        .unwrap_or("application/octet-stream")
        .to_owned();

    match shared.device.scheme {
        Scheme::Socket => {
            send_raw(shared, remote_job_id, compression.as_deref(), doc).await?;
            Ok(Delivery::Completed)
        }
        Scheme::Ipp | Scheme::Ipps => {
            send_ipp(shared, remote_job_id, &doc_format, compression, job_attrs, doc).await
        }
    }
}

// ---------------------------------------------------------------------------
// AppSocket
// ---------------------------------------------------------------------------

/// Dump the document bytes onto the device's TCP port.  No protocol, no
/// feedback; the printer interprets the stream natively.
async fn send_raw(
    shared: &ProxyShared,
    remote_job_id: i32,
    compression: Option<&str>,
    doc: &mut IppResponse<'_>,
) -> Result<()> {
    let device = &shared.device;
    debug!(job_id = remote_job_id, device = %device.authority(), "connecting via raw TCP");

    let mut stream = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((device.host.as_str(), device.port)),
    )
    .await
    .map_err(|_| {
        PressgateError::Device(format!(
            "raw TCP connection to '{}' timed out after {}s",
            device.authority(),
            CONNECT_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| PressgateError::Device(format!("raw TCP connect to '{}': {e}", device.authority())))?;

    let total = match compression {
        // An AppSocket printer cannot negotiate; inflate before sending.
        Some(coding) => {
            let mut inflated = std::io::Cursor::new(decompress_document(doc, coding).await?);
            copy_document(&mut inflated, &mut stream).await?
        }
        None => copy_document(doc, &mut stream).await?,
    };

    stream
        .flush()
        .await
        .map_err(|e| PressgateError::Device(format!("raw TCP flush: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| PressgateError::Device(format!("raw TCP shutdown: {e}")))?;

    info!(job_id = remote_job_id, bytes = total, "local job created");
    Ok(())
}

/// Stream `source` into `sink` in bounded chunks, retrying short writes.
async fn copy_document<W>(source: &mut (dyn DocumentSource + '_), sink: &mut W) -> Result<u64>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| PressgateError::Device(format!("write at byte {total}: {e}")))?;
        total += n as u64;
    }
}

// ---------------------------------------------------------------------------
// IPP(S) device
// ---------------------------------------------------------------------------

/// Whether the device can take Create-Job followed by Send-Document.
fn supports_create_job(operations: &IppAttribute) -> bool {
    operations.contains_integer(Operation::CreateJob.as_u16() as i32)
        && operations.contains_integer(Operation::SendDocument.as_u16() as i32)
}

/// Keep the compression attribute only when the device advertises it.
fn device_accepts_compression(supported: Option<&IppAttribute>, coding: &str) -> bool {
    supported.is_some_and(|attr| attr.contains_str(coding))
}

fn device_request(shared: &ProxyShared, operation: Operation) -> IppMessage {
    let mut request = IppMessage::request(operation, 0);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("printer-uri", IppValue::Uri(shared.device_uri.clone())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("requesting-user-name", IppValue::Name(shared.username.clone())),
    );
    request
}

/// Copy the whitelisted job attributes from the fetched job into a local
/// submission request.
fn copy_job_attrs(request: &mut IppMessage, job_attrs: &IppMessage) {
    for name in COPIED_OPERATION_ATTRS {
        if let Some(attr) = job_attrs.find(name) {
            request.add(TAG_OPERATION_ATTRIBUTES, attr.clone());
        }
    }
    for name in COPIED_JOB_TEMPLATE_ATTRS {
        if let Some(attr) = job_attrs.find(name) {
            request.add(TAG_JOB_ATTRIBUTES, attr.clone());
        }
    }
}

async fn send_ipp(
    shared: &ProxyShared,
    remote_job_id: i32,
    doc_format: &str,
    mut compression: Option<String>,
    job_attrs: &IppMessage,
    doc: &mut IppResponse<'_>,
) -> Result<Delivery> {
    let mut device = IppSession::connect(
        shared.device.clone(),
        &shared.username,
        shared.password.clone(),
    )
    .await
    .map_err(|e| PressgateError::Device(format!("unable to connect to '{}': {e}", shared.device_uri)))?;

    // What can this printer actually do?
    let mut request = device_request(shared, Operation::GetPrinterAttributes);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new_set(
            "requested-attributes",
            vec![
                IppValue::Keyword("compression-supported".into()),
                IppValue::Keyword("operations-supported".into()),
            ],
        ),
    );
    let capabilities = device.send_checked(Operation::GetPrinterAttributes, request).await?;

    let operations = capabilities.find("operations-supported").ok_or_else(|| {
        PressgateError::Device("unable to get list of supported operations from printer".into())
    })?;
    let create_job = supports_create_job(operations);

    // Inflate in memory when the device cannot take the coding as-is.
    let mut inflated: Option<std::io::Cursor<Vec<u8>>> = None;
    if let Some(coding) = compression.clone() {
        if !device_accepts_compression(capabilities.find("compression-supported"), &coding) {
            debug!(job_id = remote_job_id, coding = %coding, "device lacks compression, inflating");
            inflated = Some(std::io::Cursor::new(decompress_document(doc, &coding).await?));
            compression = None;
        }
    }

    // Create the job and start printing.
    let mut request = device_request(
        shared,
        if create_job { Operation::CreateJob } else { Operation::PrintJob },
    );
    if !create_job {
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("document-format", IppValue::MimeMediaType(doc_format.into())),
        );
        if let Some(coding) = &compression {
            request.add(
                TAG_OPERATION_ATTRIBUTES,
                IppAttribute::new("compression", IppValue::Keyword(coding.clone())),
            );
        }
    }
    copy_job_attrs(&mut request, job_attrs);

    let mut local_job_id = 0;
    let final_request = if create_job {
        let response = device.send_checked(Operation::CreateJob, request).await?;
        local_job_id =
            response.find("job-id").and_then(IppAttribute::as_integer).unwrap_or(0);
        if local_job_id <= 0 {
            return Err(PressgateError::Device("no job-id returned by Create-Job".into()));
        }
        shared.jobs.set_local_job_id(remote_job_id, local_job_id);

        let mut send = device_request(shared, Operation::SendDocument);
        send.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(local_job_id)));
        send.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("document-format", IppValue::MimeMediaType(doc_format.into())),
        );
        if let Some(coding) = &compression {
            send.add(
                TAG_OPERATION_ATTRIBUTES,
                IppAttribute::new("compression", IppValue::Keyword(coding.clone())),
            );
        }
        send.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("last-document", IppValue::Boolean(true)));
        send
    } else {
        request
    };

    let payload: &mut (dyn DocumentSource + '_) = match inflated.as_mut() {
        Some(cursor) => cursor,
        None => doc,
    };
    let mut response = device.send_with_payload(final_request, Some(payload)).await?;
    let message = response.message.clone();
    response.drain().await?;

    if status_is_error(message.status()) {
        return Err(PressgateError::Device(format!(
            "unable to create local job: status 0x{:04x}",
            message.status()
        )));
    }

    if local_job_id == 0 {
        local_job_id = message.find("job-id").and_then(IppAttribute::as_integer).unwrap_or(0);
        if local_job_id > 0 {
            shared.jobs.set_local_job_id(remote_job_id, local_job_id);
        }
    }
    let mut local_state = message
        .find("job-state")
        .and_then(IppAttribute::as_integer)
        .and_then(JobState::from_i32)
        .unwrap_or(JobState::Processing);

    info!(job_id = remote_job_id, local_job_id, "local job created");

    // Watch the local job until it terminates, or the remote job is pulled
    // out from under it.
    let mut remote_state = current_remote_state(shared, remote_job_id);
    while remote_state < JobState::Canceled
        && local_state < JobState::Canceled
        && local_job_id > 0
        && !shared.shutdown.is_set()
    {
        let mut poll = device_request(shared, Operation::GetJobAttributes);
        poll.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(local_job_id)));
        poll.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("requested-attributes", IppValue::Keyword("job-state".into())),
        );

        match device.send(poll).await {
            Ok(response) if !status_is_error(response.status()) => {
                local_state = response
                    .find("job-state")
                    .and_then(IppAttribute::as_integer)
                    .and_then(JobState::from_i32)
                    .unwrap_or(JobState::Completed);
            }
            // A device that stops answering is treated as having finished.
            Ok(_) | Err(_) => local_state = JobState::Completed,
        }

        if local_state < JobState::Canceled {
            let _ = shared.shutdown.sleep(Duration::from_secs(1)).await;
        }
        remote_state = current_remote_state(shared, remote_job_id);
    }

    if remote_state == JobState::Canceled && local_job_id > 0 {
        info!(job_id = remote_job_id, local_job_id, "canceling job locally");
        let mut cancel = device_request(shared, Operation::CancelJob);
        cancel.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(local_job_id)));
        match device.send(cancel).await {
            Ok(response) if status_is_error(response.status()) => {
                warn!(
                    job_id = remote_job_id,
                    status = response.status(),
                    "unable to cancel local job"
                );
            }
            Err(err) => warn!(job_id = remote_job_id, error = %err, "unable to cancel local job"),
            Ok(_) => {}
        }
        return Ok(Delivery::Canceled);
    }

    Ok(Delivery::Completed)
}

fn current_remote_state(shared: &ProxyShared, remote_job_id: i32) -> JobState {
    shared
        .jobs
        .get(remote_job_id)
        .map(|job| job.remote_job_state)
        .unwrap_or(JobState::Completed)
}

// ---------------------------------------------------------------------------
// Compression transcoding
// ---------------------------------------------------------------------------

/// Inflate a compressed document into memory.  Only used when the local
/// device does not advertise the inbound coding.
async fn decompress_document(
    doc: &mut (dyn DocumentSource + '_),
    coding: &str,
) -> Result<Vec<u8>> {
    let mut compressed = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = doc.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        compressed.extend_from_slice(&buf[..n]);
    }

    let mut inflated = Vec::new();
    match coding {
        "gzip" => {
            flate2::read::MultiGzDecoder::new(compressed.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| PressgateError::Device(format!("gzip decode: {e}")))?;
        }
        "deflate" => {
            flate2::read::ZlibDecoder::new(compressed.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| PressgateError::Device(format!("deflate decode: {e}")))?;
        }
        other => {
            return Err(PressgateError::Device(format!("unsupported compression '{other}'")));
        }
    }
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ops(values: &[Operation]) -> IppAttribute {
        IppAttribute::new_set(
            "operations-supported",
            values.iter().map(|op| IppValue::Enum(op.as_u16() as i32)).collect(),
        )
    }

    #[test]
    fn create_job_requires_both_operations() {
        assert!(supports_create_job(&ops(&[
            Operation::PrintJob,
            Operation::CreateJob,
            Operation::SendDocument,
        ])));
        assert!(!supports_create_job(&ops(&[Operation::PrintJob, Operation::CreateJob])));
        assert!(!supports_create_job(&ops(&[Operation::PrintJob, Operation::SendDocument])));
        assert!(!supports_create_job(&ops(&[Operation::PrintJob])));
    }

    #[test]
    fn compression_kept_only_when_advertised() {
        let supported = IppAttribute::new_set(
            "compression-supported",
            vec![IppValue::Keyword("none".into()), IppValue::Keyword("gzip".into())],
        );
        assert!(device_accepts_compression(Some(&supported), "gzip"));
        assert!(!device_accepts_compression(Some(&supported), "deflate"));
        assert!(!device_accepts_compression(None, "gzip"));
    }

    #[tokio::test]
    async fn gzip_documents_inflate_back_to_the_original_bytes() {
        let original = b"\x1b%-12345X@PJL ENTER LANGUAGE=PCL\r\n...page data...";
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(original).expect("compress");
        let compressed = encoder.finish().expect("finish");

        let mut source = std::io::Cursor::new(compressed);
        let inflated = decompress_document(&mut source, "gzip").await.expect("inflate");
        assert_eq!(inflated, original);
    }

    #[tokio::test]
    async fn unknown_codings_are_rejected() {
        let mut source = std::io::Cursor::new(vec![1, 2, 3]);
        assert!(decompress_document(&mut source, "compress").await.is_err());
    }

    #[tokio::test]
    async fn copy_document_moves_every_byte() {
        let payload = vec![0xA5u8; 3 * CHUNK_SIZE + 17];
        let mut source = std::io::Cursor::new(payload.clone());
        let mut sink = Vec::new();
        let total = copy_document(&mut source, &mut sink).await.expect("copy");
        assert_eq!(total, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[test]
    fn job_attribute_copy_is_allowlisted() {
        let mut fetched = IppMessage::response(crate::proto::STATUS_OK, 1);
        fetched.begin_group(TAG_JOB_ATTRIBUTES);
        fetched.add(TAG_JOB_ATTRIBUTES, IppAttribute::new("job-name", IppValue::Name("report".into())));
        fetched.add(TAG_JOB_ATTRIBUTES, IppAttribute::new("copies", IppValue::Integer(2)));
        fetched.add(
            TAG_JOB_ATTRIBUTES,
            IppAttribute::new("job-originating-user-name", IppValue::Name("alice".into())),
        );

        let mut request = IppMessage::request(Operation::PrintJob, 1);
        copy_job_attrs(&mut request, &fetched);

        assert!(request.find_in(TAG_OPERATION_ATTRIBUTES, "job-name").is_some());
        assert!(request.find_in(TAG_JOB_ATTRIBUTES, "copies").is_some());
        // Not on either allowlist: stays behind.
        assert!(request.find("job-originating-user-name").is_none());
    }
}
