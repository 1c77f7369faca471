// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Proxy context and top-level run loop.
//
// Startup order matters: the system registration may replace the printer
// URI, the probed device attributes must reach the infrastructure before
// the subscription exists, and the worker only starts once the startup scan
// has seeded the job table.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use pressgate_core::config::ProxyConfig;
use pressgate_core::error::{PressgateError, Result};

use crate::client::{IppSession, PasswordSupplier};
use crate::jobs::JobTable;
use crate::proto::{IppAttribute, IppMessage, IppValue, Operation, TAG_OPERATION_ATTRIBUTES};
use crate::shutdown::Shutdown;
use crate::uri::{PrinterUri, Scheme};
use crate::{events, probe, reconcile, registrar, worker};

/// Everything the poller and the worker share.  The printer URI is final by
/// the time this exists: system registration happens before construction.
pub struct ProxyShared {
    /// Infrastructure printer URI as sent in `printer-uri` attributes.
    pub printer_uri: String,
    /// Parsed form used for connecting.
    pub printer: PrinterUri,
    /// Local device URI as configured.
    pub device_uri: String,
    /// Parsed form used by the transport adapter.
    pub device: PrinterUri,
    /// Stable output-device UUID derived from the device URI.
    pub device_uuid: String,
    /// Caller-forced output format, if any.
    pub output_format: Option<String>,
    /// `document-format-supported` snapshot from the capability probe.
    pub device_formats: Vec<String>,
    pub username: String,
    pub password: Option<PasswordSupplier>,
    pub jobs: JobTable,
    pub shutdown: Shutdown,
}

impl ProxyShared {
    /// Request skeleton for the infrastructure printer.  Every request
    /// carries the printer URI, the output device UUID, and the user name.
    pub fn infra_request(&self, operation: Operation) -> IppMessage {
        let mut request = IppMessage::request(operation, 0);
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("printer-uri", IppValue::Uri(self.printer_uri.clone())),
        );
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("output-device-uuid", IppValue::Uri(self.device_uuid.clone())),
        );
        request.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("requesting-user-name", IppValue::Name(self.username.clone())),
        );
        request
    }

    /// Open a fresh session to the infrastructure printer, retrying with
    /// back-off until shutdown.
    pub async fn connect_infra(&self) -> Result<IppSession> {
        IppSession::connect_with_backoff(
            self.printer.clone(),
            &self.username,
            self.password.clone(),
            &self.shutdown,
        )
        .await
    }
}

/// Run the proxy until shutdown.  Returns `Registration` errors for the
/// caller to turn into exit code 1.
pub async fn run(config: ProxyConfig, shutdown: Shutdown) -> Result<()> {
    let device = PrinterUri::parse(&config.device_uri)?;
    let printer = PrinterUri::parse(&config.printer_uri)?;
    if printer.scheme == Scheme::Socket {
        return Err(PressgateError::InvalidUri(
            "the infrastructure printer must be an ipp:// or ipps:// URI".into(),
        ));
    }

    let password: Option<PasswordSupplier> = config.password.clone().map(|secret| {
        let supplier: PasswordSupplier = Arc::new(move |_authority: &str, _resource: &str| {
            Some(secret.clone())
        });
        supplier
    });

    let device_uuid = probe::device_uuid(Some(&config.device_uri));
    info!(device = %config.device_uri, uuid = %device_uuid, "derived output device UUID");

    // Connect and, when pointed at a system service, register to obtain the
    // concrete printer URI.
    info!(printer = %config.printer_uri, "connecting to infrastructure printer");
    let session = IppSession::connect_with_backoff(
        printer.clone(),
        &config.username,
        password.clone(),
        &shutdown,
    )
    .await?;

    let (printer_uri, printer, mut session) = registrar::register_output_device(
        session,
        config.printer_uri.clone(),
        printer,
        &device_uuid,
        &config.username,
        password.clone(),
    )
    .await?;

    // Probe the device and push its capabilities before subscribing, so the
    // infrastructure never advertises a device it knows nothing about.
    let device_attrs = probe::device_attributes(
        &device,
        &config.device_uri,
        &config.username,
        password.clone(),
        &shutdown,
    )
    .await?;

    let device_formats = device_attrs
        .iter()
        .find(|attr| attr.name == "document-format-supported")
        .map(IppAttribute::strings)
        .unwrap_or_default();

    let shared = Arc::new(ProxyShared {
        printer_uri,
        printer,
        device_uri: config.device_uri.clone(),
        device,
        device_uuid,
        output_format: config.output_format.clone(),
        device_formats,
        username: config.username.clone(),
        password,
        jobs: JobTable::new(),
        shutdown: shutdown.clone(),
    });

    // The accepted set becomes the baseline the poller diffs re-probes
    // against.
    let device_attrs = reconcile::push_device_attrs(&mut session, &shared, &[], device_attrs)
        .await
        .map_err(|err| PressgateError::Registration(format!("device attribute update: {err}")))?;

    let subscription_id = registrar::subscribe(&mut session, &shared).await?;
    info!(subscription_id, "monitoring infrastructure events");

    events::seed_fetchable_jobs(&mut session, &shared).await?;

    // The worker owns its own sessions; the poller keeps this one.
    let worker_handle: JoinHandle<()> = tokio::spawn(worker::run(Arc::clone(&shared)));

    events::run(&mut session, &shared, subscription_id, device_attrs).await;

    // Drain the worker before tearing the registration down.
    shared.shutdown.trigger();
    shared.jobs.signal();
    if let Err(err) = worker_handle.await {
        error!(error = %err, "job worker task failed");
    }

    registrar::deregister(&mut session, &shared, subscription_id).await;
    info!("proxy stopped");
    Ok(())
}
