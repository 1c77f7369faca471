// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output device registration against the infrastructure printer.
//
// A URI whose path is exactly `/ipp/system` points at a system service, not
// a printer: Register-Output-Device allocates (or finds) the print service
// for this device UUID and answers with its XRI record, whose `xri-uri`
// becomes the printer URI for everything that follows.

use tracing::{info, warn};

use pressgate_core::error::{PressgateError, Result};

use crate::client::{IppSession, PasswordSupplier};
use crate::proto::{
    IppAttribute, IppMessage, IppValue, Operation, STATUS_OK, TAG_OPERATION_ATTRIBUTES,
    TAG_SUBSCRIPTION_ATTRIBUTES,
};
use crate::proxy::ProxyShared;
use crate::uri::PrinterUri;

/// Events the subscription asks for.
const EVENTS: &[&str] = &[
    "document-config-changed",
    "document-state-changed",
    "job-config-changed",
    "job-fetchable",
    "job-state-changed",
    "printer-config-changed",
    "printer-state-changed",
];

/// Resolve the concrete printer URI, registering against the system service
/// when the configured URI points at one.  Returns the final URI (text and
/// parsed) plus a session connected to it.
pub async fn register_output_device(
    mut session: IppSession,
    printer_uri: String,
    printer: PrinterUri,
    device_uuid: &str,
    username: &str,
    password: Option<PasswordSupplier>,
) -> Result<(String, PrinterUri, IppSession)> {
    if printer.resource != "/ipp/system" {
        return Ok((printer_uri, printer, session));
    }

    let mut request = IppMessage::request(Operation::RegisterOutputDevice, 0);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("system-uri", IppValue::Uri(printer_uri.clone())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("output-device-uuid", IppValue::Uri(device_uuid.into())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("requesting-user-name", IppValue::Name(username.into())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("printer-service-type", IppValue::Keyword("print".into())),
    );

    let response = session
        .send_checked(Operation::RegisterOutputDevice, request)
        .await
        .map_err(|err| PressgateError::Registration(format!("unable to register: {err}")))?;

    // The first XRI record carries the print service URI.
    let xri_uri = response
        .find("printer-xri-supported")
        .and_then(IppAttribute::first)
        .and_then(IppValue::as_collection)
        .and_then(|members| {
            members.iter().find_map(|(name, value)| {
                (name == "xri-uri").then(|| value.as_str().map(str::to_owned)).flatten()
            })
        })
        .ok_or_else(|| {
            PressgateError::Registration("no print service XRI returned for output device".into())
        })?;

    info!(printer_uri = %xri_uri, "registered output device");

    let new_printer = PrinterUri::parse(&xri_uri)?;
    let new_session = IppSession::connect(new_printer.clone(), username, password)
        .await
        .map_err(|err| PressgateError::Registration(format!("reconnect to '{xri_uri}': {err}")))?;

    Ok((xri_uri, new_printer, new_session))
}

/// Create the pull subscription delivering job and printer events.
pub async fn subscribe(session: &mut IppSession, shared: &ProxyShared) -> Result<i32> {
    let mut request = shared.infra_request(Operation::CreatePrinterSubscriptions);
    request.begin_group(TAG_SUBSCRIPTION_ATTRIBUTES);
    request.add(
        TAG_SUBSCRIPTION_ATTRIBUTES,
        IppAttribute::new("notify-pull-method", IppValue::Keyword("ippget".into())),
    );
    request.add(
        TAG_SUBSCRIPTION_ATTRIBUTES,
        IppAttribute::new_set(
            "notify-events",
            EVENTS.iter().map(|e| IppValue::Keyword((*e).into())).collect(),
        ),
    );
    // Lease 0: the subscription lives until the proxy cancels it.
    request.add(
        TAG_SUBSCRIPTION_ATTRIBUTES,
        IppAttribute::new("notify-lease-duration", IppValue::Integer(0)),
    );

    let response = session
        .send(request)
        .await
        .map_err(|err| PressgateError::Registration(format!("subscription: {err}")))?;

    if response.status() != STATUS_OK {
        return Err(PressgateError::Registration(format!(
            "unable to monitor events on '{}': status 0x{:04x}",
            shared.printer_uri,
            response.status()
        )));
    }

    response
        .find("notify-subscription-id")
        .and_then(IppAttribute::as_integer)
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            PressgateError::Registration(format!(
                "unable to monitor events on '{}': no notify-subscription-id returned",
                shared.printer_uri
            ))
        })
}

/// Cancel the subscription, then deregister the output device.  Both calls
/// are best-effort: shutdown proceeds regardless.
pub async fn deregister(session: &mut IppSession, shared: &ProxyShared, subscription_id: i32) {
    let mut request = shared.infra_request(Operation::CancelSubscription);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("notify-subscription-id", IppValue::Integer(subscription_id)),
    );
    if let Err(err) = session.send(request).await {
        warn!(error = %err, "unable to cancel the event subscription");
    }

    let request = shared.infra_request(Operation::DeregisterOutputDevice);
    if let Err(err) = session.send(request).await {
        warn!(error = %err, "unable to deregister the output device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_event_list_matches_the_proxy_features() {
        // Fetchable jobs and state changes drive the worker; config events
        // keep the subscription warm for future capability pushes.
        assert!(EVENTS.contains(&"job-fetchable"));
        assert!(EVENTS.contains(&"job-state-changed"));
        assert_eq!(EVENTS.len(), 7);
    }
}
