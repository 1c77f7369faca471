// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device attribute reconciliation: push only what changed.
//
// The infrastructure printer mirrors the local device's capabilities.  On
// every probe, tracked attributes whose value cannot be proven equal to the
// last accepted set are sent in one Update-Output-Device-Attributes request;
// a probe with no deltas sends nothing at all.

use tracing::{debug, info};

use pressgate_core::error::Result;

use crate::client::IppSession;
use crate::probe::REPORTED_ATTRIBUTES;
use crate::proto::value::attrs_are_equal;
use crate::proto::{IppAttribute, Operation, TAG_PRINTER_ATTRIBUTES};
use crate::proxy::ProxyShared;

/// Tracked attributes from `new` that differ from `previous` under the
/// conservative equality rule.
pub fn changed_attributes(previous: &[IppAttribute], new: &[IppAttribute]) -> Vec<IppAttribute> {
    new.iter()
        .filter(|attr| REPORTED_ATTRIBUTES.contains(&attr.name.as_str()))
        .filter(|attr| {
            let old = previous.iter().find(|p| p.name == attr.name);
            !attrs_are_equal(old, Some(attr))
        })
        .cloned()
        .collect()
}

/// Report the probed attribute set to the infrastructure printer and return
/// it as the new accepted set.
pub async fn push_device_attrs(
    session: &mut IppSession,
    shared: &ProxyShared,
    previous: &[IppAttribute],
    new: Vec<IppAttribute>,
) -> Result<Vec<IppAttribute>> {
    let changed = changed_attributes(previous, &new);
    if changed.is_empty() {
        debug!("device attributes unchanged, nothing to update");
        return Ok(new);
    }

    let count = changed.len();
    let mut request = shared.infra_request(Operation::UpdateOutputDeviceAttributes);
    request.begin_group(TAG_PRINTER_ATTRIBUTES);
    for attr in changed {
        request.add(TAG_PRINTER_ATTRIBUTES, attr);
    }

    session.send_checked(Operation::UpdateOutputDeviceAttributes, request).await?;

    info!(count, "updated output device attributes");
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::IppValue;

    fn kw(name: &str, value: &str) -> IppAttribute {
        IppAttribute::new(name, IppValue::Keyword(value.into()))
    }

    #[test]
    fn first_push_sends_every_tracked_attribute() {
        let new = vec![kw("media-default", "iso_a4_210x297mm"), kw("sides-default", "one-sided")];
        let changed = changed_attributes(&[], &new);
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn identical_probe_produces_no_deltas() {
        let probe = vec![
            kw("media-default", "iso_a4_210x297mm"),
            IppAttribute::new("copies-default", IppValue::Integer(1)),
        ];
        assert!(changed_attributes(&probe, &probe.clone()).is_empty());
    }

    #[test]
    fn changed_value_is_detected() {
        let old = vec![kw("media-default", "iso_a4_210x297mm")];
        let new = vec![kw("media-default", "na_letter_8.5x11in")];
        let changed = changed_attributes(&old, &new);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].as_str(), Some("na_letter_8.5x11in"));
    }

    #[test]
    fn attribute_missing_from_previous_set_is_a_delta() {
        let old = vec![kw("media-default", "iso_a4_210x297mm")];
        let new = vec![
            kw("media-default", "iso_a4_210x297mm"),
            kw("sides-default", "two-sided-long-edge"),
        ];
        let changed = changed_attributes(&old, &new);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].name, "sides-default");
    }

    #[test]
    fn untracked_attributes_never_leave_the_proxy() {
        let new = vec![kw("printer-make-and-model", "ACME LaserWriter")];
        assert!(changed_attributes(&[], &new).is_empty());
    }

    #[test]
    fn unprovable_equality_forces_an_update() {
        // Collections cannot be proven equal, so every probe re-sends them.
        let col = IppAttribute::new(
            "media-col-default",
            IppValue::Collection(vec![(
                "media-size-name".into(),
                IppValue::Keyword("iso_a4_210x297mm".into()),
            )]),
        );
        let changed = changed_attributes(std::slice::from_ref(&col), &[col.clone()]);
        assert_eq!(changed.len(), 1);
    }
}
