// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local device capability probe.
//
// IPP devices answer Get-Printer-Attributes; AppSocket devices cannot, so
// they get a synthesized profile describing a typical monochrome PCL laser.
// AirPrint-class printers often advertise capabilities only in the compact
// URF encoding, which is widened here into the PWG raster attributes the
// infrastructure expects.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use pressgate_core::error::Result;

use crate::client::IppSession;
use crate::proto::{
    IppAttribute, IppMessage, IppValue, Operation, RESOLUTION_PER_INCH,
    STATUS_CLIENT_ERROR_BAD_REQUEST, TAG_OPERATION_ATTRIBUTES, TAG_PRINTER_ATTRIBUTES,
};
use crate::shutdown::Shutdown;
use crate::uri::{PrinterUri, Scheme};

/// The device attributes mirrored to the infrastructure printer.  Only
/// attributes on this list are probed, diffed, and pushed.
pub const REPORTED_ATTRIBUTES: &[&str] = &[
    "copies-default",
    "copies-supported",
    "document-format-default",
    "document-format-supported",
    "finishings-col-database",
    "finishings-col-default",
    "finishings-col-ready",
    "finishings-col-supported",
    "finishings-default",
    "finishings-supported",
    "jpeg-k-octets-supported",
    "media-bottom-margin-supported",
    "media-col-database",
    "media-col-default",
    "media-col-ready",
    "media-col-supported",
    "media-default",
    "media-left-margin-supported",
    "media-ready",
    "media-right-margin-supported",
    "media-size-supported",
    "media-source-supported",
    "media-supported",
    "media-top-margin-supported",
    "media-type-supported",
    "pdf-k-octets-supported",
    "print-color-mode-default",
    "print-color-mode-supported",
    "print-darkness-default",
    "print-darkness-supported",
    "print-quality-default",
    "print-quality-supported",
    "print-scaling-default",
    "print-scaling-supported",
    "printer-darkness-configured",
    "printer-darkness-supported",
    "printer-resolution-default",
    "printer-resolution-supported",
    "printer-state",
    "printer-state-reasons",
    "pwg-raster-document-resolution-supported",
    "pwg-raster-document-sheet-back",
    "pwg-raster-document-type-supported",
    "sides-default",
    "sides-supported",
    "urf-supported",
];

/// Margin used by the synthesized profile: 6.35 mm in hundredths of mm.
const DEFAULT_MARGIN: i32 = 635;

// ---------------------------------------------------------------------------
// Device UUID
// ---------------------------------------------------------------------------

/// Derive the stable output-device UUID from the device URI.
///
/// SHA-256 over the URI bytes; the upper sixteen digest bytes become an
/// RFC 4122 URN with the version nibble forced to 3 and the variant bits to
/// `10`.  The result is a pure function of the URI, surviving restarts and
/// reboots.  A missing URI maps to `file://<hostname>/dev/null`.
pub fn device_uuid(device_uri: Option<&str>) -> String {
    let fallback;
    let uri = match device_uri {
        Some(uri) => uri,
        None => {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
            fallback = format!("file://{host}/dev/null");
            &fallback
        }
    };

    let digest = Sha256::digest(uri.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[16..32]);

    let uuid = uuid::Builder::from_bytes(bytes)
        .with_version(uuid::Version::Md5)
        .with_variant(uuid::Variant::RFC4122)
        .into_uuid();

    uuid.urn().to_string()
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Query (or synthesize) the local device's capability attributes, retrying
/// the device connection with back-off.  Used once at startup.
pub async fn device_attributes(
    device: &PrinterUri,
    device_uri_text: &str,
    username: &str,
    password: Option<crate::client::PasswordSupplier>,
    shutdown: &Shutdown,
) -> Result<Vec<IppAttribute>> {
    if device.scheme == Scheme::Socket {
        debug!(device = %device.authority(), "synthesizing default laser profile");
        return Ok(default_laser_profile());
    }

    let mut session =
        IppSession::connect_with_backoff(device.clone(), username, password, shutdown).await?;
    query_device(&mut session, device, device_uri_text, username).await
}

/// Re-probe variant: one connection attempt, bounded by the 30-second
/// timeout, so a dead device cannot stall the caller's loop.
pub async fn device_attributes_once(
    device: &PrinterUri,
    device_uri_text: &str,
    username: &str,
    password: Option<crate::client::PasswordSupplier>,
) -> Result<Vec<IppAttribute>> {
    if device.scheme == Scheme::Socket {
        return Ok(default_laser_profile());
    }

    let mut session = IppSession::connect(device.clone(), username, password).await?;
    query_device(&mut session, device, device_uri_text, username).await
}

async fn query_device(
    session: &mut IppSession,
    device: &PrinterUri,
    device_uri_text: &str,
    username: &str,
) -> Result<Vec<IppAttribute>> {
    let mut request = IppMessage::request(Operation::GetPrinterAttributes, 0);
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("printer-uri", IppValue::Uri(device_uri_text.into())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new("requesting-user-name", IppValue::Name(username.into())),
    );
    request.add(
        TAG_OPERATION_ATTRIBUTES,
        IppAttribute::new_set(
            "requested-attributes",
            REPORTED_ATTRIBUTES.iter().map(|n| IppValue::Keyword((*n).into())).collect(),
        ),
    );

    let response = session.send(request).await?;
    if response.status() >= STATUS_CLIENT_ERROR_BAD_REQUEST {
        warn!(
            device = %device.authority(),
            status = response.status(),
            "device refused Get-Printer-Attributes, reporting no capabilities"
        );
        return Ok(Vec::new());
    }

    let mut attrs: Vec<IppAttribute> = response
        .groups_of(TAG_PRINTER_ATTRIBUTES)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    reconcile_urf(&mut attrs);

    info!(device = %device.authority(), count = attrs.len(), "probed device attributes");
    Ok(attrs)
}

fn find<'a>(attrs: &'a [IppAttribute], name: &str) -> Option<&'a IppAttribute> {
    attrs.iter().find(|a| a.name == name)
}

// ---------------------------------------------------------------------------
// URF -> PWG raster widening
// ---------------------------------------------------------------------------

/// Fill in the PWG raster attributes an AirPrint-class device omits, derived
/// from its `urf-supported` tokens.  Existing PWG attributes always win.
fn reconcile_urf(attrs: &mut Vec<IppAttribute>) {
    let urf: Vec<String> = match find(attrs, "urf-supported") {
        Some(attr) => attr.strings(),
        None => return,
    };

    if find(attrs, "pwg-raster-document-resolution-supported").is_none() {
        let resolutions = urf_resolutions(&urf);
        if !resolutions.is_empty() {
            attrs.push(IppAttribute::new_set(
                "pwg-raster-document-resolution-supported",
                resolutions
                    .into_iter()
                    .map(|dpi| IppValue::Resolution {
                        cross_feed: dpi,
                        feed: dpi,
                        units: RESOLUTION_PER_INCH,
                    })
                    .collect(),
            ));
        }
    }

    if find(attrs, "pwg-raster-document-sheet-back").is_none() {
        if let Some(sheet_back) = urf_sheet_back(&urf) {
            attrs.push(IppAttribute::new(
                "pwg-raster-document-sheet-back",
                IppValue::Keyword(sheet_back.into()),
            ));
        }
    }

    if find(attrs, "pwg-raster-document-type-supported").is_none() {
        let types = urf_document_types(&urf);
        if !types.is_empty() {
            attrs.push(IppAttribute::new_set(
                "pwg-raster-document-type-supported",
                types.into_iter().map(|t| IppValue::Keyword(t.into())).collect(),
            ));
        }
    }
}

/// `RS300-600` lists the supported square resolutions in dpi.
fn urf_resolutions(urf: &[String]) -> Vec<i32> {
    let mut resolutions = Vec::new();
    for token in urf {
        if let Some(rest) = token.strip_prefix("RS") {
            resolutions.extend(
                rest.split('-')
                    .map_while(|part| part.parse::<i32>().ok().filter(|dpi| *dpi > 0)),
            );
        }
    }
    resolutions
}

/// `DM1`/`DM2`/`DM3` describe the back-side transform for duplex raster.
fn urf_sheet_back(urf: &[String]) -> Option<&'static str> {
    let token = urf.iter().find(|t| t.starts_with("DM"))?;
    Some(match token.as_str() {
        "DM1" => "normal",
        "DM2" => "flipped",
        "DM3" => "rotated",
        _ => "manual-tumble",
    })
}

/// Color space tokens map one-to-one onto PWG raster type keywords.
fn urf_document_types(urf: &[String]) -> Vec<&'static str> {
    urf.iter()
        .filter_map(|token| match token.as_str() {
            "ADOBERGB24" => Some("adobe-rgb_8"),
            "ADOBERGB48" => Some("adobe-rgb_16"),
            "SRGB24" => Some("srgb_8"),
            "W8" => Some("sgray_8"),
            "W16" => Some("sgray_16"),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Synthesized AppSocket profile
// ---------------------------------------------------------------------------

fn media_size(width: i32, length: i32) -> IppValue {
    IppValue::Collection(vec![
        ("x-dimension".into(), IppValue::Integer(width)),
        ("y-dimension".into(), IppValue::Integer(length)),
    ])
}

fn media_col(media: &str, width: i32, length: i32, margins: i32) -> IppValue {
    let media_key =
        if margins == 0 { format!("{media}_borderless") } else { media.to_string() };
    IppValue::Collection(vec![
        ("media-key".into(), IppValue::Keyword(media_key)),
        ("media-size".into(), media_size(width, length)),
        ("media-size-name".into(), IppValue::Keyword(media.into())),
        ("media-bottom-margin".into(), IppValue::Integer(margins)),
        ("media-left-margin".into(), IppValue::Integer(margins)),
        ("media-right-margin".into(), IppValue::Integer(margins)),
        ("media-top-margin".into(), IppValue::Integer(margins)),
    ])
}

/// Minimum capability set for a raw AppSocket laser printer: PCL input,
/// Letter/Legal/A4 with uniform margins, two resolutions, full duplex,
/// monochrome only, idle.
fn default_laser_profile() -> Vec<IppAttribute> {
    const SIZES: [(&str, i32, i32); 3] = [
        ("na_letter_8.5x11in", 21590, 27940),
        ("na_legal_8.5x14in", 21590, 35560),
        ("iso_a4_210x297mm", 21000, 29700),
    ];

    let kw = |v: &str| IppValue::Keyword(v.into());
    let margin = IppValue::Integer(DEFAULT_MARGIN);

    vec![
        IppAttribute::new("copies-supported", IppValue::RangeOfInteger { low: 1, high: 1 }),
        IppAttribute::new(
            "document-format-supported",
            IppValue::MimeMediaType("application/vnd.hp-pcl".into()),
        ),
        IppAttribute::new("media-bottom-margin-supported", margin.clone()),
        IppAttribute::new_set(
            "media-col-database",
            SIZES.iter().map(|(m, w, l)| media_col(m, *w, *l, DEFAULT_MARGIN)).collect(),
        ),
        IppAttribute::new(
            "media-col-default",
            media_col(SIZES[0].0, SIZES[0].1, SIZES[0].2, DEFAULT_MARGIN),
        ),
        IppAttribute::new(
            "media-col-ready",
            media_col(SIZES[0].0, SIZES[0].1, SIZES[0].2, DEFAULT_MARGIN),
        ),
        IppAttribute::new_set(
            "media-col-supported",
            [
                "media-bottom-margin",
                "media-left-margin",
                "media-right-margin",
                "media-size",
                "media-size-name",
                "media-top-margin",
            ]
            .iter()
            .map(|n| kw(n))
            .collect(),
        ),
        IppAttribute::new("media-default", kw(SIZES[0].0)),
        IppAttribute::new("media-left-margin-supported", margin.clone()),
        IppAttribute::new("media-ready", kw(SIZES[0].0)),
        IppAttribute::new("media-right-margin-supported", margin.clone()),
        IppAttribute::new_set(
            "media-size-supported",
            SIZES.iter().map(|(_, w, l)| media_size(*w, *l)).collect(),
        ),
        IppAttribute::new_set("media-supported", SIZES.iter().map(|(m, _, _)| kw(m)).collect()),
        IppAttribute::new("media-top-margin-supported", margin),
        IppAttribute::new("print-color-mode-default", kw("monochrome")),
        IppAttribute::new("print-color-mode-supported", kw("monochrome")),
        IppAttribute::new("print-quality-default", IppValue::Enum(4)),
        IppAttribute::new_set(
            "print-quality-supported",
            vec![IppValue::Enum(3), IppValue::Enum(4), IppValue::Enum(5)],
        ),
        IppAttribute::new(
            "printer-resolution-default",
            IppValue::Resolution { cross_feed: 300, feed: 300, units: RESOLUTION_PER_INCH },
        ),
        IppAttribute::new_set(
            "printer-resolution-supported",
            [300, 600]
                .iter()
                .map(|dpi| IppValue::Resolution {
                    cross_feed: *dpi,
                    feed: *dpi,
                    units: RESOLUTION_PER_INCH,
                })
                .collect(),
        ),
        IppAttribute::new("printer-state", IppValue::Enum(3)),
        IppAttribute::new("printer-state-reasons", kw("none")),
        IppAttribute::new("sides-default", kw("two-sided-long-edge")),
        IppAttribute::new_set(
            "sides-supported",
            ["one-sided", "two-sided-long-edge", "two-sided-short-edge"]
                .iter()
                .map(|n| kw(n))
                .collect(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urf(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn uuid_is_deterministic_and_urn_shaped() {
        let a = device_uuid(Some("socket://printer.local:9100"));
        let b = device_uuid(Some("socket://printer.local:9100"));
        assert_eq!(a, b);
        assert!(a.starts_with("urn:uuid:"));
        assert_ne!(a, device_uuid(Some("socket://other.local:9100")));
    }

    #[test]
    fn uuid_carries_version_3_and_rfc_4122_variant() {
        let urn = device_uuid(Some("ipp://printer.local/ipp/print"));
        // urn:uuid:xxxxxxxx-xxxx-Mxxx-Nxxx-xxxxxxxxxxxx
        let uuid = &urn["urn:uuid:".len()..];
        let version = uuid.as_bytes()[14] as char;
        let variant = uuid.as_bytes()[19] as char;
        assert_eq!(version, '3');
        assert!(matches!(variant, '8' | '9' | 'a' | 'b'), "variant nibble was {variant}");
    }

    #[test]
    fn missing_device_uri_still_yields_a_uuid() {
        let urn = device_uuid(None);
        assert!(urn.starts_with("urn:uuid:"));
    }

    #[test]
    fn rs_token_expands_to_square_resolutions() {
        assert_eq!(urf_resolutions(&urf(&["RS600-1200"])), vec![600, 1200]);
        assert_eq!(urf_resolutions(&urf(&["RS300"])), vec![300]);
        assert_eq!(urf_resolutions(&urf(&["W8", "SRGB24"])), Vec::<i32>::new());
    }

    #[test]
    fn malformed_rs_segment_stops_the_walk() {
        assert_eq!(urf_resolutions(&urf(&["RS300-abc-600"])), vec![300]);
    }

    #[test]
    fn dm_tokens_map_to_sheet_back_keywords() {
        assert_eq!(urf_sheet_back(&urf(&["DM1"])), Some("normal"));
        assert_eq!(urf_sheet_back(&urf(&["DM2"])), Some("flipped"));
        assert_eq!(urf_sheet_back(&urf(&["DM3"])), Some("rotated"));
        assert_eq!(urf_sheet_back(&urf(&["DM9"])), Some("manual-tumble"));
        assert_eq!(urf_sheet_back(&urf(&["W8"])), None);
        // First DM token wins.
        assert_eq!(urf_sheet_back(&urf(&["DM2", "DM1"])), Some("flipped"));
    }

    #[test]
    fn color_tokens_map_and_unknowns_are_ignored() {
        let types = urf_document_types(&urf(&["SRGB24", "W8", "CP255", "ADOBERGB48"]));
        assert_eq!(types, vec!["srgb_8", "sgray_8", "adobe-rgb_16"]);
    }

    #[test]
    fn urf_never_overrides_explicit_pwg_attributes() {
        let mut attrs = vec![
            IppAttribute::new("urf-supported", IppValue::Keyword("RS300".into())),
            IppAttribute::new(
                "pwg-raster-document-resolution-supported",
                IppValue::Resolution { cross_feed: 1200, feed: 1200, units: RESOLUTION_PER_INCH },
            ),
        ];
        reconcile_urf(&mut attrs);
        let attr = find(&attrs, "pwg-raster-document-resolution-supported").expect("attr");
        assert_eq!(attr.values.len(), 1);
        assert_eq!(
            attr.values[0],
            IppValue::Resolution { cross_feed: 1200, feed: 1200, units: RESOLUTION_PER_INCH }
        );
    }

    #[test]
    fn urf_derivation_fills_all_three_gaps() {
        let mut attrs = vec![IppAttribute::new_set(
            "urf-supported",
            ["W8", "SRGB24", "DM1", "RS300-600"]
                .iter()
                .map(|t| IppValue::Keyword((*t).into()))
                .collect(),
        )];
        reconcile_urf(&mut attrs);

        let res = find(&attrs, "pwg-raster-document-resolution-supported").expect("resolutions");
        assert_eq!(res.values.len(), 2);
        let back = find(&attrs, "pwg-raster-document-sheet-back").expect("sheet back");
        assert_eq!(back.as_str(), Some("normal"));
        let types = find(&attrs, "pwg-raster-document-type-supported").expect("types");
        assert_eq!(types.strings(), vec!["sgray_8", "srgb_8"]);
    }

    #[test]
    fn laser_profile_describes_a_monochrome_pcl_device() {
        let attrs = default_laser_profile();

        let format = find(&attrs, "document-format-supported").expect("format");
        assert_eq!(format.as_str(), Some("application/vnd.hp-pcl"));

        let color = find(&attrs, "print-color-mode-supported").expect("color");
        assert_eq!(color.strings(), vec!["monochrome"]);

        let media = find(&attrs, "media-supported").expect("media");
        assert_eq!(media.values.len(), 3);
        assert!(media.contains_str("iso_a4_210x297mm"));

        let resolutions = find(&attrs, "printer-resolution-supported").expect("resolutions");
        assert_eq!(resolutions.values.len(), 2);

        let state = find(&attrs, "printer-state").expect("state");
        assert_eq!(state.as_integer(), Some(3));

        let sides = find(&attrs, "sides-supported").expect("sides");
        assert!(sides.contains_str("two-sided-short-edge"));

        // Every synthesized attribute must be on the reported allowlist.
        for attr in &attrs {
            assert!(
                REPORTED_ATTRIBUTES.contains(&attr.name.as_str()),
                "{} is not a reported attribute",
                attr.name
            );
        }
    }

    #[test]
    fn media_col_carries_size_and_margins() {
        let col = media_col("iso_a4_210x297mm", 21000, 29700, DEFAULT_MARGIN);
        let members = col.as_collection().expect("collection");
        assert!(members
            .iter()
            .any(|(n, v)| n == "media-size-name" && v.as_str() == Some("iso_a4_210x297mm")));
        assert!(members
            .iter()
            .any(|(n, v)| n == "media-top-margin" && v.as_integer() == Some(DEFAULT_MARGIN)));

        let borderless = media_col("iso_a4_210x297mm", 21000, 29700, 0);
        let members = borderless.as_collection().expect("collection");
        assert!(members
            .iter()
            .any(|(n, v)| n == "media-key"
                && v.as_str() == Some("iso_a4_210x297mm_borderless")));
    }
}
