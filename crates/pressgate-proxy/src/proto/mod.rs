// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP/1.1 wire protocol: value model and binary codec (RFC 8010/8011).
//
// The infrastructure extension operations this proxy speaks (Fetch-Job,
// Get-Notifications, Register-Output-Device, ...) come from RFC 3995/3996,
// PWG 5100.18 (IPP INFRA) and PWG 5100.22 (IPP System Service).

pub mod message;
pub mod value;

pub use message::{AttrGroup, IppMessage};
pub use value::{IppAttribute, IppValue};

/// IPP version 1.1 major byte.
pub const VERSION_MAJOR: u8 = 0x01;

/// IPP version 1.1 minor byte.
pub const VERSION_MINOR: u8 = 0x01;

// ---------------------------------------------------------------------------
// Delimiter tags (RFC 8010 §3.5.1 plus later registrations)
// ---------------------------------------------------------------------------

/// Operation attributes group delimiter.
pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;

/// Job attributes group delimiter.
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;

/// End-of-attributes-tag — terminates the attribute section.
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;

/// Printer attributes group delimiter.
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;

/// Unsupported attributes group delimiter.
pub const TAG_UNSUPPORTED_ATTRIBUTES: u8 = 0x05;

/// Subscription attributes group delimiter (RFC 3995).
pub const TAG_SUBSCRIPTION_ATTRIBUTES: u8 = 0x06;

/// Event notification attributes group delimiter (RFC 3996).
pub const TAG_EVENT_NOTIFICATION_ATTRIBUTES: u8 = 0x07;

/// Document attributes group delimiter (PWG 5100.5).
pub const TAG_DOCUMENT_ATTRIBUTES: u8 = 0x09;

// ---------------------------------------------------------------------------
// Value tags (RFC 8010 §3.5.2)
// ---------------------------------------------------------------------------

/// Out-of-band: unsupported.
pub const VALUE_TAG_UNSUPPORTED: u8 = 0x10;

/// Out-of-band: unknown.
pub const VALUE_TAG_UNKNOWN: u8 = 0x12;

/// Out-of-band: no-value.
pub const VALUE_TAG_NO_VALUE: u8 = 0x13;

/// Integer value (4 bytes, signed big-endian).
pub const VALUE_TAG_INTEGER: u8 = 0x21;

/// Boolean value (1 byte: 0x00 = false, 0x01 = true).
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;

/// Enum value (4 bytes, same encoding as integer).
pub const VALUE_TAG_ENUM: u8 = 0x23;

/// octetString with unspecified format.
pub const VALUE_TAG_OCTET_STRING: u8 = 0x30;

/// dateTime (11-byte RFC 2579 encoding; carried opaquely).
pub const VALUE_TAG_DATE_TIME: u8 = 0x31;

/// resolution (cross-feed i32, feed i32, units i8).
pub const VALUE_TAG_RESOLUTION: u8 = 0x32;

/// rangeOfInteger (two 4-byte signed big-endian integers).
pub const VALUE_TAG_RANGE_OF_INTEGER: u8 = 0x33;

/// begCollection — opens a collection value.
pub const VALUE_TAG_BEG_COLLECTION: u8 = 0x34;

/// endCollection — closes a collection value.
pub const VALUE_TAG_END_COLLECTION: u8 = 0x37;

/// textWithoutLanguage (UTF-8 string).
pub const VALUE_TAG_TEXT: u8 = 0x41;

/// nameWithoutLanguage (UTF-8 string).
pub const VALUE_TAG_NAME: u8 = 0x42;

/// keyword (US-ASCII string).
pub const VALUE_TAG_KEYWORD: u8 = 0x44;

/// uri (US-ASCII string).
pub const VALUE_TAG_URI: u8 = 0x45;

/// uriScheme.
pub const VALUE_TAG_URI_SCHEME: u8 = 0x46;

/// charset (e.g. "utf-8").
pub const VALUE_TAG_CHARSET: u8 = 0x47;

/// naturalLanguage (e.g. "en").
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;

/// mimeMediaType (e.g. "application/pdf").
pub const VALUE_TAG_MIME_MEDIA_TYPE: u8 = 0x49;

/// memberAttrName — names the next member inside a collection.
pub const VALUE_TAG_MEMBER_ATTR_NAME: u8 = 0x4A;

/// Resolution units: dots per inch.
pub const RESOLUTION_PER_INCH: i8 = 3;

// ---------------------------------------------------------------------------
// Operation identifiers
// ---------------------------------------------------------------------------

/// IPP operations used by the proxy, with their registered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Operation {
    // RFC 8011
    PrintJob = 0x0002,
    ValidateJob = 0x0004,
    CreateJob = 0x0005,
    SendDocument = 0x0006,
    CancelJob = 0x0008,
    GetJobAttributes = 0x0009,
    GetJobs = 0x000A,
    GetPrinterAttributes = 0x000B,
    // RFC 3995/3996 notifications
    CreatePrinterSubscriptions = 0x0016,
    CancelSubscription = 0x001B,
    GetNotifications = 0x001C,
    // PWG 5100.18 IPP INFRA
    AcknowledgeDocument = 0x003F,
    AcknowledgeIdentifyPrinter = 0x0040,
    AcknowledgeJob = 0x0041,
    FetchDocument = 0x0042,
    FetchJob = 0x0043,
    DeregisterOutputDevice = 0x0046,
    UpdateDocumentStatus = 0x0047,
    UpdateJobStatus = 0x0048,
    UpdateOutputDeviceAttributes = 0x0049,
    // PWG 5100.22 IPP System Service
    RegisterOutputDevice = 0x005F,
}

impl Operation {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0002 => Self::PrintJob,
            0x0004 => Self::ValidateJob,
            0x0005 => Self::CreateJob,
            0x0006 => Self::SendDocument,
            0x0008 => Self::CancelJob,
            0x0009 => Self::GetJobAttributes,
            0x000A => Self::GetJobs,
            0x000B => Self::GetPrinterAttributes,
            0x0016 => Self::CreatePrinterSubscriptions,
            0x001B => Self::CancelSubscription,
            0x001C => Self::GetNotifications,
            0x003F => Self::AcknowledgeDocument,
            0x0040 => Self::AcknowledgeIdentifyPrinter,
            0x0041 => Self::AcknowledgeJob,
            0x0042 => Self::FetchDocument,
            0x0043 => Self::FetchJob,
            0x0046 => Self::DeregisterOutputDevice,
            0x0047 => Self::UpdateDocumentStatus,
            0x0048 => Self::UpdateJobStatus,
            0x0049 => Self::UpdateOutputDeviceAttributes,
            0x005F => Self::RegisterOutputDevice,
            _ => return None,
        })
    }

    /// Registered operation name, for logging.
    pub fn name(self) -> &'static str {
        match self {
            Self::PrintJob => "Print-Job",
            Self::ValidateJob => "Validate-Job",
            Self::CreateJob => "Create-Job",
            Self::SendDocument => "Send-Document",
            Self::CancelJob => "Cancel-Job",
            Self::GetJobAttributes => "Get-Job-Attributes",
            Self::GetJobs => "Get-Jobs",
            Self::GetPrinterAttributes => "Get-Printer-Attributes",
            Self::CreatePrinterSubscriptions => "Create-Printer-Subscriptions",
            Self::CancelSubscription => "Cancel-Subscription",
            Self::GetNotifications => "Get-Notifications",
            Self::AcknowledgeDocument => "Acknowledge-Document",
            Self::AcknowledgeIdentifyPrinter => "Acknowledge-Identify-Printer",
            Self::AcknowledgeJob => "Acknowledge-Job",
            Self::FetchDocument => "Fetch-Document",
            Self::FetchJob => "Fetch-Job",
            Self::DeregisterOutputDevice => "Deregister-Output-Device",
            Self::UpdateDocumentStatus => "Update-Document-Status",
            Self::UpdateJobStatus => "Update-Job-Status",
            Self::UpdateOutputDeviceAttributes => "Update-Output-Device-Attributes",
            Self::RegisterOutputDevice => "Register-Output-Device",
        }
    }
}

// ---------------------------------------------------------------------------
// Status codes (RFC 8011 §4.1.8 plus PWG 5100.18)
// ---------------------------------------------------------------------------

/// successful-ok.
pub const STATUS_OK: u16 = 0x0000;

/// First redirection code; anything at or above this is a request failure.
pub const STATUS_REDIRECTION_OTHER_SITE: u16 = 0x0200;

/// client-error-bad-request — first of the hard protocol errors.
pub const STATUS_CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;

/// client-error-not-found.
pub const STATUS_CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;

/// client-error-not-fetchable — the job was claimed by another output device.
pub const STATUS_CLIENT_ERROR_NOT_FETCHABLE: u16 = 0x0420;

/// server-error-operation-not-supported.
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;

/// Whether a status code means the request did not succeed.
pub fn status_is_error(status: u16) -> bool {
    status >= STATUS_REDIRECTION_OTHER_SITE
}
