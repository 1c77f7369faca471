// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP binary message codec (RFC 8010).
//
// The wire format is:
//
// ```text
// version-number:  2 bytes (major, minor)
// operation-id / status-code: 2 bytes (big-endian u16)
// request-id:      4 bytes (big-endian u32)
// attribute-groups: variable
//   delimiter-tag: 1 byte
//   attributes:    variable
//     value-tag:    1 byte
//     name-length:  2 bytes (big-endian u16)
//     name:         name-length bytes
//     value-length: 2 bytes (big-endian u16)
//     value:        value-length bytes
// end-of-attributes-tag: 1 byte (0x03)
// document-data: remainder
// ```
//
// Decoding is incremental over a `DocumentSource` and stops at the
// end-of-attributes tag, so whatever follows on the stream (the document
// payload of a Fetch-Document response) stays unread for the caller.

use pressgate_core::error::{PressgateError, Result};

use crate::source::{self, DocumentSource};

use super::*;

/// A group of attributes introduced by a delimiter tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrGroup {
    pub tag: u8,
    pub attrs: Vec<IppAttribute>,
}

impl AttrGroup {
    pub fn new(tag: u8) -> Self {
        Self { tag, attrs: Vec::new() }
    }

    pub fn find(&self, name: &str) -> Option<&IppAttribute> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// A fully parsed (or under-construction) IPP message.
///
/// `code` is the operation-id in requests and the status-code in responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppMessage {
    pub version: (u8, u8),
    pub code: u16,
    pub request_id: u32,
    pub groups: Vec<AttrGroup>,
}

impl IppMessage {
    /// New request skeleton with the mandatory charset and language leading
    /// the operation attributes group (RFC 8011 §4.1.4).
    pub fn request(operation: Operation, request_id: u32) -> Self {
        let mut msg = Self {
            version: (VERSION_MAJOR, VERSION_MINOR),
            code: operation.as_u16(),
            request_id,
            groups: Vec::new(),
        };
        msg.begin_group(TAG_OPERATION_ATTRIBUTES);
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("attributes-charset", IppValue::Charset("utf-8".into())),
        );
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("attributes-natural-language", IppValue::NaturalLanguage("en".into())),
        );
        msg
    }

    /// New response skeleton (used by tests and fixtures).
    pub fn response(status: u16, request_id: u32) -> Self {
        let mut msg = Self {
            version: (VERSION_MAJOR, VERSION_MINOR),
            code: status,
            request_id,
            groups: Vec::new(),
        };
        msg.begin_group(TAG_OPERATION_ATTRIBUTES);
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("attributes-charset", IppValue::Charset("utf-8".into())),
        );
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("attributes-natural-language", IppValue::NaturalLanguage("en".into())),
        );
        msg
    }

    /// Status code of a response.
    pub fn status(&self) -> u16 {
        self.code
    }

    /// Start a fresh attribute group, even if the previous one has the same
    /// delimiter (Get-Jobs responses carry one job group per job).
    pub fn begin_group(&mut self, tag: u8) -> &mut Self {
        self.groups.push(AttrGroup::new(tag));
        self
    }

    /// Append an attribute, reusing the trailing group when its delimiter
    /// matches and opening a new group otherwise.
    pub fn add(&mut self, group_tag: u8, attr: IppAttribute) -> &mut Self {
        match self.groups.last_mut() {
            Some(group) if group.tag == group_tag => group.attrs.push(attr),
            _ => {
                let mut group = AttrGroup::new(group_tag);
                group.attrs.push(attr);
                self.groups.push(group);
            }
        }
        self
    }

    /// First attribute with this name, searching all groups in order.
    pub fn find(&self, name: &str) -> Option<&IppAttribute> {
        self.groups.iter().find_map(|g| g.find(name))
    }

    /// First attribute with this name within groups of one delimiter.
    pub fn find_in(&self, group_tag: u8, name: &str) -> Option<&IppAttribute> {
        self.groups_of(group_tag).find_map(|g| g.find(name))
    }

    /// All groups with the given delimiter tag, in message order.
    pub fn groups_of(&self, tag: u8) -> impl Iterator<Item = &AttrGroup> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    // -- Encoding -----------------------------------------------------------

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.push(self.version.0);
        buf.push(self.version.1);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&self.request_id.to_be_bytes());

        for group in &self.groups {
            buf.push(group.tag);
            for attr in &group.attrs {
                for (i, value) in attr.values.iter().enumerate() {
                    // Additional values of a 1setOf carry an empty name.
                    let name = if i == 0 { attr.name.as_str() } else { "" };
                    write_value(&mut buf, name, value);
                }
            }
        }

        buf.push(TAG_END_OF_ATTRIBUTES);
        buf
    }

    // -- Decoding -----------------------------------------------------------

    /// Read one message from the stream, stopping at end-of-attributes.
    pub async fn read_from<S: DocumentSource + ?Sized>(reader: &mut S) -> Result<Self> {
        let major = source::read_u8(reader).await?;
        let minor = source::read_u8(reader).await?;
        let code = source::read_u16(reader).await?;
        let request_id = source::read_u32(reader).await?;

        let mut groups: Vec<AttrGroup> = Vec::new();

        loop {
            let tag = source::read_u8(reader).await?;

            if tag <= 0x0F {
                if tag == TAG_END_OF_ATTRIBUTES {
                    break;
                }
                groups.push(AttrGroup::new(tag));
                continue;
            }

            let name = read_lenstr(reader).await?;

            if tag == VALUE_TAG_BEG_COLLECTION {
                // The begCollection value itself is discarded per RFC 8010.
                let _ = read_lenbytes(reader).await?;
                let members = read_collection(reader).await?;
                push_value(&mut groups, name, IppValue::Collection(members))?;
                continue;
            }

            let data = read_lenbytes(reader).await?;
            let value = decode_value(tag, data)?;
            push_value(&mut groups, name, value)?;
        }

        Ok(Self { version: (major, minor), code, request_id, groups })
    }

    // -- Diagnostics --------------------------------------------------------

    /// Textual dump of the message, one line per attribute, with group
    /// boundary markers.  Used by the verbose wire log.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for group in &self.groups {
            lines.push(format!("---- {} ----", group_tag_name(group.tag)));
            for attr in &group.attrs {
                let values = attr
                    .values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let set_of = if attr.values.len() > 1 { "1setOf " } else { "" };
                lines.push(format!(
                    "{} {}{} {}",
                    attr.name,
                    set_of,
                    value_tag_name(attr.tag()),
                    values
                ));
            }
        }
        lines.push("---- end-of-attributes-tag ----".into());
        lines
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn write_tnv(buf: &mut Vec<u8>, tag: u8, name: &str, value: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

fn write_value(buf: &mut Vec<u8>, name: &str, value: &IppValue) {
    match value {
        IppValue::Integer(v) | IppValue::Enum(v) => {
            write_tnv(buf, value.tag(), name, &v.to_be_bytes());
        }
        IppValue::Boolean(v) => {
            write_tnv(buf, value.tag(), name, &[u8::from(*v)]);
        }
        IppValue::Keyword(s)
        | IppValue::Text(s)
        | IppValue::Name(s)
        | IppValue::Uri(s)
        | IppValue::Charset(s)
        | IppValue::NaturalLanguage(s)
        | IppValue::MimeMediaType(s) => {
            write_tnv(buf, value.tag(), name, s.as_bytes());
        }
        IppValue::Octets(data) => {
            write_tnv(buf, value.tag(), name, data);
        }
        IppValue::Resolution { cross_feed, feed, units } => {
            let mut data = Vec::with_capacity(9);
            data.extend_from_slice(&cross_feed.to_be_bytes());
            data.extend_from_slice(&feed.to_be_bytes());
            data.push(*units as u8);
            write_tnv(buf, value.tag(), name, &data);
        }
        IppValue::RangeOfInteger { low, high } => {
            let mut data = Vec::with_capacity(8);
            data.extend_from_slice(&low.to_be_bytes());
            data.extend_from_slice(&high.to_be_bytes());
            write_tnv(buf, value.tag(), name, &data);
        }
        IppValue::Collection(members) => {
            write_tnv(buf, VALUE_TAG_BEG_COLLECTION, name, &[]);
            for (member_name, member_value) in members {
                write_tnv(buf, VALUE_TAG_MEMBER_ATTR_NAME, "", member_name.as_bytes());
                write_value(buf, "", member_value);
            }
            write_tnv(buf, VALUE_TAG_END_COLLECTION, "", &[]);
        }
        IppValue::OutOfBand(tag) => {
            write_tnv(buf, *tag, name, &[]);
        }
        IppValue::Other { tag, data } => {
            write_tnv(buf, *tag, name, data);
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

async fn read_lenbytes<S: DocumentSource + ?Sized>(reader: &mut S) -> Result<Vec<u8>> {
    let len = source::read_u16(reader).await? as usize;
    let mut data = vec![0u8; len];
    source::read_exact(reader, &mut data).await?;
    Ok(data)
}

async fn read_lenstr<S: DocumentSource + ?Sized>(reader: &mut S) -> Result<String> {
    let data = read_lenbytes(reader).await?;
    String::from_utf8(data).map_err(|_| PressgateError::Protocol("non-UTF-8 string".into()))
}

fn decode_value(tag: u8, data: Vec<u8>) -> Result<IppValue> {
    let int_of = |data: &[u8]| -> Result<i32> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| PressgateError::Protocol(format!("bad integer length for tag 0x{tag:02x}")))?;
        Ok(i32::from_be_bytes(bytes))
    };
    let string_of = |data: Vec<u8>| -> Result<String> {
        String::from_utf8(data).map_err(|_| PressgateError::Protocol("non-UTF-8 value".into()))
    };

    Ok(match tag {
        VALUE_TAG_INTEGER => IppValue::Integer(int_of(&data)?),
        VALUE_TAG_ENUM => IppValue::Enum(int_of(&data)?),
        VALUE_TAG_BOOLEAN => {
            let byte = *data
                .first()
                .ok_or_else(|| PressgateError::Protocol("empty boolean value".into()))?;
            IppValue::Boolean(byte != 0)
        }
        VALUE_TAG_KEYWORD => IppValue::Keyword(string_of(data)?),
        VALUE_TAG_TEXT => IppValue::Text(string_of(data)?),
        VALUE_TAG_NAME => IppValue::Name(string_of(data)?),
        VALUE_TAG_URI => IppValue::Uri(string_of(data)?),
        VALUE_TAG_CHARSET => IppValue::Charset(string_of(data)?),
        VALUE_TAG_NATURAL_LANGUAGE => IppValue::NaturalLanguage(string_of(data)?),
        VALUE_TAG_MIME_MEDIA_TYPE => IppValue::MimeMediaType(string_of(data)?),
        VALUE_TAG_OCTET_STRING => IppValue::Octets(data),
        VALUE_TAG_RESOLUTION => {
            if data.len() != 9 {
                return Err(PressgateError::Protocol("bad resolution length".into()));
            }
            IppValue::Resolution {
                cross_feed: i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                feed: i32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                units: data[8] as i8,
            }
        }
        VALUE_TAG_RANGE_OF_INTEGER => {
            if data.len() != 8 {
                return Err(PressgateError::Protocol("bad rangeOfInteger length".into()));
            }
            IppValue::RangeOfInteger {
                low: i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                high: i32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            }
        }
        VALUE_TAG_UNSUPPORTED | VALUE_TAG_UNKNOWN | VALUE_TAG_NO_VALUE => IppValue::OutOfBand(tag),
        _ => IppValue::Other { tag, data },
    })
}

/// Append a decoded value: an empty name continues the previous attribute
/// (`1setOf`), anything else starts a new attribute in the open group.
fn push_value(groups: &mut [AttrGroup], name: String, value: IppValue) -> Result<()> {
    let group = groups
        .last_mut()
        .ok_or_else(|| PressgateError::Protocol("attribute outside any group".into()))?;

    if name.is_empty() {
        let attr = group
            .attrs
            .last_mut()
            .ok_or_else(|| PressgateError::Protocol("additional value without attribute".into()))?;
        attr.values.push(value);
    } else {
        group.attrs.push(IppAttribute::new(name, value));
    }
    Ok(())
}

/// Parse the members of a collection up to the matching endCollection.
async fn read_collection<S: DocumentSource + ?Sized>(reader: &mut S) -> Result<Vec<(String, IppValue)>> {
    // Box the recursion: async fns cannot directly recurse.
    fn inner<'a, S: DocumentSource + ?Sized>(
        reader: &'a mut S,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<(String, IppValue)>>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut members = Vec::new();
            let mut member_name = String::new();

            loop {
                let tag = source::read_u8(reader).await?;
                if tag <= 0x0F {
                    return Err(PressgateError::Protocol("collection not terminated".into()));
                }

                let _name = read_lenbytes(reader).await?;

                match tag {
                    VALUE_TAG_END_COLLECTION => {
                        let _ = read_lenbytes(reader).await?;
                        return Ok(members);
                    }
                    VALUE_TAG_MEMBER_ATTR_NAME => {
                        member_name = read_lenstr(reader).await?;
                    }
                    VALUE_TAG_BEG_COLLECTION => {
                        let _ = read_lenbytes(reader).await?;
                        let nested = inner(reader).await?;
                        members.push((member_name.clone(), IppValue::Collection(nested)));
                    }
                    _ => {
                        let data = read_lenbytes(reader).await?;
                        members.push((member_name.clone(), decode_value(tag, data)?));
                    }
                }
            }
        })
    }

    inner(reader).await
}

// ---------------------------------------------------------------------------
// Tag names for the wire log
// ---------------------------------------------------------------------------

pub fn group_tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_OPERATION_ATTRIBUTES => "operation-attributes-tag",
        TAG_JOB_ATTRIBUTES => "job-attributes-tag",
        TAG_PRINTER_ATTRIBUTES => "printer-attributes-tag",
        TAG_UNSUPPORTED_ATTRIBUTES => "unsupported-attributes-tag",
        TAG_SUBSCRIPTION_ATTRIBUTES => "subscription-attributes-tag",
        TAG_EVENT_NOTIFICATION_ATTRIBUTES => "event-notification-attributes-tag",
        TAG_DOCUMENT_ATTRIBUTES => "document-attributes-tag",
        _ => "unknown-attributes-tag",
    }
}

pub fn value_tag_name(tag: u8) -> &'static str {
    match tag {
        VALUE_TAG_UNSUPPORTED => "unsupported",
        VALUE_TAG_UNKNOWN => "unknown",
        VALUE_TAG_NO_VALUE => "no-value",
        VALUE_TAG_INTEGER => "integer",
        VALUE_TAG_BOOLEAN => "boolean",
        VALUE_TAG_ENUM => "enum",
        VALUE_TAG_OCTET_STRING => "octetString",
        VALUE_TAG_DATE_TIME => "dateTime",
        VALUE_TAG_RESOLUTION => "resolution",
        VALUE_TAG_RANGE_OF_INTEGER => "rangeOfInteger",
        VALUE_TAG_BEG_COLLECTION => "collection",
        VALUE_TAG_TEXT => "textWithoutLanguage",
        VALUE_TAG_NAME => "nameWithoutLanguage",
        VALUE_TAG_KEYWORD => "keyword",
        VALUE_TAG_URI => "uri",
        VALUE_TAG_URI_SCHEME => "uriScheme",
        VALUE_TAG_CHARSET => "charset",
        VALUE_TAG_NATURAL_LANGUAGE => "naturalLanguage",
        VALUE_TAG_MIME_MEDIA_TYPE => "mimeMediaType",
        VALUE_TAG_MEMBER_ATTR_NAME => "memberAttrName",
        _ => "unknown-tag",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn request_round_trips() {
        let mut msg = IppMessage::request(Operation::FetchJob, 7);
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new("printer-uri", IppValue::Uri("ipp://infra.example/ipp/print".into())),
        );
        msg.add(TAG_OPERATION_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(42)));

        let bytes = msg.to_bytes();
        let mut cursor = Cursor::new(bytes);
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");

        assert_eq!(parsed.code, Operation::FetchJob.as_u16());
        assert_eq!(parsed.request_id, 7);
        assert_eq!(parsed.find("job-id").and_then(IppAttribute::as_integer), Some(42));
        assert_eq!(
            parsed.find("attributes-charset").and_then(IppAttribute::as_str),
            Some("utf-8")
        );
    }

    #[tokio::test]
    async fn one_set_of_values_stay_on_one_attribute() {
        let mut msg = IppMessage::request(Operation::GetPrinterAttributes, 1);
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new_set(
                "requested-attributes",
                vec![
                    IppValue::Keyword("media-supported".into()),
                    IppValue::Keyword("sides-supported".into()),
                    IppValue::Keyword("urf-supported".into()),
                ],
            ),
        );

        let mut cursor = Cursor::new(msg.to_bytes());
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");
        let attr = parsed.find("requested-attributes").expect("attr");
        assert_eq!(attr.values.len(), 3);
        assert!(attr.contains_str("urf-supported"));
    }

    #[tokio::test]
    async fn collection_round_trips() {
        let media_size = IppValue::Collection(vec![
            ("x-dimension".into(), IppValue::Integer(21000)),
            ("y-dimension".into(), IppValue::Integer(29700)),
        ]);
        let media_col = IppValue::Collection(vec![
            ("media-size".into(), media_size),
            ("media-size-name".into(), IppValue::Keyword("iso_a4_210x297mm".into())),
            ("media-bottom-margin".into(), IppValue::Integer(635)),
        ]);

        let mut msg = IppMessage::response(STATUS_OK, 3);
        msg.begin_group(TAG_PRINTER_ATTRIBUTES);
        msg.add(TAG_PRINTER_ATTRIBUTES, IppAttribute::new("media-col-default", media_col.clone()));

        let mut cursor = Cursor::new(msg.to_bytes());
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");
        let attr = parsed.find("media-col-default").expect("attr");
        assert_eq!(attr.values[0], media_col);
    }

    #[tokio::test]
    async fn payload_stays_on_the_stream() {
        let msg = IppMessage::response(STATUS_OK, 9);
        let mut bytes = msg.to_bytes();
        bytes.extend_from_slice(b"%PDF-1.7 ...");

        let mut cursor = Cursor::new(bytes);
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");
        assert_eq!(parsed.status(), STATUS_OK);

        let mut rest = Vec::new();
        std::io::Read::read_to_end(&mut cursor, &mut rest).expect("rest");
        assert_eq!(rest, b"%PDF-1.7 ...");
    }

    #[tokio::test]
    async fn multiple_groups_with_same_tag_survive() {
        let mut msg = IppMessage::response(STATUS_OK, 4);
        msg.begin_group(TAG_JOB_ATTRIBUTES);
        msg.add(TAG_JOB_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(1)));
        msg.begin_group(TAG_JOB_ATTRIBUTES);
        msg.add(TAG_JOB_ATTRIBUTES, IppAttribute::new("job-id", IppValue::Integer(2)));

        let mut cursor = Cursor::new(msg.to_bytes());
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");
        let ids: Vec<i32> = parsed
            .groups_of(TAG_JOB_ATTRIBUTES)
            .filter_map(|g| g.find("job-id").and_then(IppAttribute::as_integer))
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn resolution_and_range_round_trip() {
        let mut msg = IppMessage::response(STATUS_OK, 5);
        msg.begin_group(TAG_PRINTER_ATTRIBUTES);
        msg.add(
            TAG_PRINTER_ATTRIBUTES,
            IppAttribute::new(
                "printer-resolution-default",
                IppValue::Resolution { cross_feed: 600, feed: 600, units: RESOLUTION_PER_INCH },
            ),
        );
        msg.add(
            TAG_PRINTER_ATTRIBUTES,
            IppAttribute::new("copies-supported", IppValue::RangeOfInteger { low: 1, high: 99 }),
        );

        let mut cursor = Cursor::new(msg.to_bytes());
        let parsed = IppMessage::read_from(&mut cursor).await.expect("parse");
        assert_eq!(
            parsed.find("printer-resolution-default").and_then(IppAttribute::first),
            Some(&IppValue::Resolution { cross_feed: 600, feed: 600, units: RESOLUTION_PER_INCH })
        );
        assert_eq!(
            parsed.find("copies-supported").and_then(IppAttribute::first),
            Some(&IppValue::RangeOfInteger { low: 1, high: 99 })
        );
    }

    #[test]
    fn dump_marks_groups_and_sets() {
        let mut msg = IppMessage::request(Operation::GetNotifications, 11);
        msg.add(
            TAG_OPERATION_ATTRIBUTES,
            IppAttribute::new_set(
                "notify-events",
                vec![IppValue::Keyword("job-fetchable".into()), IppValue::Keyword("job-state-changed".into())],
            ),
        );
        let lines = msg.dump();
        assert!(lines.iter().any(|l| l.contains("operation-attributes-tag")));
        assert!(lines.iter().any(|l| l.contains("notify-events 1setOf keyword")));
        assert_eq!(lines.last().map(String::as_str), Some("---- end-of-attributes-tag ----"));
    }
}
