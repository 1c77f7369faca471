// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP attribute values as a tagged union, plus the conservative equality
// rule used when deciding whether a device attribute changed.

use super::*;

/// A single IPP attribute value.
///
/// The closed set of tags the proxy understands.  Anything else survives
/// round-trips as `Other` but never compares equal to anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IppValue {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    Keyword(String),
    Text(String),
    Name(String),
    Uri(String),
    Charset(String),
    NaturalLanguage(String),
    MimeMediaType(String),
    Octets(Vec<u8>),
    Resolution { cross_feed: i32, feed: i32, units: i8 },
    RangeOfInteger { low: i32, high: i32 },
    /// An ordered list of (member-name, value) pairs.
    Collection(Vec<(String, IppValue)>),
    /// Out-of-band value (unsupported / unknown / no-value).
    OutOfBand(u8),
    /// Any tag the proxy does not model; kept byte-exact.
    Other { tag: u8, data: Vec<u8> },
}

impl IppValue {
    /// Wire value tag for this value.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Integer(_) => VALUE_TAG_INTEGER,
            Self::Boolean(_) => VALUE_TAG_BOOLEAN,
            Self::Enum(_) => VALUE_TAG_ENUM,
            Self::Keyword(_) => VALUE_TAG_KEYWORD,
            Self::Text(_) => VALUE_TAG_TEXT,
            Self::Name(_) => VALUE_TAG_NAME,
            Self::Uri(_) => VALUE_TAG_URI,
            Self::Charset(_) => VALUE_TAG_CHARSET,
            Self::NaturalLanguage(_) => VALUE_TAG_NATURAL_LANGUAGE,
            Self::MimeMediaType(_) => VALUE_TAG_MIME_MEDIA_TYPE,
            Self::Octets(_) => VALUE_TAG_OCTET_STRING,
            Self::Resolution { .. } => VALUE_TAG_RESOLUTION,
            Self::RangeOfInteger { .. } => VALUE_TAG_RANGE_OF_INTEGER,
            Self::Collection(_) => VALUE_TAG_BEG_COLLECTION,
            Self::OutOfBand(tag) => *tag,
            Self::Other { tag, .. } => *tag,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) | Self::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Keyword(s)
            | Self::Text(s)
            | Self::Name(s)
            | Self::Uri(s)
            | Self::Charset(s)
            | Self::NaturalLanguage(s)
            | Self::MimeMediaType(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[(String, IppValue)]> {
        match self {
            Self::Collection(members) => Some(members),
            _ => None,
        }
    }
}

impl std::fmt::Display for IppValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) | Self::Enum(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Keyword(s)
            | Self::Text(s)
            | Self::Name(s)
            | Self::Uri(s)
            | Self::Charset(s)
            | Self::NaturalLanguage(s)
            | Self::MimeMediaType(s) => f.write_str(s),
            Self::Octets(data) => write!(f, "<{} octets>", data.len()),
            Self::Resolution { cross_feed, feed, units } => {
                let unit = if *units == RESOLUTION_PER_INCH { "dpi" } else { "dpcm" };
                write!(f, "{cross_feed}x{feed}{unit}")
            }
            Self::RangeOfInteger { low, high } => write!(f, "{low}-{high}"),
            Self::Collection(members) => {
                f.write_str("{")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                f.write_str("}")
            }
            Self::OutOfBand(tag) => write!(f, "<out-of-band 0x{tag:02x}>"),
            Self::Other { tag, data } => write!(f, "<tag 0x{tag:02x}, {} bytes>", data.len()),
        }
    }
}

/// A named attribute carrying one or more values (`1setOf`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppAttribute {
    pub name: String,
    pub values: Vec<IppValue>,
}

impl IppAttribute {
    pub fn new(name: impl Into<String>, value: IppValue) -> Self {
        Self { name: name.into(), values: vec![value] }
    }

    pub fn new_set(name: impl Into<String>, values: Vec<IppValue>) -> Self {
        Self { name: name.into(), values }
    }

    /// Wire tag of the first value (all values of one attribute share it).
    pub fn tag(&self) -> u8 {
        self.values.first().map_or(VALUE_TAG_UNKNOWN, IppValue::tag)
    }

    pub fn first(&self) -> Option<&IppValue> {
        self.values.first()
    }

    pub fn as_integer(&self) -> Option<i32> {
        self.first().and_then(IppValue::as_integer)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.first().and_then(IppValue::as_str)
    }

    /// Whether any value stringifies to `needle` (keyword/text/name/uri/mime).
    pub fn contains_str(&self, needle: &str) -> bool {
        self.values.iter().any(|v| v.as_str() == Some(needle))
    }

    /// Whether any integer or enum value equals `needle`.
    pub fn contains_integer(&self, needle: i32) -> bool {
        self.values.iter().any(|v| v.as_integer() == Some(needle))
    }

    /// String values as an owned list (empty when none stringify).
    pub fn strings(&self) -> Vec<String> {
        self.values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect()
    }
}

/// Conservative attribute equality.
///
/// Two attributes are equal iff both are present, carry the same value tag
/// and the same number of values, and every value pair compares equal under
/// integer, boolean, or string comparison.  Values of any other tag never
/// compare equal, which errs on the side of re-sending an update.
pub fn attrs_are_equal(a: Option<&IppAttribute>, b: Option<&IppAttribute>) -> bool {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (None, None) => return true,
        _ => return false,
    };

    if a.tag() != b.tag() || a.values.len() != b.values.len() {
        return false;
    }

    a.values.iter().zip(&b.values).all(|(x, y)| match (x, y) {
        (IppValue::Integer(x), IppValue::Integer(y)) => x == y,
        (IppValue::Enum(x), IppValue::Enum(y)) => x == y,
        (IppValue::Boolean(x), IppValue::Boolean(y)) => x == y,
        (IppValue::Keyword(x), IppValue::Keyword(y)) => x == y,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(name: &str, values: &[&str]) -> IppAttribute {
        IppAttribute::new_set(
            name,
            values.iter().map(|v| IppValue::Keyword((*v).into())).collect(),
        )
    }

    #[test]
    fn both_absent_are_equal() {
        assert!(attrs_are_equal(None, None));
    }

    #[test]
    fn presence_mismatch_is_unequal() {
        let a = kw("sides-supported", &["one-sided"]);
        assert!(!attrs_are_equal(Some(&a), None));
        assert!(!attrs_are_equal(None, Some(&a)));
    }

    #[test]
    fn equal_keyword_sets_compare_equal() {
        let a = kw("sides-supported", &["one-sided", "two-sided-long-edge"]);
        let b = kw("sides-supported", &["one-sided", "two-sided-long-edge"]);
        assert!(attrs_are_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn value_count_mismatch_is_unequal() {
        let a = kw("sides-supported", &["one-sided"]);
        let b = kw("sides-supported", &["one-sided", "two-sided-long-edge"]);
        assert!(!attrs_are_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn tag_mismatch_is_unequal() {
        let a = IppAttribute::new("media-default", IppValue::Keyword("iso_a4_210x297mm".into()));
        let b = IppAttribute::new("media-default", IppValue::Name("iso_a4_210x297mm".into()));
        assert!(!attrs_are_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn integers_booleans_and_enums_compare_by_value() {
        let a = IppAttribute::new("copies-default", IppValue::Integer(1));
        let b = IppAttribute::new("copies-default", IppValue::Integer(1));
        assert!(attrs_are_equal(Some(&a), Some(&b)));

        let c = IppAttribute::new("copies-default", IppValue::Integer(2));
        assert!(!attrs_are_equal(Some(&a), Some(&c)));

        let t = IppAttribute::new("color-supported", IppValue::Boolean(true));
        let f = IppAttribute::new("color-supported", IppValue::Boolean(false));
        assert!(!attrs_are_equal(Some(&t), Some(&f)));

        let e1 = IppAttribute::new("print-quality-default", IppValue::Enum(4));
        let e2 = IppAttribute::new("print-quality-default", IppValue::Enum(4));
        assert!(attrs_are_equal(Some(&e1), Some(&e2)));
    }

    #[test]
    fn resolutions_never_compare_equal() {
        let make = || {
            IppAttribute::new(
                "printer-resolution-default",
                IppValue::Resolution { cross_feed: 300, feed: 300, units: RESOLUTION_PER_INCH },
            )
        };
        let (a, b) = (make(), make());
        assert!(!attrs_are_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn collections_never_compare_equal() {
        let make = || {
            IppAttribute::new(
                "media-col-default",
                IppValue::Collection(vec![(
                    "media-size-name".into(),
                    IppValue::Keyword("iso_a4_210x297mm".into()),
                )]),
            )
        };
        let (a, b) = (make(), make());
        assert!(!attrs_are_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn contains_helpers() {
        let a = kw("document-format-supported", &["application/pdf", "image/urf"]);
        assert!(a.contains_str("image/urf"));
        assert!(!a.contains_str("image/pwg-raster"));

        let ops = IppAttribute::new_set(
            "operations-supported",
            vec![IppValue::Enum(0x0005), IppValue::Enum(0x0006)],
        );
        assert!(ops.contains_integer(0x0005));
        assert!(!ops.contains_integer(0x0002));
    }
}
