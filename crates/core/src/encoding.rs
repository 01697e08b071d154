//! Canonical value encoding.
//!
//! Every value the primitives persist in Redis goes through [`encode`]: JSON
//! with object keys in lexicographic order, no insignificant whitespace, and
//! every non-ASCII character escaped as `\uXXXX`. Two equal values always
//! produce byte-identical encodings, which is what makes fingerprinting and
//! compare-and-set against stored text safe.

use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::ser::Formatter;

use crate::error::CoreError;

/// JSON formatter that escapes everything outside the ASCII range.
///
/// `serde_json` passes non-ASCII characters through verbatim; this formatter
/// rewrites them as `\uXXXX` escapes (surrogate pairs above the BMP) so the
/// output is always pure ASCII.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut utf8 = [0u8; 4];
        let mut utf16 = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(ch.encode_utf8(&mut utf8).as_bytes())?;
            } else {
                for unit in ch.encode_utf16(&mut utf16) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize a value to its canonical textual form.
///
/// Values that cannot be represented as JSON text (non-string map keys,
/// serializer failures) surface [`CoreError::Encoding`].
pub fn encode<T: Serialize>(value: &T) -> Result<String, CoreError> {
    // Round through `serde_json::Value` first: its object representation is a
    // `BTreeMap`, which gives the lexicographic key ordering the canonical
    // form requires.
    let canonical =
        serde_json::to_value(value).map_err(|e| CoreError::Encoding(e.to_string()))?;

    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
    canonical
        .serialize(&mut serializer)
        .map_err(|e| CoreError::Encoding(e.to_string()))?;

    String::from_utf8(buf).map_err(|e| CoreError::Encoding(e.to_string()))
}

/// Deserialize a value from its canonical textual form.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: i64,
        tags: Vec<String>,
    }

    #[test]
    fn object_keys_are_sorted() {
        let mut map = HashMap::new();
        map.insert("zebra", 1);
        map.insert("alpha", 2);
        map.insert("mango", 3);

        let encoded = encode(&map).expect("plain map should encode");
        assert_eq!(encoded, r#"{"alpha":2,"mango":3,"zebra":1}"#);
    }

    #[test]
    fn struct_fields_are_sorted() {
        let sample = Sample {
            name: "redis".into(),
            count: 7,
            tags: vec!["a".into()],
        };
        let encoded = encode(&sample).expect("struct should encode");
        // Field order in the source is name/count/tags; canonical order is
        // lexicographic.
        assert_eq!(encoded, r#"{"count":7,"name":"redis","tags":["a"]}"#);
    }

    #[test]
    fn non_ascii_is_escaped() {
        let encoded = encode(&"café").expect("string should encode");
        assert_eq!(encoded, "\"caf\\u00e9\"");
    }

    #[test]
    fn astral_plane_uses_surrogate_pairs() {
        // U+1D11E MUSICAL SYMBOL G CLEF
        let encoded = encode(&"\u{1d11e}").expect("string should encode");
        assert_eq!(encoded, "\"\\ud834\\udd1e\"");
    }

    #[test]
    fn output_is_pure_ascii() {
        let encoded = encode(&"日本語 and ascii").expect("string should encode");
        assert!(encoded.is_ascii());
    }

    #[test]
    fn round_trip_preserves_value() {
        let sample = Sample {
            name: "ünïcode".into(),
            count: -3,
            tags: vec!["x".into(), "y".into()],
        };
        let encoded = encode(&sample).expect("struct should encode");
        let decoded: Sample = decode(&encoded).expect("canonical text should decode");
        assert_eq!(decoded, sample);
    }

    #[test]
    fn non_string_map_keys_are_rejected() {
        let mut map = BTreeMap::new();
        map.insert((1u8, 2u8), "pair-keyed");

        let err = encode(&map).expect_err("tuple keys are not representable");
        assert!(matches!(err, CoreError::Encoding(_)));
    }

    #[test]
    fn decode_rejects_malformed_text() {
        let err = decode::<Sample>("{not json").expect_err("garbage should not decode");
        assert!(matches!(err, CoreError::Encoding(_)));
    }
}
