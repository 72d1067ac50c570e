//! Transport of HTTP header sets across the tunnel as a single opaque string.
//!
//! Every header occurrence is written as `base64(name):base64(value)` and pairs are joined with
//! `;`. The base64 alphabet contains neither delimiter, so the result can be carried inside an
//! ordinary header value without disturbing the framing of the outer request.

pub mod error;

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use http::{HeaderName, HeaderValue};

use self::error::{HeaderDecodeError, InvalidHeaderEntry};

/// Carries the serialized request headers of the eyeball request.
pub const REQUEST_USER_HEADERS: &str = "cf-tunnellink-request-headers";
/// Carries the serialized response headers of the origin.
pub const RESPONSE_USER_HEADERS: &str = "cf-tunnellink-response-headers";
/// Tells the edge who produced a response, see [`ResponseSource`].
pub const RESPONSE_META_HEADER: &str = "cf-tunnellink-response-meta";

const PAIR_DELIMITER: char = ';';
const NAME_VALUE_DELIMITER: char = ':';

const INTERNAL_PREFIX: &str = "cf-int-";
const TUNNEL_PREFIX: &str = "cf-tunnellink-";

static META_FROM_TUNNEL: LazyLock<String> =
    LazyLock::new(|| serde_json::json!({ "src": "tunnellink" }).to_string());
static META_FROM_ORIGIN: LazyLock<String> =
    LazyLock::new(|| serde_json::json!({ "src": "origin" }).to_string());

/// A single decoded header occurrence. Names are not deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderEntry {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderEntry {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl TryFrom<HeaderEntry> for (HeaderName, HeaderValue) {
    type Error = InvalidHeaderEntry;

    fn try_from(entry: HeaderEntry) -> Result<Self, Self::Error> {
        let name = HeaderName::from_bytes(&entry.name)?;
        let value = HeaderValue::from_bytes(&entry.value)?;
        Ok((name, value))
    }
}

/// Who produced a proxied response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Tunnel,
    Origin,
}

impl ResponseSource {
    /// The JSON value placed in [`RESPONSE_META_HEADER`].
    pub fn meta_header(self) -> &'static str {
        match self {
            ResponseSource::Tunnel => META_FROM_TUNNEL.as_str(),
            ResponseSource::Origin => META_FROM_ORIGIN.as_str(),
        }
    }
}

/// Serialize every `(name, value)` occurrence into the tunnel header string.
///
/// Accepts anything that iterates byte-like pairs, including `&http::HeaderMap`. The order of
/// the pairs follows the iteration order of the input and must not be relied upon.
pub fn serialize_headers<I, N, V>(headers: I) -> String
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut serialized = String::new();

    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());
        serialized.reserve(
            2 + base64::encoded_len(name.len(), false).unwrap_or(0)
                + base64::encoded_len(value.len(), false).unwrap_or(0),
        );

        if !serialized.is_empty() {
            serialized.push(PAIR_DELIMITER);
        }
        STANDARD_NO_PAD.encode_string(name, &mut serialized);
        serialized.push(NAME_VALUE_DELIMITER);
        STANDARD_NO_PAD.encode_string(value, &mut serialized);
    }

    serialized
}

/// Serialize a name to values multimap.
pub fn serialize_multimap(headers: &HashMap<String, Vec<String>>) -> String {
    serialize_headers(
        headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name, value))),
    )
}

/// Decode a string produced by [`serialize_headers`].
///
/// Segments that are empty after trimming are skipped, so `""` yields no entries.
pub fn deserialize_headers(serialized: &str) -> Result<Vec<HeaderEntry>, HeaderDecodeError> {
    let mut entries = Vec::new();

    for (segment, pair) in serialized.split(PAIR_DELIMITER).enumerate() {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let mut parts = pair.split(NAME_VALUE_DELIMITER);
        let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(HeaderDecodeError::MalformedPair { segment });
        };

        let decode = |half: &str| {
            STANDARD_NO_PAD
                .decode(half)
                .map_err(|source| HeaderDecodeError::InvalidBase64 { segment, source })
        };

        entries.push(HeaderEntry {
            name: decode(name)?,
            value: decode(value)?,
        });
    }

    Ok(entries)
}

/// Headers that belong to the tunnel itself and must never reach an origin or an eyeball.
pub fn is_control_response_header(name: &str) -> bool {
    name.starts_with(':') || name.starts_with(INTERNAL_PREFIX) || name.starts_with(TUNNEL_PREFIX)
}

/// Headers the client needs verbatim to complete a websocket upgrade.
pub fn is_websocket_client_header(name: &str) -> bool {
    matches!(name, "sec-websocket-accept" | "connection" | "upgrade")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn sorted(mut entries: Vec<HeaderEntry>) -> Vec<HeaderEntry> {
        entries.sort();
        entries
    }

    #[test]
    fn test_round_trip_multimap() {
        let mut headers = HashMap::new();
        headers.insert(
            "Mock-Header-One".to_string(),
            vec!["Mock header one value".to_string(), "second".to_string()],
        );
        headers.insert(
            "Mock-Header-Two-Long".to_string(),
            vec!["Mock header two value\nlong".to_string()],
        );
        headers.insert(":;".to_string(), vec![";:".to_string()]);
        headers.insert("Empty".to_string(), vec![String::new()]);

        let serialized = serialize_multimap(&headers);
        let decoded = deserialize_headers(&serialized).unwrap();

        let expected = vec![
            HeaderEntry::new("Mock-Header-One", "Mock header one value"),
            HeaderEntry::new("Mock-Header-One", "second"),
            HeaderEntry::new("Mock-Header-Two-Long", "Mock header two value\nlong"),
            HeaderEntry::new(":;", ";:"),
            HeaderEntry::new("Empty", ""),
        ];
        assert_eq!(sorted(decoded), sorted(expected));
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (vec![0x00, 0xff, 0x3a], vec![0x3b, 0x80]),
            (vec![0x00, 0xff, 0x3a], vec![0x3b, 0x80]),
            (b"x".to_vec(), vec![0xc3, 0x28]),
        ];

        let decoded = deserialize_headers(&serialize_headers(pairs.clone())).unwrap();
        let expected = pairs
            .into_iter()
            .map(|(name, value)| HeaderEntry { name, value })
            .collect();

        assert_eq!(sorted(decoded), sorted(expected));
    }

    #[test]
    fn test_serialize_header_map() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let serialized = serialize_headers(&headers);
        assert!(!serialized.contains('='));
        assert_eq!(serialized.matches(';').count(), 1);

        let pairs: Vec<(HeaderName, HeaderValue)> = deserialize_headers(&serialized)
            .unwrap()
            .into_iter()
            .map(|entry| entry.try_into().unwrap())
            .collect();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(name, _)| name == "accept"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(serialize_multimap(&HashMap::new()), "");
        assert!(deserialize_headers("").unwrap().is_empty());
        assert!(deserialize_headers(" ; ;").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_pairs() {
        assert!(matches!(
            deserialize_headers("abc"),
            Err(HeaderDecodeError::MalformedPair { segment: 0 })
        ));
        assert!(matches!(
            deserialize_headers("YQ==:YQ==:extra"),
            Err(HeaderDecodeError::MalformedPair { .. })
        ));
    }

    #[test]
    fn test_one_bad_pair_fails_everything() {
        let good = serialize_headers([("a", "b")]);
        let input = format!("{good};YQ:!!");
        assert!(matches!(
            deserialize_headers(&input),
            Err(HeaderDecodeError::InvalidBase64 { segment: 1, .. })
        ));
    }

    #[test]
    fn test_padding_is_rejected() {
        assert!(deserialize_headers("YQ==:YQ==").is_err());
        assert_eq!(
            deserialize_headers("YQ:YQ").unwrap(),
            vec![HeaderEntry::new("a", "a")]
        );
    }

    #[test]
    fn test_control_response_headers() {
        assert!(is_control_response_header(":status"));
        assert!(is_control_response_header("cf-int-trace"));
        assert!(is_control_response_header(RESPONSE_META_HEADER));
        assert!(!is_control_response_header("content-type"));
        assert!(!is_control_response_header("cf-ray"));
    }

    #[test]
    fn test_websocket_client_headers() {
        assert!(is_websocket_client_header("sec-websocket-accept"));
        assert!(is_websocket_client_header("connection"));
        assert!(is_websocket_client_header("upgrade"));
        assert!(!is_websocket_client_header("sec-websocket-key"));
    }

    #[test]
    fn test_response_meta_header() {
        assert_eq!(ResponseSource::Tunnel.meta_header(), r#"{"src":"tunnellink"}"#);
        assert_eq!(ResponseSource::Origin.meta_header(), r#"{"src":"origin"}"#);
    }
}
