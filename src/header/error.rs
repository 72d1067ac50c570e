/// Indicates that a serialized header string could not be turned back into header entries.
///
/// A single malformed pair fails the whole string; no partial result is produced.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    /// A `;`-separated segment did not contain exactly one `:`.
    #[error("unable to deserialize headers: segment {segment} is not a name:value pair")]
    MalformedPair { segment: usize },

    /// One half of a pair was not valid unpadded standard base64.
    #[error("unable to deserialize headers: segment {segment} is not valid base64")]
    InvalidBase64 {
        segment: usize,
        #[source]
        source: base64::DecodeError,
    },
}

/// Indicates that a decoded header entry cannot be used as an HTTP header.
#[derive(Debug, thiserror::Error)]
pub enum InvalidHeaderEntry {
    #[error("invalid header name")]
    Name(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value")]
    Value(#[from] http::header::InvalidHeaderValue),
}
