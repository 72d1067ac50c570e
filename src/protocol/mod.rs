//! Classification of freshly opened tunnel streams.
//!
//! Every stream opened over a tunnel connection starts with a fixed-length signature telling the
//! receiving side whether the rest of the stream is a proxied request or an RPC connection.

pub mod error;

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use self::error::ProtocolError;

/// Length of every protocol signature.
pub const SIGNATURE_LEN: usize = 6;

pub type ProtocolSignature = [u8; SIGNATURE_LEN];

/// Written first on streams carrying proxied requests.
pub const DATA_STREAM_SIGNATURE: ProtocolSignature = [0x0A, 0x36, 0xCD, 0x12, 0xA1, 0x3E];

/// Written first on streams carrying an RPC connection.
pub const RPC_STREAM_SIGNATURE: ProtocolSignature = [0x52, 0xBB, 0x82, 0x5C, 0xDB, 0x65];

/// Any ordered bidirectional byte stream a tunnel connection can hand over.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A type erased [`TunnelStream`].
pub type BoxedStream = Box<dyn TunnelStream>;

/// What a stream carries once its signature has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Data,
    Rpc,
}

impl StreamKind {
    pub fn signature(self) -> ProtocolSignature {
        match self {
            StreamKind::Data => DATA_STREAM_SIGNATURE,
            StreamKind::Rpc => RPC_STREAM_SIGNATURE,
        }
    }

    pub fn from_signature(signature: &ProtocolSignature) -> Option<Self> {
        match *signature {
            DATA_STREAM_SIGNATURE => Some(StreamKind::Data),
            RPC_STREAM_SIGNATURE => Some(StreamKind::Rpc),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Data => f.write_str("data"),
            StreamKind::Rpc => f.write_str("rpc"),
        }
    }
}

/// Read the signature off the front of `stream` and classify it.
///
/// Exactly [`SIGNATURE_LEN`] bytes are consumed; the remainder of the stream is left untouched
/// for whoever handles it next. The stream is never re-classified after a failure.
pub async fn determine_protocol<S>(stream: &mut S) -> Result<StreamKind, ProtocolError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut signature = [0u8; SIGNATURE_LEN];
    stream.read_exact(&mut signature).await?;

    StreamKind::from_signature(&signature).ok_or(ProtocolError::UnknownProtocol(signature))
}

/// Write the signature announcing `kind` as the very first bytes of `stream`.
pub async fn write_signature<S>(stream: &mut S, kind: StreamKind) -> Result<(), ProtocolError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&kind.signature()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_signatures_are_disjoint() {
        assert_ne!(DATA_STREAM_SIGNATURE, RPC_STREAM_SIGNATURE);
        assert_eq!(
            StreamKind::from_signature(&DATA_STREAM_SIGNATURE),
            Some(StreamKind::Data)
        );
        assert_eq!(
            StreamKind::from_signature(&RPC_STREAM_SIGNATURE),
            Some(StreamKind::Rpc)
        );
        assert_eq!(StreamKind::from_signature(b"GET / "), None);
    }

    #[tokio::test]
    async fn test_signature_is_consumed() {
        let (mut near, mut far) = tokio::io::duplex(64);
        write_signature(&mut near, StreamKind::Data).await.unwrap();
        near.write_all(b"payload").await.unwrap();
        drop(near);

        assert_eq!(
            determine_protocol(&mut far).await.unwrap(),
            StreamKind::Data
        );

        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let mut stream: &[u8] = b"GET / HTTP/1.1\r\n";
        let err = determine_protocol(&mut stream).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownProtocol(sig) if &sig == b"GET / "));
    }

    #[tokio::test]
    async fn test_premature_close() {
        let mut stream: &[u8] = &RPC_STREAM_SIGNATURE[..3];
        let err = determine_protocol(&mut stream).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == ErrorKind::UnexpectedEof));
    }
}
