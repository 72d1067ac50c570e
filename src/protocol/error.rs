use std::io;

use super::ProtocolSignature;

/// Errors raised while classifying a new stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The stream failed or closed before the whole signature arrived.
    #[error("failed to read protocol signature")]
    Io(#[from] io::Error),

    /// The first bytes matched no known signature.
    #[error("unknown protocol {0:02x?}")]
    UnknownProtocol(ProtocolSignature),
}
