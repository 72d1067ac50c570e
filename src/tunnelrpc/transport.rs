use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::tunnelrpc::error::RpcError;

/// Frame size limit used when none is configured.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Carries protobuf messages over the remainder of a classified RPC stream.
///
/// Messages are framed with a 4 byte big endian length prefix.
pub struct RpcTransport<S> {
    source: MessageSource<S>,
    sink: MessageSink<S>,
}

impl<S> RpcTransport<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, max_frame_length: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        let mut codec = LengthDelimitedCodec::builder();
        codec.max_frame_length(max_frame_length);

        Self {
            source: MessageSource {
                frames: FramedRead::new(reader, codec.new_codec()),
            },
            sink: MessageSink {
                frames: FramedWrite::new(writer, codec.new_codec()),
            },
        }
    }

    /// Split into independently usable receive and send halves.
    pub fn split(self) -> (MessageSource<S>, MessageSink<S>) {
        (self.source, self.sink)
    }
}

/// Receiving half of an [`RpcTransport`].
pub struct MessageSource<S> {
    frames: FramedRead<ReadHalf<S>, LengthDelimitedCodec>,
}

impl<S> MessageSource<S>
where
    S: AsyncRead,
{
    /// Receive the next message, or `None` once the peer has closed the stream.
    ///
    /// Cancel safe: dropping the future never loses a partially read frame.
    pub async fn recv<M>(&mut self) -> Option<Result<M, RpcError>>
    where
        M: Message + Default,
    {
        let frame = self.frames.next().await?;
        Some(
            frame
                .map_err(RpcError::from)
                .and_then(|bytes| M::decode(bytes.freeze()).map_err(RpcError::from)),
        )
    }
}

/// Sending half of an [`RpcTransport`].
pub struct MessageSink<S> {
    frames: FramedWrite<WriteHalf<S>, LengthDelimitedCodec>,
}

impl<S> MessageSink<S>
where
    S: AsyncWrite,
{
    pub async fn send<M>(&mut self, message: &M) -> Result<(), RpcError>
    where
        M: Message,
    {
        self.frames
            .send(Bytes::from(message.encode_to_vec()))
            .await?;
        Ok(())
    }

    /// Flush anything buffered and shut down the write side of the stream.
    pub async fn close(&mut self) -> Result<(), RpcError> {
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }
}
