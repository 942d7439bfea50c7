use crate::framing::event::Event;
use crate::framing::{S2sError, S2sFrame};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::trace;

/// Async socket carrying S2S cooked-mode frames over any byte transport.
///
/// The read side is delimited by the frame's big-endian `total_size` word.
/// That word does not count itself, hence the +4 length adjustment; each
/// yielded buffer is one complete frame including the size word, which
/// [`Event::from_buf`] then walks by map count.
#[derive(Debug)]
pub struct S2sSocket<IO> {
    read: FramedRead<ReadHalf<IO>, LengthDelimitedCodec>,
    write: FramedWrite<WriteHalf<IO>, BytesCodec>,
}

impl<IO> S2sSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    pub fn new(io: IO) -> Self {
        let (read, write) = tokio::io::split(io);
        let read = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_type::<u32>()
            .length_adjustment(4)
            .num_skip(0)
            .new_read(read);
        let write = FramedWrite::new(write, BytesCodec::new());
        Self { read, write }
    }

    /// Write bytes that bypass frame encoding (the handshake preamble and
    /// pre-encoded frames).
    pub(crate) async fn send_raw(&mut self, buf: Bytes) -> Result<(), S2sError> {
        trace!("Sending {:#x} bytes: {}", buf.len(), hex::encode(&buf));
        self.write.send(buf).await?;
        Ok(())
    }

    pub(crate) async fn close(&mut self) -> Result<(), S2sError> {
        SinkExt::<Bytes>::close(&mut self.write).await?;
        Ok(())
    }
}

impl<IO> Stream for S2sSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    type Item = Result<S2sFrame, S2sError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let frame = match ready!(this.read.poll_next_unpin(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
            None => return Poll::Ready(None),
        };
        trace!(
            "Received frame with {:#x} bytes: {}",
            frame.len(),
            hex::encode(&frame),
        );
        // Frames are length-prefixed but not self-synchronizing, so any decode
        // error here is terminal: the transport must be discarded, never re-read.
        Poll::Ready(Some(Event::from_buf(&frame).map(S2sFrame::from)))
    }
}

impl<IO> Sink<Event> for S2sSocket<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    type Error = S2sError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_ready_unpin(&mut self.get_mut().write, cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, event: Event) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let buf = Bytes::from(event.to_buf()?);
        trace!("Sending frame with {:#x} bytes: {}", buf.len(), hex::encode(&buf));
        this.write.start_send_unpin(buf).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_flush_unpin(&mut self.get_mut().write, cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_close_unpin(&mut self.get_mut().write, cx).map_err(Into::into)
    }
}
