//! The implementation of the sending end of the tensor framing.

use std::io;

use log::debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{Tensor, frame};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `tensor` through the inner writer, the call only returns once
    /// the whole frame was written.
    ///
    /// # Arguments
    /// * `tensor` - The tensor to frame and send.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(&mut self, tensor: &Tensor) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        frame::encode_header(tensor, buf)?;

        // The payload is written straight from the tensor, without copying it into `buf`.
        tx.write_all(buf).await?;
        tx.write_all(tensor.data()).await?;
        tx.flush().await?;

        debug!(
            header = buf.len(),
            payload = tensor.data().len();
            "sent frame"
        );

        Ok(())
    }

    /// Shuts down the write half, signaling the end of the session to the peer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
