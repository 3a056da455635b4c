use std::io;

use log::debug;
use tokio::io::AsyncRead;

use crate::{Tensor, frame};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits to receive a whole frame from the inner receiver.
    ///
    /// # Returns
    /// The received tensor, an `UnexpectedEof` error if the peer closed the
    /// connection mid frame or an `InvalidData` error if the frame is malformed.
    pub async fn recv(&mut self) -> io::Result<Tensor> {
        let tensor = frame::read_frame(&mut self.rx).await?;

        debug!(
            rank = tensor.rank(),
            payload = tensor.data().len();
            "received frame"
        );

        Ok(tensor)
    }
}
