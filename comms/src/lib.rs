mod addr;
pub mod frame;
mod receiver;
mod result;
mod sender;
mod tensor;

use tokio::io::{AsyncRead, AsyncWrite};

pub use addr::local_ip;
pub use frame::{MAX_PAYLOAD_LEN, MAX_RANK, decode, encode};
pub use receiver::OnoReceiver;
pub use result::{InferenceResult, Label};
pub use sender::OnoSender;
pub use tensor::{DType, Tensor};

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
