use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use comms::{DType, InferenceResult, OnoReceiver, OnoSender};
use log::{info, warn};
use machine_learning::{arch::Sequential, convert};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    task, time,
};

use crate::error::{Result, ServerErr};

/// Serves a single connection, every failure is logged and stays here.
///
/// # Arguments
/// * `stream` - The accepted connection.
/// * `peer` - The address of the client.
/// * `tail` - The shared tail of the model.
/// * `limit` - The bound on the whole session, if any.
pub(crate) async fn handle(
    stream: TcpStream,
    peer: SocketAddr,
    tail: Arc<Sequential>,
    limit: Option<Duration>,
) {
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let res = match limit {
        Some(limit) => time::timeout(limit, run_session(&mut rx, &mut tx, tail))
            .await
            .unwrap_or_else(|_| {
                Err(ServerErr::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("session exceeded {limit:?}"),
                )))
            }),
        None => run_session(&mut rx, &mut tx, tail).await,
    };

    match res {
        Ok(ids) => info!(batch = ids.len(); "answered {peer}"),
        Err(e) => warn!(protocol = e.is_protocol(); "session with {peer} failed: {e}"),
    }
}

/// Runs one request/response exchange: reads the activation, runs the tail
/// and answers with the class id of every batch row.
///
/// # Arguments
/// * `rx` - The receiving end of the session.
/// * `tx` - The sending end of the session.
/// * `tail` - The shared tail of the model.
///
/// # Returns
/// The predicted class ids, or a `Protocol` error if the frame is malformed or
/// its shape isn't the one the tail takes.
pub async fn run_session<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    tail: Arc<Sequential>,
) -> Result<Vec<i64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let activation = rx.recv().await.map_err(ServerErr::from_wire)?;

    if activation.dtype() != DType::F32 {
        return Err(ServerErr::protocol(format!(
            "expected an F32 activation, got {:?}",
            activation.dtype()
        )));
    }

    if activation.shape() != tail.input_shape() {
        return Err(ServerErr::protocol(format!(
            "the tail takes {:?}, got {:?}",
            tail.input_shape(),
            activation.shape()
        )));
    }

    let x = convert::to_array(&activation).map_err(ServerErr::Compute)?;
    let ids = task::spawn_blocking(move || tail.predict(x))
        .await
        .map_err(io::Error::other)?
        .map_err(ServerErr::Compute)?;

    tx.send(&InferenceResult::labels_tensor(&ids)?).await?;
    tx.shutdown().await?;

    Ok(ids)
}
