use std::{io, path::Path, time::Duration};

use comms::{InferenceResult, OnoReceiver, OnoSender, Tensor};
use log::{debug, info, warn};
use machine_learning::{
    arch::Sequential,
    convert, loader,
    partition::{FsPartitionCache, ModelPartitioner},
    preprocess,
};
use ndarray::ArrayD;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    runtime::Runtime,
    time,
};

use crate::{
    config::ClientConfig,
    error::{EdgeErr, Result},
};

/// Runs the head of a split model on this device and asks the server for the tail.
///
/// Every call is blocking, the client drives its own runtime.
pub struct EdgeClient {
    config: ClientConfig,
    head: Sequential,
    full: Option<Sequential>,
    runtime: Runtime,
}

impl EdgeClient {
    /// Creates a new `EdgeClient`.
    ///
    /// # Arguments
    /// * `config` - The client configuration.
    /// * `head` - The head of the partitioned model.
    ///
    /// # Returns
    /// A new `EdgeClient` instance or an io error if the runtime couldn't start.
    pub fn new(config: ClientConfig, head: Sequential) -> Result<Self> {
        Ok(Self {
            config,
            head,
            full: None,
            runtime: Runtime::new()?,
        })
    }

    /// Sets the unsplit model used by `infer_local`.
    pub fn with_full_model(mut self, full: Sequential) -> Self {
        self.full = Some(full);
        self
    }

    /// Loads the head from the partition cache, partitioning the checkpoint if
    /// it's not there. With a checkpoint configured the full model is kept too.
    ///
    /// # Arguments
    /// * `config` - The client configuration.
    ///
    /// # Returns
    /// A new `EdgeClient` or a configuration error.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let partitioner = ModelPartitioner::new(FsPartitionCache::new(&config.cache_dir));
        let architecture = config.architecture.as_str();
        let manifest = config.manifest.as_deref();

        let (head, full) = match config.weights.as_deref() {
            Some(weights) => {
                let graph = loader::load_graph(architecture, manifest, Some(weights))?;
                let partition = partitioner.partition(&graph)?;
                (partition.head, Some(graph.to_sequential()?))
            }
            None => {
                let partition = partitioner.partition_or_load(architecture, || {
                    loader::load_graph(architecture, manifest, None)
                })?;
                (partition.head, None)
            }
        };

        info!(architecture = architecture; "head ready, sends {:?}", head.output_shape());

        let client = Self::new(config, head)?;
        Ok(match full {
            Some(full) => client.with_full_model(full),
            None => client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn head(&self) -> &Sequential {
        &self.head
    }

    /// Classifies the X-ray at `image`, running the tail on the server.
    ///
    /// # Arguments
    /// * `image` - The path to the image.
    /// * `addr` - The `host:port` address of the server.
    ///
    /// # Returns
    /// The server's answer or the first error found, connecting is retried forever.
    pub fn infer<P: AsRef<Path>>(&self, image: P, addr: &str) -> Result<InferenceResult> {
        let x = preprocess::load_image(image).map_err(EdgeErr::Compute)?;
        self.infer_tensor(x, addr)
    }

    /// Like `infer`, for an already preprocessed input.
    pub fn infer_tensor(&self, x: ArrayD<f32>, addr: &str) -> Result<InferenceResult> {
        let activation = self.head.forward(x).map_err(EdgeErr::Compute)?;
        let activation = convert::to_tensor(&activation).map_err(EdgeErr::Compute)?;
        debug!(elements = activation.numel(); "head finished");

        self.runtime.block_on(request(
            addr,
            &activation,
            self.config.retry_delay(),
            self.config.timeout(),
        ))
    }

    /// Classifies the X-ray at `image` with the unsplit model, without the server.
    pub fn infer_local<P: AsRef<Path>>(&self, image: P) -> Result<InferenceResult> {
        let full = self.full.as_ref().ok_or(EdgeErr::NoFullModel)?;
        let x = preprocess::load_image(image).map_err(EdgeErr::Compute)?;
        let ids = full.predict(x).map_err(EdgeErr::Compute)?;

        Ok(InferenceResult {
            label: ids[0].into(),
            raw: Some(InferenceResult::labels_tensor(&ids)?),
        })
    }
}

/// Sends `activation` over a fresh connection to `addr` and waits for the result.
///
/// # Arguments
/// * `addr` - The `host:port` address of the server.
/// * `activation` - The output of the head.
/// * `retry_delay` - The delay between connection attempts.
/// * `limit` - The bound on the exchange once connected, if any.
pub async fn request(
    addr: &str,
    activation: &Tensor,
    retry_delay: Duration,
    limit: Option<Duration>,
) -> Result<InferenceResult> {
    let stream = connect_with_retry(addr, retry_delay).await?;
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let res = match limit {
        Some(limit) => time::timeout(limit, exchange(&mut rx, &mut tx, activation))
            .await
            .map_err(|_| {
                EdgeErr::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer from {addr} within {limit:?}"),
                ))
            })?,
        None => exchange(&mut rx, &mut tx, activation).await,
    }?;

    info!("{addr} answered {}", res.label);
    Ok(res)
}

/// Runs a single request/response exchange over an open channel.
///
/// # Returns
/// The decoded result, a `Protocol` error if the answer is truncated or malformed.
pub async fn exchange<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    activation: &Tensor,
) -> Result<InferenceResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tx.send(activation).await.map_err(EdgeErr::from_wire)?;
    let tensor = rx.recv().await.map_err(EdgeErr::from_wire)?;
    InferenceResult::try_from(tensor).map_err(EdgeErr::from_wire)
}

/// Connects to `addr`, retrying forever every `delay`.
///
/// The name is resolved again on every attempt, a server that isn't in the
/// DNS yet is waited for like one that isn't listening yet.
///
/// # Returns
/// The stream, or an `Address` error if `addr` isn't of the form `host:port`.
pub async fn connect_with_retry(addr: &str, delay: Duration) -> Result<TcpStream> {
    let valid = addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());

    if !valid {
        return Err(EdgeErr::Address {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "expected host:port"),
        });
    }

    let mut attempt: usize = 0;
    loop {
        attempt += 1;

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(attempt = attempt; "connected to {addr}");
                return Ok(stream);
            }
            Err(e) => {
                warn!(attempt = attempt; "can't connect to {addr}: {e}, retrying in {delay:?}");
                time::sleep(delay).await;
            }
        }
    }
}
