use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use log::{info, warn};
use machine_learning::arch::Sequential;
use tokio::{
    net::TcpListener,
    sync::Semaphore,
    task::JoinSet,
};

use crate::{config::ServerConfig, session};

/// Serves the tail of a split model, one task per connection.
pub struct InferenceServer {
    listener: TcpListener,
    tail: Arc<Sequential>,
    limit: Option<Duration>,
    slots: Option<Arc<Semaphore>>,
}

impl InferenceServer {
    /// Binds a new `InferenceServer`.
    ///
    /// # Arguments
    /// * `config` - The server configuration, port 0 picks a free port.
    /// * `tail` - The tail of the model, shared read-only by every session.
    ///
    /// # Returns
    /// A new `InferenceServer` or an io error if binding failed.
    pub async fn bind(config: &ServerConfig, tail: Sequential) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let slots = config
            .max_connections
            .filter(|&n| n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        info!("listening at {}, tail takes {:?}", listener.local_addr()?, tail.input_shape());

        Ok(Self {
            listener,
            tail: Arc::new(tail),
            limit: config.timeout(),
            slots,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tail(&self) -> &Sequential {
        &self.tail
    }

    /// Accepts connections forever.
    pub async fn serve(self) -> io::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then waits for the
    /// sessions in flight.
    ///
    /// # Arguments
    /// * `shutdown` - Stops the accept loop when it resolves.
    pub async fn serve_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let permit = match &self.slots {
                Some(slots) => tokio::select! {
                    permit = slots.clone().acquire_owned() => {
                        Some(permit.map_err(io::Error::other)?)
                    }
                    _ = &mut shutdown => break,
                },
                None => None,
            };

            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("failed to accept a connection: {e}");
                            continue;
                        }
                    };

                    info!(sessions = sessions.len(); "accepted {peer}");

                    let tail = self.tail.clone();
                    let limit = self.limit;
                    sessions.spawn(async move {
                        let _permit = permit;
                        session::handle(stream, peer, tail, limit).await;
                    });
                }
                Some(res) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = res {
                        warn!("session task failed: {e}");
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!(sessions = sessions.len(); "stopped accepting, waiting for the sessions in flight");

        while let Some(res) = sessions.join_next().await {
            if let Err(e) = res {
                warn!("session task failed: {e}");
            }
        }

        Ok(())
    }
}
