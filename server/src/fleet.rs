//! Keeping track of the edge devices and starting clients on them.
//!
//! The server only decides *what* to run on a device, carrying it out (over
//! SSH or otherwise) is up to a `ClientLauncher`.

use std::{io, time::Duration};

use log::{debug, info, warn};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinSet,
    time,
};

use crate::config::FleetConfig;

/// The port probed to tell whether a device is up.
pub const SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(String),
    Disconnected(String),
}

/// Probes every device periodically and reports when one comes up or goes down.
#[derive(Debug, Clone)]
pub struct DeviceMonitor {
    devices: Vec<String>,
    port: u16,
    interval: Duration,
    probe_timeout: Duration,
}

impl DeviceMonitor {
    pub fn new(devices: Vec<String>) -> Self {
        Self {
            devices,
            port: SSH_PORT,
            interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether `device` accepts connections on the probed port.
    pub async fn probe(&self, device: &str) -> bool {
        let connect = TcpStream::connect((device, self.port));
        matches!(time::timeout(self.probe_timeout, connect).await, Ok(Ok(_)))
    }

    /// Watches every device until `events` is closed.
    ///
    /// Devices start out disconnected, so the first successful probe of each
    /// one reports it as connected.
    pub async fn run(self, events: mpsc::Sender<DeviceEvent>) {
        let mut watchers = JoinSet::new();

        for device in self.devices.clone() {
            let monitor = self.clone();
            let events = events.clone();
            watchers.spawn(async move { monitor.watch(device, events).await });
        }

        while watchers.join_next().await.is_some() {}
    }

    async fn watch(&self, device: String, events: mpsc::Sender<DeviceEvent>) {
        let mut connected = false;

        while !events.is_closed() {
            let up = self.probe(&device).await;
            debug!(up = up; "probed {device}");

            if up != connected {
                connected = up;
                let event = if up {
                    DeviceEvent::Connected(device.clone())
                } else {
                    DeviceEvent::Disconnected(device.clone())
                };

                if events.send(event).await.is_err() {
                    return;
                }
            }

            time::sleep(self.interval).await;
        }
    }
}

/// Starts and stops edge clients on devices.
pub trait ClientLauncher {
    /// Starts a client on `device` pointed at the server at `server`.
    fn launch(&mut self, device: &str, server: &str) -> io::Result<()>;

    /// Stops whatever was started on `device`.
    fn stop(&mut self, device: &str) -> io::Result<()>;
}

impl<L: ClientLauncher + ?Sized> ClientLauncher for &mut L {
    fn launch(&mut self, device: &str, server: &str) -> io::Result<()> {
        (**self).launch(device, server)
    }

    fn stop(&mut self, device: &str) -> io::Result<()> {
        (**self).stop(device)
    }
}

/// The shell commands that bring up a client on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// `user@device`.
    pub target: String,
    pub commands: Vec<String>,
}

impl LaunchPlan {
    /// Builds the plan for `device`: update the checkout, export the display
    /// and start the client pointed at `server`.
    ///
    /// # Arguments
    /// * `device` - The device address.
    /// * `fleet` - The fleet configuration.
    /// * `server` - The `host:port` address of the server.
    /// * `checkout_exists` - Whether the repository is already on the device.
    pub fn for_device(
        device: &str,
        fleet: &FleetConfig,
        server: &str,
        checkout_exists: bool,
    ) -> Self {
        let checkout = &fleet.checkout;
        let mut commands = Vec::new();

        if checkout_exists {
            commands.push(format!("cd {checkout}"));
            commands.push("git pull".to_string());
        } else {
            commands.push(format!(
                "git clone --depth 1 https://{} {checkout}",
                fleet.repository
            ));
            commands.push(format!("cd {checkout}"));
        }

        let (ip, port) = server.rsplit_once(':').unwrap_or((server, ""));
        let mut run = format!("edge --ip {ip}");
        if !port.is_empty() {
            run.push_str(&format!(" --port {port}"));
        }

        commands.push(format!("export DISPLAY={}", fleet.display));
        commands.push(run);

        Self {
            target: format!("{}@{device}", fleet.username),
            commands,
        }
    }
}

/// A launcher that only logs the plan it would run, for fleets driven by hand.
#[derive(Debug, Clone)]
pub struct LogLauncher {
    fleet: FleetConfig,
}

impl LogLauncher {
    pub fn new(fleet: FleetConfig) -> Self {
        Self { fleet }
    }
}

impl ClientLauncher for LogLauncher {
    fn launch(&mut self, device: &str, server: &str) -> io::Result<()> {
        let plan = LaunchPlan::for_device(device, &self.fleet, server, true);
        info!("start a client on {}: {}", plan.target, plan.commands.join(" && "));
        Ok(())
    }

    fn stop(&mut self, device: &str) -> io::Result<()> {
        info!("{device} went away");
        Ok(())
    }
}

/// Launches a client on every device that connects and stops it when it goes away.
///
/// # Arguments
/// * `events` - The events of a `DeviceMonitor`.
/// * `launcher` - Carries out the launches.
/// * `server` - The `host:port` address the clients connect to.
pub async fn drive<L: ClientLauncher>(
    mut events: mpsc::Receiver<DeviceEvent>,
    mut launcher: L,
    server: String,
) {
    while let Some(event) = events.recv().await {
        let res = match &event {
            DeviceEvent::Connected(device) => launcher.launch(device, &server),
            DeviceEvent::Disconnected(device) => launcher.stop(device),
        };

        if let Err(e) = res {
            warn!("failed to handle {event:?}: {e}");
        }
    }
}
