//! Flight Controller Connection
//!
//! [`MavlinkLink`] is the production [`DroneLink`]: it opens a MAVLink
//! connection, reads frames on a dedicated thread and keeps a ground station
//! heartbeat going so the autopilot streams telemetry.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mavlink::ardupilotmega::MavMessage;
use mavlink::error::MessageReadError;
use mavlink_console_shared::{
    defaults, Battery, ConnectionState, FlightMode, Health, LinkConfig, Position, Protocol,
    SystemAddress,
};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::commands::{CommandSender, Connection, MavSender};
use super::telemetry::TelemetryHub;
use crate::link::{DroneLink, LinkError, TelemetryStream};

/// Connection string understood by `mavlink::connect`
pub fn endpoint(address: &SystemAddress) -> String {
    match address.protocol {
        // Listen for the autopilot, as MAVSDK-style udp:// addresses do
        Protocol::Udp => format!("udpin:{}:{}", address.address, address.port),
        Protocol::Tcp => format!("tcpout:{}:{}", address.address, address.port),
        Protocol::Serial => format!("serial:{}:{}", address.address, address.port),
    }
}

/// An open connection and the tasks serving it
struct ActiveLink {
    address: SystemAddress,
    commands: CommandSender,
    /// Cleared to stop the reader, and by the reader when it exits
    running: Arc<AtomicBool>,
    heartbeat: JoinHandle<()>,
}

impl ActiveLink {
    fn is_alive(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the reader and wait for the heartbeat task to finish.
    ///
    /// The reader notices the flag after its current `recv`. TCP reads time
    /// out every 100 ms; a quiet `udpin` socket blocks until the next
    /// datagram, so the old thread and its socket can outlive this call.
    async fn shutdown(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.heartbeat.abort();
        let _ = (&mut self.heartbeat).await;
    }
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.heartbeat.abort();
    }
}

/// MAVLink-backed drone link
pub struct MavlinkLink {
    config: LinkConfig,
    hub: Arc<TelemetryHub>,
    /// f32 bits of the altitude for the next takeoff
    takeoff_altitude: AtomicU32,
    active: Option<ActiveLink>,
}

impl MavlinkLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            hub: Arc::new(TelemetryHub::new()),
            takeoff_altitude: AtomicU32::new(defaults::TAKEOFF_ALTITUDE_M.to_bits()),
            active: None,
        }
    }

    fn active(&self) -> Result<&ActiveLink, LinkError> {
        self.active.as_ref().ok_or(LinkError::NotOpen)
    }
}

#[async_trait]
impl DroneLink for MavlinkLink {
    async fn open(&mut self, address: &SystemAddress) -> Result<(), LinkError> {
        if let Some(active) = &self.active {
            if active.address == *address && active.is_alive() {
                // The reader still owns the socket; reopening would collide
                debug!("Reusing MAVLink connection to {}", address);
                return Ok(());
            }
        }
        if let Some(previous) = self.active.take() {
            info!("Closing MAVLink connection to {}", previous.address);
            previous.shutdown().await;
        }

        let endpoint = endpoint(address);
        info!("Opening MAVLink connection: {}", endpoint);

        let connection = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&endpoint))
            .await
            .map_err(|e| LinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        let connection: Connection = Arc::new(connection);

        let sender = Arc::new(MavSender::new(connection.clone(), &self.config));
        let running = Arc::new(AtomicBool::new(true));

        spawn_reader(connection, sender.clone(), self.hub.clone(), running.clone())?;
        let heartbeat = tokio::spawn(heartbeat_loop(sender.clone(), self.config.heartbeat_interval));

        self.active = Some(ActiveLink {
            address: address.clone(),
            commands: CommandSender::new(sender, self.hub.clone(), &self.config),
            running,
            heartbeat,
        });

        Ok(())
    }

    fn connection_state(&self) -> TelemetryStream<ConnectionState> {
        self.hub.connection_state()
    }

    fn health(&self) -> TelemetryStream<Health> {
        self.hub.health()
    }

    fn position(&self) -> TelemetryStream<Position> {
        self.hub.position()
    }

    fn battery(&self) -> TelemetryStream<Battery> {
        self.hub.battery()
    }

    fn flight_mode(&self) -> TelemetryStream<FlightMode> {
        self.hub.flight_mode()
    }

    async fn arm(&self) -> Result<(), LinkError> {
        self.active()?.commands.arm().await
    }

    async fn disarm(&self) -> Result<(), LinkError> {
        self.active()?.commands.disarm().await
    }

    async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<(), LinkError> {
        self.takeoff_altitude
            .store(altitude_m.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    async fn takeoff(&self) -> Result<(), LinkError> {
        let altitude_m = f32::from_bits(self.takeoff_altitude.load(Ordering::Relaxed));
        self.active()?.commands.takeoff(altitude_m).await
    }

    async fn land(&self) -> Result<(), LinkError> {
        self.active()?.commands.land().await
    }
}

/// Read frames on a dedicated thread; `recv` blocks
fn spawn_reader(
    connection: Connection,
    sender: Arc<MavSender>,
    hub: Arc<TelemetryHub>,
    running: Arc<AtomicBool>,
) -> Result<(), LinkError> {
    std::thread::Builder::new()
        .name("mavlink-reader".into())
        .spawn(move || reader_loop(connection, sender, hub, running))?;
    Ok(())
}

fn reader_loop(
    connection: Connection,
    sender: Arc<MavSender>,
    hub: Arc<TelemetryHub>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match connection.recv() {
            Ok((header, msg)) => {
                if let Some(vehicle) = hub.process_message(&header, &msg) {
                    info!(
                        "Discovered vehicle: system={} component={} autopilot={:?}",
                        vehicle.system_id, vehicle.component_id, vehicle.autopilot
                    );
                    if let Err(e) = sender.request_streams(&vehicle) {
                        warn!("Failed to request data streams: {}", e);
                    }
                }
            }
            Err(MessageReadError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(MessageReadError::Io(e)) => {
                error!("MAVLink read error: {}", e);
                hub.disconnected();
                break;
            }
            Err(e) => {
                debug!("Skipping undecodable frame: {}", e);
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    debug!("MAVLink reader stopped");
}

async fn heartbeat_loop(sender: Arc<MavSender>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        if let Err(e) = sender.heartbeat() {
            warn!("Failed to send heartbeat: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::first;
    use futures::FutureExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn listener() -> (TcpListener, SystemAddress) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, address(Protocol::Tcp, "127.0.0.1", port))
    }

    async fn reader_stopped(link: &MavlinkLink) {
        timeout(WAIT, async {
            while link.active.as_ref().is_some_and(ActiveLink::is_alive) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    fn address(protocol: Protocol, address: &str, port: u16) -> SystemAddress {
        SystemAddress {
            protocol,
            address: address.into(),
            port,
        }
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            endpoint(&address(Protocol::Udp, "0.0.0.0", 14540)),
            "udpin:0.0.0.0:14540"
        );
        assert_eq!(
            endpoint(&address(Protocol::Tcp, "127.0.0.1", 5760)),
            "tcpout:127.0.0.1:5760"
        );
        assert_eq!(
            endpoint(&address(Protocol::Serial, "/dev/ttyACM0", 57600)),
            "serial:/dev/ttyACM0:57600"
        );
    }

    #[tokio::test]
    async fn test_commands_require_open_link() {
        let link = MavlinkLink::new(LinkConfig::default());
        assert!(matches!(link.arm().await, Err(LinkError::NotOpen)));
        assert!(matches!(link.land().await, Err(LinkError::NotOpen)));
    }

    #[tokio::test]
    async fn test_takeoff_altitude_stored() {
        let link = MavlinkLink::new(LinkConfig::default());
        link.set_takeoff_altitude(25.0).await.unwrap();
        assert_eq!(f32::from_bits(link.takeoff_altitude.load(Ordering::Relaxed)), 25.0);
    }

    #[tokio::test]
    async fn test_subscription_waits_without_link() {
        let link = MavlinkLink::new(LinkConfig::default());
        // Nothing has been received, so the first value is still pending
        assert!(first(link.position()).now_or_never().is_none());
    }

    #[tokio::test]
    async fn test_open_reuses_live_connection() {
        let (listener, target) = listener().await;
        let mut link = MavlinkLink::new(LinkConfig::default());

        link.open(&target).await.unwrap();
        let _peer = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

        link.open(&target).await.unwrap();
        assert!(timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_open_reconnects_after_reader_exit() {
        let (listener, target) = listener().await;
        let mut link = MavlinkLink::new(LinkConfig::default());

        link.open(&target).await.unwrap();
        let (peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

        // Vehicle side hangs up; the reader hits EOF and stops
        drop(peer);
        reader_stopped(&link).await;

        link.open(&target).await.unwrap();
        assert!(timeout(WAIT, listener.accept()).await.is_ok());
        assert!(link.active.as_ref().is_some_and(ActiveLink::is_alive));
    }

    #[tokio::test]
    async fn test_open_other_address_closes_previous() {
        let (first_listener, first_target) = listener().await;
        let (second_listener, second_target) = listener().await;
        let mut link = MavlinkLink::new(LinkConfig::default());

        link.open(&first_target).await.unwrap();
        let (mut old_peer, _) = timeout(WAIT, first_listener.accept()).await.unwrap().unwrap();
        let old_running = link.active.as_ref().unwrap().running.clone();

        link.open(&second_target).await.unwrap();
        let _peer = timeout(WAIT, second_listener.accept()).await.unwrap().unwrap();
        assert!(!old_running.load(Ordering::Relaxed));

        // The old socket closes once the reader drops it; skip buffered heartbeats
        let closed = timeout(WAIT, async {
            let mut buf = [0u8; 512];
            while matches!(old_peer.read(&mut buf).await, Ok(n) if n > 0) {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
