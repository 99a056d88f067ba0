//! # Network Transports
//!
//! Concrete collaborators behind the publisher and the supervisors:
//!
//! - [`UdpBroadcast`]: fire-and-forget NMEA sentences to the local subnet,
//!   where chart plotters listen on a fixed UDP port
//! - [`NetworkLink`]: the host's network connection, judged by whether a
//!   routable IPv4 address exists
//! - [`MqttLink`]: MQTT broker session driven by a `rumqttc` event loop
//!   running in its own tokio task
//!
//! None of these block the driver loop. Sockets are non-blocking, helper
//! commands are spawned without waiting, and the MQTT event loop reports
//! its progress through an atomic state cell.

use crate::config::{BroadcastConfig, BrokerConfig, NetworkConfig};
use crate::supervisor::{ConnectProgress, Link};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Packet, QoS};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Errors raised while sending data out.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket operation failed
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// Broker client rejected the publish (queue full, client gone)
    #[error("MQTT publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Publish requested while no broker session exists
    #[error("broker not connected")]
    NotConnected,
}

/// One-way datagram sender for NMEA sentences.
pub trait BroadcastTransport {
    /// Send one datagram, returning the number of bytes written.
    fn send(&mut self, payload: &[u8]) -> Result<usize, TransportError>;
}

/// Topic/payload publisher.
pub trait BrokerTransport {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError>;
}

/// Local IPv4 address the kernel would use to reach `probe`.
///
/// Connecting a UDP socket only performs a route lookup; nothing is sent.
pub fn local_ipv4(probe: &str) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(probe)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Ok(ip),
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no routable IPv4 address",
        )),
    }
}

/// Subnet broadcast address assumed for `ip`: the last octet set to 255.
pub fn broadcast_for(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 255)
}

/// Non-blocking UDP broadcast socket.
pub struct UdpBroadcast {
    socket: UdpSocket,
    address: Option<Ipv4Addr>,
    port: u16,
    probe_address: String,
}

impl UdpBroadcast {
    /// Bind an ephemeral broadcast-enabled socket.
    pub fn bind(config: &BroadcastConfig, probe_address: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        info!(
            "UDP broadcast ready on {} -> {}:{}",
            socket.local_addr()?,
            config
                .address
                .map_or_else(|| "<subnet>".to_string(), |a| a.to_string()),
            config.port
        );
        Ok(Self {
            socket,
            address: config.address,
            port: config.port,
            probe_address: probe_address.to_string(),
        })
    }

    /// Where the next datagram goes. Re-derived each time because the
    /// local address can change across reconnects.
    pub fn destination(&self) -> Result<SocketAddrV4, TransportError> {
        let ip = match self.address {
            Some(ip) => ip,
            None => broadcast_for(local_ipv4(&self.probe_address)?),
        };
        Ok(SocketAddrV4::new(ip, self.port))
    }
}

impl BroadcastTransport for UdpBroadcast {
    fn send(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
        let destination = self.destination()?;
        let written = self.socket.send_to(payload, destination)?;
        debug!("UDP sent {} bytes to {}", written, destination);
        Ok(written)
    }
}

/// Spawn a helper command without waiting for it.
fn spawn_command(argv: &[String]) -> Option<Child> {
    let (program, args) = argv.split_first()?;
    match Command::new(program).args(args).spawn() {
        Ok(child) => Some(child),
        Err(e) => {
            warn!("Failed to run {}: {}", program, e);
            None
        }
    }
}

/// Whether a spawned helper is still running; reaps it once finished.
fn still_running(child: &mut Option<Child>) -> bool {
    let running = match child.as_mut().map(Child::try_wait) {
        Some(Ok(None)) => true,
        Some(Ok(Some(status))) => {
            if !status.success() {
                warn!("Network helper exited with {}", status);
            }
            false
        }
        Some(Err(e)) => {
            warn!("Could not check network helper: {}", e);
            false
        }
        None => false,
    };
    if !running {
        *child = None;
    }
    running
}

/// The host's network connection.
///
/// The operating system owns association and DHCP; this link only observes
/// it, optionally nudges it with a reconnect command, and can switch the
/// radio off when the fail-safe fires.
pub struct NetworkLink {
    probe_address: String,
    reconnect_command: Option<Vec<String>>,
    radio_off_command: Option<Vec<String>>,
    helper: Option<Child>,
}

impl NetworkLink {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            probe_address: config.probe_address.clone(),
            reconnect_command: config.reconnect_command.clone(),
            radio_off_command: config.radio_off_command.clone(),
            helper: None,
        }
    }

    /// Current local address, if any.
    pub fn local_address(&self) -> Option<Ipv4Addr> {
        local_ipv4(&self.probe_address).ok()
    }
}

impl Link for NetworkLink {
    fn begin_connect(&mut self) {
        if still_running(&mut self.helper) {
            return;
        }
        if let Some(argv) = &self.reconnect_command {
            self.helper = spawn_command(argv);
        }
    }

    fn poll_connect(&mut self) -> ConnectProgress {
        match local_ipv4(&self.probe_address) {
            Ok(ip) => {
                info!("Network up, local address {}", ip);
                ConnectProgress::Established
            }
            Err(_) if still_running(&mut self.helper) => ConnectProgress::Pending,
            Err(e) => ConnectProgress::Failed(e.to_string()),
        }
    }

    fn is_up(&self) -> bool {
        self.local_address().is_some()
    }

    fn shutdown(&mut self) {
        if let Some(argv) = &self.radio_off_command {
            info!("Switching radio off");
            self.helper = spawn_command(argv);
        }
    }
}

const STATE_IDLE: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_UP: u8 = 2;
const STATE_DOWN: u8 = 3;

/// MQTT broker session.
///
/// Each connect attempt builds a fresh client and event loop; the loop task
/// flips the shared state cell on CONNACK and on any connection error, then
/// exits. Publishing never waits: messages are queued with `try_publish`.
pub struct MqttLink {
    options: MqttOptions,
    runtime: Handle,
    state: Arc<AtomicU8>,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
}

impl MqttLink {
    /// Build broker options; `runtime` hosts the event loop tasks.
    pub fn new(config: &BrokerConfig, runtime: Handle) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_last_will(LastWill::new(
            &config.topics.status,
            "offline",
            QoS::AtMostOnce,
            true,
        ));
        if let Some((user, pass)) = config.credentials() {
            options.set_credentials(user, pass);
        }

        Self {
            options,
            runtime,
            state: Arc::new(AtomicU8::new(STATE_IDLE)),
            client: None,
            task: None,
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.client = None;
        self.state.store(STATE_IDLE, Ordering::SeqCst);
    }
}

impl Link for MqttLink {
    fn begin_connect(&mut self) {
        self.stop();
        self.state.store(STATE_CONNECTING, Ordering::SeqCst);

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 32);
        let state = Arc::clone(&self.state);
        let (host, port) = self.options.broker_address();
        let broker = format!("{}:{}", host, port);

        self.task = Some(self.runtime.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("MQTT connected to broker: {}", broker);
                            state.store(STATE_UP, Ordering::SeqCst);
                        } else {
                            warn!("MQTT broker {} refused connection: {:?}", broker, ack.code);
                            state.store(STATE_DOWN, Ordering::SeqCst);
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection to {} failed: {}", broker, e);
                        state.store(STATE_DOWN, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }));
        self.client = Some(client);
    }

    fn poll_connect(&mut self) -> ConnectProgress {
        match self.state.load(Ordering::SeqCst) {
            STATE_UP => ConnectProgress::Established,
            STATE_CONNECTING => ConnectProgress::Pending,
            _ => ConnectProgress::Failed("broker unreachable or refused".to_string()),
        }
    }

    fn is_up(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_UP
    }

    fn shutdown(&mut self) {
        self.stop();
    }
}

impl BrokerTransport for MqttLink {
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        if !self.is_up() {
            return Err(TransportError::NotConnected);
        }
        client.try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
