use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::error::OscError;
use crate::packet::OscPacket;

const PACKETS_BUFFER: usize = 512;
const RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// UDP response client for one OSC endpoint. Sends are queued; a writer
/// task owns the socket and re-dials on failure with the same retry cadence
/// as the C3 transport.
pub struct OscClient {
    addr: String,
    packets_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OscClient {
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let (packets_tx, packets_rx) = mpsc::channel::<Vec<u8>>(PACKETS_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_writer(addr.clone(), packets_rx, shutdown_rx));

        Self {
            addr,
            packets_tx,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Serializes the packet and queues it for the writer task. Blocks only
    /// when the outbound queue is full.
    pub async fn send(&self, packet: &OscPacket) -> Result<(), OscError> {
        self.packets_tx
            .send(packet.to_bytes())
            .await
            .map_err(|_| OscError::ChannelClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!(addr = %self.addr, "OSC client shut down");
    }
}

async fn run_writer(
    addr: String,
    mut packets_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut socket: Option<UdpSocket> = None;
    loop {
        let datagram = tokio::select! {
            _ = shutdown_rx.changed() => return,
            datagram = packets_rx.recv() => match datagram {
                None => return,
                Some(datagram) => datagram,
            },
        };

        let connected = match socket.take() {
            Some(connected) => connected,
            None => match connect(&addr, &mut shutdown_rx).await {
                Some(fresh) => fresh,
                None => return,
            },
        };

        match connected.send(&datagram).await {
            Ok(_) => socket = Some(connected),
            Err(err) => {
                // Dropped socket: the next datagram re-dials.
                error!(%addr, %err, "failed to send data");
            }
        }
    }
}

async fn connect(addr: &str, shutdown_rx: &mut watch::Receiver<bool>) -> Option<UdpSocket> {
    loop {
        if *shutdown_rx.borrow() {
            return None;
        }
        let attempt = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(addr).await?;
            Ok::<UdpSocket, std::io::Error>(socket)
        };
        match attempt.await {
            Ok(socket) => {
                info!(%addr, "OSC client connected");
                return Some(socket);
            }
            Err(err) => {
                error!(
                    %addr,
                    %err,
                    "failed to connect, retrying in {:.1}s",
                    RETRY_TIMEOUT.as_secs_f32()
                );
                tokio::select! {
                    _ = shutdown_rx.changed() => return None,
                    _ = sleep(RETRY_TIMEOUT) => {}
                }
            }
        }
    }
}
