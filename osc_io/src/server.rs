use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::OscError;
use crate::packet::OscPacket;

const PACKETS_BUFFER: usize = 512;
const UDP_BUFFER: usize = 1024;

/// Receiver of parsed OSC packets. The server does not filter by path;
/// every listener sees every packet and does its own matching.
pub trait OscListener: Send + Sync {
    fn deliver(&self, packet: Arc<OscPacket>);
}

/// UDP ingest server: reads datagrams, parses them and fans each packet out
/// to all subscribers. A bounded channel between the socket reader and the
/// dispatcher absorbs bursts; overflow drops the newest datagram.
pub struct OscServer {
    port: u16,
    local_addr: Mutex<Option<SocketAddr>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn OscListener>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OscServer {
    pub fn new(port: u16) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            port,
            local_addr: Mutex::new(None),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Binds the socket and starts the reader and dispatcher tasks.
    pub async fn listen_and_serve(&self) -> Result<(), OscError> {
        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .await
            .map_err(|err| OscError::Bind(format!("0.0.0.0:{}: {err}", self.port)))?;
        let local_addr = socket
            .local_addr()
            .map_err(|err| OscError::Bind(err.to_string()))?;
        *self.local_addr.lock().await = Some(local_addr);

        let (packets_tx, packets_rx) = mpsc::channel::<Vec<u8>>(PACKETS_BUFFER);

        let reader = tokio::spawn(run_reader(socket, packets_tx, self.shutdown_tx.subscribe()));
        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&self.subscribers),
            packets_rx,
            self.shutdown_tx.subscribe(),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(reader);
        tasks.push(dispatcher);

        info!(%local_addr, "OSC server started");
        Ok(())
    }

    /// Actual bound address, available after [`OscServer::listen_and_serve`].
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub async fn subscribe(&self, listener: Arc<dyn OscListener>) {
        self.subscribers.write().await.push(listener);
    }

    pub async fn unsubscribe_all(&self) {
        self.subscribers.write().await.clear();
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("OSC server shut down");
    }
}

async fn run_reader(
    socket: UdpSocket,
    packets_tx: mpsc::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buffer = [0u8; UDP_BUFFER];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,

            received = socket.recv_from(&mut buffer) => match received {
                Ok((n, _)) => {
                    if packets_tx.try_send(buffer[..n].to_vec()).is_err() {
                        warn!("packets channel full, discarding datagram");
                    }
                }
                Err(err) => {
                    error!(%err, "error reading from UDP");
                    return;
                }
            },
        }
    }
}

async fn run_dispatcher(
    subscribers: Arc<RwLock<Vec<Arc<dyn OscListener>>>>,
    mut packets_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,

            datagram = packets_rx.recv() => match datagram {
                None => return,
                Some(datagram) => {
                    let packet = match OscPacket::parse(&datagram) {
                        Ok(packet) => Arc::new(packet),
                        Err(err) => {
                            error!(%err, "OSC packet parse error");
                            continue;
                        }
                    };
                    for listener in subscribers.read().await.iter() {
                        listener.deliver(Arc::clone(&packet));
                    }
                }
            },
        }
    }
}
