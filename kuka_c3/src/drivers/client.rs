use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{error, info, warn};

use crate::drivers::C3ClientConfig;
use crate::errors::C3Error;
use crate::messages::wire::take_frame;
use crate::messages::C3Message;

const PACKETS_BUFFER: usize = 512;
const TCP_BUFFER: usize = 2048;
/// Backstop after which an unanswered pending tag is reaped even if the
/// caller still holds the receiver.
const PENDING_TTL: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

type C3Result = Result<C3Message, C3Error>;

struct PendingRequest {
    message: C3Message,
    result_tx: oneshot::Sender<C3Result>,
    deadline: Instant,
}

/// Async client for one robot's C3 endpoint.
///
/// Owns a persistent TCP connection with an infinite reconnect loop, a
/// bounded outbound queue and a tag-correlated pending-request map.
/// Responses arrive in any order; [`C3Client::request`] hands back a oneshot
/// that resolves when the matching tag comes in, and callers bound the wait
/// with [`C3Client::transact`].
#[derive(Debug)]
pub struct C3Client {
    config: C3ClientConfig,
    pending: Arc<Mutex<HashMap<u16, PendingRequest>>>,
    request_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("tag_id", &self.message.tag_id())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl C3Client {
    /// Builds the client and starts its transport and demultiplexer tasks.
    /// The connection itself is established (and re-established) in the
    /// background; requests queue up meanwhile.
    pub fn new(config: C3ClientConfig) -> Result<Self, C3Error> {
        config.validate()?;

        let pending: Arc<Mutex<HashMap<u16, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (request_tx, request_rx) = mpsc::channel::<Vec<u8>>(PACKETS_BUFFER);
        let (response_tx, response_rx) = mpsc::channel::<Vec<u8>>(PACKETS_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let transport = tokio::spawn(run_transport(
            config.clone(),
            request_rx,
            response_tx,
            shutdown_rx.clone(),
        ));
        let demux = tokio::spawn(run_demux(Arc::clone(&pending), response_rx, shutdown_rx));

        Ok(Self {
            config,
            pending,
            request_tx,
            shutdown_tx,
            tasks: Mutex::new(vec![transport, demux]),
        })
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    /// Enqueues the request and returns the channel its response (or decode
    /// error) will be delivered on.
    pub async fn request(&self, message: C3Message) -> Result<oneshot::Receiver<C3Result>, C3Error> {
        let frame = message.encode()?;
        let tag_id = message.tag_id();
        let (result_tx, result_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                tag_id,
                PendingRequest {
                    message,
                    result_tx,
                    deadline: Instant::now() + PENDING_TTL,
                },
            );
        }

        if self.request_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&tag_id);
            return Err(C3Error::ClientShutdown);
        }

        Ok(result_rx)
    }

    /// Request with a response deadline. On timeout the pending tag is
    /// abandoned and left to the reaper.
    pub async fn transact(
        &self,
        message: C3Message,
        deadline: Duration,
    ) -> Result<C3Message, C3Error> {
        let result_rx = self.request(message).await?;
        match timeout(deadline, result_rx).await {
            Err(_) => Err(C3Error::RequestTimeout),
            Ok(Err(_)) => Err(C3Error::ClientShutdown),
            Ok(Ok(result)) => result,
        }
    }

    /// Stops both tasks, fails every pending request and waits for the
    /// tasks to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!(addr = %self.config.addr, "C3 client shut down");
    }
}

/// Dials the endpoint (retrying forever), then pumps outbound frames and
/// reassembles inbound frames by their body-length header until the
/// connection drops, at which point it starts over.
async fn run_transport(
    config: C3ClientConfig,
    mut request_rx: mpsc::Receiver<Vec<u8>>,
    response_tx: mpsc::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let stream = match connect_with_retries(&config, &mut shutdown_rx).await {
            Some(stream) => stream,
            None => return,
        };
        info!(addr = %config.addr, "connected");

        let (mut reader, mut writer) = stream.into_split();
        let mut chunk = [0u8; TCP_BUFFER];
        let mut assembly: Vec<u8> = Vec::with_capacity(TCP_BUFFER);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,

                outbound = request_rx.recv() => match outbound {
                    None => return,
                    Some(frame) => {
                        if let Err(err) = writer.write_all(&frame).await {
                            error!(addr = %config.addr, %err, "failed to send request");
                            break;
                        }
                    }
                },

                inbound = reader.read(&mut chunk) => match inbound {
                    Ok(0) => {
                        error!(addr = %config.addr, "connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        assembly.extend_from_slice(&chunk[..n]);
                        while let Some(frame) = take_frame(&mut assembly) {
                            if response_tx.try_send(frame).is_err() {
                                warn!(addr = %config.addr, "response channel full, discarding frame");
                            }
                        }
                    }
                    Err(err) => {
                        error!(addr = %config.addr, %err, "failed to read response");
                        break;
                    }
                },
            }
        }
        // Dropped connection: loop back into the dial-retry phase.
    }
}

async fn connect_with_retries(
    config: &C3ClientConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<TcpStream> {
    loop {
        if *shutdown_rx.borrow() {
            return None;
        }
        match TcpStream::connect(&config.addr).await {
            Ok(stream) => return Some(stream),
            Err(err) => {
                error!(
                    addr = %config.addr,
                    %err,
                    "failed to connect, retrying in {:.1}s",
                    config.retry_timeout.as_secs_f32()
                );
                tokio::select! {
                    _ = shutdown_rx.changed() => return None,
                    _ = sleep(config.retry_timeout) => {}
                }
            }
        }
    }
}

/// Correlates response frames with pending requests by tag, and sweeps
/// entries whose deadline passed or whose caller went away.
async fn run_demux(
    pending: Arc<Mutex<HashMap<u16, PendingRequest>>>,
    mut response_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut sweep = interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let mut pending = pending.lock().await;
                for (_, entry) in pending.drain() {
                    let _ = entry.result_tx.send(Err(C3Error::ClientShutdown));
                }
                return;
            }

            _ = sweep.tick() => {
                let now = Instant::now();
                let mut pending = pending.lock().await;
                pending.retain(|tag_id, entry| {
                    let stale = entry.deadline <= now || entry.result_tx.is_closed();
                    if stale {
                        warn!(tag_id, "reaping abandoned request");
                    }
                    !stale
                });
            }

            frame = response_rx.recv() => match frame {
                None => return,
                Some(frame) => {
                    if frame.len() < 8 {
                        error!(len = frame.len(), "response frame is too short");
                        continue;
                    }
                    let tag_id = u16::from_be_bytes([frame[0], frame[1]]);
                    let entry = pending.lock().await.remove(&tag_id);
                    match entry {
                        None => error!(tag_id, "response tag has no pending request"),
                        Some(entry) => {
                            let mut message = entry.message;
                            let result = message.decode_response(&frame).map(|_| message);
                            if let Err(err) = &result {
                                error!(tag_id, %err, "response decode failed");
                            }
                            let _ = entry.result_tx.send(result);
                        }
                    }
                }
            },
        }
    }
}

