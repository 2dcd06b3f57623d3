//! C3 protocol emulator.
//!
//! Serves the variable-access subset of the C3 bridge over TCP so the
//! gateway can be exercised without robot hardware. Motion is immediate:
//! writing a motion action snaps the actual pose to the latched target in
//! one step, which is enough for the controller's tolerance wait to settle.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use kuka_c3::errors::{C3Error, C3ErrorCode};
use kuka_c3::messages::wire::{put_utf16, take_frame, FrameReader};
use kuka_c3::{Position, PositionKind};

const TCP_BUFFER: usize = 2048;

const MSG_READ_VARIABLE: u8 = 4;
const MSG_WRITE_VARIABLE: u8 = 5;
const MSG_READ_MULTIPLE: u8 = 6;
const MSG_WRITE_MULTIPLE: u8 = 7;

struct EmulatorState {
    axis_act: Position,
    pos_act: Position,
    /// Cartesian pose at boot; linear moves land relative to it.
    origin: Position,

    com_action: String,
    com_roundm: String,
    com_e6axis: Position,
    com_e6pos: Position,

    proxy_hostname: String,
    proxy_address: String,
    proxy_port: String,
}

impl EmulatorState {
    fn new(origin: Position, port: u16) -> Self {
        Self {
            axis_act: Position::home(),
            pos_act: origin.clone(),
            origin,
            com_action: "1".to_string(),
            com_roundm: "-1".to_string(),
            com_e6axis: Position::new(PositionKind::E6Axis),
            com_e6pos: Position::new(PositionKind::E6Pos),
            proxy_hostname: "localhost".to_string(),
            proxy_address: "127.0.0.1".to_string(),
            proxy_port: port.to_string(),
        }
    }

    fn apply_write(&mut self, name: &str, value: &str) -> C3ErrorCode {
        match name {
            "COM_ACTION" => {
                self.com_action = value.to_string();
                match value {
                    "2" => self.axis_act = self.com_e6axis.clone(),
                    "3" => self.pos_act = offset_sum(&self.origin, &self.com_e6pos),
                    "100" | "200" | "300" | "400" => self.axis_act = Position::home(),
                    _ => {}
                }
                C3ErrorCode::Success
            }
            "COM_ROUNDM" => {
                self.com_roundm = value.to_string();
                C3ErrorCode::Success
            }
            "COM_E6AXIS" => match Position::parse(value) {
                Ok(position) => {
                    self.com_e6axis = position;
                    C3ErrorCode::Success
                }
                Err(_) => C3ErrorCode::Argument,
            },
            "COM_E6POS" => match Position::parse(value) {
                Ok(position) => {
                    self.com_e6pos = position;
                    C3ErrorCode::Success
                }
                Err(_) => C3ErrorCode::Argument,
            },
            "COM_VALUE1" | "COM_VALUE2" | "COM_VALUE3" | "COM_VALUE4" => C3ErrorCode::Success,
            _ => C3ErrorCode::NotImplemented,
        }
    }

    fn read_value(&self, name: &str) -> Result<String, C3ErrorCode> {
        match name {
            "$AXIS_ACT" => Ok(self.axis_act.render_full()),
            "$POS_ACT" => Ok(self.pos_act.render_full()),
            "COM_ACTION" => Ok(self.com_action.clone()),
            "COM_ROUNDM" => Ok(self.com_roundm.clone()),
            "COM_E6AXIS" => Ok(self.com_e6axis.render_full()),
            "COM_E6POS" => Ok(self.com_e6pos.render_full()),
            "@PROXY_TYPE" => Ok("C3 Server Emulator".to_string()),
            "@PROXY_VERSION" => Ok(env!("CARGO_PKG_VERSION").to_string()),
            "@PROXY_HOSTNAME" => Ok(self.proxy_hostname.clone()),
            "@PROXY_ADDRESS" => Ok(self.proxy_address.clone()),
            "@PROXY_PORT" => Ok(self.proxy_port.clone()),
            _ => Err(C3ErrorCode::NotImplemented),
        }
    }
}

/// Slot-wise sum, keeping the base position's kind.
fn offset_sum(base: &Position, delta: &Position) -> Position {
    let mut sum = Position::new(base.kind());
    for slot in 0..14 {
        let _ = sum.set(slot, base.get(slot) + delta.get(slot));
    }
    sum
}

/// Cartesian pose the emulator boots at when none is given.
fn random_origin() -> Position {
    let mut rng = rand::thread_rng();
    let mut origin = Position::new(PositionKind::E6Pos);
    for slot in 0..6 {
        let _ = origin.set(slot, rng.gen_range(-50.0..50.0));
    }
    origin
}

pub struct C3Emulator {
    local_addr: SocketAddr,
    state: Arc<RwLock<EmulatorState>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl C3Emulator {
    /// Binds the listener (port 0 picks an ephemeral port) and starts
    /// serving with a randomized Cartesian boot pose.
    pub async fn start(port: u16) -> std::io::Result<Self> {
        Self::start_with_origin(port, random_origin()).await
    }

    pub async fn start_with_origin(port: u16, origin: Position) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(RwLock::new(EmulatorState::new(origin, local_addr.port())));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(run_accept(listener, Arc::clone(&state), shutdown_rx));
        info!(%local_addr, "C3 emulator started");

        Ok(Self {
            local_addr,
            state,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    pub async fn axis_act(&self) -> Position {
        self.state.read().await.axis_act.clone()
    }

    pub async fn pos_act(&self) -> Position {
        self.state.read().await.pos_act.clone()
    }

    pub async fn com_action(&self) -> String {
        self.state.read().await.com_action.clone()
    }

    /// Overrides the actual joint pose, e.g. to test the startup HOME gate.
    pub async fn set_axis_act(&self, position: Position) {
        self.state.write().await.axis_act = position;
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        info!("C3 emulator shut down");
    }
}

async fn run_accept(
    listener: TcpListener,
    state: Arc<RwLock<EmulatorState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Connection tasks abort with the set when the accept loop returns.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "emulator accepted connection");
                    connections.spawn(handle_connection(
                        stream,
                        Arc::clone(&state),
                        shutdown_rx.clone(),
                    ));
                }
                Err(err) => {
                    error!(%err, "error accepting connection");
                }
            },
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<RwLock<EmulatorState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut chunk = [0u8; TCP_BUFFER];
    let mut assembly: Vec<u8> = Vec::with_capacity(TCP_BUFFER);

    loop {
        let n = tokio::select! {
            _ = shutdown_rx.changed() => return,
            read = stream.read(&mut chunk) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };

        assembly.extend_from_slice(&chunk[..n]);
        while let Some(frame) = take_frame(&mut assembly) {
            let response = {
                let mut state = state.write().await;
                process_frame(&mut state, &frame)
            };
            match response {
                Ok(response) => {
                    if let Err(err) = stream.write_all(&response).await {
                        error!(%err, "failed to write response");
                        return;
                    }
                }
                Err(err) => {
                    error!(%err, "failed to process request");
                    return;
                }
            }
        }
    }
}

/// Decodes one request frame and builds its response, mirroring the codec
/// from the robot's side.
fn process_frame(state: &mut EmulatorState, frame: &[u8]) -> Result<Vec<u8>, C3Error> {
    let mut reader = FrameReader::new(frame);
    let tag_id = reader.read_u16("TagID")?;
    let _body_len = reader.read_u16("MessageLength")?;
    let message_type = reader.read_u8("MessageType")?;

    let mut response = Vec::with_capacity(64);
    response.extend_from_slice(&tag_id.to_be_bytes());
    response.extend_from_slice(&0u16.to_be_bytes());
    response.push(message_type);

    match message_type {
        MSG_READ_VARIABLE | MSG_WRITE_VARIABLE => {
            let name = reader.read_utf16_string("VariableName")?;
            let mut code = C3ErrorCode::Success;

            if message_type == MSG_WRITE_VARIABLE {
                let value = reader.read_utf16_string("VariableValue")?;
                code = state.apply_write(&name, &value);
            }

            let value = match state.read_value(&name) {
                Ok(value) => value,
                Err(read_code) => {
                    code = read_code;
                    String::new()
                }
            };
            put_utf16(&mut response, &value);
            response.extend_from_slice(&u16::from(code).to_be_bytes());
            response.push(u8::from(code == C3ErrorCode::Success));
        }

        MSG_READ_MULTIPLE | MSG_WRITE_MULTIPLE => {
            let count = reader.read_u8("VariableCount")?;
            response.push(count);

            for _ in 0..count {
                let name = reader.read_utf16_string("VariableName")?;
                let mut code = C3ErrorCode::Success;

                if message_type == MSG_WRITE_MULTIPLE {
                    let value = reader.read_utf16_string("VariableValue")?;
                    code = state.apply_write(&name, &value);
                }

                let value = match state.read_value(&name) {
                    Ok(value) => value,
                    Err(read_code) => {
                        code = read_code;
                        String::new()
                    }
                };
                response.push(u16::from(code) as u8);
                put_utf16(&mut response, &value);
            }

            response.extend_from_slice(&u16::from(C3ErrorCode::Success).to_be_bytes());
            response.push(1);
        }

        other => {
            return Err(C3Error::Decode(format!(
                "emulator does not serve message type {other}"
            )));
        }
    }

    let body_len = (response.len() - 4) as u16;
    response[2..4].copy_from_slice(&body_len.to_be_bytes());
    Ok(response)
}
