use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{error, info, warn};

use kuka_c3::drivers::{C3Client, C3ClientConfig};
use kuka_c3::messages::{com_action, C3Message, C3VariableName, COM_ROUNDM_NONE};
use kuka_c3::{C3Error, C3ErrorCode, MoveGroup, Position, PositionKind};
use osc_io::{OscClient, OscListener, OscPacket, OscValue};

use crate::config::BotConfig;
use crate::errors::{GateError, MoveError, MoveStatus};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const MOVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const POSITION_TOLERANCE: f32 = 0.01;
/// Internal routines settle on HOME with a tighter tolerance.
pub const HOME_TOLERANCE: f32 = 0.001;
/// Consecutive in-tolerance samples before a motion counts as complete;
/// the actual pose is polled asynchronously and can oscillate around the
/// setpoint for a few samples while the controller settles.
pub const READY_STEPS: u32 = 100;
/// State poll cadence; also caps the live OSC stream at 50 Hz.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Pause between the moves of a group, letting the program latch.
pub const MOVE_PAUSE: Duration = Duration::from_millis(250);

const PACKETS_BUFFER: usize = 512;

/// Gatekeeper for group-to-group transitions, e.g. a choreography adjacency
/// matrix. `from` is `None` before the first completed group.
pub trait TransitionValidator: Send + Sync {
    fn allows(&self, from: Option<u16>, to: u16) -> bool;
}

/// Default validator: every transition is legal.
pub struct AllowAllTransitions;

impl TransitionValidator for AllowAllTransitions {
    fn allows(&self, _from: Option<u16>, _to: u16) -> bool {
        true
    }
}

#[derive(Debug)]
struct BotState {
    axis_act: Position,
    pos_act: Position,
    /// Cartesian pose captured at startup.
    offset: Position,
    /// `pos_act - offset`, the user-frame pose reported over OSC.
    position: Position,
    com_action: String,
    com_roundm: String,
}

impl BotState {
    fn new() -> Self {
        Self {
            axis_act: Position::new(PositionKind::E6Axis),
            pos_act: Position::new(PositionKind::E6Pos),
            offset: Position::new(PositionKind::E6Pos),
            position: Position::new(PositionKind::E6Pos),
            com_action: com_action::EMPTY.to_string(),
            com_roundm: COM_ROUNDM_NONE.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
struct ProxyInfo {
    #[serde(rename = "PROXY_TYPE")]
    proxy_type: String,
    #[serde(rename = "PROXY_VERSION")]
    version: String,
    #[serde(rename = "PROXY_HOSTNAME")]
    hostname: String,
    #[serde(rename = "PROXY_ADDRESS")]
    address: String,
    #[serde(rename = "PROXY_PORT")]
    port: String,
}

/// One queued group run. Cue-driven runs respond on the position path;
/// dashboard-driven runs stay silent.
struct MoveGroupRun {
    group: MoveGroup,
    index: i32,
    speed: i32,
    respond: bool,
}

/// Per-robot controller: owns the C3 client, the optional OSC response
/// client, the robot's move groups and its live state, plus three
/// long-lived tasks (OSC inbox, serialized move queue, state poll).
pub struct Bot {
    pub name: String,
    pub address: String,

    request_axis_path: Option<String>,
    request_coords_path: Option<String>,
    request_position_path: Option<String>,
    response_axes_path: Option<String>,
    response_coords_path: Option<String>,
    response_position_path: Option<String>,

    move_groups: Vec<MoveGroup>,

    c3: C3Client,
    osc_client: Option<OscClient>,

    tag_id: AtomicU16,
    is_movement: AtomicBool,
    current_move_group: Mutex<Option<u16>>,

    state: RwLock<BotState>,
    proxy: RwLock<ProxyInfo>,

    validator: Arc<dyn TransitionValidator>,

    osc_tx: mpsc::Sender<Arc<OscPacket>>,
    move_tx: mpsc::Sender<MoveGroupRun>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Clears the movement flag on every exit path of a motion.
struct MovementGuard<'a>(&'a AtomicBool);

impl Drop for MovementGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Bot {
    /// Brings the robot up: connects the C3 client, reads proxy metadata
    /// and the initial pose, requires the HOME pose, captures the offset
    /// and spawns the background tasks. Fails fast on any step.
    pub async fn up(
        config: BotConfig,
        team_response_address: Option<&str>,
        validator: Arc<dyn TransitionValidator>,
    ) -> Result<Arc<Self>, GateError> {
        let c3 = C3Client::new(C3ClientConfig::new(&config.address))?;

        let response_address = config
            .osc_response_address
            .clone()
            .or_else(|| team_response_address.map(str::to_string));
        let osc_client = response_address.map(OscClient::new);

        let (osc_tx, osc_rx) = mpsc::channel(PACKETS_BUFFER);
        let (move_tx, move_rx) = mpsc::channel(PACKETS_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);

        let bot = Arc::new(Bot {
            name: config.name,
            address: config.address,
            request_axis_path: config.osc_request_axis_path,
            request_coords_path: config.osc_request_coords_path,
            request_position_path: config.osc_request_position_path,
            response_axes_path: config.osc_response_axes,
            response_coords_path: config.osc_response_coords,
            response_position_path: config.osc_response_position,
            move_groups: config.move_groups,
            c3,
            osc_client,
            tag_id: AtomicU16::new(1),
            is_movement: AtomicBool::new(false),
            current_move_group: Mutex::new(None),
            state: RwLock::new(BotState::new()),
            proxy: RwLock::new(ProxyInfo::default()),
            validator,
            osc_tx,
            move_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        if let Err(err) = bot.startup_sequence().await {
            bot.shutdown().await;
            return Err(err);
        }

        let mut tasks = bot.tasks.lock().await;
        tasks.push(tokio::spawn(run_osc_packets(
            Arc::clone(&bot),
            osc_rx,
            bot.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(run_move_groups(
            Arc::clone(&bot),
            move_rx,
            bot.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(run_update_position(
            Arc::clone(&bot),
            bot.shutdown_tx.subscribe(),
        )));
        drop(tasks);

        Ok(bot)
    }

    async fn startup_sequence(&self) -> Result<(), GateError> {
        self.update_proxy_info().await.map_err(|err| {
            GateError::Startup(format!("bot {}: proxy info: {err}", self.name))
        })?;

        self.update_position().await.map_err(|err| {
            GateError::Startup(format!("bot {}: position update: {err}", self.name))
        })?;

        // Cold-boot motion from an unexpected pose is dangerous; refuse to
        // come up unless the robot holds HOME.
        {
            let state = self.state.read().await;
            if !state.axis_act.approx_eq(&Position::home(), POSITION_TOLERANCE) {
                return Err(GateError::Startup(format!(
                    "bot {}: not at HOME pose: {}",
                    self.name,
                    state.axis_act.render()
                )));
            }
        }

        self.reset_offset_and_position().await;
        self.log_summary().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(osc_client) = &self.osc_client {
            osc_client.shutdown().await;
        }
        self.c3.shutdown().await;
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!(bot = %self.name, "bot shut down");
    }

    async fn log_summary(&self) {
        let state = self.state.read().await;
        let proxy = self.proxy.read().await;
        info!(
            bot = %self.name,
            address = %self.address,
            proxy_type = %proxy.proxy_type,
            proxy_version = %proxy.version,
            axis_act = %state.axis_act.render_full(),
            pos_act = %state.pos_act.render_full(),
            offset = %state.offset.render_full(),
            "bot up"
        );
    }

    /// Next correlation tag. Tags run 1..=65534 and wrap back to 1; 0 and
    /// 65535 never occur on the wire.
    fn next_tag_id(&self) -> u16 {
        let previous = self
            .tag_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tag| {
                Some(next_tag(tag))
            })
            .unwrap_or_else(|current| current);
        next_tag(previous)
    }

    pub fn get_move_group(&self, id: u16) -> Option<&MoveGroup> {
        self.move_groups.iter().find(|group| group.id == id)
    }

    /// Resolves a cue ID to a runnable group. The reserved internal IDs are
    /// always runnable, configured or not; everything else must be in the
    /// robot's group list.
    pub fn resolve_move_group(&self, id: u16) -> Option<MoveGroup> {
        if MoveGroup::is_internal(id) {
            return Some(
                self.get_move_group(id)
                    .cloned()
                    .unwrap_or_else(|| MoveGroup::new(id)),
            );
        }
        self.get_move_group(id).cloned()
    }

    pub fn is_movement(&self) -> bool {
        self.is_movement.load(Ordering::SeqCst)
    }

    /// The atomic motion primitive: writes the setpoint and the action
    /// code, then waits for the actual pose to hold the target.
    ///
    /// Exactly one motion may be in flight; a concurrent call fails
    /// immediately without touching the C3 client. A target already within
    /// tolerance succeeds without wire traffic.
    pub async fn move_to(&self, target: &Position) -> Result<(), MoveError> {
        if self
            .is_movement
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MoveError::AlreadyMoving);
        }
        let _guard = MovementGuard(&self.is_movement);

        {
            let state = self.state.read().await;
            if live_pose(&state, target.kind()).approx_eq(target, POSITION_TOLERANCE) {
                return Ok(());
            }
        }

        let (target_variable, action) = match target.kind() {
            PositionKind::E6Axis => (C3VariableName::ComE6Axis, com_action::MOVE_JOINT),
            PositionKind::E6Pos => (C3VariableName::ComE6Pos, com_action::MOVE_LINEAR),
        };

        let target_message = C3Message::write(
            self.next_tag_id(),
            vec![
                (target_variable, target.render()),
                (C3VariableName::ComRoundm, COM_ROUNDM_NONE.to_string()),
            ],
        )?;
        let action_message = C3Message::write(
            self.next_tag_id(),
            vec![(C3VariableName::ComAction, action.to_string())],
        )?;

        // Both writes go out back to back; responses are awaited after.
        let target_rx = self.c3.request(target_message).await?;
        let action_rx = self.c3.request(action_message).await?;
        await_response(target_rx).await?.status()?;
        await_response(action_rx).await?.status()?;

        info!(bot = %self.name, target = %target.render(), "move started");
        self.wait_for_pose(target, POSITION_TOLERANCE).await?;
        info!(bot = %self.name, target = %target.render(), "move ready");
        Ok(())
    }

    /// Runs one of the reserved routines (100/200/300/400), which return
    /// the robot to HOME.
    pub async fn mov_internal(&self, action: u16) -> Result<(), MoveError> {
        if !MoveGroup::is_internal(action) {
            return Err(MoveError::UnknownInternalAction(action));
        }

        if self
            .is_movement
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MoveError::AlreadyMoving);
        }
        let _guard = MovementGuard(&self.is_movement);

        let message = C3Message::write(
            self.next_tag_id(),
            vec![(C3VariableName::ComAction, action.to_string())],
        )?;
        self.c3
            .transact(message, REQUEST_TIMEOUT)
            .await?
            .status()?;

        info!(bot = %self.name, action, "internal routine started");
        self.wait_for_pose(&Position::home(), HOME_TOLERANCE).await
    }

    /// Cartesian speed/acceleration override (COM_ACTION 6).
    pub async fn set_speed(&self, vel_cp: f32, acc_cp: f32) -> Result<(), MoveError> {
        self.write_speed_values(
            (C3VariableName::ComValue1, vel_cp),
            (C3VariableName::ComValue3, acc_cp),
            com_action::SET_SPEED,
        )
        .await?;
        info!(bot = %self.name, vel_cp, acc_cp, "speed set");
        Ok(())
    }

    /// Joint speed/acceleration override (COM_ACTION 7).
    pub async fn set_axis_speed(&self, vel_axis: f32, acc_axis: f32) -> Result<(), MoveError> {
        self.write_speed_values(
            (C3VariableName::ComValue2, vel_axis),
            (C3VariableName::ComValue4, acc_axis),
            com_action::SET_AXIS_SPEED,
        )
        .await?;
        info!(bot = %self.name, vel_axis, acc_axis, "axis speed set");
        Ok(())
    }

    async fn write_speed_values(
        &self,
        vel: (C3VariableName, f32),
        acc: (C3VariableName, f32),
        action: &str,
    ) -> Result<(), MoveError> {
        if self.is_movement() {
            return Err(MoveError::AlreadyMoving);
        }

        let values_message = C3Message::write(
            self.next_tag_id(),
            vec![
                (vel.0, format!("{:.5}", vel.1)),
                (acc.0, format!("{:.5}", acc.1)),
            ],
        )?;
        self.c3
            .transact(values_message, REQUEST_TIMEOUT)
            .await?
            .status()?;

        let action_message = C3Message::write(
            self.next_tag_id(),
            vec![(C3VariableName::ComAction, action.to_string())],
        )?;
        self.c3
            .transact(action_message, REQUEST_TIMEOUT)
            .await?
            .status()?;
        Ok(())
    }

    /// Runs a move group: an internal routine for the reserved IDs,
    /// otherwise the position sequence with a latch pause between moves.
    /// The completed group is recorded for transition validation.
    pub async fn move_round(&self, group: &MoveGroup) -> Result<(), MoveError> {
        if MoveGroup::is_internal(group.id) {
            self.mov_internal(group.id).await?;
        } else {
            {
                let current = *self.current_move_group.lock().await;
                if !self.validator.allows(current, group.id) {
                    return Err(MoveError::TransitionDenied {
                        from: current,
                        to: group.id,
                    });
                }
            }

            for (i, position) in group.positions.iter().enumerate() {
                if i > 0 {
                    sleep(MOVE_PAUSE).await;
                }
                self.move_to(position).await?;
            }
        }

        *self.current_move_group.lock().await = Some(group.id);
        Ok(())
    }

    /// Enqueues a group run without an OSC response (dashboard path).
    pub fn run_move_group(&self, id: u16) -> Result<(), MoveError> {
        let group = self
            .resolve_move_group(id)
            .ok_or(MoveError::UnknownGroup(id))?;
        self.move_tx
            .try_send(MoveGroupRun {
                group,
                index: 0,
                speed: 0,
                respond: false,
            })
            .map_err(|_| MoveError::QueueFull)
    }

    /// Samples the live pose against the target until it stays within
    /// tolerance for [`READY_STEPS`] consecutive samples. The overall
    /// deadline turns into the `broken` outcome.
    async fn wait_for_pose(&self, target: &Position, tolerance: f32) -> Result<(), MoveError> {
        let deadline = Instant::now() + MOVE_TIMEOUT;
        let mut ready_steps: u32 = 0;
        loop {
            if *self.shutdown_tx.borrow() {
                return Err(MoveError::Shutdown);
            }
            if Instant::now() >= deadline {
                return Err(MoveError::Broken);
            }

            {
                let state = self.state.read().await;
                if live_pose(&state, target.kind()).approx_eq(target, tolerance) {
                    ready_steps += 1;
                } else {
                    ready_steps = 0;
                }
            }

            if ready_steps >= READY_STEPS {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// One read of the four state variables, published atomically together
    /// with the derived user-frame `position`.
    pub async fn update_position(&self) -> Result<(), C3Error> {
        let message = C3Message::read(
            self.next_tag_id(),
            &[
                C3VariableName::AxisAct,
                C3VariableName::PosAct,
                C3VariableName::ComAction,
                C3VariableName::ComRoundm,
            ],
        )?;
        let response = self.c3.transact(message, REQUEST_TIMEOUT).await?;
        response.status()?;

        let mut axis_act = None;
        let mut pos_act = None;
        let mut action = None;
        let mut roundm = None;
        for variable in response.variables() {
            if variable.error_code != C3ErrorCode::Success {
                return Err(C3Error::VariableCode {
                    name: variable.name.to_string(),
                    code: variable.error_code,
                });
            }
            let value = variable.value.as_deref().unwrap_or_default();
            match variable.name {
                C3VariableName::AxisAct => axis_act = Some(Position::parse(value)?),
                C3VariableName::PosAct => pos_act = Some(Position::parse(value)?),
                C3VariableName::ComAction => action = Some(value.to_string()),
                C3VariableName::ComRoundm => roundm = Some(value.to_string()),
                _ => {}
            }
        }

        let mut state = self.state.write().await;
        if let Some(axis_act) = axis_act {
            state.axis_act = axis_act;
        }
        if let Some(pos_act) = pos_act {
            state.pos_act = pos_act;
        }
        if let Some(action) = action {
            state.com_action = action;
        }
        if let Some(roundm) = roundm {
            state.com_roundm = roundm;
        }
        let position = state.pos_act.with_offset(&state.offset);
        state.position = position;
        Ok(())
    }

    async fn update_proxy_info(&self) -> Result<(), C3Error> {
        let message = C3Message::read(
            self.next_tag_id(),
            &[
                C3VariableName::ProxyType,
                C3VariableName::ProxyVersion,
                C3VariableName::ProxyHostname,
                C3VariableName::ProxyAddress,
                C3VariableName::ProxyPort,
            ],
        )?;
        let response = self.c3.transact(message, REQUEST_TIMEOUT).await?;
        response.status()?;

        let mut proxy = self.proxy.write().await;
        for variable in response.variables() {
            if variable.error_code != C3ErrorCode::Success {
                return Err(C3Error::VariableCode {
                    name: variable.name.to_string(),
                    code: variable.error_code,
                });
            }
            let value = variable.value.clone().unwrap_or_default();
            match variable.name {
                C3VariableName::ProxyType => proxy.proxy_type = value,
                C3VariableName::ProxyVersion => proxy.version = value,
                C3VariableName::ProxyHostname => proxy.hostname = value,
                C3VariableName::ProxyAddress => proxy.address = value,
                C3VariableName::ProxyPort => proxy.port = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Snapshots the current Cartesian pose as the offset and zeroes the
    /// user-frame position.
    async fn reset_offset_and_position(&self) {
        let mut state = self.state.write().await;
        let offset = state.pos_act.clone();
        state.offset = offset;
        state.position = Position::new(PositionKind::E6Pos);
    }

    async fn execute_run(&self, run: &MoveGroupRun) -> Result<(), MoveError> {
        if run.speed > 0 {
            self.set_speed(run.speed as f32, run.speed as f32).await?;
        }
        self.move_round(&run.group).await
    }

    async fn respond_position(&self, status: MoveStatus, index: i32, id: u16) {
        let (Some(osc_client), Some(path)) = (&self.osc_client, &self.response_position_path)
        else {
            return;
        };
        let mut packet = OscPacket::new(path.clone());
        packet.append(OscValue::Int32(status.code()));
        packet.append(OscValue::Int32(index));
        packet.append(OscValue::Int32(id as i32));
        if let Err(err) = osc_client.send(&packet).await {
            error!(bot = %self.name, %err, "position response failed");
        }
    }

    /// Pushes the live joint and user-frame poses to the configured OSC
    /// stream paths.
    async fn publish_streams(&self) {
        let Some(osc_client) = &self.osc_client else {
            return;
        };
        let (axis_act, position) = {
            let state = self.state.read().await;
            (state.axis_act.clone(), state.position.clone())
        };

        if let Some(path) = &self.response_axes_path {
            if let Err(err) = osc_client.send(&pose_packet(path, &axis_act)).await {
                error!(bot = %self.name, %err, "axis stream send failed");
            }
        }
        if let Some(path) = &self.response_coords_path {
            if let Err(err) = osc_client.send(&pose_packet(path, &position)).await {
                error!(bot = %self.name, %err, "coords stream send failed");
            }
        }
    }

    pub async fn snapshot(&self) -> BotSnapshot {
        let state = self.state.read().await;
        let proxy = self.proxy.read().await;
        BotSnapshot {
            name: self.name.clone(),
            address: self.address.clone(),
            tag_id: self.tag_id.load(Ordering::SeqCst),
            is_movement: self.is_movement(),
            current_move_group: *self.current_move_group.lock().await,
            com_action: state.com_action.clone(),
            com_roundm: state.com_roundm.clone(),
            axis_act: state.axis_act.clone(),
            pos_act: state.pos_act.clone(),
            offset: state.offset.clone(),
            position: state.position.clone(),
            proxy: proxy.clone(),
            move_group_ids: self.move_groups.iter().map(|group| group.id).collect(),
        }
    }
}

impl OscListener for Bot {
    fn deliver(&self, packet: Arc<OscPacket>) {
        if self.osc_tx.try_send(packet).is_err() {
            warn!(bot = %self.name, "OSC input channel is full, discarding packet");
        }
    }
}

/// Dashboard view of one robot.
#[derive(Debug, Clone, Serialize)]
pub struct BotSnapshot {
    pub name: String,
    pub address: String,
    #[serde(rename = "tagID")]
    pub tag_id: u16,
    #[serde(rename = "isMovement")]
    pub is_movement: bool,
    #[serde(rename = "currentMoveGroup")]
    pub current_move_group: Option<u16>,
    #[serde(rename = "COM_ACTION")]
    pub com_action: String,
    #[serde(rename = "COM_ROUNDM")]
    pub com_roundm: String,
    #[serde(rename = "AXIS_ACT")]
    pub axis_act: Position,
    #[serde(rename = "POS_ACT")]
    pub pos_act: Position,
    #[serde(rename = "OFFSET")]
    pub offset: Position,
    #[serde(rename = "POSITION")]
    pub position: Position,
    #[serde(flatten)]
    proxy: ProxyInfo,
    #[serde(rename = "moveGroupIds")]
    pub move_group_ids: Vec<u16>,
}

fn next_tag(tag: u16) -> u16 {
    if tag >= 65534 {
        1
    } else {
        tag + 1
    }
}

fn path_matches(configured: &Option<String>, path: &str) -> bool {
    configured.as_deref() == Some(path)
}

fn live_pose(state: &BotState, kind: PositionKind) -> &Position {
    match kind {
        PositionKind::E6Axis => &state.axis_act,
        PositionKind::E6Pos => &state.position,
    }
}

fn parse_pose_values(values: &[OscValue], kind: PositionKind) -> Option<Position> {
    if values.len() != 6 {
        return None;
    }
    let mut position = Position::new(kind);
    for (slot, value) in values.iter().enumerate() {
        match value {
            OscValue::Float32(v) => {
                let _ = position.set(slot, *v);
            }
            _ => return None,
        }
    }
    Some(position)
}

/// `(id, index, speed)`, with the trailing speed optional for senders that
/// still use the two-argument form.
fn parse_position_cue(values: &[OscValue]) -> Option<(u16, i32, i32)> {
    let (id, index) = parse_cue_identity(values)?;
    match values.len() {
        2 => Some((id, index, 0)),
        3 => match values[2] {
            OscValue::Int32(speed) => Some((id, index, speed)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_cue_identity(values: &[OscValue]) -> Option<(u16, i32)> {
    match (values.first()?, values.get(1)?) {
        (OscValue::Int32(id), OscValue::Int32(index)) => {
            Some((u16::try_from(*id).ok()?, *index))
        }
        _ => None,
    }
}

fn pose_packet(path: &str, position: &Position) -> OscPacket {
    let mut packet = OscPacket::new(path);
    for slot in 0..6 {
        packet.append(OscValue::Float32(position.get(slot)));
    }
    packet
}

async fn handle_osc(bot: &Arc<Bot>, packet: Arc<OscPacket>) {
    if path_matches(&bot.request_axis_path, packet.path()) {
        handle_pose_cue(bot, &packet, PositionKind::E6Axis);
    } else if path_matches(&bot.request_coords_path, packet.path()) {
        handle_pose_cue(bot, &packet, PositionKind::E6Pos);
    } else if path_matches(&bot.request_position_path, packet.path()) {
        handle_position_cue(bot, &packet).await;
    }
}

/// Six floats on the axis or coords path start a direct move; the outcome
/// is only logged, these paths have no response pairing.
fn handle_pose_cue(bot: &Arc<Bot>, packet: &OscPacket, kind: PositionKind) {
    let Some(target) = parse_pose_values(packet.values(), kind) else {
        error!(
            bot = %bot.name,
            path = packet.path(),
            values = ?packet.values(),
            "cue must carry six float32 values"
        );
        return;
    };

    let bot = Arc::clone(bot);
    tokio::spawn(async move {
        if let Err(err) = bot.move_to(&target).await {
            error!(bot = %bot.name, target = %target.render(), %err, "cue move failed");
        }
    });
}

/// `(id, index, speed)` on the position path runs a move group through the
/// serialized queue. Every accepted or rejected cue gets exactly one
/// position response.
async fn handle_position_cue(bot: &Arc<Bot>, packet: &OscPacket) {
    let Some((id, index, speed)) = parse_position_cue(packet.values()) else {
        error!(
            bot = %bot.name,
            path = packet.path(),
            values = ?packet.values(),
            "malformed position cue"
        );
        if let Some((id, index)) = parse_cue_identity(packet.values()) {
            bot.respond_position(MoveStatus::Error, index, id).await;
        }
        return;
    };

    let Some(group) = bot.resolve_move_group(id) else {
        error!(bot = %bot.name, id, "MoveGroup is not found");
        bot.respond_position(MoveStatus::Error, index, id).await;
        return;
    };

    let run = MoveGroupRun {
        group,
        index,
        speed,
        respond: true,
    };
    if bot.move_tx.try_send(run).is_err() {
        warn!(bot = %bot.name, id, "move queue is full, rejecting cue");
        bot.respond_position(MoveStatus::Error, index, id).await;
    }
}

async fn await_response(
    result_rx: oneshot::Receiver<Result<C3Message, C3Error>>,
) -> Result<C3Message, C3Error> {
    match timeout(REQUEST_TIMEOUT, result_rx).await {
        Err(_) => Err(C3Error::RequestTimeout),
        Ok(Err(_)) => Err(C3Error::ClientShutdown),
        Ok(Ok(result)) => result,
    }
}

/// Drains the robot's OSC inbox, matching path to handler.
async fn run_osc_packets(
    bot: Arc<Bot>,
    mut osc_rx: mpsc::Receiver<Arc<OscPacket>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            packet = osc_rx.recv() => match packet {
                None => return,
                Some(packet) => handle_osc(&bot, packet).await,
            },
        }
    }
}

/// Serializes queued move-group runs and emits the single response per
/// cue-driven run.
async fn run_move_groups(
    bot: Arc<Bot>,
    mut move_rx: mpsc::Receiver<MoveGroupRun>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let run = tokio::select! {
            _ = shutdown_rx.changed() => return,
            run = move_rx.recv() => match run {
                None => return,
                Some(run) => run,
            },
        };

        info!(bot = %bot.name, id = run.group.id, "MoveGroup run started");
        let outcome = bot.execute_run(&run).await;
        match &outcome {
            Ok(()) => info!(bot = %bot.name, id = run.group.id, "MoveGroup run successful"),
            Err(err) => {
                error!(bot = %bot.name, id = run.group.id, %err, "MoveGroup run failed")
            }
        }

        if run.respond {
            bot.respond_position(MoveStatus::for_outcome(&outcome), run.index, run.group.id)
                .await;
        }
    }
}

/// Polls the robot state at the stream cadence and pushes the live pose.
async fn run_update_position(bot: Arc<Bot>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = ticker.tick() => {}
        }

        if let Err(err) = bot.update_position().await {
            if *shutdown_rx.borrow() {
                return;
            }
            error!(bot = %bot.name, %err, "position update failed");
            continue;
        }
        bot.publish_streams().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_wraps_to_one_after_65534() {
        assert_eq!(next_tag(1), 2);
        assert_eq!(next_tag(65533), 65534);
        assert_eq!(next_tag(65534), 1);
        assert_eq!(next_tag(65535), 1);

        // Never 0: a full cycle from 1 visits 2..=65534 then 1.
        let mut tag = 1u16;
        for _ in 0..65534 {
            tag = next_tag(tag);
            assert_ne!(tag, 0);
        }
        assert_eq!(tag, 1);
    }

    #[test]
    fn pose_cue_requires_six_floats() {
        let six: Vec<OscValue> = (0..6).map(|i| OscValue::Float32(i as f32)).collect();
        let parsed = parse_pose_values(&six, PositionKind::E6Axis).unwrap();
        assert_eq!(parsed.get(5), 5.0);

        let five = &six[..5];
        assert!(parse_pose_values(five, PositionKind::E6Axis).is_none());

        let mut mixed = six.clone();
        mixed[2] = OscValue::Int32(3);
        assert!(parse_pose_values(&mixed, PositionKind::E6Axis).is_none());
    }

    #[test]
    fn position_cue_accepts_two_or_three_ints() {
        let full = [
            OscValue::Int32(5),
            OscValue::Int32(42),
            OscValue::Int32(0),
        ];
        assert_eq!(parse_position_cue(&full), Some((5, 42, 0)));

        let short = [OscValue::Int32(7), OscValue::Int32(-1)];
        assert_eq!(parse_position_cue(&short), Some((7, -1, 0)));

        let wrong = [OscValue::Float32(5.0), OscValue::Int32(42)];
        assert_eq!(parse_position_cue(&wrong), None);

        let negative_id = [OscValue::Int32(-5), OscValue::Int32(42)];
        assert_eq!(parse_position_cue(&negative_id), None);
    }
}
