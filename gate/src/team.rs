use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use osc_io::{OscClient, OscListener, OscPacket, OscServer, OscValue};

use crate::bot::{Bot, BotSnapshot, TransitionValidator};
use crate::config::TeamConfig;
use crate::errors::{GateError, MoveError, MoveStatus};

const PACKETS_BUFFER: usize = 512;

/// Orchestrates a fleet of robots behind one OSC cue path: a group cue
/// fans out to every robot in parallel and the external controller learns
/// a single aggregated outcome.
pub struct Team {
    request_position_path: Option<String>,
    response_position_path: Option<String>,
    osc_client: Option<OscClient>,

    bots: Vec<Arc<Bot>>,

    osc_tx: mpsc::Sender<Arc<OscPacket>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Team {
    /// Brings every configured robot up (fail-fast), subscribes them and
    /// the team itself to the OSC server and starts the team's cue task.
    pub async fn up(
        config: TeamConfig,
        osc_server: &OscServer,
        validator: Arc<dyn TransitionValidator>,
    ) -> Result<Arc<Self>, GateError> {
        let TeamConfig {
            osc_request_position_path,
            osc_response_address,
            osc_response_position_path,
            bots: bot_configs,
        } = config;

        let osc_client = osc_response_address.as_deref().map(OscClient::new);

        let mut bots = Vec::with_capacity(bot_configs.len());
        for bot_config in bot_configs {
            let bot = Bot::up(
                bot_config,
                osc_response_address.as_deref(),
                Arc::clone(&validator),
            )
            .await?;
            osc_server.subscribe(bot.clone()).await;
            bots.push(bot);
        }

        let (osc_tx, osc_rx) = mpsc::channel(PACKETS_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let team = Arc::new(Team {
            request_position_path: osc_request_position_path,
            response_position_path: osc_response_position_path,
            osc_client,
            bots,
            osc_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        team.tasks.lock().await.push(tokio::spawn(run_team_packets(
            Arc::clone(&team),
            osc_rx,
            shutdown_rx,
        )));
        osc_server.subscribe(team.clone()).await;

        info!(bots = team.bots.len(), "team up");
        Ok(team)
    }

    pub fn bots(&self) -> &[Arc<Bot>] {
        &self.bots
    }

    pub async fn snapshot(&self) -> Vec<BotSnapshot> {
        let mut snapshots = Vec::with_capacity(self.bots.len());
        for bot in &self.bots {
            snapshots.push(bot.snapshot().await);
        }
        snapshots
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(osc_client) = &self.osc_client {
            osc_client.shutdown().await;
        }
        for bot in &self.bots {
            bot.shutdown().await;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("team shut down");
    }

    /// Fans the cue out to every robot and emits the single aggregated
    /// response. Robots without the group contribute no outcome.
    async fn run_cue(&self, id: u16, index: i32) {
        let mut runs = JoinSet::new();
        for bot in &self.bots {
            let bot = Arc::clone(bot);
            runs.spawn(async move {
                let group = match bot.resolve_move_group(id) {
                    Some(group) => group,
                    None => {
                        warn!(bot = %bot.name, id, "MoveGroup is not found");
                        return None;
                    }
                };
                let outcome = bot.move_round(&group).await;
                if let Err(err) = &outcome {
                    error!(bot = %bot.name, id, %err, "team cue failed");
                }
                Some(outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = runs.join_next().await {
            if let Ok(Some(outcome)) = joined {
                outcomes.push(outcome);
            }
        }

        let status = aggregate_status(&outcomes);
        info!(id, index, ?status, "team cue finished");
        self.respond_position(status, index, id).await;
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
            error!(%err, "team position response failed");
        }
    }
}

impl OscListener for Team {
    fn deliver(&self, packet: Arc<OscPacket>) {
        if self.osc_tx.try_send(packet).is_err() {
            warn!("team OSC input channel is full, discarding packet");
        }
    }
}

/// Collapses per-robot outcomes into the team status: any break wins over
/// any error, which wins over success.
pub fn aggregate_status(outcomes: &[Result<(), MoveError>]) -> MoveStatus {
    if outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(err) if err.is_break()))
    {
        MoveStatus::Break
    } else if outcomes.iter().any(|outcome| outcome.is_err()) {
        MoveStatus::Error
    } else {
        MoveStatus::Ok
    }
}

async fn run_team_packets(
    team: Arc<Team>,
    mut osc_rx: mpsc::Receiver<Arc<OscPacket>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown_rx.changed() => return,
            packet = osc_rx.recv() => match packet {
                None => return,
                Some(packet) => packet,
            },
        };

        if team.request_position_path.as_deref() != Some(packet.path()) {
            continue;
        }

        let Some((id, index)) = parse_team_cue(packet.values()) else {
            error!(values = ?packet.values(), "malformed team position cue");
            continue;
        };

        let team = Arc::clone(&team);
        tokio::spawn(async move {
            team.run_cue(id, index).await;
        });
    }
}

/// Team cues carry exactly `(id, index)`.
fn parse_team_cue(values: &[OscValue]) -> Option<(u16, i32)> {
    match values {
        [OscValue::Int32(id), OscValue::Int32(index)] => {
            Some((u16::try_from(*id).ok()?, *index))
        }
        _ => None,
    }
}
