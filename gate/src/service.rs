use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bot::BotSnapshot;
use crate::errors::{GateError, MoveError};
use crate::team::Team;

/// Minimal dashboard API: a state snapshot and a way to trigger a group
/// run by hand.
pub struct Service {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(rename = "botId")]
    bot_id: usize,
    #[serde(rename = "moveGroupId")]
    move_group_id: u16,
}

impl Service {
    pub async fn start(port: u16, team: Arc<Team>) -> Result<Self, GateError> {
        let app = Router::new()
            .route("/bots", get(list_bots).post(run_move_group))
            .with_state(team);

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|err| GateError::Startup(format!("app port {port}: {err}")))?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = serve.await {
                error!(%err, "app server failed");
            }
        });

        info!(port, "app server listening");
        Ok(Self {
            shutdown_tx,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!("app server stopped");
    }
}

async fn list_bots(State(team): State<Arc<Team>>) -> Json<Vec<BotSnapshot>> {
    Json(team.snapshot().await)
}

async fn run_move_group(
    State(team): State<Arc<Team>>,
    Json(request): Json<RunRequest>,
) -> (StatusCode, Json<bool>) {
    let Some(bot) = team.bots().get(request.bot_id) else {
        error!(bot_id = request.bot_id, "bot is not found");
        return (StatusCode::NOT_FOUND, Json(false));
    };

    match bot.run_move_group(request.move_group_id) {
        Ok(()) => (StatusCode::OK, Json(true)),
        Err(err @ MoveError::UnknownGroup(_)) => {
            error!(bot = %bot.name, %err, "run request rejected");
            (StatusCode::NOT_FOUND, Json(false))
        }
        Err(err) => {
            error!(bot = %bot.name, %err, "run request failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(false))
        }
    }
}
