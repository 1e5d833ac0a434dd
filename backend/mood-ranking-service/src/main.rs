// Hosts the engine behind a JSON-lines command loop on stdin.
//
// One command per line, answered with one JSON line on stdout:
//   {"op":"recommend","user_id":"u1","mood_hint":"sad"}
//   {"op":"feedback","user_id":"u1","song_id":"s1","feedback_kind":"like"}
//   {"op":"status","user_id":"u1"}
//   {"op":"close","user_id":"u1"}

use anyhow::Context;
use mood_ranking_service::jobs::{spawn_maintenance, MaintenanceConfig};
use mood_ranking_service::{
    Config, EngineError, FeedbackRequest, InMemoryCatalog, RecommendationEngine,
    RecommendationRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Recommend(RecommendationRequest),
    Feedback(FeedbackRequest),
    Status {
        user_id: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    Close {
        user_id: String,
        #[serde(default)]
        session_id: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mood_ranking_service=info,info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr; stdout carries command responses
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

async fn execute(engine: &RecommendationEngine, line: &str) -> serde_json::Value {
    let command: Command = match serde_json::from_str(line) {
        Ok(c) => c,
        Err(e) => return serde_json::json!({ "error": format!("invalid command: {}", e) }),
    };

    let result: Result<serde_json::Value, EngineError> = match command {
        Command::Recommend(request) => engine
            .recommend(request)
            .await
            .map(|r| serde_json::to_value(r).unwrap_or_default()),
        Command::Feedback(request) => engine
            .submit_feedback(request)
            .await
            .map(|r| serde_json::to_value(r).unwrap_or_default()),
        Command::Status {
            user_id,
            session_id,
        } => engine
            .session_status(&user_id, session_id.as_deref())
            .await
            .map(|r| serde_json::to_value(r).unwrap_or_default()),
        Command::Close {
            user_id,
            session_id,
        } => engine
            .close_session(&user_id, session_id.as_deref())
            .await
            .map(|r| serde_json::json!({ "session_reward": r })),
    };

    match result {
        Ok(value) => value,
        Err(e) => {
            if !e.is_client_error() {
                warn!(error = %e, "Command failed");
            }
            serde_json::json!({ "error": e.to_string() })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load config")?;
    info!(service = %config.service.service_name, "Starting mood ranking engine");

    let catalog = match &config.service.catalog_path {
        Some(path) => InMemoryCatalog::from_json_file(path)
            .await
            .with_context(|| format!("Failed to load catalog from {}", path))?,
        None => {
            warn!("CATALOG_PATH not set, starting with an empty catalog");
            InMemoryCatalog::default()
        }
    };

    let maintenance = MaintenanceConfig::from_config(&config);
    let engine = Arc::new(RecommendationEngine::new(config, Arc::new(catalog)));
    match engine.refresh_catalog().await {
        Ok(snapshot) => info!(songs = snapshot.songs.len(), "Mood space ready"),
        Err(e) => warn!(error = %e, "Initial mood space fit failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = spawn_maintenance(maintenance, Arc::clone(&engine), shutdown_rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            next = lines.next_line() => {
                match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let response = execute(&engine, &line).await;
                        stdout.write_all(format!("{}\n", response).as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    match job.await {
        Ok(stats) => info!(passes = stats.passes, "Maintenance stopped"),
        Err(e) => error!(error = %e, "Maintenance task failed"),
    }
    Ok(())
}
