use crate::config::RosterConfig;
use crate::db;
use crate::ipc::error::{get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use crate::sync::RosterSync;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "rosterState": state.roster.mirror().state(),
        }),
    )
}

fn config_json(cfg: &RosterConfig) -> serde_json::Value {
    json!({
        "collection": cfg.collection,
        "orderField": cfg.order_field,
        "notificationLimit": cfg.notification_limit,
        "pollIntervalMs": cfg.poll_interval_ms,
    })
}

fn select_workspace(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);

    let config = RosterConfig::load(&path)
        .map_err(|e| HandlerErr::new("config_invalid", e.to_string()))?;
    let conn = db::open_db(&path)
        .map_err(|e| HandlerErr::new("store_failed", format!("{e:#}")))?;

    // The old subscription belongs to the old database.
    state.roster.teardown();
    state.roster = RosterSync::new(config.notification_limit);
    state.store = Some(SqliteStore::new(conn).with_poll_interval(config.poll_interval()));
    state.workspace = Some(path.clone());
    tracing::info!(workspace = %path.display(), collection = %config.collection, "workspace selected");
    let result = json!({
        "workspacePath": path.to_string_lossy(),
        "config": config_json(&config),
    });
    state.config = config;
    Ok(result)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(match select_workspace(state, req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
