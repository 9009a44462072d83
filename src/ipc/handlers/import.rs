use crate::csv;
use crate::import::import_rows;
use crate::ipc::error::{get_optional_str, get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::normalize::Placeholders;
use anyhow::Context;
use serde_json::json;
use std::path::PathBuf;

fn read_source(req: &Request) -> Result<String, HandlerErr> {
    if let Some(text) = req.params.get("text").and_then(|v| v.as_str()) {
        return Ok(text.to_string());
    }
    let Some(in_path) = get_optional_str(&req.params, "inPath") else {
        return Err(HandlerErr::bad_params("missing params.inPath or params.text"));
    };
    std::fs::read_to_string(&in_path)
        .with_context(|| format!("failed to read {in_path}"))
        .map_err(|e| {
            HandlerErr::new("parse_failed", format!("{e:#}")).with_details(json!({ "inPath": in_path }))
        })
}

async fn import_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = state.store()?;
    let text = read_source(req)?;
    let table = csv::parse_table(&text);
    let report = import_rows(&store, &state.config.collection, &table, Placeholders::starting_now()).await?;
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("parse_failed", e.to_string()))
}

fn export_template(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out_dir = PathBuf::from(get_required_str(&req.params, "outDir")?);
    let path = csv::write_template(&out_dir)
        .map_err(|e| HandlerErr::new("write_failed", format!("{e:#}")))?;
    Ok(json!({ "path": path.to_string_lossy() }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "import.csv" => import_csv(state, req).await,
        "import.template" => export_template(req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
