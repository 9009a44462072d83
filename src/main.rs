mod config;
mod csv;
mod db;
mod filter;
mod import;
mod ipc;
mod logging;
mod mirror;
mod model;
mod normalize;
mod notify;
mod store;
mod sync;

use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

fn main() -> anyhow::Result<()> {
    logging::init();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve())
}

async fn write_line(stdout: &mut Stdout, value: &serde_json::Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// One request per stdin line, one response per stdout line. Subscription
/// batches are applied as they arrive and always before the next request.
async fn serve() -> anyhow::Result<()> {
    let mut state = ipc::AppState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rosterd ready");

    loop {
        tokio::select! {
            biased;
            event = state.roster.next_event() => {
                state.roster.handle_event(event, Utc::now());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let resp = match serde_json::from_str::<ipc::Request>(&line) {
                    Ok(req) => ipc::handle_request(&mut state, req).await,
                    // No id to answer to.
                    Err(e) => json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                };
                write_line(&mut stdout, &resp).await?;
            }
        }
    }

    state.roster.teardown();
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
