use std::path::PathBuf;

use serde::Deserialize;

use crate::config::RosterConfig;
use crate::ipc::error::HandlerErr;
use crate::store::SqliteStore;
use crate::sync::RosterSync;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<SqliteStore>,
    pub config: RosterConfig,
    pub roster: RosterSync,
}

impl AppState {
    pub fn new() -> Self {
        let config = RosterConfig::default();
        AppState {
            workspace: None,
            store: None,
            roster: RosterSync::new(config.notification_limit),
            config,
        }
    }

    /// A handle on the open workspace's store. Handles are cheap to clone.
    pub fn store(&self) -> Result<SqliteStore, HandlerErr> {
        self.store
            .clone()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
    }
}
