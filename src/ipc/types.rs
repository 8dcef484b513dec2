use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One selected workspace per process. `db` is `None` until
/// `workspace.select` succeeds, and briefly while a bundle import swaps the
/// database file.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn select(&mut self, workspace: &Path, conn: Connection) {
        self.workspace = Some(workspace.to_path_buf());
        self.db = Some(conn);
    }

    /// Closes the connection and returns the workspace it belonged to.
    pub fn release_db(&mut self) -> Option<PathBuf> {
        self.db = None;
        self.workspace.clone()
    }

    pub fn workspace_display(&self) -> Option<String> {
        self.workspace
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }
}
