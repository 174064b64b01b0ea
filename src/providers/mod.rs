//! Capability providers, grouped into toolkits that share one backend
//! resource each.
//!
//! - `database`: SQLite / MySQL via `sqlx`
//! - `webapi`: generic HTTP calls
//! - `medical`: request shaping for public medical data APIs
//! - `terminal`: shell commands in a workspace directory

pub mod database;
pub mod http;
pub mod medical;
pub mod terminal;
pub mod webapi;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::dispatch::ToolBinding;
use crate::types::{BackendsConfig, Error, Result};

/// Which toolkit(s) a server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    Database,
    Webapi,
    Medical,
    Terminal,
    All,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Database => "database",
            ServerKind::Webapi => "webapi",
            ServerKind::Medical => "medical",
            ServerKind::Terminal => "terminal",
            ServerKind::All => "all",
        }
    }

    /// Name reported to MCP clients.
    pub fn server_name(&self) -> String {
        match self {
            ServerKind::All => "toolbridge".to_string(),
            other => format!("{}-server", other.as_str()),
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database" => Ok(ServerKind::Database),
            "webapi" => Ok(ServerKind::Webapi),
            "medical" => Ok(ServerKind::Medical),
            "terminal" => Ok(ServerKind::Terminal),
            "all" => Ok(ServerKind::All),
            other => Err(Error::config(format!("unknown server: {}", other))),
        }
    }
}

/// Build the tool bindings for `kind`, in catalog order.
pub fn bindings_for(kind: ServerKind, backends: &BackendsConfig) -> Result<Vec<ToolBinding>> {
    let bindings = match kind {
        ServerKind::Database => database::toolkit(backends.database.clone()),
        ServerKind::Webapi => webapi::toolkit(backends.http.clone())?,
        ServerKind::Medical => medical::toolkit(backends.http.clone(), backends.medical.clone())?,
        ServerKind::Terminal => terminal::toolkit(backends.terminal.clone()),
        ServerKind::All => {
            let mut all = Vec::new();
            for kind in [
                ServerKind::Database,
                ServerKind::Webapi,
                ServerKind::Medical,
                ServerKind::Terminal,
            ] {
                all.extend(bindings_for(kind, backends)?);
            }
            all
        }
    };
    tracing::debug!(server = %kind, tools = bindings.len(), "toolkit assembled");
    Ok(bindings)
}
