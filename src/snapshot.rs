use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::graph::DomainGraph;
use crate::view_state::ViewState;

/// Flat session snapshot: the graph, its geometry and when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub domain_graph: DomainGraph,
    pub view_state: ViewState,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Snapshot {
    pub fn new(domain_graph: DomainGraph, view_state: ViewState) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self {
            domain_graph,
            view_state,
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| Error::Document(err.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Document(err.to_string()))
    }

    /// Whether `text` looks like a snapshot rather than a bare graph document.
    pub fn sniff(text: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(text)
            .map(|value| value.get("domainGraph").is_some())
            .unwrap_or(false)
    }
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, snapshot)?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let file = File::open(path)?;
    let snapshot = serde_json::from_reader(BufReader::new(file))?;
    Ok(snapshot)
}
