//! Between-run state: the crawler's own peer/node identity and a handful of
//! routing hints so a restart doesn't have to bootstrap from the public
//! routers alone.
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::routing::RoutingTable;
use crate::types::NodeId;

/// Hint node carried across a restart: enough to re-seed the routing table
/// without waiting on bootstrap router RTTs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeHint {
    pub id: [u8; 20],
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistState {
    #[serde(skip)]
    pub path: PathBuf,
    pub peer_id: [u8; 20],
    pub node_id: [u8; 20],
    pub hints: Vec<NodeHint>,
}

impl PersistState {
    pub fn fresh(path: PathBuf, peer_id: [u8; 20]) -> PersistState {
        PersistState {
            path,
            peer_id,
            node_id: *NodeId::random().as_bytes(),
            hints: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<PersistState> {
        let json = fs::read_to_string(path)?;
        let mut state: PersistState = serde_json::from_str(&json).context("deserialize error")?;
        state.path = path.to_path_buf();
        Ok(state)
    }

    /// Snapshots up to `limit` good nodes from a running routing table,
    /// replacing whatever hints were loaded at startup.
    pub fn capture_hints(&mut self, routing: &RoutingTable, limit: usize) {
        self.hints = routing
            .good(limit)
            .into_iter()
            .map(|node| NodeHint {
                id: *node.id.as_bytes(),
                addr: node.endpoint,
            })
            .collect();
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(self.path.parent().context("no parent")?)?;
        let json = serde_json::to_string(self).context("serialize error")?;
        fs::write(&self.path, json)?;
        debug!("persist state written to {:?}: {} hints", self.path, self.hints.len());
        Ok(())
    }
}

impl Drop for PersistState {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            error!("{:#}", e.context("persist state drop error"));
        }
    }
}
