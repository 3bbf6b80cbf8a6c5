//! Finds the node that currently reports itself as primary.
//!
//! Nodes are asked in configuration order and the first one answering
//! "primary" wins, so a multi-host endpoint configured first is preferred as
//! the reporting source. A node that is absent or fails its status query is
//! simply skipped; the pool is left untouched.

use std::time::Duration;

use tracing::debug;

use crate::config::NodeName;
use crate::pool::{ConnectionPool, Liveness};

pub async fn find_primary(pool: &ConnectionPool, status_timeout: Duration) -> Option<NodeName> {
    for name in pool.names() {
        match pool.check(name, status_timeout).await {
            Liveness::Up { primary: true } => return Some(name.clone()),
            Liveness::Up { primary: false } => {}
            Liveness::Disconnected => debug!(node = %name, "skipping absent node"),
            Liveness::Down(reason) => {
                debug!(node = %name, %reason, "status query failed, treating as not primary")
            }
        }
    }
    None
}
