//! The data-store seam.
//!
//! The probe never talks to a driver directly. It goes through two traits:
//!
//! - [`Connector`] turns a configured endpoint into a [`NodeClient`].
//! - [`NodeClient`] issues the three operations the probe needs: a role query,
//!   an upsert that returns the previous value, and a point read.
//!
//! [`mongo`] implements them on top of the MongoDB driver; [`memory`] is an
//! in-process replica set used to exercise failover and lag deterministically.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{NodeSpec, ReadLevel, WriteAck};
use crate::error::{ConnectError, StoreError};

pub mod memory;
pub mod mongo;

/// Shared, immutable handle to one node. Replaced wholesale on reconnect.
pub type NodeHandle = Arc<dyn NodeClient>;

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Whether the node currently reports itself as the writable primary.
    async fn is_primary(&self) -> Result<bool, StoreError>;

    /// Sets `key` to `value`, creating the document if needed, and returns the
    /// value it held before the write in the same atomic operation.
    async fn upsert_and_return_previous(
        &self,
        key: &str,
        value: i64,
        ack: WriteAck,
    ) -> Result<Option<i64>, StoreError>;

    /// Reads the current value of `key`, `None` when the document is missing.
    async fn find_one(&self, key: &str, level: ReadLevel) -> Result<Option<i64>, StoreError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, node: &NodeSpec) -> Result<NodeHandle, ConnectError>;
}
