//! MongoDB backend.
//!
//! One [`mongodb::Client`] per configured endpoint. Direct-connection URIs give
//! a per-member view; a multi-host replica-set URI gives the aggregate view and
//! lets the driver route writes to whoever is primary.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::{
    Client, Collection,
    bson::{Bson, Document, doc},
    error::{Error as DriverError, ErrorKind},
    options::{
        Acknowledgment, ClientOptions, FindOneAndUpdateOptions, FindOneOptions, ReadConcern,
        ReturnDocument, WriteConcern,
    },
};
use tracing::debug;

use crate::config::{NodeSpec, ProbeConfig, ReadLevel, Timeouts, WriteAck};
use crate::error::{ConnectError, StoreError};
use crate::store::{Connector, NodeClient, NodeHandle};

const APP_NAME: &str = "replica-probe";

pub struct MongoConnector {
    database: String,
    collection: String,
    timeouts: Timeouts,
}

impl MongoConnector {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            database: config.database.clone(),
            collection: config.collection.clone(),
            timeouts: config.timeouts,
        }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, node: &NodeSpec) -> Result<NodeHandle, ConnectError> {
        let mut options = ClientOptions::parse(&node.uri)
            .await
            .map_err(|err| ConnectError::InvalidEndpoint(err.to_string()))?;

        // Timeouts spelled out in the URI win over the command-line defaults.
        options.connect_timeout.get_or_insert(self.timeouts.connect);
        options
            .server_selection_timeout
            .get_or_insert(self.timeouts.select);
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());

        let client = Client::with_options(options)
            .map_err(|err| ConnectError::InvalidEndpoint(err.to_string()))?;

        // The driver connects lazily, so ask the node to answer before handing out the handle.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|err| ConnectError::Unreachable(err.to_string()))?;
        debug!(node = %node.name, "mongodb endpoint answered ping");

        let collection = client
            .database(&self.database)
            .collection::<Document>(&self.collection);
        Ok(Arc::new(MongoNode { client, collection }))
    }
}

struct MongoNode {
    client: Client,
    collection: Collection<Document>,
}

#[async_trait]
impl NodeClient for MongoNode {
    async fn is_primary(&self) -> Result<bool, StoreError> {
        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "isMaster": 1 }, None)
            .await?;
        Ok(reply.get_bool("ismaster").unwrap_or(false))
    }

    async fn upsert_and_return_previous(
        &self,
        key: &str,
        value: i64,
        ack: WriteAck,
    ) -> Result<Option<i64>, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .write_concern(write_concern(ack))
            .build();
        let previous = self
            .collection
            .find_one_and_update(doc! { "key": key }, doc! { "$set": { "value": value } }, options)
            .await?;
        Ok(previous.as_ref().and_then(counter_value))
    }

    async fn find_one(&self, key: &str, level: ReadLevel) -> Result<Option<i64>, StoreError> {
        let options = FindOneOptions::builder()
            .read_concern(read_concern(level))
            .build();
        let document = self.collection.find_one(doc! { "key": key }, options).await?;
        Ok(document.as_ref().and_then(counter_value))
    }
}

impl From<DriverError> for StoreError {
    fn from(err: DriverError) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Command(_) | ErrorKind::Write(_) => StoreError::Rejected(err.to_string()),
            _ => StoreError::Connection(err.to_string()),
        }
    }
}

fn write_concern(ack: WriteAck) -> WriteConcern {
    let w = match ack {
        WriteAck::Majority => Acknowledgment::Majority,
        WriteAck::Nodes(count) => Acknowledgment::Nodes(count),
    };
    WriteConcern::builder().w(w).build()
}

fn read_concern(level: ReadLevel) -> ReadConcern {
    match level {
        ReadLevel::Local => ReadConcern::local(),
        ReadLevel::Available => ReadConcern::available(),
        ReadLevel::Majority => ReadConcern::majority(),
        ReadLevel::Linearizable => ReadConcern::linearizable(),
        ReadLevel::Snapshot => ReadConcern::snapshot(),
    }
}

/// Shells write numbers as doubles, drivers usually as integers.
fn counter_value(document: &Document) -> Option<i64> {
    match document.get("value")? {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) => Some(*value as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_value_accepts_numeric_types() {
        assert_eq!(counter_value(&doc! { "key": "one", "value": 7_i32 }), Some(7));
        assert_eq!(counter_value(&doc! { "key": "one", "value": 8_i64 }), Some(8));
        assert_eq!(counter_value(&doc! { "key": "one", "value": 9.0 }), Some(9));
        assert_eq!(counter_value(&doc! { "key": "one", "value": "ten" }), None);
        assert_eq!(counter_value(&doc! { "key": "one" }), None);
    }

    #[test]
    fn write_concern_maps_acknowledgment() {
        assert_eq!(
            write_concern(WriteAck::Majority).w,
            Some(Acknowledgment::Majority)
        );
        assert_eq!(
            write_concern(WriteAck::Nodes(2)).w,
            Some(Acknowledgment::Nodes(2))
        );
    }

    #[test]
    fn read_concern_maps_level() {
        use mongodb::options::ReadConcernLevel;

        assert_eq!(read_concern(ReadLevel::Local).level, ReadConcernLevel::Local);
        assert_eq!(read_concern(ReadLevel::Majority).level, ReadConcernLevel::Majority);
        assert_eq!(
            read_concern(ReadLevel::Linearizable).level,
            ReadConcernLevel::Linearizable
        );
        assert_eq!(read_concern(ReadLevel::Snapshot).level, ReadConcernLevel::Snapshot);
    }

    #[tokio::test]
    async fn invalid_uri_is_rejected_without_io() {
        let config = ProbeConfig::new(vec![NodeSpec::new("bad", "not-a-uri")]).unwrap();
        let connector = MongoConnector::new(&config);
        let result = connector.connect(&config.nodes[0]).await;
        assert!(matches!(result, Err(ConnectError::InvalidEndpoint(_))));
    }
}
