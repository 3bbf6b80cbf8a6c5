//! Probe configuration shared by every component.
//!
//! [`ProbeConfig`] is built once by [`crate::cli`] and then borrowed by the
//! pool, the locator, the cycle and the driver. Nothing here performs I/O.

use std::{fmt, str::FromStr, time::Duration};

use anyhow::{Result, anyhow, ensure};
use clap::ValueEnum;

/// Identifier of a configured endpoint, stable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One configured endpoint: `NAME=URI` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: NodeName,
    pub uri: String,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: NodeName::new(name),
            uri: uri.into(),
        }
    }
}

impl FromStr for NodeSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // URIs contain '=' in their query string, so only the first one separates the name.
        let (name, uri) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=URI, got '{s}'"))?;
        let name = name.trim();
        let uri = uri.trim();
        ensure!(!name.is_empty(), "node name cannot be empty in '{s}'");
        ensure!(!uri.is_empty(), "node '{name}' has an empty URI");
        Ok(Self::new(name, uri))
    }
}

/// Read visibility requested from the store for every fan-out read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReadLevel {
    #[default]
    Local,
    Available,
    Majority,
    Linearizable,
    Snapshot,
}

impl fmt::Display for ReadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            ReadLevel::Local => "local",
            ReadLevel::Available => "available",
            ReadLevel::Majority => "majority",
            ReadLevel::Linearizable => "linearizable",
            ReadLevel::Snapshot => "snapshot",
        };
        f.write_str(level)
    }
}

/// Write acknowledgment requested from the store for the probe write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteAck {
    #[default]
    Majority,
    Nodes(u32),
}

impl FromStr for WriteAck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("majority") {
            return Ok(WriteAck::Majority);
        }
        let count: u32 = trimmed
            .parse()
            .map_err(|_| anyhow!("write concern must be 'majority' or a node count, got '{s}'"))?;
        ensure!(count > 0, "write concern node count must be at least 1");
        Ok(WriteAck::Nodes(count))
    }
}

impl fmt::Display for WriteAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteAck::Majority => f.write_str("majority"),
            WriteAck::Nodes(count) => write!(f, "{count}"),
        }
    }
}

/// Per-operation bounds.
///
/// - `connect`: establishing a node handle, including the initial handshake.
/// - `select`: how long the driver may wait for a suitable server.
/// - `socket`: any single status query, write or read issued by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub select: Duration,
    pub socket: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(9000),
            select: Duration::from_millis(2000),
            socket: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Nodes in configuration order. Names are unique.
    pub nodes: Vec<NodeSpec>,
    pub key: String,
    pub database: String,
    pub collection: String,
    pub read_level: ReadLevel,
    pub write_ack: WriteAck,
    pub timeouts: Timeouts,
    /// Delay between iterations, may be zero.
    pub pacing: Duration,
    /// Stop after this many iterations; `None` runs until interrupted.
    pub iterations: Option<u64>,
}

impl ProbeConfig {
    /// Builds a configuration with defaults for everything but the node list.
    pub fn new(nodes: Vec<NodeSpec>) -> Result<Self> {
        validate_nodes(&nodes)?;
        Ok(Self {
            nodes,
            key: "one".to_string(),
            database: "test".to_string(),
            collection: "testCollection".to_string(),
            read_level: ReadLevel::default(),
            write_ack: WriteAck::default(),
            timeouts: Timeouts::default(),
            pacing: Duration::ZERO,
            iterations: None,
        })
    }
}

pub(crate) fn validate_nodes(nodes: &[NodeSpec]) -> Result<()> {
    ensure!(!nodes.is_empty(), "at least one --node NAME=URI is required");
    for (index, node) in nodes.iter().enumerate() {
        ensure!(
            !nodes[..index].iter().any(|other| other.name == node.name),
            "node name '{}' is configured more than once",
            node.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_spec_splits_on_first_equals() {
        let spec: NodeSpec = "rs1=mongodb://rs-mongo-1:27017/test?directConnection=true&w=majority"
            .parse()
            .expect("valid node spec");
        assert_eq!(spec.name, NodeName::from("rs1"));
        assert_eq!(
            spec.uri,
            "mongodb://rs-mongo-1:27017/test?directConnection=true&w=majority"
        );
    }

    #[test]
    fn node_spec_rejects_malformed_input() {
        assert!("rs1".parse::<NodeSpec>().is_err());
        assert!("=mongodb://host".parse::<NodeSpec>().is_err());
        assert!("rs1=".parse::<NodeSpec>().is_err());
        assert!("  =  ".parse::<NodeSpec>().is_err());
    }

    #[test]
    fn write_ack_accepts_majority_and_counts() {
        assert_eq!("majority".parse::<WriteAck>().unwrap(), WriteAck::Majority);
        assert_eq!("MAJORITY".parse::<WriteAck>().unwrap(), WriteAck::Majority);
        assert_eq!("1".parse::<WriteAck>().unwrap(), WriteAck::Nodes(1));
        assert_eq!("3".parse::<WriteAck>().unwrap(), WriteAck::Nodes(3));
        assert!("0".parse::<WriteAck>().is_err());
        assert!("all".parse::<WriteAck>().is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let nodes = vec![NodeSpec::new("a", "memory://a"), NodeSpec::new("a", "memory://b")];
        assert!(ProbeConfig::new(nodes).is_err());
        assert!(ProbeConfig::new(Vec::new()).is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ProbeConfig::new(vec![NodeSpec::new("a", "memory://a")]).unwrap();
        assert_eq!(config.key, "one");
        assert_eq!(config.read_level, ReadLevel::Local);
        assert_eq!(config.write_ack, WriteAck::Majority);
        assert_eq!(config.timeouts.socket, Duration::from_millis(1500));
        assert_eq!(config.pacing, Duration::ZERO);
    }
}
