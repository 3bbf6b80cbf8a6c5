use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::config::{NodeSpec, ProbeConfig, ReadLevel, Timeouts, WriteAck, validate_nodes};

/// Continuously write a counter to the replica-set primary and read it back from every node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Node to probe as NAME=URI. Repeat for each node; order decides which node
    /// reports the primary first, so put a multi-host URI first to prefer it.
    #[arg(long = "node", env = "PROBE_NODES", value_delimiter = ';', required = true)]
    pub nodes: Vec<NodeSpec>,

    /// Key of the probe document.
    #[arg(long, env = "PROBE_KEY", default_value = "one")]
    pub key: String,

    /// Append a random process identity to the key so several probes can share a store.
    #[arg(long, env = "PROBE_UNIQUE_KEY")]
    pub unique_key: bool,

    #[arg(long, env = "PROBE_DATABASE", default_value = "test")]
    pub database: String,

    #[arg(long, env = "PROBE_COLLECTION", default_value = "testCollection")]
    pub collection: String,

    /// Read concern used for every read.
    #[arg(long, env = "PROBE_READ_CONCERN", value_enum, default_value_t = ReadLevel::Local)]
    pub read_concern: ReadLevel,

    /// Write concern used for the probe write: "majority" or a node count.
    #[arg(long, env = "PROBE_WRITE_CONCERN", default_value = "majority")]
    pub write_concern: WriteAck,

    #[arg(long, env = "PROBE_CONNECT_TIMEOUT_MS", default_value_t = 9000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "PROBE_SELECT_TIMEOUT_MS", default_value_t = 2000)]
    pub select_timeout_ms: u64,

    /// Upper bound for any single status query, write or read.
    #[arg(long, env = "PROBE_SOCKET_TIMEOUT_MS", default_value_t = 1500)]
    pub socket_timeout_ms: u64,

    /// Delay between iterations.
    #[arg(long, env = "PROBE_PACING_MS", default_value_t = 0)]
    pub pacing_ms: u64,

    /// Stop after this many iterations instead of running until Ctrl-C.
    #[arg(long, env = "PROBE_ITERATIONS")]
    pub iterations: Option<u64>,
}

impl Cli {
    pub fn into_config(self) -> Result<ProbeConfig> {
        validate_nodes(&self.nodes)?;

        let key = if self.unique_key {
            format!("{}-{}", self.key, nanoid::nanoid!(8))
        } else {
            self.key
        };

        Ok(ProbeConfig {
            nodes: self.nodes,
            key,
            database: self.database,
            collection: self.collection,
            read_level: self.read_concern,
            write_ack: self.write_concern,
            timeouts: Timeouts {
                connect: Duration::from_millis(self.connect_timeout_ms),
                select: Duration::from_millis(self.select_timeout_ms),
                socket: Duration::from_millis(self.socket_timeout_ms),
            },
            pacing: Duration::from_millis(self.pacing_ms),
            iterations: self.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeName;

    #[test]
    fn parses_nodes_in_order() {
        let cli = Cli::try_parse_from([
            "replica-probe",
            "--node",
            "all=mongodb://h1:27017,h2:27017/test?replicaSet=rs0",
            "--node",
            "one=mongodb://h1:27017/test?directConnection=true",
        ])
        .expect("valid arguments");
        let config = cli.into_config().expect("valid config");

        let names: Vec<_> = config.nodes.iter().map(|node| node.name.clone()).collect();
        assert_eq!(names, vec![NodeName::from("all"), NodeName::from("one")]);
        assert_eq!(config.nodes[0].uri, "mongodb://h1:27017,h2:27017/test?replicaSet=rs0");
    }

    #[test]
    fn parses_concerns_and_timeouts() {
        let cli = Cli::try_parse_from([
            "replica-probe",
            "--node",
            "a=memory://a",
            "--read-concern",
            "linearizable",
            "--write-concern",
            "2",
            "--socket-timeout-ms",
            "250",
            "--pacing-ms",
            "1000",
            "--iterations",
            "5",
        ])
        .expect("valid arguments");
        let config = cli.into_config().expect("valid config");

        assert_eq!(config.read_level, ReadLevel::Linearizable);
        assert_eq!(config.write_ack, WriteAck::Nodes(2));
        assert_eq!(config.timeouts.socket, Duration::from_millis(250));
        assert_eq!(config.pacing, Duration::from_secs(1));
        assert_eq!(config.iterations, Some(5));
    }

    #[test]
    fn unique_key_adds_suffix() {
        let cli = Cli::try_parse_from(["replica-probe", "--node", "a=memory://a", "--unique-key"])
            .expect("valid arguments");
        let config = cli.into_config().expect("valid config");
        assert!(config.key.starts_with("one-"));
        assert_eq!(config.key.len(), "one-".len() + 8);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Cli::try_parse_from(["replica-probe"]).is_err());
        assert!(Cli::try_parse_from(["replica-probe", "--node", "missing-uri"]).is_err());
        assert!(
            Cli::try_parse_from(["replica-probe", "--node", "a=memory://a", "--write-concern", "0"])
                .is_err()
        );

        let duplicate =
            Cli::try_parse_from(["replica-probe", "--node", "a=memory://a", "--node", "a=memory://b"])
                .expect("clap accepts duplicates");
        assert!(duplicate.into_config().is_err());
    }
}
