//! Continuous replica-set health probe.
//!
//! Every iteration writes an increasing counter to whichever node currently
//! reports itself as primary, then reads the same key from every configured
//! node and prints one line with per-node latency and whether each node has
//! caught up. Running it while members fail over, crash or fall behind shows
//! replication lag and read-your-write behaviour under the chosen read and
//! write concerns.
//!
//! # Modules
//!
//! - [`config`] and [`cli`]: node list, concerns, timeouts, pacing.
//! - [`store`]: the data-store seam plus MongoDB and in-memory backends.
//! - [`pool`]: one replaceable handle per node.
//! - [`locator`]: which node is primary right now.
//! - [`cycle`]: write, fan-out read, compare, reconnect.
//! - [`report`]: one formatted line per cycle.
//! - [`driver`]: the loop that ties them together.
//!
//! Failures never stop the loop. A node that is down shows up as an error
//! marker on the line for that iteration and is reconnected for the next one.

pub mod cli;
pub mod config;
pub mod cycle;
pub mod driver;
pub mod error;
pub mod locator;
pub mod pool;
pub mod report;
pub mod store;
