//! In-process replica set.
//!
//! Simulates the store-side behaviour the probe has to cope with: an elected
//! primary that can move, members that crash and restart, secondaries that
//! stop replicating, and members that accept a connection but never answer.
//!
//! Endpoints use the `memory://` scheme. `memory://a` is a direct connection to
//! member `a`; `memory://a,b,c` is an aggregate connection that routes every
//! operation to whichever of those members is primary.
//!
//! A handle captures the member's epoch when it is created. Crashing a member
//! bumps the epoch, so handles created before the crash keep failing even after
//! the member comes back, until the caller reconnects.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::config::{NodeSpec, ReadLevel, WriteAck};
use crate::error::{ConnectError, StoreError};
use crate::store::{Connector, NodeClient, NodeHandle};

const SCHEME: &str = "memory://";

#[derive(Clone, Default)]
pub struct MemoryReplicaSet {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Default)]
struct ClusterState {
    members: BTreeMap<String, Member>,
    primary: Option<String>,
}

#[derive(Default)]
struct Member {
    up: bool,
    epoch: u64,
    lagging: bool,
    stalled: bool,
    write_fault: Option<WriteFault>,
    connects: u32,
    last_ack: Option<WriteAck>,
    last_read_level: Option<ReadLevel>,
    values: HashMap<String, i64>,
}

#[derive(Clone, Copy)]
enum WriteFault {
    /// The member goes down.
    Crash,
    /// The member stays up but drops every open connection.
    Reset,
}

impl MemoryReplicaSet {
    /// Creates a set whose members are all up, with no primary elected.
    pub fn new(members: &[&str]) -> Self {
        let members = members
            .iter()
            .map(|name| {
                let member = Member {
                    up: true,
                    ..Member::default()
                };
                (name.to_string(), member)
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                members,
                primary: None,
            })),
        }
    }

    /// Endpoint URI for a direct connection to one member.
    pub fn uri(member: &str) -> String {
        format!("{SCHEME}{member}")
    }

    /// Endpoint URI for an aggregate connection over several members.
    pub fn aggregate_uri(members: &[&str]) -> String {
        format!("{SCHEME}{}", members.join(","))
    }

    pub fn elect(&self, member: Option<&str>) {
        self.lock().primary = member.map(str::to_string);
    }

    /// Stops the member. Existing handles to it fail from now on.
    pub fn crash(&self, member: &str) {
        self.with_member(member, |m| {
            m.up = false;
            m.epoch += 1;
        });
    }

    pub fn restart(&self, member: &str) {
        self.with_member(member, |m| m.up = true);
    }

    /// A lagging member stops receiving replicated writes.
    pub fn set_lagging(&self, member: &str, lagging: bool) {
        self.with_member(member, |m| m.lagging = lagging);
    }

    /// A stalled member accepts operations but never answers them.
    pub fn set_stalled(&self, member: &str, stalled: bool) {
        self.with_member(member, |m| m.stalled = stalled);
    }

    /// The member crashes while handling its next write.
    pub fn crash_on_next_write(&self, member: &str) {
        self.with_member(member, |m| m.write_fault = Some(WriteFault::Crash));
    }

    /// The member drops its connections while handling its next write and
    /// keeps running.
    pub fn reset_on_next_write(&self, member: &str) {
        self.with_member(member, |m| m.write_fault = Some(WriteFault::Reset));
    }

    /// Sets a value on one member without replicating it.
    pub fn put(&self, member: &str, key: &str, value: i64) {
        self.with_member(member, |m| {
            m.values.insert(key.to_string(), value);
        });
    }

    pub fn value(&self, member: &str, key: &str) -> Option<i64> {
        self.lock()
            .members
            .get(member)
            .and_then(|m| m.values.get(key).copied())
    }

    /// Acknowledgment level of the last write the member served.
    pub fn last_write_ack(&self, member: &str) -> Option<WriteAck> {
        self.lock().members.get(member).and_then(|m| m.last_ack)
    }

    /// Read concern of the last read the member served.
    pub fn last_read_level(&self, member: &str) -> Option<ReadLevel> {
        self.lock().members.get(member).and_then(|m| m.last_read_level)
    }

    /// Number of handles successfully created for a member.
    pub fn connects(&self, member: &str) -> u32 {
        self.lock().members.get(member).map_or(0, |m| m.connects)
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_member(&self, member: &str, f: impl FnOnce(&mut Member)) {
        if let Some(m) = self.lock().members.get_mut(member) {
            f(m);
        }
    }
}

#[async_trait]
impl Connector for MemoryReplicaSet {
    async fn connect(&self, node: &NodeSpec) -> Result<NodeHandle, ConnectError> {
        let targets = parse_members(&node.uri)?;

        let (route, stalled) = {
            let mut state = self.lock();
            for name in &targets {
                if !state.members.contains_key(name) {
                    return Err(ConnectError::InvalidEndpoint(format!("no member named '{name}'")));
                }
            }

            if targets.len() == 1 {
                let name = &targets[0];
                let Some(member) = state.members.get_mut(name) else {
                    return Err(ConnectError::InvalidEndpoint(format!("no member named '{name}'")));
                };
                if !member.up {
                    return Err(ConnectError::Unreachable(format!("{name} is down")));
                }
                member.connects += 1;
                let route = Route::Direct {
                    member: name.clone(),
                    epoch: member.epoch,
                };
                (route, member.stalled)
            } else {
                if !targets.iter().any(|name| state.members[name].up) {
                    return Err(ConnectError::Unreachable("no member is up".to_string()));
                }
                (Route::Aggregate { members: targets }, false)
            }
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        Ok(Arc::new(MemoryClient {
            set: self.clone(),
            route,
        }))
    }
}

fn parse_members(uri: &str) -> Result<Vec<String>, ConnectError> {
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| ConnectError::InvalidEndpoint(format!("expected {SCHEME} URI, got '{uri}'")))?;
    let members: Vec<String> = rest
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if members.is_empty() {
        return Err(ConnectError::InvalidEndpoint(format!("no members in '{uri}'")));
    }
    Ok(members)
}

enum Route {
    Direct { member: String, epoch: u64 },
    Aggregate { members: Vec<String> },
}

struct MemoryClient {
    set: MemoryReplicaSet,
    route: Route,
}

enum Op<'a> {
    Status,
    Write {
        key: &'a str,
        value: i64,
        ack: WriteAck,
    },
    Read {
        key: &'a str,
        level: ReadLevel,
    },
}

enum Reply {
    Primary(bool),
    Value(Option<i64>),
}

impl MemoryClient {
    /// Resolves the member that serves this request and runs `op` against it.
    async fn execute(&self, op: Op<'_>) -> Result<Reply, StoreError> {
        let outcome = {
            let mut state = self.set.lock();
            let target = self.target(&state);
            match target {
                Ok(member) => {
                    if state.members[&member].stalled {
                        None
                    } else {
                        Some(apply(&mut state, &member, op))
                    }
                }
                Err(err) => Some(Err(err)),
            }
        };

        match outcome {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn target(&self, state: &ClusterState) -> Result<String, StoreError> {
        match &self.route {
            Route::Direct { member, epoch } => {
                let m = &state.members[member];
                if !m.up || m.epoch != *epoch {
                    return Err(StoreError::Connection(format!("connection to {member} was reset")));
                }
                Ok(member.clone())
            }
            Route::Aggregate { members } => state
                .primary
                .as_ref()
                .filter(|primary| members.contains(*primary) && state.members[*primary].up)
                .cloned()
                .ok_or_else(|| StoreError::Connection("no primary available".to_string())),
        }
    }
}

fn apply(state: &mut ClusterState, member: &str, op: Op<'_>) -> Result<Reply, StoreError> {
    let is_primary = state.primary.as_deref() == Some(member);
    match op {
        Op::Status => Ok(Reply::Primary(is_primary)),
        Op::Read { key, level } => {
            let Some(m) = state.members.get_mut(member) else {
                return Err(StoreError::Connection(format!("no member named '{member}'")));
            };
            m.last_read_level = Some(level);
            Ok(Reply::Value(m.values.get(key).copied()))
        }
        Op::Write { key, value, ack } => {
            if !is_primary {
                return Err(StoreError::Rejected(format!("{member} is not primary")));
            }
            if let Some(m) = state.members.get_mut(member) {
                m.last_ack = Some(ack);
                if let Some(fault) = m.write_fault.take() {
                    if let WriteFault::Crash = fault {
                        m.up = false;
                    }
                    m.epoch += 1;
                    return Err(StoreError::Connection(format!("{member} closed the connection")));
                }
            }

            let previous = state
                .members
                .get_mut(member)
                .and_then(|m| m.values.insert(key.to_string(), value));
            for (name, m) in state.members.iter_mut() {
                if name != member && m.up && !m.lagging {
                    m.values.insert(key.to_string(), value);
                }
            }
            Ok(Reply::Value(previous))
        }
    }
}

#[async_trait]
impl NodeClient for MemoryClient {
    async fn is_primary(&self) -> Result<bool, StoreError> {
        match self.execute(Op::Status).await? {
            Reply::Primary(primary) => Ok(primary),
            Reply::Value(_) => Err(StoreError::Rejected("unexpected reply".to_string())),
        }
    }

    async fn upsert_and_return_previous(
        &self,
        key: &str,
        value: i64,
        ack: WriteAck,
    ) -> Result<Option<i64>, StoreError> {
        match self.execute(Op::Write { key, value, ack }).await? {
            Reply::Value(previous) => Ok(previous),
            Reply::Primary(_) => Err(StoreError::Rejected("unexpected reply".to_string())),
        }
    }

    async fn find_one(&self, key: &str, level: ReadLevel) -> Result<Option<i64>, StoreError> {
        match self.execute(Op::Read { key, level }).await? {
            Reply::Value(value) => Ok(value),
            Reply::Primary(_) => Err(StoreError::Rejected("unexpected reply".to_string())),
        }
    }
}
