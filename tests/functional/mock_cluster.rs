//! In-memory cluster that answers the administrative command set.
//!
//! `MockCluster` implements [`Commander`], so every engine runs against it
//! unchanged. Each node keeps its own slot table, open-slot markers, keys and
//! the set of peers it knows. `CLUSTER NODES` is rendered from those, so a
//! node's view only lists peers it has met, and only a node's own line
//! carries open-slot markers, like on real servers.
//!
//! Keys are stored per slot; the mock never hashes key names.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Mutex;

use bytes::Bytes;
use valkey_trib::client::{Command, Commander, NodeAddr, Reply};
use valkey_trib::error::{Result, TribError};
use valkey_trib::slots::{compact_ranges, TOTAL_SLOTS};

/// One simulated server.
#[derive(Debug, Clone)]
pub struct MockNode {
    pub id: String,
    pub addr: NodeAddr,
    pub master_id: Option<String>,
    pub cluster_enabled: bool,
    pub maxmemory: u64,
    pub epoch: u64,
    pub slots: BTreeSet<u16>,
    pub migrating: BTreeMap<u16, String>,
    pub importing: BTreeMap<u16, String>,
    pub keys: BTreeMap<u16, Vec<String>>,
    /// Keys listed by GETKEYSINSLOT that vanish before MIGRATE runs.
    pub expiring: BTreeSet<String>,
    /// Ids of the nodes this node knows, itself included.
    pub known: BTreeSet<String>,
    /// Full `CLUSTER NODES` text to return instead of the rendered one.
    pub nodes_override: Option<String>,
    pub shut_down: bool,
}

impl MockNode {
    fn new(port: u16) -> Self {
        let id = node_id(port);
        Self {
            known: BTreeSet::from([id.clone()]),
            id,
            addr: addr(port),
            master_id: None,
            cluster_enabled: true,
            maxmemory: 1024 * 1024 * 1024,
            epoch: 0,
            slots: BTreeSet::new(),
            migrating: BTreeMap::new(),
            importing: BTreeMap::new(),
            keys: BTreeMap::new(),
            expiring: BTreeSet::new(),
            nodes_override: None,
            shut_down: false,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }

    pub fn keys_in(&self, slot: u16) -> usize {
        self.keys.get(&slot).map_or(0, Vec::len)
    }

    fn line(&self, myself: bool) -> String {
        let role = if self.master_id.is_some() { "slave" } else { "master" };
        let flags = if myself {
            format!("myself,{}", role)
        } else {
            role.to_string()
        };
        let mut tokens: Vec<String> = compact_ranges(self.slots.iter().copied())
            .iter()
            .map(ToString::to_string)
            .collect();
        if myself {
            for (slot, dst) in &self.migrating {
                tokens.push(format!("[{}->-{}]", slot, dst));
            }
            for (slot, src) in &self.importing {
                tokens.push(format!("[{}-<-{}]", slot, src));
            }
        }
        let mut line = format!(
            "{} {}:{}@{} {} {} 0 0 {} connected",
            self.id,
            self.addr.host,
            self.addr.port,
            u32::from(self.addr.port) + 10000,
            flags,
            self.master_id.as_deref().unwrap_or("-"),
            self.epoch
        );
        for token in tokens {
            line.push(' ');
            line.push_str(&token);
        }
        line
    }
}

/// Deterministic 40 character id for the node on `port`.
pub fn node_id(port: u16) -> String {
    format!("{:040x}", u64::from(port) * 0x1_0001)
}

pub fn addr(port: u16) -> NodeAddr {
    NodeAddr::new("127.0.0.1", port)
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<MockNode>,
    log: Vec<String>,
    /// `(port, command prefix)` pairs answered with an error.
    failures: Vec<(u16, String)>,
}

impl State {
    fn index_of(&self, addr: &NodeAddr) -> Option<usize> {
        self.nodes.iter().position(|n| &n.addr == addr)
    }
}

/// A whole simulated cluster plus a log of every command it received.
#[derive(Debug, Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

fn ok() -> Reply {
    Reply::Simple("OK".to_string())
}

fn err(msg: impl Into<String>) -> Reply {
    Reply::Error(msg.into())
}

fn bulk(text: impl Into<String>) -> Reply {
    Reply::Bulk(Bytes::from(text.into()))
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A formed cluster: one master per `(port, slots)`, all knowing each
    /// other, epochs 1..N.
    pub fn with_masters<I>(masters: impl IntoIterator<Item = (u16, I)>) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        let cluster = Self::new();
        for (idx, (port, slots)) in masters.into_iter().enumerate() {
            cluster.add_node(port);
            cluster.with_node(port, |n| {
                n.slots = slots.into_iter().collect();
                n.epoch = idx as u64 + 1;
            });
        }
        cluster.join_all();
        cluster
    }

    /// Three masters splitting the slot space evenly.
    pub fn three_masters() -> Self {
        Self::with_masters([(7000, 0..5461), (7001, 5461..10923), (7002, 10923..TOTAL_SLOTS)])
    }

    /// Add a standalone empty node that knows only itself.
    pub fn add_node(&self, port: u16) {
        let mut state = self.lock();
        state.nodes.push(MockNode::new(port));
    }

    /// Add a replica of `master_port` that every node knows.
    pub fn add_replica(&self, port: u16, master_port: u16) {
        self.add_node(port);
        let master = node_id(master_port);
        self.with_node(port, |n| n.master_id = Some(master));
        self.join_all();
    }

    /// Make every node know every other node.
    pub fn join_all(&self) {
        let mut state = self.lock();
        let ids: BTreeSet<String> = state.nodes.iter().map(|n| n.id.clone()).collect();
        for node in &mut state.nodes {
            node.known = ids.clone();
        }
    }

    pub fn with_node<R>(&self, port: u16, f: impl FnOnce(&mut MockNode) -> R) -> R {
        let mut state = self.lock();
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.addr.port == port)
            .expect("unknown mock node");
        f(node)
    }

    pub fn node(&self, port: u16) -> MockNode {
        self.with_node(port, |n| n.clone())
    }

    pub fn add_keys(&self, port: u16, slot: u16, count: usize) {
        self.with_node(port, |n| {
            let keys = n.keys.entry(slot).or_default();
            let start = keys.len();
            keys.extend((start..start + count).map(|i| format!("key:{}:{}:{}", port, slot, i)));
        });
    }

    pub fn set_migrating(&self, port: u16, slot: u16, to_port: u16) {
        self.with_node(port, |n| n.migrating.insert(slot, node_id(to_port)));
    }

    pub fn set_importing(&self, port: u16, slot: u16, from_port: u16) {
        self.with_node(port, |n| n.importing.insert(slot, node_id(from_port)));
    }

    /// Answer commands on `port` starting with `prefix` with an error.
    pub fn fail_on(&self, port: u16, prefix: &str) {
        self.lock().failures.push((port, prefix.to_string()));
    }

    /// Every command received, as `host:port VERB args...`.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Commands received by `port` that start with `prefix`.
    pub fn commands_to(&self, port: u16, prefix: &str) -> Vec<String> {
        let head = format!("{} ", addr(port));
        self.commands()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&head).map(str::to_string))
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Number of commands anywhere that start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split_once(' ').is_some_and(|(_, cmd)| cmd.starts_with(prefix)))
            .count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock state poisoned")
    }

    fn handle(&self, node: &NodeAddr, cmd: &Command) -> Result<Reply> {
        let mut state = self.lock();
        let text = cmd.to_string();
        state.log.push(format!("{} {}", node, text));

        let Some(idx) = state.index_of(node) else {
            return Err(refused(node));
        };
        if state.nodes[idx].shut_down {
            return Err(refused(node));
        }
        if state
            .failures
            .iter()
            .any(|(port, prefix)| *port == node.port && text.starts_with(prefix.as_str()))
        {
            return Ok(err("ERR injected failure"));
        }

        let args: Vec<String> = cmd
            .as_args()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        let upper: Vec<String> = args.iter().map(|a| a.to_ascii_uppercase()).collect();
        let verbs: Vec<&str> = upper.iter().map(String::as_str).collect();

        let reply = match verbs.as_slice() {
            ["PING"] => Reply::Simple("PONG".to_string()),
            ["DBSIZE"] => Reply::Integer(state.nodes[idx].key_count() as i64),
            ["FLUSHALL"] => {
                state.nodes[idx].keys.clear();
                ok()
            }
            ["CONFIG", "GET", "MAXMEMORY"] => Reply::Array(vec![
                bulk("maxmemory"),
                bulk(state.nodes[idx].maxmemory.to_string()),
            ]),
            ["INFO", "CLUSTER"] => bulk(format!(
                "# Cluster\r\ncluster_enabled:{}\r\n",
                u8::from(state.nodes[idx].cluster_enabled)
            )),
            ["SHUTDOWN"] => {
                state.nodes[idx].shut_down = true;
                return Err(TribError::ConnectionClosed { addr: node.clone() });
            }
            ["CLUSTER", "INFO"] => bulk(format!(
                "cluster_state:ok\r\ncluster_known_nodes:{}\r\ncluster_current_epoch:{}\r\n",
                state.nodes[idx].known.len(),
                state.nodes[idx].epoch
            )),
            ["CLUSTER", "NODES"] => bulk(render_nodes(&state, idx)),
            ["CLUSTER", "RESET", "HARD"] => {
                let n = &mut state.nodes[idx];
                n.slots.clear();
                n.migrating.clear();
                n.importing.clear();
                n.known = BTreeSet::from([n.id.clone()]);
                n.epoch = 0;
                ok()
            }
            ["CLUSTER", "SET-CONFIG-EPOCH", _] => {
                let n = &mut state.nodes[idx];
                if n.epoch != 0 || n.known.len() > 1 {
                    err("ERR The user can assign a config epoch only when the node does not know any other node.")
                } else {
                    n.epoch = args[2].parse().unwrap_or(0);
                    ok()
                }
            }
            ["CLUSTER", "ADDSLOTS", ..] => {
                let slots: Vec<u16> = args[2..].iter().map(|s| s.parse().unwrap()).collect();
                let n = &mut state.nodes[idx];
                if let Some(busy) = slots.iter().find(|s| n.slots.contains(s)) {
                    err(format!("ERR Slot {} is already busy", busy))
                } else {
                    n.slots.extend(slots);
                    ok()
                }
            }
            ["CLUSTER", "DELSLOTS", ..] => {
                let n = &mut state.nodes[idx];
                for slot in &args[2..] {
                    n.slots.remove(&slot.parse().unwrap());
                }
                ok()
            }
            ["CLUSTER", "MEET", _, _] => {
                let peer = NodeAddr::new(args[2].clone(), args[3].parse().unwrap());
                match state.index_of(&peer) {
                    Some(peer_idx) => {
                        let group: BTreeSet<String> = state.nodes[idx]
                            .known
                            .union(&state.nodes[peer_idx].known)
                            .cloned()
                            .collect();
                        for n in state.nodes.iter_mut().filter(|n| group.contains(&n.id)) {
                            n.known = group.clone();
                        }
                        ok()
                    }
                    None => err("ERR Invalid node address specified"),
                }
            }
            ["CLUSTER", "FORGET", _] => {
                let n = &mut state.nodes[idx];
                if args[2] == n.id {
                    err("ERR I tried hard but I can't forget myself...")
                } else if n.known.remove(&args[2]) {
                    ok()
                } else {
                    err(format!("ERR Unknown node {}", args[2]))
                }
            }
            ["CLUSTER", "SETSLOT", _, state_verb, rest @ ..] => {
                let slot: u16 = args[2].parse().unwrap();
                let target = rest.first().map(|_| args[4].clone());
                let n = &mut state.nodes[idx];
                match (*state_verb, target) {
                    ("IMPORTING", Some(src)) => {
                        if n.slots.contains(&slot) {
                            err(format!("ERR I'm already the owner of hash slot {}", slot))
                        } else {
                            n.importing.insert(slot, src);
                            ok()
                        }
                    }
                    ("MIGRATING", Some(dst)) => {
                        if n.slots.contains(&slot) {
                            n.migrating.insert(slot, dst);
                            ok()
                        } else {
                            err(format!("ERR I'm not the owner of hash slot {}", slot))
                        }
                    }
                    ("NODE", Some(owner)) => {
                        if owner == n.id {
                            n.slots.insert(slot);
                            n.importing.remove(&slot);
                        } else {
                            n.slots.remove(&slot);
                            n.migrating.remove(&slot);
                        }
                        ok()
                    }
                    ("STABLE", None) => {
                        n.migrating.remove(&slot);
                        n.importing.remove(&slot);
                        ok()
                    }
                    _ => err("ERR Invalid CLUSTER SETSLOT action or number of arguments"),
                }
            }
            ["CLUSTER", "BUMPEPOCH"] => {
                let n = &mut state.nodes[idx];
                n.epoch += 1;
                Reply::Simple(format!("BUMPED {}", n.epoch))
            }
            ["CLUSTER", "COUNTKEYSINSLOT", _] => {
                let slot: u16 = args[2].parse().unwrap();
                Reply::Integer(state.nodes[idx].keys_in(slot) as i64)
            }
            ["CLUSTER", "GETKEYSINSLOT", _, _] => {
                let slot: u16 = args[2].parse().unwrap();
                let count: usize = args[3].parse().unwrap();
                let keys = state.nodes[idx].keys.get(&slot).cloned().unwrap_or_default();
                Reply::Array(keys.into_iter().take(count).map(bulk).collect())
            }
            ["MIGRATE", _, _, _, _, _] => {
                let target = NodeAddr::new(args[1].clone(), args[2].parse().unwrap());
                let key = args[3].clone();
                let Some(target_idx) = state.index_of(&target) else {
                    return Ok(err("IOERR error or timeout connecting to the client"));
                };
                let found = state.nodes[idx]
                    .keys
                    .iter()
                    .find_map(|(slot, keys)| keys.contains(&key).then_some(*slot));
                match found {
                    None => Reply::Simple("NOKEY".to_string()),
                    Some(slot) => {
                        let source = &mut state.nodes[idx];
                        if let Some(keys) = source.keys.get_mut(&slot) {
                            keys.retain(|k| *k != key);
                        }
                        if source.expiring.remove(&key) {
                            Reply::Simple("NOKEY".to_string())
                        } else {
                            state.nodes[target_idx]
                                .keys
                                .entry(slot)
                                .or_default()
                                .push(key);
                            ok()
                        }
                    }
                }
            }
            _ => err(format!("ERR unknown command '{}'", args.join(" "))),
        };
        Ok(reply)
    }
}

fn refused(node: &NodeAddr) -> TribError {
    TribError::Connection {
        addr: node.clone(),
        source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
    }
}

fn render_nodes(state: &State, idx: usize) -> String {
    let me = &state.nodes[idx];
    if let Some(text) = &me.nodes_override {
        return text.clone();
    }
    let mut out = String::new();
    for (other_idx, other) in state.nodes.iter().enumerate() {
        if me.known.contains(&other.id) {
            out.push_str(&other.line(other_idx == idx));
            out.push('\n');
        }
    }
    out
}

impl Commander for MockCluster {
    async fn execute(&self, node: &NodeAddr, cmd: &Command) -> Result<Reply> {
        self.handle(node, cmd)
    }
}
