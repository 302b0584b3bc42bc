//! 拓扑识别：hello/isMaster 分类，分片集群枚举
//! 来源：hello / listShards / getShardMap

use mongodb::bson::{doc, Document};

use crate::client::{Endpoint, NodeClient};
use crate::utils::{ProbeError, Result};

// ── 数据结构 ────────────────────────────────────────────────────────────────

/// What a node claims to be in its identity response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Standalone,
    ReplicaMember,
    Router,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Standalone => "standalone",
            NodeKind::ReplicaMember => "replica set member",
            NodeKind::Router => "mongos router",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicaSet {
    /// Announced set name. Absent for legacy standalone shard entries.
    pub name: Option<String>,
    /// Data-bearing members.
    pub hosts: Vec<Endpoint>,
    pub arbiters: Vec<Endpoint>,
}

impl ReplicaSet {
    pub fn members(&self) -> Vec<Endpoint> {
        let mut all = self.hosts.clone();
        all.extend(self.arbiters.iter().cloned());
        all
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }
}

#[derive(Debug, Clone)]
pub struct Shard {
    pub id: String,
    pub set: ReplicaSet,
}

#[derive(Debug, Clone)]
pub struct ShardedCluster {
    /// The mongos routers, taken from the connection string.
    pub routers: Vec<Endpoint>,
    pub shards: Vec<Shard>,
    /// Config server replica set, when getShardMap revealed it.
    pub config: Option<ReplicaSet>,
}

#[derive(Debug, Clone)]
pub enum Topology {
    Standalone,
    ReplicaSet(ReplicaSet),
    Sharded(ShardedCluster),
}

impl Topology {
    pub fn label(&self) -> &'static str {
        match self {
            Topology::Standalone => "Standalone",
            Topology::ReplicaSet(_) => "ReplicaSet",
            Topology::Sharded(_) => "Sharded",
        }
    }
}

// ── 识别 ────────────────────────────────────────────────────────────────────

/// Identity of one node. Falls back to isMaster for servers that predate
/// the hello command.
pub fn identity(client: &NodeClient, endpoint: &Endpoint) -> Result<Document> {
    match client.admin_command(endpoint, doc! { "hello": 1 }) {
        Err(ProbeError::Command { .. }) => client.admin_command(endpoint, doc! { "isMaster": 1 }),
        other => other,
    }
}

pub fn classify(hello: &Document) -> NodeKind {
    if hello.get_str("msg") == Ok("isdbgrid") {
        return NodeKind::Router;
    }
    if !hello.get_str("setName").unwrap_or("").is_empty() {
        return NodeKind::ReplicaMember;
    }
    NodeKind::Standalone
}

/// Set membership as announced by a member's hello response.
pub fn replica_set_from_hello(hello: &Document) -> ReplicaSet {
    let mut hosts = endpoints_field(hello, "hosts");
    hosts.extend(endpoints_field(hello, "passives"));
    ReplicaSet {
        name: hello.get_str("setName").ok().map(String::from),
        hosts,
        arbiters: endpoints_field(hello, "arbiters"),
    }
}

/// The first node that answers an identity command decides the topology.
pub fn detect(client: &NodeClient) -> Result<Topology> {
    let endpoints = client.endpoints();
    let mut last_error = ProbeError::Config("no endpoints in connection string".to_string());
    for endpoint in &endpoints {
        let hello = match identity(client, endpoint) {
            Ok(doc) => doc,
            Err(e) => {
                last_error = e;
                continue;
            }
        };
        return match classify(&hello) {
            NodeKind::Router => enumerate_sharded(client, endpoint, &endpoints),
            NodeKind::ReplicaMember => {
                let mut set = replica_set_from_hello(&hello);
                if set.hosts.is_empty() && set.arbiters.is_empty() {
                    // A removed member answers without a membership list
                    set.hosts.push(endpoint.clone());
                }
                Ok(Topology::ReplicaSet(set))
            }
            NodeKind::Standalone => Ok(Topology::Standalone),
        };
    }
    Err(last_error)
}

// ── 分片枚举 ────────────────────────────────────────────────────────────────

fn enumerate_sharded(
    client: &NodeClient,
    router: &Endpoint,
    configured: &[Endpoint],
) -> Result<Topology> {
    let listing = client.admin_command(router, doc! { "listShards": 1 })?;
    let mut shards = Vec::new();
    if let Ok(entries) = listing.get_array("shards") {
        for entry in entries {
            if let Some(entry) = entry.as_document() {
                shards.push(Shard {
                    id: entry.get_str("_id").unwrap_or("").to_string(),
                    set: parse_seed_list(entry.get_str("host").unwrap_or("")),
                });
            }
        }
    }

    // 配置服务器副本集藏在 getShardMap 的 map.config 里
    let config = match client.admin_command(router, doc! { "getShardMap": 1 }) {
        Ok(map_doc) => map_doc
            .get_document("map")
            .ok()
            .and_then(|m| m.get_str("config").ok())
            .map(parse_seed_list),
        Err(e) => {
            eprintln!("warn: getShardMap via {} failed: {}", router, e);
            None
        }
    };

    Ok(Topology::Sharded(ShardedCluster {
        routers: configured.to_vec(),
        shards,
        config,
    }))
}

/// "rs0/h1:27017,h2:27017" or a bare "h1:27017,h2:27017" host list.
pub fn parse_seed_list(s: &str) -> ReplicaSet {
    let (name, hosts) = match s.split_once('/') {
        Some((name, rest)) => (Some(name.to_string()), rest),
        None => (None, s),
    };
    ReplicaSet {
        name,
        hosts: hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(Endpoint::parse)
            .collect(),
        arbiters: Vec::new(),
    }
}

fn endpoints_field(doc: &Document, key: &str) -> Vec<Endpoint> {
    match doc.get_array(key) {
        Ok(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(Endpoint::parse)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_mongos_by_msg_marker() {
        let hello = doc! { "ismaster": true, "msg": "isdbgrid", "ok": 1.0 };
        assert_eq!(classify(&hello), NodeKind::Router);
    }

    #[test]
    fn classify_replica_member_by_set_name() {
        let hello = doc! {
            "ismaster": true,
            "setName": "rs0",
            "hosts": ["db1:27017", "db2:27017"],
            "ok": 1.0,
        };
        assert_eq!(classify(&hello), NodeKind::ReplicaMember);
    }

    #[test]
    fn classify_standalone_without_markers() {
        let hello = doc! { "ismaster": true, "ok": 1.0 };
        assert_eq!(classify(&hello), NodeKind::Standalone);
        let empty_set = doc! { "ismaster": true, "setName": "", "ok": 1.0 };
        assert_eq!(classify(&empty_set), NodeKind::Standalone);
    }

    #[test]
    fn hello_membership_merges_passives_and_keeps_arbiters_apart() {
        let hello = doc! {
            "setName": "rs0",
            "hosts": ["db1:27017", "db2:27017"],
            "passives": ["db3:27017"],
            "arbiters": ["arb1:27017"],
        };
        let set = replica_set_from_hello(&hello);
        assert_eq!(set.name.as_deref(), Some("rs0"));
        assert_eq!(
            set.hosts,
            vec![
                Endpoint::new("db1", 27017),
                Endpoint::new("db2", 27017),
                Endpoint::new("db3", 27017),
            ]
        );
        assert_eq!(set.arbiters, vec![Endpoint::new("arb1", 27017)]);
        assert_eq!(set.members().len(), 4);
    }

    #[test]
    fn seed_list_with_set_name() {
        let set = parse_seed_list("rs-shard-01/sh1:27018,sh2:27018");
        assert_eq!(set.name.as_deref(), Some("rs-shard-01"));
        assert_eq!(
            set.hosts,
            vec![Endpoint::new("sh1", 27018), Endpoint::new("sh2", 27018)]
        );
    }

    #[test]
    fn seed_list_without_set_name() {
        let set = parse_seed_list("sh1:27018");
        assert_eq!(set.name, None);
        assert_eq!(set.hosts, vec![Endpoint::new("sh1", 27018)]);
    }
}
