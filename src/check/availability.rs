//! 可用性检查：direct 探测与集群自身视角的一致性推理
//! 来源：ping / hello / replSetGetStatus

use mongodb::bson::{doc, Bson, Document};

use crate::check::output::{PluginOutput, Verdict};
use crate::check::topology::{self, NodeKind, ReplicaSet, ShardedCluster, Topology};
use crate::client::{probe_all, Endpoint, NodeClient};
use crate::utils::{sanitize_metric_name, Result};

// ── 成员状态 ────────────────────────────────────────────────────────────────

/// replSetGetStatus member state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
    Other(i32),
}

impl MemberState {
    pub fn from_code(code: i32) -> MemberState {
        match code {
            0 => MemberState::Startup,
            1 => MemberState::Primary,
            2 => MemberState::Secondary,
            3 => MemberState::Recovering,
            5 => MemberState::Startup2,
            6 => MemberState::Unknown,
            7 => MemberState::Arbiter,
            8 => MemberState::Down,
            9 => MemberState::Rollback,
            10 => MemberState::Removed,
            other => MemberState::Other(other),
        }
    }

    /// States that count toward quorum when the member is healthy.
    /// Arbiters vote, so a PSA set with a dead primary can still elect.
    pub fn is_voting_healthy(self) -> bool {
        matches!(
            self,
            MemberState::Primary | MemberState::Secondary | MemberState::Arbiter
        )
    }

    pub fn is_arbiter(self) -> bool {
        self == MemberState::Arbiter
    }

    pub fn is_data_bearing_healthy(self) -> bool {
        matches!(self, MemberState::Primary | MemberState::Secondary)
    }
}

/// One member as reported by replSetGetStatus (the indirect view).
#[derive(Debug, Clone)]
pub struct MemberView {
    pub endpoint: Endpoint,
    pub state: MemberState,
    pub state_label: String,
    pub healthy: bool,
}

pub fn member_views(rs_status: &Document) -> Vec<MemberView> {
    let mut views = Vec::new();
    if let Ok(members) = rs_status.get_array("members") {
        for member in members.iter().filter_map(Bson::as_document) {
            views.push(MemberView {
                endpoint: Endpoint::parse(member.get_str("name").unwrap_or("")),
                state: MemberState::from_code(num_field(member, "state") as i32),
                state_label: member.get_str("stateStr").unwrap_or("UNKNOWN").to_string(),
                healthy: num_field(member, "health") == 1.0,
            });
        }
    }
    views
}

// health 字段是 double，state 偶尔是 long
fn num_field(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::Double(v)) => *v,
        _ => -1.0,
    }
}

// ── 一致性推理 ──────────────────────────────────────────────────────────────

/// Outcome of comparing the direct probe of one member against the
/// cluster's own view of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAssessment {
    Healthy,
    /// Unreachable arbiter that the set itself considers healthy.
    ArbiterSegregated,
    /// Reachable, but the set reports an anomalous state.
    AnomalousState,
    /// Reachable, but missing from the set's member list.
    NotInSet,
    /// Unreachable while the set reports a healthy data node.
    NetworkSplit,
    /// Unreachable and the set agrees it is gone.
    Down,
    /// Unreachable and unknown to the set.
    Unrecognized,
}

impl MemberAssessment {
    pub fn verdict(self) -> Verdict {
        match self {
            MemberAssessment::Healthy | MemberAssessment::ArbiterSegregated => Verdict::Ok,
            _ => Verdict::Critical,
        }
    }

    pub fn is_healthy(self) -> bool {
        self.verdict() == Verdict::Ok
    }
}

/// Reconcile both perspectives on one member. An unreachable arbiter is
/// fine as long as the set reports it healthy; monitoring often cannot
/// reach the segregated network arbiters sit on.
pub fn reconcile(direct_ok: bool, view: Option<&MemberView>) -> MemberAssessment {
    match (direct_ok, view) {
        (true, Some(v)) if v.healthy && v.state.is_voting_healthy() => MemberAssessment::Healthy,
        (true, Some(_)) => MemberAssessment::AnomalousState,
        (true, None) => MemberAssessment::NotInSet,
        (false, Some(v)) if v.healthy && v.state.is_arbiter() => MemberAssessment::ArbiterSegregated,
        (false, Some(v)) if v.healthy && v.state.is_data_bearing_healthy() => {
            MemberAssessment::NetworkSplit
        }
        (false, Some(_)) => MemberAssessment::Down,
        (false, None) => MemberAssessment::Unrecognized,
    }
}

// ── Quorum ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct QuorumStatus {
    pub voters: usize,
    pub healthy: usize,
    pub majority: usize,
}

impl QuorumStatus {
    pub fn ok(&self) -> bool {
        self.healthy >= self.majority
    }
}

/// Election arithmetic over the set's own member list.
pub fn quorum_status(views: &[MemberView]) -> QuorumStatus {
    let voters = views.len();
    let healthy = views
        .iter()
        .filter(|v| v.healthy && v.state.is_voting_healthy())
        .count();
    QuorumStatus {
        voters,
        healthy,
        majority: voters / 2 + 1,
    }
}

// ── 检查入口 ────────────────────────────────────────────────────────────────

pub fn run(client: &NodeClient, expected_set_name: Option<&str>, out: &mut PluginOutput) {
    let topo = match topology::detect(client) {
        Ok(topo) => topo,
        Err(e) => {
            out.add_message(Verdict::Critical, format!("Cannot connect to MongoDB: {}", e));
            return;
        }
    };
    out.add_verbose(format!("[INFO] detected topology: {}", topo.label()));

    match topo {
        Topology::Standalone => check_standalone(client, out),
        Topology::ReplicaSet(set) => {
            let expected = expected_set_name.or(client.uri_set_name());
            check_replica_set(client, out, &set, expected, &SetScope::Plain);
        }
        Topology::Sharded(cluster) => check_sharded(client, out, &cluster),
    }
}

fn check_standalone(client: &NodeClient, out: &mut PluginOutput) {
    let endpoints = client.endpoints();
    let results = probe_all(&endpoints, |ep| client.admin_command(ep, doc! { "ping": 1 }));
    for (ep, result) in endpoints.iter().zip(&results) {
        match result {
            Ok(_) => out.add_message(Verdict::Ok, format!("Standalone node {} is reachable", ep)),
            Err(e) => out.add_message(
                Verdict::Critical,
                format!("Standalone node {} unreachable: {}", ep, e),
            ),
        }
    }
}

// ── 副本集 ──────────────────────────────────────────────────────────────────

/// Which replica set of the deployment is being checked. Decides message
/// prefixes and perfdata labels.
enum SetScope<'a> {
    Plain,
    Shard { id: &'a str },
    Config,
}

impl SetScope<'_> {
    fn describe(&self, set_label: &str) -> String {
        match self {
            SetScope::Plain => format!("RS '{}'", set_label),
            SetScope::Shard { id } => format!("Shard '{}'", id),
            SetScope::Config => "Config RS".to_string(),
        }
    }

    fn member_prefix(&self, ep: &Endpoint) -> String {
        match self {
            SetScope::Plain => format!("Node {}", ep),
            SetScope::Shard { id } => format!("Shard '{}' member {}", id, ep),
            SetScope::Config => format!("Config member {}", ep),
        }
    }

    fn gauge_label(&self, set_label: &str, ep: &Endpoint) -> String {
        let member = ep.metric_prefix();
        match self {
            SetScope::Plain => {
                format!("rs_{}_{}_state", sanitize_metric_name(set_label), member)
            }
            SetScope::Shard { id } => format!("shard_{}_{}_state", sanitize_metric_name(id), member),
            SetScope::Config => format!("config_{}_state", member),
        }
    }

    fn summary_labels(&self, set_label: &str) -> (String, String, String) {
        match self {
            SetScope::Plain => {
                let set = sanitize_metric_name(set_label);
                (
                    format!("rs_{}_nodes_ok", set),
                    format!("rs_{}_nodes_down", set),
                    format!("rs_{}_quorum", set),
                )
            }
            SetScope::Shard { id } => {
                let id = sanitize_metric_name(id);
                (
                    format!("shard_{}_ok", id),
                    format!("shard_{}_down", id),
                    format!("shard_{}_quorum", id),
                )
            }
            SetScope::Config => (
                "config_rs_ok".to_string(),
                "config_rs_down".to_string(),
                "config_rs_quorum".to_string(),
            ),
        }
    }
}

fn member_gauge(
    out: &mut PluginOutput,
    scope: &SetScope<'_>,
    set_label: &str,
    ep: &Endpoint,
    up: bool,
) {
    let label = scope.gauge_label(set_label, ep);
    out.add_perfdata_bounds(&label, if up { 1 } else { 0 }, "", "", "", "0", "1");
}

/// Full availability assessment of one replica set: direct probes of
/// every member, the set's own status, per-member reconciliation and
/// quorum arithmetic. Used identically for plain replica sets, shard
/// member sets and the config server set.
fn check_replica_set(
    client: &NodeClient,
    out: &mut PluginOutput,
    set: &ReplicaSet,
    expected_name: Option<&str>,
    scope: &SetScope<'_>,
) {
    let enumerated = scope.describe(set.display_name());
    let members = set.members();
    if members.is_empty() {
        out.add_message(Verdict::Critical, format!("{}: no members found", enumerated));
        return;
    }

    // Direct identity probes, fanned out
    let probes: Vec<Result<Document>> = probe_all(&members, |ep| topology::identity(client, ep));

    // Authoritative status from any member that will hand it over
    let mut rs_status = None;
    let mut status_error = None;
    for (ep, probe) in members.iter().zip(&probes) {
        if probe.is_ok() {
            match client.admin_command(ep, doc! { "replSetGetStatus": 1 }) {
                Ok(doc) => {
                    rs_status = Some(doc);
                    break;
                }
                Err(e) => status_error = Some(e),
            }
        }
    }
    let rs_status = match rs_status {
        Some(doc) => doc,
        None => {
            match status_error {
                Some(e) => out.add_message(
                    Verdict::Critical,
                    format!("{}: cannot get replSetGetStatus: {}", enumerated, e),
                ),
                None => out.add_message(
                    Verdict::Critical,
                    format!("{}: no members reachable", enumerated),
                ),
            }
            return;
        }
    };

    // Set name validation, explicit expectation wins over the URI
    let actual_name = rs_status.get_str("set").unwrap_or("");
    if let Some(expected) = expected_name {
        if actual_name != expected {
            out.add_message(
                Verdict::Critical,
                format!(
                    "{}: replica set name mismatch: expected '{}', got '{}'. \
                     Connected to the wrong replica set?",
                    enumerated, expected, actual_name
                ),
            );
            return;
        }
    }
    let described = scope.describe(actual_name);

    let views = member_views(&rs_status);

    // Members the set reports that enumeration did not reveal get probed too
    let extra: Vec<Endpoint> = views
        .iter()
        .map(|v| &v.endpoint)
        .filter(|ep| !members.contains(ep))
        .cloned()
        .collect();
    for ep in &extra {
        out.add_verbose(format!(
            "[INFO] member {} only known via replSetGetStatus",
            ep
        ));
    }
    let extra_probes: Vec<Result<Document>> =
        probe_all(&extra, |ep| topology::identity(client, ep));

    let all_members: Vec<Endpoint> = members.iter().chain(extra.iter()).cloned().collect();
    let all_probes: Vec<Result<Document>> = probes.into_iter().chain(extra_probes).collect();

    // Per-member reconciliation
    let total = all_members.len();
    let mut nodes_ok = 0;
    let mut nodes_down = 0;
    let mut segregated: Vec<String> = Vec::new();

    for (ep, probe) in all_members.iter().zip(&all_probes) {
        let prefix = scope.member_prefix(ep);

        // A reachable node must also identify as a member of this set
        let mismatch = probe.as_ref().ok().and_then(|hello| {
            let kind = topology::classify(hello);
            if kind != NodeKind::ReplicaMember {
                return Some(format!(
                    "{}: answers as {} instead of a replica set member",
                    prefix,
                    kind.label()
                ));
            }
            let announced = hello.get_str("setName").unwrap_or("");
            if !actual_name.is_empty() && announced != actual_name {
                return Some(format!(
                    "{}: belongs to set '{}' instead of '{}'",
                    prefix, announced, actual_name
                ));
            }
            None
        });
        if let Some(message) = mismatch {
            out.add_message(Verdict::Critical, message);
            nodes_down += 1;
            member_gauge(out, scope, actual_name, ep, false);
            continue;
        }

        let view = views.iter().find(|v| &v.endpoint == ep);
        let direct_error = probe
            .as_ref()
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        let state_label = view.map(|v| v.state_label.as_str()).unwrap_or("UNKNOWN");

        let assessment = reconcile(probe.is_ok(), view);
        member_gauge(out, scope, actual_name, ep, assessment.is_healthy());
        if assessment.is_healthy() {
            nodes_ok += 1;
        } else {
            nodes_down += 1;
        }

        match assessment {
            MemberAssessment::Healthy => {
                out.add_verbose(format!(
                    "[OK] {}: direct=OK, set reports {}",
                    ep, state_label
                ));
            }
            MemberAssessment::ArbiterSegregated => {
                segregated.push(ep.to_string());
            }
            MemberAssessment::AnomalousState => {
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "{}: reachable directly but set reports state '{}', \
                         possible split-brain or recovery",
                        prefix, state_label
                    ),
                );
            }
            MemberAssessment::NotInSet => {
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "{}: reachable but not present in replSetGetStatus, \
                         wrong node or stale configuration",
                        prefix
                    ),
                );
            }
            MemberAssessment::NetworkSplit => {
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "{}: set reports '{}' but the node is unreachable from \
                         monitoring, network issue detected",
                        prefix, state_label
                    ),
                );
            }
            MemberAssessment::Down => {
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "{}: down (set reports '{}', direct connection failed: {})",
                        prefix, state_label, direct_error
                    ),
                );
            }
            MemberAssessment::Unrecognized => {
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "{}: unreachable and not in replica set status ({})",
                        prefix, direct_error
                    ),
                );
            }
        }
    }

    // Summary
    if nodes_down > 0 {
        out.add_message(
            Verdict::Critical,
            format!("{}: {}/{} member(s) down", described, nodes_down, total),
        );
    } else {
        out.add_message(
            Verdict::Ok,
            format!("{}: all {} members healthy", described, total),
        );
    }
    if !segregated.is_empty() {
        out.add_long_output(format!(
            "[INFO] Arbiter(s) not directly reachable but set reports healthy: {}",
            segregated.join(", ")
        ));
    }

    // Quorum
    let quorum = quorum_status(&views);
    if !quorum.ok() {
        out.add_message(
            Verdict::Critical,
            format!(
                "{}: quorum LOST, only {}/{} voting members healthy (need {})",
                described, quorum.healthy, quorum.voters, quorum.majority
            ),
        );
    } else {
        out.add_verbose(format!(
            "[OK] {}: quorum held by {}/{} voting members (majority={})",
            described, quorum.healthy, quorum.voters, quorum.majority
        ));
    }

    // Perfdata
    let (ok_label, down_label, quorum_label) = scope.summary_labels(actual_name);
    let total_str = total.to_string();
    out.add_perfdata_bounds(&ok_label, nodes_ok, "", "", "", "0", &total_str);
    out.add_perfdata_bounds(&down_label, nodes_down, "", "", "", "0", &total_str);
    out.add_perfdata_bounds(
        &quorum_label,
        if quorum.ok() { 1 } else { 0 },
        "",
        "",
        "",
        "0",
        "1",
    );
}

// ── 分片集群 ────────────────────────────────────────────────────────────────

fn check_sharded(client: &NodeClient, out: &mut PluginOutput, cluster: &ShardedCluster) {
    // Routers from the connection string
    let routers = &cluster.routers;
    let results: Vec<Result<Document>> =
        probe_all(routers, |ep| topology::identity(client, ep));
    let mut mongos_ok = 0;
    let mut mongos_down = 0;
    for (ep, result) in routers.iter().zip(&results) {
        let label = format!("mongos_{}_state", ep.metric_prefix());
        match result {
            Ok(hello) if topology::classify(hello) == NodeKind::Router => {
                mongos_ok += 1;
                out.add_perfdata_bounds(&label, 1, "", "", "", "0", "1");
            }
            Ok(hello) => {
                mongos_down += 1;
                out.add_message(
                    Verdict::Critical,
                    format!(
                        "Node {}: expected mongos but node answers as {}",
                        ep,
                        topology::classify(hello).label()
                    ),
                );
                out.add_perfdata_bounds(&label, 0, "", "", "", "0", "1");
            }
            Err(e) => {
                mongos_down += 1;
                out.add_message(Verdict::Critical, format!("mongos {} unreachable: {}", ep, e));
                out.add_perfdata_bounds(&label, 0, "", "", "", "0", "1");
            }
        }
    }
    let mongos_total = (mongos_ok + mongos_down).to_string();
    if mongos_down == 0 {
        out.add_message(
            Verdict::Ok,
            format!("All {} mongos nodes reachable", mongos_ok),
        );
    } else {
        // A dead router degrades the service but the shards keep running,
        // so evaluation continues.
        out.add_message(
            Verdict::Critical,
            format!(
                "{}/{} mongos node(s) unreachable",
                mongos_down,
                mongos_ok + mongos_down
            ),
        );
    }
    out.add_perfdata_bounds("mongos_ok", mongos_ok, "", "", "", "0", &mongos_total);
    out.add_perfdata_bounds("mongos_down", mongos_down, "", "", "", "0", &mongos_total);

    // Every shard is a replica set and gets the full assessment
    if cluster.shards.is_empty() {
        out.add_message(
            Verdict::Critical,
            "Sharded cluster has no shards configured",
        );
    }
    for shard in &cluster.shards {
        check_replica_set(
            client,
            out,
            &shard.set,
            shard.set.name.as_deref(),
            &SetScope::Shard { id: &shard.id },
        );
    }

    // So does the config server set
    match &cluster.config {
        Some(config) => check_replica_set(
            client,
            out,
            config,
            config.name.as_deref(),
            &SetScope::Config,
        ),
        None => out.add_message(
            Verdict::Unknown,
            "Config server replica set could not be determined",
        ),
    }
}
