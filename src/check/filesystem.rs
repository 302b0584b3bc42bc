//! 文件系统检查：dbStats 的 fsTotalSize/fsUsedSize 配合对数动态阈值
//! 来源：dbStats

use mongodb::bson::{doc, Document};

use crate::check::metrics::num_at;
use crate::check::output::{PluginOutput, Verdict};
use crate::check::threshold::{scaled_fs_threshold, Thresholds};
use crate::check::topology::{self, Topology};
use crate::client::{probe_all, Endpoint, NodeClient};
use crate::utils::{bytes_to_gb, ProbeError};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

const DEFAULT_FS_WARNING_PCT: f64 = 85.0;
const DEFAULT_FS_CRITICAL_PCT: f64 = 95.0;

/// Base percentages before volume-size scaling, taken from the
/// `fs_usage_pct` threshold entry when the caller supplied one.
struct FsPolicy {
    warning: f64,
    critical: f64,
}

impl FsPolicy {
    fn from_thresholds(thresholds: &Thresholds) -> FsPolicy {
        match thresholds.get("fs_usage_pct") {
            Some(spec) => FsPolicy {
                warning: spec.warning.unwrap_or(DEFAULT_FS_WARNING_PCT),
                critical: spec.critical.unwrap_or(DEFAULT_FS_CRITICAL_PCT),
            },
            None => FsPolicy {
                warning: DEFAULT_FS_WARNING_PCT,
                critical: DEFAULT_FS_CRITICAL_PCT,
            },
        }
    }
}

pub fn run(client: &NodeClient, thresholds: &Thresholds, out: &mut PluginOutput) {
    let endpoints = client.endpoints();
    if endpoints.is_empty() {
        out.add_message(Verdict::Unknown, "No hosts found in connection URI");
        return;
    }

    // Disk usage only means something on nodes that hold data, so resolve
    // the topology first and aim at data-bearing members.
    let targets = match topology::detect(client) {
        Ok(topo) => {
            out.add_verbose(format!("[INFO] detected topology: {}", topo.label()));
            let data_bearing = data_bearing_endpoints(&topo);
            if data_bearing.is_empty() {
                endpoints
            } else {
                data_bearing
            }
        }
        Err(e) => {
            out.add_verbose(format!(
                "[WARN] topology detection failed ({}), probing configured hosts",
                e
            ));
            endpoints
        }
    };

    let policy = FsPolicy::from_thresholds(thresholds);
    let results = probe_all(&targets, |ep| client.admin_command(ep, doc! { "dbStats": 1 }));

    let mut all_ok = true;
    for (ep, result) in targets.iter().zip(results) {
        match result {
            Ok(stats) => check_node_fs(out, &policy, ep, &stats),
            Err(e @ ProbeError::Connection(_)) => {
                all_ok = false;
                out.add_message(Verdict::Critical, format!("Node {} unreachable: {}", ep, e));
            }
            Err(e) => {
                all_ok = false;
                out.add_message(
                    Verdict::Critical,
                    format!("Node {} error checking filesystem: {}", ep, e),
                );
            }
        }
    }

    if all_ok && !out.has_messages() {
        out.add_message(Verdict::Ok, "Filesystem usage within thresholds on all nodes");
    }
}

fn data_bearing_endpoints(topology: &Topology) -> Vec<Endpoint> {
    match topology {
        // Empty list falls back to the configured endpoints
        Topology::Standalone => Vec::new(),
        Topology::ReplicaSet(set) => set.hosts.clone(),
        Topology::Sharded(cluster) => {
            let mut targets = Vec::new();
            for shard in &cluster.shards {
                targets.extend(shard.set.hosts.iter().cloned());
            }
            if let Some(config) = &cluster.config {
                targets.extend(config.hosts.iter().cloned());
            }
            targets
        }
    }
}

fn check_node_fs(out: &mut PluginOutput, policy: &FsPolicy, ep: &Endpoint, stats: &Document) {
    let node = ep.to_string();
    let prefix = ep.metric_prefix();

    // mongos and some storage engines answer dbStats without filesystem sizes
    if !stats.contains_key("fsTotalSize") || !stats.contains_key("fsUsedSize") {
        out.add_message(
            Verdict::Unknown,
            format!(
                "Node {}: fsTotalSize/fsUsedSize not available (not supported on this deployment type)",
                node
            ),
        );
        return;
    }

    let fs_total = num_at(stats, &["fsTotalSize"]);
    let fs_used = num_at(stats, &["fsUsedSize"]);
    if fs_total == 0.0 {
        out.add_message(
            Verdict::Unknown,
            format!("Node {}: fsTotalSize is 0, cannot calculate usage", node),
        );
        return;
    }

    let usage_pct = fs_used / fs_total * 100.0;
    let free_gb = (fs_total - fs_used) / GIB;
    let total_gb = fs_total / GIB;
    let warn = scaled_fs_threshold(policy.warning, total_gb);
    let crit = scaled_fs_threshold(policy.critical, total_gb);

    out.add_perfdata_bounds(
        &format!("{}_fs_used_pct", prefix),
        format!("{:.1}", usage_pct),
        "%",
        &format!("{:.1}", warn),
        &format!("{:.1}", crit),
        "0",
        "100",
    );
    out.add_perfdata(&format!("{}_fs_total", prefix), bytes_to_gb(fs_total), "GB");
    out.add_perfdata(&format!("{}_fs_used", prefix), bytes_to_gb(fs_used), "GB");
    out.add_perfdata(
        &format!("{}_fs_free", prefix),
        bytes_to_gb(fs_total - fs_used),
        "GB",
    );

    if usage_pct >= crit {
        out.add_message(
            Verdict::Critical,
            format!(
                "Node {}: filesystem {:.1}% used ({:.1}GB free of {:.1}GB, dynamic critical threshold: {:.1}%)",
                node, usage_pct, free_gb, total_gb, crit
            ),
        );
    } else if usage_pct >= warn {
        out.add_message(
            Verdict::Warning,
            format!(
                "Node {}: filesystem {:.1}% used ({:.1}GB free of {:.1}GB, dynamic warning threshold: {:.1}%)",
                node, usage_pct, free_gb, total_gb, warn
            ),
        );
    } else {
        out.add_verbose(format!(
            "[OK] {}: filesystem {:.1}% used ({:.1}GB free of {:.1}GB)",
            node, usage_pct, free_gb, total_gb
        ));
    }
}
