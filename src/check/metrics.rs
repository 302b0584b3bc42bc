//! 指标采集：serverStatus 为主，补充 oplog / dbStats
//! 来源：serverStatus / replSetGetStatus / collStats / dbStats

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, Document, Timestamp};

use crate::check::output::{PluginOutput, Verdict};
use crate::check::threshold::Thresholds;
use crate::client::{probe_all, Endpoint, NodeClient};
use crate::utils::{bytes_to_gb, ProbeError, Result};

// ── 采集 ────────────────────────────────────────────────────────────────────

/// Everything gathered from one node before any evaluation happens.
/// Sections the account may not read end up in `denied` instead.
pub struct MetricsSnapshot {
    pub server_status: Document,
    pub repl_status: Option<Document>,
    pub oplog_range: Option<(Timestamp, Timestamp)>,
    pub oplog_stats: Option<Document>,
    pub db_totals: Option<DbTotals>,
    pub admin_stats: Option<Document>,
    pub denied: Vec<DeniedSection>,
    pub soft_warnings: Vec<String>,
}

#[derive(Default)]
pub struct DbTotals {
    pub data_size: f64,
    pub storage_size: f64,
    pub index_size: f64,
    pub collections: f64,
    pub objects: f64,
}

/// Metric keys lost to a missing privilege, with the server's error.
pub struct DeniedSection {
    pub keys: &'static [&'static str],
    pub error: String,
}

fn collect_node(client: &NodeClient, ep: &Endpoint) -> Result<MetricsSnapshot> {
    // Without serverStatus there is nothing to report for this node
    let server_status = client.admin_command(ep, doc! { "serverStatus": 1 })?;
    let mut snap = MetricsSnapshot {
        server_status,
        repl_status: None,
        oplog_range: None,
        oplog_stats: None,
        db_totals: None,
        admin_stats: None,
        denied: Vec::new(),
        soft_warnings: Vec::new(),
    };

    match client.admin_command(ep, doc! { "replSetGetStatus": 1 }) {
        Ok(doc) => snap.repl_status = Some(doc),
        Err(ProbeError::Unauthorized(e)) => snap.denied.push(DeniedSection {
            keys: &["repl_lag"],
            error: e,
        }),
        // Standalone node or mongos, no replication to report
        Err(_) => {}
    }

    match client.oplog_bounds(ep) {
        Ok(range) => snap.oplog_range = Some(range),
        Err(ProbeError::Unauthorized(e)) => snap.denied.push(DeniedSection {
            keys: &["oplog_window"],
            error: e,
        }),
        Err(_) => {}
    }

    match client.db_command(ep, "local", doc! { "collStats": "oplog.rs" }) {
        Ok(doc) => snap.oplog_stats = Some(doc),
        Err(ProbeError::Unauthorized(e)) => snap.denied.push(DeniedSection {
            keys: &["oplog_max_size", "oplog_used_size"],
            error: e,
        }),
        Err(_) => {}
    }

    match client.list_database_names(ep) {
        Ok(names) => {
            let mut totals = DbTotals::default();
            for name in &names {
                if let Ok(stats) = client.db_command(ep, name, doc! { "dbStats": 1 }) {
                    totals.data_size += num_at(&stats, &["dataSize"]);
                    totals.storage_size += num_at(&stats, &["storageSize"]);
                    totals.index_size += num_at(&stats, &["indexSize"]);
                    totals.collections += num_at(&stats, &["collections"]);
                    totals.objects += num_at(&stats, &["objects"]);
                }
            }
            snap.db_totals = Some(totals);
        }
        Err(ProbeError::Unauthorized(e)) => snap.denied.push(DeniedSection {
            keys: &["total_data_size", "total_storage_size", "total_index_size"],
            error: e,
        }),
        Err(e) => snap
            .soft_warnings
            .push(format!("could not list databases: {}", e)),
    }

    snap.admin_stats = client.admin_command(ep, doc! { "dbStats": 1 }).ok();
    Ok(snap)
}

// ── 检查入口 ────────────────────────────────────────────────────────────────

pub fn run(client: &NodeClient, thresholds: &Thresholds, out: &mut PluginOutput) {
    let endpoints = client.endpoints();
    if endpoints.is_empty() {
        out.add_message(Verdict::Unknown, "No hosts found in connection URI");
        return;
    }

    let snapshots = probe_all(&endpoints, |ep| collect_node(client, ep));
    let mut all_ok = true;
    for (ep, snapshot) in endpoints.iter().zip(snapshots) {
        match snapshot {
            Ok(snap) => emit_node_metrics(out, thresholds, ep, &snap),
            Err(e @ ProbeError::Connection(_)) => {
                all_ok = false;
                out.add_message(Verdict::Critical, format!("Node {} unreachable: {}", ep, e));
            }
            Err(e) => {
                all_ok = false;
                out.add_message(
                    Verdict::Critical,
                    format!("Node {} error collecting metrics: {}", ep, e),
                );
            }
        }
    }

    if all_ok && !out.has_messages() {
        out.add_message(Verdict::Ok, "All nodes metrics collected successfully");
    }
}

// ── 评估与输出 ──────────────────────────────────────────────────────────────

fn emit_node_metrics(
    out: &mut PluginOutput,
    thresholds: &Thresholds,
    ep: &Endpoint,
    snap: &MetricsSnapshot,
) {
    let node = ep.to_string();
    let prefix = ep.metric_prefix();
    let status = &snap.server_status;

    // ── 连接 ──
    let conn_current = num_at(status, &["connections", "current"]);
    let conn_available = num_at(status, &["connections", "available"]);
    let conn_total = conn_current + conn_available;
    let conn_usage_pct = if conn_total > 0.0 {
        conn_current / conn_total * 100.0
    } else {
        0.0
    };
    let conn_max = format!("{}", conn_total);
    out.add_perfdata_bounds(
        &format!("{}_conn_current", prefix),
        conn_current,
        "",
        "",
        "",
        "0",
        &conn_max,
    );
    out.add_perfdata_bounds(
        &format!("{}_conn_available", prefix),
        conn_available,
        "",
        "",
        "",
        "0",
        &conn_max,
    );
    out.add_perfdata(
        &format!("{}_conn_active", prefix),
        num_at(status, &["connections", "active"]),
        "",
    );
    out.add_perfdata(
        &format!("{}_conn_usage_pct", prefix),
        format!("{:.1}", conn_usage_pct),
        "%",
    );
    out.add_perfdata(
        &format!("{}_conn_total_created", prefix),
        num_at(status, &["connections", "totalCreated"]),
        "c",
    );
    thresholds.check(out, &node, "conn_usage_pct", conn_usage_pct, "%");

    // ── opcounters ──
    for op in ["insert", "query", "update", "delete", "getmore", "command"] {
        out.add_perfdata(
            &format!("{}_ops_{}", prefix, op),
            num_at(status, &["opcounters", op]),
            "c",
        );
    }

    // ── 等待队列 ──
    let queue_total = num_at(status, &["globalLock", "currentQueue", "total"]);
    out.add_perfdata(
        &format!("{}_queue_readers", prefix),
        num_at(status, &["globalLock", "currentQueue", "readers"]),
        "",
    );
    out.add_perfdata(
        &format!("{}_queue_writers", prefix),
        num_at(status, &["globalLock", "currentQueue", "writers"]),
        "",
    );
    out.add_perfdata(&format!("{}_queue_total", prefix), queue_total, "");
    thresholds.check(out, &node, "queue_total", queue_total, "");

    // ── WiredTiger 缓存与票据 ──
    if status.get_document("wiredTiger").is_ok() {
        let cache_max = num_at(status, &["wiredTiger", "cache", "maximum bytes configured"]);
        let cache_used = num_at(status, &["wiredTiger", "cache", "bytes currently in the cache"]);
        let cache_dirty = num_at(
            status,
            &["wiredTiger", "cache", "tracked dirty bytes in the cache"],
        );
        let cache_usage_pct = if cache_max > 0.0 {
            cache_used / cache_max * 100.0
        } else {
            0.0
        };
        out.add_perfdata(
            &format!("{}_wt_cache_max", prefix),
            bytes_to_gb(cache_max),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_wt_cache_used", prefix),
            bytes_to_gb(cache_used),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_wt_cache_dirty", prefix),
            bytes_to_gb(cache_dirty),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_wt_cache_pct", prefix),
            format!("{:.1}", cache_usage_pct),
            "%",
        );
        out.add_perfdata(
            &format!("{}_wt_cache_read", prefix),
            bytes_to_gb(num_at(status, &["wiredTiger", "cache", "bytes read into cache"])),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_wt_cache_written", prefix),
            bytes_to_gb(num_at(
                status,
                &["wiredTiger", "cache", "bytes written from cache"],
            )),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_wt_evict_modified", prefix),
            num_at(status, &["wiredTiger", "cache", "modified pages evicted"]),
            "c",
        );
        out.add_perfdata(
            &format!("{}_wt_evict_unmodified", prefix),
            num_at(status, &["wiredTiger", "cache", "unmodified pages evicted"]),
            "c",
        );
        out.add_perfdata(
            &format!("{}_wt_pages_read", prefix),
            num_at(status, &["wiredTiger", "cache", "pages read into cache"]),
            "c",
        );
        out.add_perfdata(
            &format!("{}_wt_pages_written", prefix),
            num_at(status, &["wiredTiger", "cache", "pages written from cache"]),
            "c",
        );
        thresholds.check(out, &node, "cache_usage_pct", cache_usage_pct, "%");

        for rw in ["read", "write"] {
            let available = num_at(status, &["wiredTiger", "concurrentTransactions", rw, "available"]);
            let taken = num_at(status, &["wiredTiger", "concurrentTransactions", rw, "out"]);
            let total = num_at(
                status,
                &["wiredTiger", "concurrentTransactions", rw, "totalTickets"],
            );
            let usage_pct = if total > 0.0 { taken / total * 100.0 } else { 0.0 };
            out.add_perfdata(&format!("{}_tickets_{}_available", prefix, rw), available, "");
            out.add_perfdata(&format!("{}_tickets_{}_out", prefix, rw), taken, "");
            out.add_perfdata(&format!("{}_tickets_{}_total", prefix, rw), total, "");
            out.add_perfdata(
                &format!("{}_tickets_{}_usage_pct", prefix, rw),
                format!("{:.1}", usage_pct),
                "%",
            );
            thresholds.check(out, &node, &format!("tickets_{}_pct", rw), usage_pct, "%");
        }
    }

    // ── 复制延迟 ──
    if let Some(rs_status) = &snap.repl_status {
        if let Some(lag) = replication_lag_secs(rs_status) {
            out.add_perfdata(&format!("{}_repl_lag", prefix), format!("{:.1}", lag), "s");
            thresholds.check(out, &node, "repl_lag", lag, "s");
        }
    }

    // ── oplog 窗口与大小 ──
    if let Some((first, last)) = snap.oplog_range {
        let hours = oplog_window_hours(first, last);
        out.add_perfdata(
            &format!("{}_oplog_window", prefix),
            format!("{:.1}", hours),
            "h",
        );
        thresholds.check(out, &node, "oplog_window", hours, "h");
    }
    if let Some(stats) = &snap.oplog_stats {
        let oplog_max = if stats.contains_key("maxSize") {
            num_at(stats, &["maxSize"])
        } else {
            num_at(stats, &["size"])
        };
        let oplog_used = if stats.contains_key("storageSize") {
            num_at(stats, &["storageSize"])
        } else {
            num_at(stats, &["size"])
        };
        out.add_perfdata(
            &format!("{}_oplog_max_size", prefix),
            bytes_to_gb(oplog_max),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_oplog_used_size", prefix),
            bytes_to_gb(oplog_used),
            "GB",
        );
    }

    // ── 内存与网络 ──
    out.add_perfdata(
        &format!("{}_mem_resident", prefix),
        num_at(status, &["mem", "resident"]),
        "MB",
    );
    out.add_perfdata(
        &format!("{}_mem_virtual", prefix),
        num_at(status, &["mem", "virtual"]),
        "MB",
    );
    out.add_perfdata(
        &format!("{}_net_in", prefix),
        bytes_to_gb(num_at(status, &["network", "bytesIn"])),
        "GB",
    );
    out.add_perfdata(
        &format!("{}_net_out", prefix),
        bytes_to_gb(num_at(status, &["network", "bytesOut"])),
        "GB",
    );
    out.add_perfdata(
        &format!("{}_net_requests", prefix),
        num_at(status, &["network", "numRequests"]),
        "c",
    );

    // ── 文档操作 ──
    for op in ["inserted", "updated", "deleted", "returned"] {
        out.add_perfdata(
            &format!("{}_doc_{}", prefix, op),
            num_at(status, &["metrics", "document", op]),
            "c",
        );
    }

    // ── 游标 ──
    let cursor_open = num_at(status, &["metrics", "cursor", "open", "total"]);
    let cursor_timed_out = num_at(status, &["metrics", "cursor", "timedOut"]);
    out.add_perfdata(&format!("{}_cursor_open", prefix), cursor_open, "");
    out.add_perfdata(
        &format!("{}_cursor_open_no_timeout", prefix),
        num_at(status, &["metrics", "cursor", "open", "noTimeout"]),
        "",
    );
    out.add_perfdata(&format!("{}_cursor_timed_out", prefix), cursor_timed_out, "c");
    thresholds.check(out, &node, "cursor_open", cursor_open, "");
    thresholds.check(out, &node, "cursor_timed_out", cursor_timed_out, "");

    // ── 缺页与活跃客户端 ──
    out.add_perfdata(
        &format!("{}_page_faults", prefix),
        num_at(status, &["extra_info", "page_faults"]),
        "c",
    );
    out.add_perfdata(
        &format!("{}_active_readers", prefix),
        num_at(status, &["globalLock", "activeClients", "readers"]),
        "",
    );
    out.add_perfdata(
        &format!("{}_active_writers", prefix),
        num_at(status, &["globalLock", "activeClients", "writers"]),
        "",
    );

    // ── 断言计数 ──
    for kind in ["regular", "warning", "msg", "user", "rollovers"] {
        out.add_perfdata(
            &format!("{}_asserts_{}", prefix, kind),
            num_at(status, &["asserts", kind]),
            "c",
        );
    }
    thresholds.check(
        out,
        &node,
        "assertions_regular",
        num_at(status, &["asserts", "regular"]),
        "",
    );
    thresholds.check(
        out,
        &node,
        "assertions_warning",
        num_at(status, &["asserts", "warning"]),
        "",
    );

    // ── 事务 ──
    if status.get_document("transactions").is_ok() {
        out.add_perfdata(
            &format!("{}_txn_current_active", prefix),
            num_at(status, &["transactions", "currentActive"]),
            "",
        );
        out.add_perfdata(
            &format!("{}_txn_current_open", prefix),
            num_at(status, &["transactions", "currentOpen"]),
            "",
        );
        out.add_perfdata(
            &format!("{}_txn_total_started", prefix),
            num_at(status, &["transactions", "totalStarted"]),
            "c",
        );
        out.add_perfdata(
            &format!("{}_txn_total_committed", prefix),
            num_at(status, &["transactions", "totalCommitted"]),
            "c",
        );
        out.add_perfdata(
            &format!("{}_txn_total_aborted", prefix),
            num_at(status, &["transactions", "totalAborted"]),
            "c",
        );
    }

    // ── 聚合库容量 ──
    if let Some(totals) = &snap.db_totals {
        out.add_perfdata(
            &format!("{}_total_data_size", prefix),
            bytes_to_gb(totals.data_size),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_total_storage_size", prefix),
            bytes_to_gb(totals.storage_size),
            "GB",
        );
        out.add_perfdata(
            &format!("{}_total_index_size", prefix),
            bytes_to_gb(totals.index_size),
            "GB",
        );
        out.add_perfdata(&format!("{}_total_collections", prefix), totals.collections, "c");
        out.add_perfdata(&format!("{}_total_objects", prefix), totals.objects, "c");
    }

    // ── 文件系统（仅 perfdata，判定归 --filesystem 模式）──
    if let Some(admin_stats) = &snap.admin_stats {
        let fs_total = num_at(admin_stats, &["fsTotalSize"]);
        let fs_used = num_at(admin_stats, &["fsUsedSize"]);
        if fs_total > 0.0 {
            out.add_perfdata(&format!("{}_fs_total", prefix), bytes_to_gb(fs_total), "GB");
            out.add_perfdata(&format!("{}_fs_used", prefix), bytes_to_gb(fs_used), "GB");
            out.add_perfdata(
                &format!("{}_fs_free", prefix),
                bytes_to_gb(fs_total - fs_used),
                "GB",
            );
            out.add_perfdata(
                &format!("{}_fs_used_pct", prefix),
                format!("{:.1}", fs_used / fs_total * 100.0),
                "%",
            );
        }
    }

    for denied in &snap.denied {
        handle_permission_error(out, thresholds, denied.keys, &denied.error);
    }
    for warning in &snap.soft_warnings {
        out.add_verbose(format!("[WARN] {}: {}", node, warning));
    }
}

/// A privilege gap is CRITICAL when it hides a metric the caller put a
/// threshold on, otherwise just a WARNING.
fn handle_permission_error(
    out: &mut PluginOutput,
    thresholds: &Thresholds,
    keys: &[&str],
    error: &str,
) {
    let needed = keys.iter().any(|k| thresholds.has(k));
    let listed = keys.join(", ");
    if needed {
        out.add_message(
            Verdict::Critical,
            format!(
                "Permission denied for metrics [{}] (required by thresholds): {}",
                listed, error
            ),
        );
    } else {
        out.add_message(
            Verdict::Warning,
            format!("Permission denied for metrics [{}] (ignored): {}", listed, error),
        );
    }
}

// ── 派生指标 ────────────────────────────────────────────────────────────────

/// Seconds between the primary's optime and this member's, from the
/// member list of replSetGetStatus.
pub fn replication_lag_secs(rs_status: &Document) -> Option<f64> {
    let members = rs_status.get_array("members").ok()?;
    let mut primary = None;
    let mut own = None;
    for member in members.iter().filter_map(Bson::as_document) {
        if num_at(member, &["state"]) == 1.0 {
            primary = optime(member);
        }
        if member.get_bool("self").unwrap_or(false) {
            own = optime(member);
        }
    }
    let delta = primary?.signed_duration_since(own?);
    Some((delta.num_milliseconds() as f64 / 1000.0).abs())
}

fn optime(member: &Document) -> Option<DateTime<Utc>> {
    member
        .get_datetime("optimeDate")
        .ok()
        .map(|dt| dt.to_chrono())
}

/// Span covered by the oplog, in hours.
pub fn oplog_window_hours(first: Timestamp, last: Timestamp) -> f64 {
    last.time.saturating_sub(first.time) as f64 / 3600.0
}

// 逐层取数字，缺字段一律按 0 处理
pub(crate) fn num_at(doc: &Document, path: &[&str]) -> f64 {
    let mut cur = doc;
    for key in &path[..path.len() - 1] {
        match cur.get_document(key) {
            Ok(next) => cur = next,
            Err(_) => return 0.0,
        }
    }
    match cur.get(path[path.len() - 1]) {
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::Double(v)) => *v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::DateTime;

    fn snapshot(server_status: Document) -> MetricsSnapshot {
        MetricsSnapshot {
            server_status,
            repl_status: None,
            oplog_range: None,
            oplog_stats: None,
            db_totals: None,
            admin_stats: None,
            denied: Vec::new(),
            soft_warnings: Vec::new(),
        }
    }

    fn server_status_doc() -> Document {
        doc! {
            "connections": { "current": 850, "available": 150, "active": 40, "totalCreated": 12345_i64 },
            "opcounters": { "insert": 10, "query": 20, "update": 5, "delete": 1, "getmore": 7, "command": 99 },
            "globalLock": {
                "currentQueue": { "total": 3, "readers": 2, "writers": 1 },
                "activeClients": { "readers": 4, "writers": 2 },
            },
            "wiredTiger": {
                "cache": {
                    "maximum bytes configured": 1073741824_i64,
                    "bytes currently in the cache": 858993459_i64,
                    "tracked dirty bytes in the cache": 10485760_i64,
                    "bytes read into cache": 2147483648_i64,
                    "bytes written from cache": 1073741824_i64,
                    "modified pages evicted": 100,
                    "unmodified pages evicted": 2000,
                    "pages read into cache": 5000,
                    "pages written from cache": 3000,
                },
                "concurrentTransactions": {
                    "read": { "available": 118, "out": 10, "totalTickets": 128 },
                    "write": { "available": 64, "out": 64, "totalTickets": 128 },
                },
            },
            "mem": { "resident": 1024, "virtual": 2048 },
            "network": { "bytesIn": 1073741824_i64, "bytesOut": 2147483648_i64, "numRequests": 777 },
            "metrics": {
                "document": { "inserted": 11, "updated": 22, "deleted": 33, "returned": 44 },
                "cursor": { "open": { "total": 5, "noTimeout": 0 }, "timedOut": 2 },
            },
            "extra_info": { "page_faults": 7 },
            "asserts": { "regular": 0, "warning": 3, "msg": 0, "user": 15, "rollovers": 0 },
        }
    }

    #[test]
    fn num_at_walks_nested_documents() {
        let status = server_status_doc();
        assert_eq!(num_at(&status, &["connections", "current"]), 850.0);
        assert_eq!(
            num_at(&status, &["wiredTiger", "cache", "maximum bytes configured"]),
            1073741824.0
        );
        assert_eq!(num_at(&status, &["connections", "missing"]), 0.0);
        assert_eq!(num_at(&status, &["nothing", "here"]), 0.0);
    }

    #[test]
    fn connection_usage_alerts_against_threshold() {
        let thresholds =
            Thresholds::parse(Some(r#"{"conn_usage_pct": {"warning": 80, "critical": 90}}"#))
                .unwrap();
        let mut out = PluginOutput::new(false);
        let ep = Endpoint::new("db1", 27017);
        emit_node_metrics(&mut out, &thresholds, &ep, &snapshot(server_status_doc()));

        assert_eq!(out.status(), Verdict::Warning);
        let rendered = out.render();
        assert!(rendered.starts_with("WARNING - Node db1:27017: conn_usage_pct 85.0% >= 80%"));
        assert!(rendered.contains("db1_27017_conn_current=850;;;0;1000"));
        assert!(rendered.contains("db1_27017_conn_usage_pct=85.0%;;;;"));
        assert!(rendered.contains("db1_27017_wt_cache_pct=80.0%;;;;"));
        assert!(rendered.contains("db1_27017_tickets_write_usage_pct=50.0%;;;;"));
        assert!(rendered.contains("db1_27017_asserts_user=15c;;;;"));
    }

    #[test]
    fn mongos_status_without_storage_sections_stays_quiet() {
        let status = doc! {
            "connections": { "current": 10, "available": 990, "active": 2, "totalCreated": 55 },
            "opcounters": { "insert": 0, "query": 9, "update": 0, "delete": 0, "getmore": 1, "command": 30 },
            "network": { "bytesIn": 1024_i64, "bytesOut": 4096_i64, "numRequests": 12 },
        };
        let mut out = PluginOutput::new(false);
        let ep = Endpoint::new("router1", 27017);
        emit_node_metrics(&mut out, &Thresholds::default(), &ep, &snapshot(status));

        assert_eq!(out.status(), Verdict::Ok);
        let rendered = out.render();
        assert!(!rendered.contains("wt_cache"));
        assert!(!rendered.contains("repl_lag"));
        assert!(rendered.contains("router1_27017_conn_current=10;;;0;1000"));
    }

    #[test]
    fn emitted_key_set_is_stable_across_runs() {
        let thresholds = Thresholds::default();
        let ep = Endpoint::new("db1", 27017);
        let snap = snapshot(server_status_doc());

        let mut first = PluginOutput::new(false);
        emit_node_metrics(&mut first, &thresholds, &ep, &snap);
        let mut second = PluginOutput::new(false);
        emit_node_metrics(&mut second, &thresholds, &ep, &snap);

        assert_eq!(first.render(), second.render());
    }

    #[test]
    fn oplog_window_math_and_threshold() {
        let first = Timestamp { time: 1_700_000_000, increment: 1 };
        let last = Timestamp { time: 1_700_000_000 + 36 * 3600, increment: 4 };
        assert_eq!(oplog_window_hours(first, last), 36.0);

        let thresholds = Thresholds::parse(Some(
            r#"{"oplog_window": {"warning": 48, "critical": 24, "mode": "below"}}"#,
        ))
        .unwrap();
        let mut out = PluginOutput::new(false);
        let mut snap = snapshot(server_status_doc());
        snap.oplog_range = Some((first, last));
        emit_node_metrics(&mut out, &thresholds, &Endpoint::new("db1", 27017), &snap);
        assert_eq!(out.status(), Verdict::Warning);
        assert!(out
            .render()
            .contains("Node db1:27017: oplog_window 36.0h <= 48h"));
    }

    #[test]
    fn replication_lag_between_primary_and_self() {
        let base_ms = 1_700_000_000_000_i64;
        let rs_status = doc! {
            "set": "rs0",
            "members": [
                { "name": "db1:27017", "state": 1, "optimeDate": DateTime::from_millis(base_ms) },
                { "name": "db2:27017", "state": 2, "self": true,
                  "optimeDate": DateTime::from_millis(base_ms - 10_000) },
            ],
        };
        assert_eq!(replication_lag_secs(&rs_status), Some(10.0));

        let no_primary = doc! {
            "set": "rs0",
            "members": [
                { "name": "db2:27017", "state": 2, "self": true,
                  "optimeDate": DateTime::from_millis(base_ms) },
            ],
        };
        assert_eq!(replication_lag_secs(&no_primary), None);
    }

    #[test]
    fn permission_error_severity_follows_thresholds() {
        let thresholds =
            Thresholds::parse(Some(r#"{"repl_lag": {"warning": 30, "critical": 60}}"#)).unwrap();

        let mut out = PluginOutput::new(false);
        handle_permission_error(&mut out, &thresholds, &["repl_lag"], "not authorized");
        assert_eq!(out.status(), Verdict::Critical);
        assert!(out.render().contains("required by thresholds"));

        let mut out = PluginOutput::new(false);
        handle_permission_error(&mut out, &thresholds, &["oplog_window"], "not authorized");
        assert_eq!(out.status(), Verdict::Warning);
        assert!(out.render().contains("(ignored)"));
    }
}
