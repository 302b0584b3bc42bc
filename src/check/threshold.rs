//! 阈值判定：above/below 两种策略，外加文件系统用的对数缩放

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::check::output::{PluginOutput, Verdict};
use crate::utils::{ProbeError, Result};

/// Capacity above which percentage thresholds start scaling up.
pub const FS_SCALE_KNEE_GB: f64 = 500.0;
/// Scaled thresholds never exceed this, so a full disk always alerts.
pub const FS_PCT_CEILING: f64 = 99.0;

// ── 数据结构 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Alert when the value climbs to or past the bound (usage, lag).
    Above,
    /// Alert when the value drops to or below the bound (oplog window).
    Below,
}

impl fmt::Display for ThresholdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdMode::Above => f.write_str("above"),
            ThresholdMode::Below => f.write_str("below"),
        }
    }
}

fn default_mode() -> ThresholdMode {
    ThresholdMode::Above
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdSpec {
    #[serde(default)]
    pub warning: Option<f64>,
    #[serde(default)]
    pub critical: Option<f64>,
    #[serde(default = "default_mode")]
    pub mode: ThresholdMode,
}

/// Caller-supplied threshold map keyed by metric name, parsed from the
/// `--thresholds` JSON argument.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Thresholds {
    specs: BTreeMap<String, ThresholdSpec>,
}

// ── 判定 ────────────────────────────────────────────────────────────────────

/// Compare one value against one spec. Bounds are inclusive.
pub fn evaluate(value: f64, spec: ThresholdSpec) -> Verdict {
    match spec.mode {
        ThresholdMode::Above => {
            if spec.critical.map_or(false, |c| value >= c) {
                Verdict::Critical
            } else if spec.warning.map_or(false, |w| value >= w) {
                Verdict::Warning
            } else {
                Verdict::Ok
            }
        }
        ThresholdMode::Below => {
            if spec.critical.map_or(false, |c| value <= c) {
                Verdict::Critical
            } else if spec.warning.map_or(false, |w| value <= w) {
                Verdict::Warning
            } else {
                Verdict::Ok
            }
        }
    }
}

/// Percentage threshold adjusted for filesystem capacity. Small volumes
/// keep the base percentage; past the knee the threshold grows with the
/// log of the capacity so the absolute free-space reserve keeps growing
/// instead of the percentage reserve.
pub fn scaled_fs_threshold(base_pct: f64, total_gb: f64) -> f64 {
    if total_gb <= FS_SCALE_KNEE_GB {
        return base_pct;
    }
    let bonus = (total_gb / FS_SCALE_KNEE_GB).log10() * 5.0;
    (base_pct + bonus).min(FS_PCT_CEILING)
}

impl Thresholds {
    /// Parse the `--thresholds` argument. Absent means no thresholds,
    /// every metric becomes perfdata-only.
    pub fn parse(raw: Option<&str>) -> Result<Thresholds> {
        let thresholds = match raw {
            None => Thresholds::default(),
            Some(text) => serde_json::from_str(text)
                .map_err(|e| ProbeError::Config(format!("invalid thresholds JSON: {}", e)))?,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    fn validate(&self) -> Result<()> {
        for (key, spec) in &self.specs {
            if let (Some(warning), Some(critical)) = (spec.warning, spec.critical) {
                let ordered = match spec.mode {
                    ThresholdMode::Above => warning < critical,
                    ThresholdMode::Below => warning > critical,
                };
                if !ordered {
                    let relation = match spec.mode {
                        ThresholdMode::Above => "below",
                        ThresholdMode::Below => "above",
                    };
                    return Err(ProbeError::Config(format!(
                        "threshold '{}': warning {} must be {} critical {} in mode '{}'",
                        key, warning, relation, critical, spec.mode
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ThresholdSpec> {
        self.specs.get(key).copied()
    }

    pub fn has(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    /// Evaluate one metric for one node, recording a message when a bound
    /// is crossed. Returns true if the metric alerted.
    pub fn check(
        &self,
        out: &mut PluginOutput,
        node: &str,
        key: &str,
        value: f64,
        unit: &str,
    ) -> bool {
        let spec = match self.get(key) {
            Some(spec) => spec,
            None => return false,
        };
        let verdict = evaluate(value, spec);
        let bound = match verdict {
            Verdict::Critical => spec.critical,
            Verdict::Warning => spec.warning,
            _ => return false,
        };
        let op = match spec.mode {
            ThresholdMode::Above => ">=",
            ThresholdMode::Below => "<=",
        };
        if let Some(bound) = bound {
            out.add_message(
                verdict,
                format!(
                    "Node {}: {} {:.1}{} {} {}{}",
                    node, key, value, unit, op, bound, unit
                ),
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(warning: f64, critical: f64, mode: ThresholdMode) -> ThresholdSpec {
        ThresholdSpec {
            warning: Some(warning),
            critical: Some(critical),
            mode,
        }
    }

    #[test]
    fn above_mode_boundaries_are_inclusive() {
        let s = spec(80.0, 90.0, ThresholdMode::Above);
        assert_eq!(evaluate(79.9, s), Verdict::Ok);
        assert_eq!(evaluate(80.0, s), Verdict::Warning);
        assert_eq!(evaluate(85.0, s), Verdict::Warning);
        assert_eq!(evaluate(90.0, s), Verdict::Critical);
        assert_eq!(evaluate(95.0, s), Verdict::Critical);
    }

    #[test]
    fn below_mode_flips_the_comparison() {
        // Oplog window in hours: alert when the window shrinks.
        let s = spec(48.0, 24.0, ThresholdMode::Below);
        assert_eq!(evaluate(72.0, s), Verdict::Ok);
        assert_eq!(evaluate(48.0, s), Verdict::Warning);
        assert_eq!(evaluate(36.0, s), Verdict::Warning);
        assert_eq!(evaluate(24.0, s), Verdict::Critical);
        assert_eq!(evaluate(12.0, s), Verdict::Critical);
    }

    #[test]
    fn partial_specs_evaluate_what_is_present() {
        let warn_only = ThresholdSpec {
            warning: Some(85.0),
            critical: None,
            mode: ThresholdMode::Above,
        };
        assert_eq!(evaluate(99.0, warn_only), Verdict::Warning);

        let crit_only = ThresholdSpec {
            warning: None,
            critical: Some(95.0),
            mode: ThresholdMode::Above,
        };
        assert_eq!(evaluate(94.0, crit_only), Verdict::Ok);
        assert_eq!(evaluate(95.0, crit_only), Verdict::Critical);
    }

    #[test]
    fn parse_accepts_full_map() {
        let t = Thresholds::parse(Some(
            r#"{"conn_usage_pct": {"warning": 80, "critical": 90},
                "oplog_window": {"warning": 48, "critical": 24, "mode": "below"}}"#,
        ))
        .unwrap();
        assert!(t.has("conn_usage_pct"));
        assert_eq!(t.get("conn_usage_pct").unwrap().mode, ThresholdMode::Above);
        assert_eq!(t.get("oplog_window").unwrap().mode, ThresholdMode::Below);
        assert!(!t.has("cache_usage_pct"));
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(Thresholds::parse(Some("{not json")).is_err());
        assert!(Thresholds::parse(Some(r#"{"x": 5}"#)).is_err());
        assert!(Thresholds::parse(Some(r#"{"x": {"mode": "sideways"}}"#)).is_err());
    }

    #[test]
    fn parse_rejects_inverted_bounds() {
        let above = Thresholds::parse(Some(r#"{"x": {"warning": 90, "critical": 80}}"#));
        assert!(above.is_err());
        let equal = Thresholds::parse(Some(r#"{"x": {"warning": 80, "critical": 80}}"#));
        assert!(equal.is_err());
        let below = Thresholds::parse(Some(
            r#"{"x": {"warning": 24, "critical": 48, "mode": "below"}}"#,
        ));
        assert!(below.is_err());
    }

    #[test]
    fn check_records_message_and_verdict() {
        let t = Thresholds::parse(Some(r#"{"conn_usage_pct": {"warning": 80, "critical": 90}}"#))
            .unwrap();
        let mut out = PluginOutput::new(false);
        assert!(t.check(&mut out, "db1:27017", "conn_usage_pct", 85.0, "%"));
        assert_eq!(out.status(), Verdict::Warning);
        assert_eq!(
            out.render(),
            "WARNING - Node db1:27017: conn_usage_pct 85.0% >= 80%"
        );
    }

    #[test]
    fn check_ignores_metrics_without_spec() {
        let t = Thresholds::default();
        let mut out = PluginOutput::new(false);
        assert!(!t.check(&mut out, "db1:27017", "conn_usage_pct", 99.0, "%"));
        assert_eq!(out.status(), Verdict::Ok);
    }

    #[test]
    fn scaled_threshold_keeps_base_below_knee() {
        assert_eq!(scaled_fs_threshold(90.0, 100.0), 90.0);
        assert_eq!(scaled_fs_threshold(90.0, 500.0), 90.0);
    }

    #[test]
    fn scaled_threshold_grows_with_log_of_capacity() {
        let t1tb = scaled_fs_threshold(90.0, 1000.0);
        assert!((t1tb - 91.5).abs() < 0.01, "1TB => {}", t1tb);
        let t5tb = scaled_fs_threshold(90.0, 5000.0);
        assert!((t5tb - 95.0).abs() < 0.01, "5TB => {}", t5tb);
        let t10tb = scaled_fs_threshold(90.0, 10000.0);
        assert!((t10tb - 96.5).abs() < 0.01, "10TB => {}", t10tb);
    }

    #[test]
    fn scaled_threshold_is_capped() {
        assert_eq!(scaled_fs_threshold(90.0, 1.0e9), FS_PCT_CEILING);
        assert_eq!(scaled_fs_threshold(98.9, 1000.0), FS_PCT_CEILING);
    }

    #[test]
    fn scaled_threshold_reserves_more_absolute_space_on_bigger_disks() {
        let mut last_free_gb = 0.0;
        for total_gb in [100.0, 1000.0, 5000.0, 10000.0] {
            let threshold = scaled_fs_threshold(90.0, total_gb);
            let free_gb = total_gb * (100.0 - threshold) / 100.0;
            assert!(
                free_gb > last_free_gb,
                "{} GB volume reserves {} GB, previous reserved {}",
                total_gb,
                free_gb,
                last_free_gb
            );
            last_free_gb = free_gb;
        }
    }
}
