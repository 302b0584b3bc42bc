//! 输出层：组装 Icinga 单行结果（状态 + perfdata + long output）

use std::fmt;

// ── 状态 ────────────────────────────────────────────────────────────────────

/// Plugin verdict, also the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Warning => "WARNING",
            Verdict::Critical => "CRITICAL",
            Verdict::Unknown => "UNKNOWN",
        }
    }

    // Escalation order. UNKNOWN outranks OK only, so an actionable
    // WARNING/CRITICAL never gets masked by a later indeterminate probe.
    fn rank(self) -> u8 {
        match self {
            Verdict::Ok => 0,
            Verdict::Unknown => 1,
            Verdict::Warning => 2,
            Verdict::Critical => 3,
        }
    }

    pub fn escalate(self, other: Verdict) -> Verdict {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Perfdata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PerfDatum {
    pub label: String,
    pub value: String,
    pub uom: String,
    pub warn: String,
    pub crit: String,
    pub min: String,
    pub max: String,
}

impl PerfDatum {
    /// `label=value[uom];warn;crit;min;max`. Labels with spaces are quoted.
    pub fn render(&self) -> String {
        let label = if self.label.contains(' ') {
            format!("'{}'", self.label)
        } else {
            self.label.clone()
        };
        format!(
            "{}={}{};{};{};{};{}",
            label, self.value, self.uom, self.warn, self.crit, self.min, self.max
        )
    }
}

// ── PluginOutput ────────────────────────────────────────────────────────────

/// Accumulates messages, perfdata and the escalated verdict across all
/// sub-checks of one run. Rendered exactly once at the end.
pub struct PluginOutput {
    status: Verdict,
    messages: Vec<String>,
    perfdata: Vec<PerfDatum>,
    long_output: Vec<String>,
    verbose: bool,
}

impl PluginOutput {
    pub fn new(verbose: bool) -> Self {
        PluginOutput {
            status: Verdict::Ok,
            messages: Vec::new(),
            perfdata: Vec::new(),
            long_output: Vec::new(),
            verbose,
        }
    }

    pub fn status(&self) -> Verdict {
        self.status
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn set_status(&mut self, status: Verdict) {
        self.status = self.status.escalate(status);
    }

    /// Escalate to `status` and record the reason on the summary line.
    pub fn add_message(&mut self, status: Verdict, message: impl Into<String>) {
        self.set_status(status);
        self.messages.push(message.into());
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Explanatory line below the summary, always emitted.
    pub fn add_long_output(&mut self, line: impl Into<String>) {
        self.long_output.push(line.into());
    }

    /// Extra diagnostic line, only collected in verbose mode.
    pub fn add_verbose(&mut self, line: impl Into<String>) {
        if self.verbose {
            self.long_output.push(line.into());
        }
    }

    pub fn add_perfdata(&mut self, label: &str, value: impl fmt::Display, uom: &str) {
        self.add_perfdata_bounds(label, value, uom, "", "", "", "");
    }

    pub fn add_perfdata_bounds(
        &mut self,
        label: &str,
        value: impl fmt::Display,
        uom: &str,
        warn: &str,
        crit: &str,
        min: &str,
        max: &str,
    ) {
        self.perfdata.push(PerfDatum {
            label: label.to_string(),
            value: value.to_string(),
            uom: uom.to_string(),
            warn: warn.to_string(),
            crit: crit.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }

    /// The complete plugin output: one verdict line, then any long output.
    pub fn render(&self) -> String {
        let summary = if self.messages.is_empty() {
            "No issues detected".to_string()
        } else {
            self.messages.join(", ")
        };
        let mut line = format!("{} - {}", self.status.label(), summary);
        if !self.perfdata.is_empty() {
            let rendered: Vec<String> = self.perfdata.iter().map(PerfDatum::render).collect();
            line.push_str(" | ");
            line.push_str(&rendered.join(" "));
        }
        for extra in &self.long_output {
            line.push('\n');
            line.push_str(extra);
        }
        line
    }
}
