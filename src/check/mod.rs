pub mod availability;
pub mod filesystem;
pub mod metrics;
pub mod output;
pub mod threshold;
pub mod topology;

use crate::cli::Cli;
use crate::client::NodeClient;
use output::{PluginOutput, Verdict};
use threshold::Thresholds;

/// The three mutually exclusive check modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Availability,
    Metrics,
    Filesystem,
}

/// Run the selected check and fold everything into one plugin result.
/// Parse and connection-setup problems become UNKNOWN, never a panic.
pub fn run_check(cli: &Cli) -> PluginOutput {
    let mut out = PluginOutput::new(cli.verbose);

    let thresholds = match Thresholds::parse(cli.thresholds.as_deref()) {
        Ok(t) => t,
        Err(e) => {
            out.add_message(Verdict::Unknown, e.to_string());
            return out;
        }
    };

    let client = match NodeClient::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            out.add_message(Verdict::Unknown, e.to_string());
            return out;
        }
    };

    match cli.mode() {
        CheckMode::Availability => availability::run(&client, cli.replicaset.as_deref(), &mut out),
        CheckMode::Metrics      => metrics::run(&client, &thresholds, &mut out),
        CheckMode::Filesystem   => filesystem::run(&client, &thresholds, &mut out),
    }

    out
}
