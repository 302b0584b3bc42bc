use clap::{ArgGroup, Parser, ValueEnum};

use crate::check::CheckMode;

#[derive(Parser)]
#[command(name = "mongocheck")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")"))]
#[command(about = "Icinga/Nagios plugin for MongoDB monitoring", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["availability", "metrics", "filesystem"]),
))]
pub struct Cli {
    /// MongoDB connection string (mongodb:// or mongodb+srv://)
    #[arg(long)]
    pub uri: String,

    /// Username for authentication
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Authentication mechanism (default: driver negotiated, PLAIN for LDAP)
    #[arg(long, value_enum)]
    pub auth_mechanism: Option<AuthMechanismArg>,

    /// Authentication database (use '$external' for LDAP)
    #[arg(long)]
    pub auth_source: Option<String>,

    /// Enable TLS for all connections
    #[arg(long)]
    pub tls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub tls_insecure: bool,

    /// Per-connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Check availability of all nodes
    #[arg(long)]
    pub availability: bool,

    /// Collect performance metrics per node
    #[arg(long)]
    pub metrics: bool,

    /// Check filesystem usage with dynamic thresholds
    #[arg(long)]
    pub filesystem: bool,

    /// JSON threshold map, e.g. '{"conn_usage_pct": {"warning": 80, "critical": 90}}'
    #[arg(long)]
    pub thresholds: Option<String>,

    /// Expected replica set name (overrides the URI parameter)
    #[arg(long)]
    pub replicaset: Option<String>,

    /// Verbose diagnostic output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Mechanisms the plugin accepts, spelled the way the wire protocol does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMechanismArg {
    #[value(name = "SCRAM-SHA-256")]
    ScramSha256,
    #[value(name = "SCRAM-SHA-1")]
    ScramSha1,
    #[value(name = "PLAIN")]
    Plain,
}

impl Cli {
    pub fn mode(&self) -> CheckMode {
        if self.availability {
            CheckMode::Availability
        } else if self.metrics {
            CheckMode::Metrics
        } else {
            CheckMode::Filesystem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("mongocheck").chain(args.iter().copied()))
    }

    #[test]
    fn one_mode_is_required() {
        assert!(parse(&["--uri", "mongodb://db1:27017/"]).is_err());
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        assert!(parse(&["--uri", "mongodb://db1:27017/", "--availability", "--metrics"]).is_err());
    }

    #[test]
    fn availability_mode_parses_with_defaults() {
        let cli = parse(&["--uri", "mongodb://db1:27017/", "--availability"]).unwrap();
        assert_eq!(cli.mode(), CheckMode::Availability);
        assert_eq!(cli.timeout, 10);
        assert!(!cli.tls);
        assert!(!cli.verbose);
    }

    #[test]
    fn auth_mechanism_uses_wire_names() {
        let cli = parse(&[
            "--uri",
            "mongodb://db1:27017/",
            "--metrics",
            "-u",
            "monitor",
            "-p",
            "secret",
            "--auth-mechanism",
            "SCRAM-SHA-256",
        ])
        .unwrap();
        assert_eq!(cli.auth_mechanism, Some(AuthMechanismArg::ScramSha256));

        assert!(parse(&["--uri", "x", "--metrics", "--auth-mechanism", "bogus"]).is_err());
    }

    #[test]
    fn filesystem_mode_with_thresholds() {
        let cli = parse(&[
            "--uri",
            "mongodb://db1:27017,db2:27017/",
            "--filesystem",
            "--thresholds",
            r#"{"fs_usage_pct": {"warning": 85, "critical": 95}}"#,
            "--replicaset",
            "rs0",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.mode(), CheckMode::Filesystem);
        assert_eq!(cli.replicaset.as_deref(), Some("rs0"));
        assert!(cli.verbose);
    }
}
