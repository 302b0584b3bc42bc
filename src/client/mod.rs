//! MongoDB 连接层：URI 解析、逐节点 direct 连接、并发探测
//! 来源：hello / replSetGetStatus / serverStatus 等命令都经由这里下发

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use mongodb::bson::{doc, Document, Timestamp};
use mongodb::options::{
    AuthMechanism, ClientOptions, Credential, FindOptions, ServerAddress, Tls, TlsOptions,
};
use mongodb::sync::{Client, Collection};

use crate::cli::{AuthMechanismArg, Cli};
use crate::utils::{sanitize_metric_name, ProbeError, Result};

pub const DEFAULT_PORT: u16 = 27017;

/// Upper bound on concurrent node probes.
pub const PROBE_WORKERS: usize = 8;

// ── Endpoint ────────────────────────────────────────────────────────────────

/// One address the probe talks to directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// "host" or "host:port" as MongoDB reports members. Port defaults
    /// to 27017 when absent or unparseable (IPv6 literals).
    pub fn parse(s: &str) -> Endpoint {
        match s.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => Endpoint::new(host, port),
                Err(_) => Endpoint::new(s, DEFAULT_PORT),
            },
            None => Endpoint::new(s, DEFAULT_PORT),
        }
    }

    /// Prefix for perfdata labels belonging to this node.
    pub fn metric_prefix(&self) -> String {
        sanitize_metric_name(&format!("{}:{}", self.host, self.port))
    }

    fn address(&self) -> ServerAddress {
        ServerAddress::Tcp {
            host: self.host.clone(),
            port: Some(self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── NodeClient ──────────────────────────────────────────────────────────────

/// Connection settings shared by every probe of one run. Each actual
/// session is a short-lived direct connection to a single node, so a
/// down member never stalls commands aimed at its peers.
pub struct NodeClient {
    base: ClientOptions,
}

impl NodeClient {
    pub fn from_cli(cli: &Cli) -> Result<NodeClient> {
        let uri = normalize_uri(&cli.uri);
        let mut base = ClientOptions::parse(&uri)
            .map_err(|e| ProbeError::Config(format!("invalid connection URI: {}", e)))?;

        let timeout = Duration::from_secs(cli.timeout);
        base.connect_timeout = Some(timeout);
        base.server_selection_timeout = Some(timeout);
        base.retry_reads = Some(false);
        base.app_name = Some(format!("mongocheck/{}", env!("CARGO_PKG_VERSION")));

        if let Some(username) = &cli.username {
            let mechanism = cli.auth_mechanism.map(driver_mechanism);
            // PLAIN (LDAP) 认证默认走 $external
            let source = cli.auth_source.clone().or_else(|| match mechanism {
                Some(AuthMechanism::Plain) => Some("$external".to_string()),
                _ => None,
            });
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = cli.password.clone();
            credential.mechanism = mechanism;
            credential.source = source;
            base.credential = Some(credential);
        } else if let Some(source) = &cli.auth_source {
            // Credentials came from the URI, only the auth db is overridden
            if let Some(credential) = &mut base.credential {
                credential.source = Some(source.clone());
            }
        }

        if cli.tls {
            let mut tls = TlsOptions::default();
            if cli.tls_insecure {
                tls.allow_invalid_certificates = Some(true);
            }
            base.tls = Some(Tls::Enabled(tls));
        }

        Ok(NodeClient { base })
    }

    /// Endpoints named by the connection string, after SRV resolution.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.base
            .hosts
            .iter()
            .filter_map(|address| match address {
                ServerAddress::Tcp { host, port } => {
                    Some(Endpoint::new(host.clone(), port.unwrap_or(DEFAULT_PORT)))
                }
                _ => None,
            })
            .collect()
    }

    /// replicaSet= parameter of the URI, if any.
    pub fn uri_set_name(&self) -> Option<&str> {
        self.base.repl_set_name.as_deref()
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<Client> {
        let mut options = self.base.clone();
        options.hosts = vec![endpoint.address()];
        options.direct_connection = Some(true);
        // Direct probes must also reach nodes the set would filter out
        options.repl_set_name = None;
        Client::with_options(options).map_err(ProbeError::from)
    }

    /// Run one admin command against one node.
    pub fn admin_command(&self, endpoint: &Endpoint, command: Document) -> Result<Document> {
        self.db_command(endpoint, "admin", command)
    }

    pub fn db_command(&self, endpoint: &Endpoint, db: &str, command: Document) -> Result<Document> {
        let client = self.connect(endpoint)?;
        client
            .database(db)
            .run_command(command, None)
            .map_err(ProbeError::from)
    }

    pub fn list_database_names(&self, endpoint: &Endpoint) -> Result<Vec<String>> {
        let client = self.connect(endpoint)?;
        client
            .list_database_names(None, None)
            .map_err(ProbeError::from)
    }

    /// Timestamps of the oldest and newest oplog entries on one node.
    pub fn oplog_bounds(&self, endpoint: &Endpoint) -> Result<(Timestamp, Timestamp)> {
        let client = self.connect(endpoint)?;
        let oplog = client.database("local").collection::<Document>("oplog.rs");
        let first = oplog_edge(&oplog, 1)?;
        let last = oplog_edge(&oplog, -1)?;
        Ok((first, last))
    }
}

fn oplog_edge(oplog: &Collection<Document>, direction: i32) -> Result<Timestamp> {
    let options = FindOptions::builder()
        .sort(doc! { "$natural": direction })
        .limit(1)
        .projection(doc! { "ts": 1 })
        .build();
    let mut cursor = oplog.find(doc! {}, options)?;
    match cursor.next() {
        Some(entry) => entry?
            .get_timestamp("ts")
            .map_err(|_| ProbeError::Parse("oplog entry without ts field".to_string())),
        None => Err(ProbeError::Parse("oplog is empty".to_string())),
    }
}

fn driver_mechanism(arg: AuthMechanismArg) -> AuthMechanism {
    match arg {
        AuthMechanismArg::ScramSha1 => AuthMechanism::ScramSha1,
        AuthMechanismArg::ScramSha256 => AuthMechanism::ScramSha256,
        AuthMechanismArg::Plain => AuthMechanism::Plain,
    }
}

/// Accept bare "host:port,host:port" lists as well as full URIs.
fn normalize_uri(raw: &str) -> String {
    if raw.starts_with("mongodb://") || raw.starts_with("mongodb+srv://") {
        raw.to_string()
    } else {
        format!("mongodb://{}", raw)
    }
}

// ── 并发探测 ────────────────────────────────────────────────────────────────

/// Fan a probe out over all targets with a bounded worker pool and join
/// every result. Results come back in target order.
pub fn probe_all<T, F>(targets: &[Endpoint], probe: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Endpoint) -> T + Sync,
{
    let workers = targets.len().min(PROBE_WORKERS);
    if workers == 0 {
        return Vec::new();
    }
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        let next = &next;
        let probe = &probe;
        for _ in 0..workers {
            let tx = tx.clone();
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= targets.len() {
                    break;
                }
                if tx.send((i, probe(&targets[i]))).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);
    let mut slots: Vec<Option<T>> = targets.iter().map(|_| None).collect();
    for (i, result) in rx {
        slots[i] = Some(result);
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_defaults_port() {
        assert_eq!(Endpoint::parse("db1"), Endpoint::new("db1", 27017));
        assert_eq!(
            Endpoint::parse("db1.example.com:27018"),
            Endpoint::new("db1.example.com", 27018)
        );
    }

    #[test]
    fn endpoint_display_roundtrip() {
        let ep = Endpoint::new("db1", 27018);
        assert_eq!(ep.to_string(), "db1:27018");
        assert_eq!(Endpoint::parse(&ep.to_string()), ep);
    }

    #[test]
    fn metric_prefix_is_sanitized() {
        let ep = Endpoint::new("Db-1.example.com", 27017);
        assert_eq!(ep.metric_prefix(), "db_1_example_com_27017");
    }

    #[test]
    fn normalize_uri_adds_missing_scheme() {
        assert_eq!(normalize_uri("db1:27017,db2:27017"), "mongodb://db1:27017,db2:27017");
        assert_eq!(normalize_uri("mongodb://db1"), "mongodb://db1");
        assert_eq!(normalize_uri("mongodb+srv://c0.example.com"), "mongodb+srv://c0.example.com");
    }

    #[test]
    fn from_cli_extracts_hosts_and_set_name() {
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "mongocheck",
            "--uri",
            "mongodb://db1:27017,db2:27018/?replicaSet=rs0",
            "--availability",
        ])
        .unwrap();
        let client = NodeClient::from_cli(&cli).unwrap();
        assert_eq!(
            client.endpoints(),
            vec![Endpoint::new("db1", 27017), Endpoint::new("db2", 27018)]
        );
        assert_eq!(client.uri_set_name(), Some("rs0"));
    }

    #[test]
    fn probe_all_preserves_target_order() {
        let targets: Vec<Endpoint> = (0..20)
            .map(|i| Endpoint::new(format!("h{}", i), 27017))
            .collect();
        let results = probe_all(&targets, |ep| ep.to_string());
        assert_eq!(results.len(), targets.len());
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r, &format!("h{}:27017", i));
        }
    }

    #[test]
    fn probe_all_handles_empty_target_list() {
        let targets: [Endpoint; 0] = [];
        let results = probe_all(&targets, |ep| ep.to_string());
        assert!(results.is_empty());
    }
}
