//! DNS checker: resolves one record type for a host against a configured
//! resolver and fails when the answer section comes back empty.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RESOLVER: &str = "8.8.8.8";
const DEFAULT_PORT: u16 = 53;

/// Queried record type. Unrecognized values fall back to `A`, matching the
/// permissive original behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordKind {
    #[default]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "CAA")]
    Caa,
    #[serde(rename = "CNAME")]
    Cname,
    #[serde(rename = "MX")]
    Mx,
    #[serde(rename = "NS")]
    Ns,
    #[serde(rename = "PTR")]
    Ptr,
    #[serde(rename = "SOA")]
    Soa,
    #[serde(rename = "SRV")]
    Srv,
    #[serde(rename = "TXT")]
    Txt,
    #[serde(other)]
    Other,
}

impl RecordKind {
    fn record_type(self) -> RecordType {
        match self {
            RecordKind::A | RecordKind::Other => RecordType::A,
            RecordKind::Aaaa => RecordType::AAAA,
            RecordKind::Caa => RecordType::CAA,
            RecordKind::Cname => RecordType::CNAME,
            RecordKind::Mx => RecordType::MX,
            RecordKind::Ns => RecordType::NS,
            RecordKind::Ptr => RecordType::PTR,
            RecordKind::Soa => RecordType::SOA,
            RecordKind::Srv => RecordType::SRV,
            RecordKind::Txt => RecordType::TXT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RecordKind::A | RecordKind::Other => "A",
            RecordKind::Aaaa => "AAAA",
            RecordKind::Caa => "CAA",
            RecordKind::Cname => "CNAME",
            RecordKind::Mx => "MX",
            RecordKind::Ns => "NS",
            RecordKind::Ptr => "PTR",
            RecordKind::Soa => "SOA",
            RecordKind::Srv => "SRV",
            RecordKind::Txt => "TXT",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    pub host: String,
    /// Resolver port; 0 means the standard port 53.
    #[serde(default)]
    pub port: u16,
    /// Resolver address; empty means a public default (8.8.8.8).
    #[serde(default, rename = "parse_server")]
    pub resolver: String,
    #[serde(default, rename = "resource_type")]
    pub record_kind: RecordKind,
}

pub struct DnsChecker {
    config: DnsConfig,
}

impl DnsChecker {
    pub fn new(config: DnsConfig) -> Self {
        DnsChecker { config }
    }

    fn resolver_addr(&self) -> Result<SocketAddr, CheckError> {
        let host = if self.config.resolver.is_empty() {
            DEFAULT_RESOLVER
        } else {
            self.config.resolver.as_str()
        };
        let port = if self.config.port == 0 {
            DEFAULT_PORT
        } else {
            self.config.port
        };
        let ip: IpAddr = host
            .parse()
            .map_err(|e| CheckError::Config(format!("invalid resolver address {host}: {e}")))?;
        Ok(SocketAddr::new(ip, port))
    }
}

#[async_trait::async_trait]
impl Monitor for DnsChecker {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.host.is_empty() {
            return Err(CheckError::Config("host is empty".into()));
        }
        let server = self.resolver_addr()?;

        let mut resolver_config = ResolverConfig::new();
        resolver_config.add_name_server(NameServerConfig::new(server, Protocol::Udp));
        let mut opts = ResolverOpts::default();
        opts.timeout = cx.remaining().map_or(QUERY_TIMEOUT, |r| r.min(QUERY_TIMEOUT));
        opts.attempts = 1;

        let resolver = TokioAsyncResolver::tokio(resolver_config, opts);

        let started = std::time::Instant::now();
        let lookup = cx
            .run(QUERY_TIMEOUT, async {
                resolver
                    .lookup(self.config.host.as_str(), self.config.record_kind.record_type())
                    .await
                    .map_err(|e| CheckError::connect("query", server.to_string(), e))
            })
            .await?;
        let latency = started.elapsed();

        let answers: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
        if answers.is_empty() {
            return Err(CheckError::Protocol(format!(
                "no DNS answers for host {}",
                self.config.host
            )));
        }

        Ok(serde_json::json!({
            "host": self.config.host,
            "parse_server": server.ip().to_string(),
            "resource_type": self.config.record_kind.label(),
            "latency_ms": latency.as_millis() as u64,
            "answers": answers,
        }))
    }
}
