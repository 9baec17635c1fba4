//! ICMP checker: one echo request, failure when no reply arrives in time.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};
use crate::options::{self, Opt};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcmpConfig {
    pub host: String,
}

#[derive(Debug, Clone, Default)]
pub struct IcmpOptions {
    timeout: Option<Duration>,
}

/// Override the echo reply timeout (default 5 s).
pub fn set_timeout(timeout: Duration) -> Opt<IcmpOptions> {
    Opt::new(move |o: &mut IcmpOptions| o.timeout = Some(timeout))
}

pub struct IcmpChecker {
    config: IcmpConfig,
    option: IcmpOptions,
}

impl IcmpChecker {
    pub fn new(config: IcmpConfig, opts: impl IntoIterator<Item = Opt<IcmpOptions>>) -> Self {
        let mut option = IcmpOptions::default();
        options::apply(&mut option, opts);
        IcmpChecker { config, option }
    }
}

#[async_trait::async_trait]
impl Monitor for IcmpChecker {
    fn name(&self) -> &'static str {
        "icmp"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.host.is_empty() {
            return Err(CheckError::Config("host is empty".into()));
        }
        let timeout = self.option.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let ip = cx
            .run(timeout, resolve_host(&self.config.host))
            .await?;

        let kind = match ip {
            IpAddr::V4(_) => ICMP::V4,
            IpAddr::V6(_) => ICMP::V6,
        };
        let client = Client::new(&Config::builder().kind(kind).build())
            .map_err(|e| CheckError::connect("open ICMP socket for", self.config.host.clone(), e))?;

        let (reply_ip, latency) = cx
            .run(timeout, async {
                let mut pinger = client
                    .pinger(ip, PingIdentifier(std::process::id() as u16))
                    .await;
                pinger.timeout(timeout);
                let (packet, rtt) = pinger
                    .ping(PingSequence(0), &[0u8; 32])
                    .await
                    .map_err(|e| CheckError::connect("ping", self.config.host.clone(), e))?;
                let source = match packet {
                    surge_ping::IcmpPacket::V4(pkt) => pkt.get_source().to_string(),
                    surge_ping::IcmpPacket::V6(pkt) => pkt.get_source().to_string(),
                };
                Ok((source, rtt))
            })
            .await?;

        Ok(serde_json::json!({
            "host": self.config.host,
            "ip": reply_ip,
            "latency_ms": latency.as_millis() as u64,
            "received": 1,
        }))
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, CheckError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| CheckError::connect("resolve", host.to_string(), e))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CheckError::Protocol(format!("no addresses found for host {host}")))
}
