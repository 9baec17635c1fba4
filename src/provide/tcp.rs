//! TCP port checker: one dial, success payload is the joined `host:port`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

pub struct TcpChecker {
    config: TcpConfig,
}

impl TcpChecker {
    pub fn new(config: TcpConfig) -> Self {
        TcpChecker { config }
    }
}

#[async_trait::async_trait]
impl Monitor for TcpChecker {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.host.is_empty() {
            return Err(CheckError::Config("host is empty".into()));
        }
        let address = format!("{}:{}", self.config.host, self.config.port);

        let stream = cx
            .run(DIAL_TIMEOUT, async {
                tokio::net::TcpStream::connect(&address)
                    .await
                    .map_err(|e| CheckError::connect("connect to", address.clone(), e))
            })
            .await?;
        drop(stream);

        Ok(CheckResult::String(address))
    }
}
