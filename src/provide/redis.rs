//! Redis checker: lazy multiplexed connection, then `PING`.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port` or a full `redis://` URL.
    pub dsn: String,
}

/// Connection slot: `None` is Unconnected, `Some` is Connected. A failed
/// ping drops the slot so the next check reconnects.
pub struct RedisChecker {
    config: RedisConfig,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisChecker {
    pub fn new(config: RedisConfig) -> Self {
        RedisChecker {
            config,
            connection: Mutex::new(None),
        }
    }

    fn connection_url(&self) -> String {
        if self.config.dsn.contains("://") {
            self.config.dsn.clone()
        } else {
            format!("redis://{}", self.config.dsn)
        }
    }
}

#[async_trait::async_trait]
impl Monitor for RedisChecker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.dsn.is_empty() {
            return Err(CheckError::Config("dsn is empty".into()));
        }
        let url = self.connection_url();

        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            tracing::debug!(monitor = "redis", "opening connection");
            let client = redis::Client::open(url.as_str())
                .map_err(|e| CheckError::Config(format!("invalid redis dsn {url}: {e}")))?;
            let connection = cx
                .run(CONNECT_TIMEOUT, async {
                    client
                        .get_multiplexed_async_connection()
                        .await
                        .map_err(|e| CheckError::connect("connect to", url.clone(), e))
                })
                .await?;
            *slot = Some(connection);
        }
        let connection = match slot.as_mut() {
            Some(connection) => connection,
            None => return Err(CheckError::Config("connection slot empty".into())),
        };

        let pong = cx
            .run(CONNECT_TIMEOUT, async {
                redis::cmd("PING")
                    .query_async::<String>(connection)
                    .await
                    .map_err(|e| CheckError::connect("ping", url.clone(), e))
            })
            .await;

        match pong {
            Ok(result) => Ok(serde_json::json!({ "status": "ok", "result": result })),
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }
}
