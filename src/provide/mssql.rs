//! SQL Server checker: lazy tiberius client over tokio TCP, then a
//! caller-supplied scalar query.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MssqlConfig {
    /// ADO-style connection string, e.g.
    /// `server=tcp:127.0.0.1,1433;user=sa;password=...;TrustServerCertificate=true`.
    pub dsn: String,
    /// Must select a single integer, e.g. `SELECT 1`.
    #[serde(rename = "query_sql")]
    pub query: String,
}

/// Client slot: `None` is Unconnected, `Some` is Connected. Any query
/// failure drops the slot so the next check reconnects.
pub struct MssqlChecker {
    config: MssqlConfig,
    client: Mutex<Option<Client<Compat<TcpStream>>>>,
}

impl MssqlChecker {
    pub fn new(config: MssqlConfig) -> Self {
        MssqlChecker {
            config,
            client: Mutex::new(None),
        }
    }

    async fn connect(&self, cx: &CheckContext) -> Result<Client<Compat<TcpStream>>, CheckError> {
        let config = Config::from_ado_string(&self.config.dsn)
            .map_err(|e| CheckError::Config(format!("invalid connection string: {e}")))?;
        let addr = config.get_addr().to_string();

        cx.run(CONNECT_TIMEOUT, async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| CheckError::connect("connect to", addr.clone(), e))?;
            tcp.set_nodelay(true)
                .map_err(|e| CheckError::connect("connect to", addr.clone(), e))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| CheckError::connect("open database", addr.clone(), e))
        })
        .await
    }
}

#[async_trait::async_trait]
impl Monitor for MssqlChecker {
    fn name(&self) -> &'static str {
        "mss"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.dsn.is_empty() {
            return Err(CheckError::Config("dsn is empty".into()));
        }
        if self.config.query.is_empty() {
            return Err(CheckError::Config("query_sql is empty".into()));
        }

        let mut slot = self.client.lock().await;
        if slot.is_none() {
            tracing::debug!(monitor = "mss", "opening connection");
            *slot = Some(self.connect(cx).await?);
        }
        let client = match slot.as_mut() {
            Some(client) => client,
            None => return Err(CheckError::Config("connection slot empty".into())),
        };

        let outcome = cx
            .run(CONNECT_TIMEOUT, async {
                let stream = client
                    .simple_query(&self.config.query)
                    .await
                    .map_err(|e| CheckError::Protocol(format!("query failed: {e}")))?;
                let row = stream
                    .into_row()
                    .await
                    .map_err(|e| CheckError::Protocol(format!("query failed: {e}")))?
                    .ok_or_else(|| CheckError::Protocol("query returned no rows".into()))?;
                row.get::<i32, _>(0)
                    .ok_or_else(|| CheckError::Protocol("query returned no integer column".into()))
            })
            .await;

        match outcome {
            Ok(result) => Ok(serde_json::json!({ "status": "ok", "result": result })),
            Err(e) => {
                // connection state is unknown after a failure
                *slot = None;
                Err(e)
            }
        }
    }
}
