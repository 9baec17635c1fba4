//! PostgreSQL checker: lazy pooled connection, ping, then a caller-supplied
//! scalar query.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Connection;
use tokio::sync::Mutex;

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub dsn: String,
    /// Must select a single integer, e.g. `SELECT 1`.
    #[serde(rename = "query_sql")]
    pub query: String,
}

/// Pool slot: `None` is Unconnected, `Some` is Connected. A failed ping
/// drops the slot back to Unconnected so the next check reconnects.
pub struct PostgresChecker {
    config: PostgresConfig,
    pool: Mutex<Option<PgPool>>,
}

impl PostgresChecker {
    pub fn new(config: PostgresConfig) -> Self {
        PostgresChecker {
            config,
            pool: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Monitor for PostgresChecker {
    fn name(&self) -> &'static str {
        "pgsql"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.dsn.is_empty() {
            return Err(CheckError::Config("dsn is empty".into()));
        }
        if self.config.query.is_empty() {
            return Err(CheckError::Config("query_sql is empty".into()));
        }

        let mut slot = self.pool.lock().await;
        let pool = match slot.as_ref() {
            Some(pool) => pool.clone(),
            None => {
                tracing::debug!(monitor = "pgsql", "opening connection pool");
                let pool = cx
                    .run(CONNECT_TIMEOUT, async {
                        PgPoolOptions::new()
                            .max_connections(1)
                            .acquire_timeout(CONNECT_TIMEOUT)
                            .connect(&self.config.dsn)
                            .await
                            .map_err(|e| {
                                CheckError::connect("open database", self.config.dsn.clone(), e)
                            })
                    })
                    .await?;
                *slot = Some(pool.clone());
                pool
            }
        };

        let ping = cx
            .run(CONNECT_TIMEOUT, async {
                let mut conn = pool
                    .acquire()
                    .await
                    .map_err(|e| CheckError::connect("ping database", self.config.dsn.clone(), e))?;
                conn.ping()
                    .await
                    .map_err(|e| CheckError::connect("ping database", self.config.dsn.clone(), e))
            })
            .await;
        if let Err(e) = ping {
            *slot = None;
            return Err(e);
        }

        let result: i32 = cx
            .run(CONNECT_TIMEOUT, async {
                sqlx::query_scalar(&self.config.query)
                    .fetch_one(&pool)
                    .await
                    .map_err(|e| CheckError::Protocol(format!("query failed: {e}")))
            })
            .await?;

        Ok(serde_json::json!({ "status": "ok", "result": result }))
    }
}
