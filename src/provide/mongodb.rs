//! MongoDB checker: lazy official-driver client, then a `ping` command
//! against the admin database.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MongoConfig {
    /// `mongodb://` connection string.
    pub dsn: String,
}

/// Client slot: `None` is Unconnected, `Some` is Connected. A failed ping
/// drops the slot so the next check reconnects.
pub struct MongoChecker {
    config: MongoConfig,
    client: Mutex<Option<Client>>,
}

impl MongoChecker {
    pub fn new(config: MongoConfig) -> Self {
        MongoChecker {
            config,
            client: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Monitor for MongoChecker {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.dsn.is_empty() {
            return Err(CheckError::Config("dsn is empty".into()));
        }

        let mut slot = self.client.lock().await;
        if slot.is_none() {
            tracing::debug!(monitor = "mongodb", "creating client");
            let client = cx
                .run(CONNECT_TIMEOUT, async {
                    Client::with_uri_str(&self.config.dsn)
                        .await
                        .map_err(|e| CheckError::connect("connect to", self.config.dsn.clone(), e))
                })
                .await?;
            *slot = Some(client);
        }
        let client = match slot.as_ref() {
            Some(client) => client.clone(),
            None => return Err(CheckError::Config("client slot empty".into())),
        };

        let ping = cx
            .run(CONNECT_TIMEOUT, async {
                client
                    .database("admin")
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map_err(|e| CheckError::connect("ping", self.config.dsn.clone(), e))
            })
            .await;

        match ping {
            Ok(_) => Ok(serde_json::json!({ "status": "ok" })),
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }
}
