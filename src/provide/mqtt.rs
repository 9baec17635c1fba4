//! MQTT checker: connects to the broker and succeeds once the CONNACK
//! comes back clean, then disconnects.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet};
use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub topic: String,
}

pub struct MqttChecker {
    config: MqttConfig,
}

impl MqttChecker {
    pub fn new(config: MqttConfig) -> Self {
        MqttChecker { config }
    }
}

#[async_trait::async_trait]
impl Monitor for MqttChecker {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.host.is_empty() {
            return Err(CheckError::Config("host is empty".into()));
        }
        let broker = format!("{}:{}", self.config.host, self.config.port);

        let client_id = format!("statusprobe-mqtt-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(5));
        if !self.config.username.is_empty() {
            options.set_credentials(&self.config.username, &self.config.password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 4);

        let ack = cx
            .run(CONNECT_TIMEOUT, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                        Ok(_) => continue,
                        Err(e) => {
                            return Err(CheckError::connect("connect to", broker.clone(), e))
                        }
                    }
                }
            })
            .await?;

        if ack.code != ConnectReturnCode::Success {
            return Err(CheckError::Protocol(format!(
                "broker {broker} refused connection: {:?}",
                ack.code
            )));
        }

        // best effort; the probe already succeeded
        let _ = client.disconnect().await;

        Ok(serde_json::json!({
            "connected": true,
            "broker": broker,
            "topic": self.config.topic,
        }))
    }
}
