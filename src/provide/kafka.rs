//! Kafka checker: produces one message and reports where it landed.
//!
//! SASL and SSL settings arrive as functional options, mirroring the
//! original's producer configuration surface, and are mapped onto
//! librdkafka configuration keys.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};
use crate::options::{self, Opt};

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

/// SASL mechanism used towards the brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaslAuthType {
    #[default]
    None,
    Plain,
    #[serde(rename = "sha256")]
    ScramSha256,
    #[serde(rename = "sha512")]
    ScramSha512,
}

impl SaslAuthType {
    fn mechanism(self) -> Option<&'static str> {
        match self {
            SaslAuthType::None => None,
            SaslAuthType::Plain => Some("PLAIN"),
            SaslAuthType::ScramSha256 => Some("SCRAM-SHA-256"),
            SaslAuthType::ScramSha512 => Some("SCRAM-SHA-512"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    #[serde(rename = "producer_message")]
    pub message: String,
    /// Let the producer auto-create the topic when it does not exist.
    #[serde(default)]
    pub create_topic: bool,
}

/// Client certificate material for broker TLS, all PEM text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaTlsMaterial {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

#[derive(Debug, Clone, Default)]
pub struct KafkaOptions {
    sasl: SaslAuthType,
    username: String,
    password: String,
    ssl: bool,
    skip_certificate_verify: bool,
    tls_material: KafkaTlsMaterial,
}

/// Select the SASL mechanism (default none).
pub fn set_sasl_auth_type(sasl: SaslAuthType) -> Opt<KafkaOptions> {
    Opt::new(move |o: &mut KafkaOptions| o.sasl = sasl)
}

/// Credentials for the selected SASL mechanism.
pub fn set_username_and_password(
    username: impl Into<String>,
    password: impl Into<String>,
) -> Opt<KafkaOptions> {
    let (username, password) = (username.into(), password.into());
    Opt::new(move |o: &mut KafkaOptions| {
        o.username = username;
        o.password = password;
    })
}

/// Enable broker TLS; `skip_certificate_verify` disables peer verification
/// and `material` supplies an optional client identity and trust bundle.
pub fn set_ssl(
    ssl: bool,
    skip_certificate_verify: bool,
    material: KafkaTlsMaterial,
) -> Opt<KafkaOptions> {
    Opt::new(move |o: &mut KafkaOptions| {
        o.ssl = ssl;
        o.skip_certificate_verify = skip_certificate_verify;
        o.tls_material = material;
    })
}

pub struct KafkaChecker {
    config: KafkaConfig,
    option: KafkaOptions,
}

impl KafkaChecker {
    pub fn new(config: KafkaConfig, opts: impl IntoIterator<Item = Opt<KafkaOptions>>) -> Self {
        let mut option = KafkaOptions::default();
        options::apply(&mut option, opts);
        KafkaChecker { config, option }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("message.timeout.ms", "5000")
            .set("socket.timeout.ms", "5000");

        if self.config.create_topic {
            config.set("allow.auto.create.topics", "true");
        }

        let security = match (self.option.ssl, self.option.sasl.mechanism()) {
            (true, Some(_)) => "sasl_ssl",
            (true, None) => "ssl",
            (false, Some(_)) => "sasl_plaintext",
            (false, None) => "plaintext",
        };
        config.set("security.protocol", security);

        if let Some(mechanism) = self.option.sasl.mechanism() {
            config
                .set("sasl.mechanism", mechanism)
                .set("sasl.username", &self.option.username)
                .set("sasl.password", &self.option.password);
        }

        if self.option.ssl {
            if self.option.skip_certificate_verify {
                config.set("enable.ssl.certificate.verification", "false");
            } else {
                let material = &self.option.tls_material;
                if !material.cert.is_empty() {
                    config
                        .set("ssl.certificate.pem", &material.cert)
                        .set("ssl.key.pem", &material.key);
                }
                if !material.ca.is_empty() {
                    config.set("ssl.ca.pem", &material.ca);
                }
            }
        }

        config
    }
}

#[async_trait::async_trait]
impl Monitor for KafkaChecker {
    fn name(&self) -> &'static str {
        "kafka_producer"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.brokers.is_empty() {
            return Err(CheckError::Config("brokers list is empty".into()));
        }
        if self.config.topic.is_empty() {
            return Err(CheckError::Config("topic is empty".into()));
        }
        let brokers = self.config.brokers.join(",");

        let producer: FutureProducer = self
            .client_config()
            .create()
            .map_err(|e| CheckError::Config(format!("invalid producer configuration: {e}")))?;

        let (partition, offset) = cx
            .run(PRODUCE_TIMEOUT, async {
                let record = FutureRecord::<(), String>::to(&self.config.topic)
                    .payload(&self.config.message);
                producer
                    .send(record, PRODUCE_TIMEOUT)
                    .await
                    .map_err(|(e, _)| CheckError::connect("send message to", brokers.clone(), e))
            })
            .await?;

        Ok(serde_json::json!({
            "connected": true,
            "brokers": self.config.brokers,
            "topic": self.config.topic,
            "last_partition": partition,
            "last_offset": offset,
            "ssl_enabled": self.option.ssl,
            "sasl_auth_type": self.option.sasl,
            "producer_message": self.config.message,
        }))
    }
}
