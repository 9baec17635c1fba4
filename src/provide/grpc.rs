//! gRPC checker: parses caller-supplied proto sources at runtime, builds
//! the request message from JSON, and invokes one unary method over a
//! dynamically-typed codec.

use std::collections::BTreeMap;
use std::time::Duration;

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use serde::{Deserialize, Serialize};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{ClientTlsConfig, Endpoint};

use crate::error::CheckError;
use crate::monitor::{CheckContext, CheckResult, Monitor};

const INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// Target address; a bare `host:port` gains an `http://` or `https://`
    /// scheme from the `tls` flag.
    pub url: String,
    #[serde(default)]
    pub tls: bool,
    /// Fully-qualified service name, e.g. `health.v1.HealthService`.
    #[serde(rename = "proto_service_name")]
    pub service: String,
    #[serde(rename = "proto_method")]
    pub method: String,
    /// Proto file contents keyed by file name; imports resolve against
    /// this map and the bundled well-known types.
    #[serde(rename = "proto_content")]
    pub proto_contents: BTreeMap<String, String>,
    /// JSON-encoded request message.
    pub request: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

pub struct GrpcChecker {
    config: GrpcConfig,
}

impl GrpcChecker {
    pub fn new(config: GrpcConfig) -> Self {
        GrpcChecker { config }
    }

    /// Compile the supplied proto sources and look up the target method.
    fn resolve_method(&self) -> Result<MethodDescriptor, CheckError> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(GoogleFileResolver::new());
        resolver.add(MapResolver {
            files: self.config.proto_contents.clone(),
        });

        let mut compiler = protox::Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);
        for name in self.config.proto_contents.keys() {
            compiler
                .open_file(name)
                .map_err(|e| CheckError::Config(format!("failed to parse proto contents: {e}")))?;
        }
        let pool: DescriptorPool = compiler.descriptor_pool();

        let service = pool
            .get_service_by_name(&self.config.service)
            .ok_or_else(|| {
                CheckError::Config(format!(
                    "service {} not found in proto contents",
                    self.config.service
                ))
            })?;
        let method = service
            .methods()
            .find(|m| m.name() == self.config.method)
            .ok_or_else(|| {
                CheckError::Config(format!(
                    "method {} not found in service {}",
                    self.config.method, self.config.service
                ))
            });
        method
    }

    fn endpoint_url(&self) -> String {
        if self.config.url.contains("://") {
            self.config.url.clone()
        } else if self.config.tls {
            format!("https://{}", self.config.url)
        } else {
            format!("http://{}", self.config.url)
        }
    }
}

#[async_trait::async_trait]
impl Monitor for GrpcChecker {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError> {
        if self.config.url.is_empty() {
            return Err(CheckError::Config("url is empty".into()));
        }
        if self.config.proto_contents.is_empty() {
            return Err(CheckError::Config("proto contents are empty".into()));
        }

        let method = self.resolve_method()?;

        let request_msg = DynamicMessage::deserialize(
            method.input(),
            &mut serde_json::Deserializer::from_str(&self.config.request),
        )
        .map_err(|e| {
            CheckError::Config(format!(
                "request JSON does not match {}: {e}",
                method.input().full_name()
            ))
        })?;

        let url = self.endpoint_url();
        let mut endpoint = Endpoint::from_shared(url.clone())
            .map_err(|e| CheckError::Config(format!("malformed url {url}: {e}")))?
            .connect_timeout(INVOKE_TIMEOUT);
        if self.config.tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| CheckError::Config(format!("TLS setup failed: {e}")))?;
        }

        let channel = cx
            .run(INVOKE_TIMEOUT, async {
                endpoint
                    .connect()
                    .await
                    .map_err(|e| CheckError::connect("connect to", url.clone(), e))
            })
            .await?;

        let mut request = tonic::Request::new(request_msg);
        for (key, value) in &self.config.metadata {
            let key = key
                .parse::<tonic::metadata::MetadataKey<tonic::metadata::Ascii>>()
                .map_err(|e| CheckError::Config(format!("invalid metadata key {key}: {e}")))?;
            let value = value
                .parse()
                .map_err(|e| CheckError::Config(format!("invalid metadata value for {key}: {e}")))?;
            request.metadata_mut().insert(key, value);
        }

        let path = format!("/{}/{}", method.parent_service().full_name(), method.name())
            .parse::<http::uri::PathAndQuery>()
            .map_err(|e| CheckError::Config(format!("invalid rpc path: {e}")))?;

        let started = std::time::Instant::now();
        let response = cx
            .run(INVOKE_TIMEOUT, async {
                let mut grpc = tonic::client::Grpc::new(channel);
                grpc.ready()
                    .await
                    .map_err(|e| CheckError::connect("invoke", url.clone(), e))?;
                grpc.unary(request, path, DynamicCodec::new(method.clone()))
                    .await
                    .map_err(|status| {
                        CheckError::Protocol(format!("rpc failed: {status}"))
                    })
            })
            .await?;
        let elapsed = started.elapsed();

        let response_json = serde_json::to_value(response.into_inner())
            .map_err(|e| CheckError::Protocol(format!("response is not valid JSON: {e}")))?;

        Ok(serde_json::json!({
            "url": self.config.url,
            "method": self.config.method,
            "response": response_json,
            "response_time_ms": elapsed.as_millis() as u64,
        }))
    }
}

/// Resolves imports against the caller-supplied proto source map.
#[derive(Debug)]
struct MapResolver {
    files: BTreeMap<String, String>,
}

impl FileResolver for MapResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        match self.files.get(name) {
            Some(source) => File::from_source(name, source),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

/// Codec that carries [`DynamicMessage`] in both directions.
#[derive(Clone)]
struct DynamicCodec {
    method: MethodDescriptor,
}

impl DynamicCodec {
    fn new(method: MethodDescriptor) -> Self {
        DynamicCodec { method }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            descriptor: self.method.output(),
        }
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = tonic::Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| tonic::Status::internal(format!("failed to encode request: {e}")))
    }
}

struct DynamicDecoder {
    descriptor: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = tonic::Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let message = DynamicMessage::decode(self.descriptor.clone(), src)
            .map_err(|e| tonic::Status::internal(format!("failed to decode response: {e}")))?;
        Ok(Some(message))
    }
}
