/*!
Pluggable service health-check probes.

One uniform contract — [`Monitor`] with `name`/`check` — implemented by
many independent providers, each probing one kind of backend: HTTP
endpoints, TCP ports, ICMP hosts, DNS resolvers, TLS certificate expiry,
SQL databases, Redis, MongoDB, MQTT brokers, Kafka clusters and gRPC
services.

Every `check` is a single synchronous best-effort probe bounded by a
[`CheckContext`]; polling, retries and aggregation live with the caller.

## Example

```no_run
use statusprobe::provide::tcp::{TcpChecker, TcpConfig};
use statusprobe::{CheckContext, Monitor};

# async fn run() -> Result<(), statusprobe::CheckError> {
let checker = TcpChecker::new(TcpConfig {
    host: "127.0.0.1".into(),
    port: 6379,
});
let result = checker
    .check(&CheckContext::with_timeout(std::time::Duration::from_secs(2)))
    .await?;
println!("{} reachable: {result}", checker.name());
# Ok(())
# }
```

Heavy backend stacks (databases, brokers, gRPC) are feature-gated; see
the crate features for the full provider list.
*/

pub mod error;
pub mod monitor;
pub mod options;
pub mod provide;

pub use error::{BoxError, CheckError};
pub use monitor::{CheckContext, CheckResult, Monitor};
pub use options::Opt;
