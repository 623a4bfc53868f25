use clap::Parser;
use serde_json::Value;

use rpc_runtime::client::{new_api_client, OutboundRequest};
use rpc_runtime::config::ClientConfig;
use rpc_runtime::routing::parse_descriptor;
use rpc_runtime::Protocol;

#[derive(Parser)]
#[command(name = "rpc-cli")]
#[command(about = "Issue one call to an HTTP or binary RPC service", long_about = None)]
struct Cli {
    /// Wire protocol of the peer (http or binary)
    #[arg(short, long, default_value = "http")]
    protocol: Protocol,

    /// Base URL (http) or host:port (binary)
    #[arg(short, long, default_value = "http://localhost:8080")]
    address: String,

    /// Route descriptor, e.g. "GET::/users/42"
    descriptor: String,

    /// JSON body
    #[arg(short, long)]
    body: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,

    /// Header as key=value (repeatable)
    #[arg(long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = 0)]
    max_retry: u32,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ClientConfig {
        name: "rpc-cli".into(),
        protocol: cli.protocol,
        address: cli.address,
        timeout_ms: cli.timeout_ms,
        max_retry: cli.max_retry,
        wait_to_retry_ms: 500,
        max_connections: 1,
        ..Default::default()
    };
    let client = new_api_client(&config, None)?;

    let (method, path) = parse_descriptor(&cli.descriptor)?;
    let mut req = OutboundRequest::new(method, path);
    req.params.extend(cli.params);
    req.headers.extend(cli.headers);
    if let Some(body) = cli.body {
        req.body = Some(serde_json::from_str::<Value>(&body)?);
    }

    let resp = client.make_request(&req).await;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    if resp.status != rpc_runtime::ApiStatus::Ok {
        std::process::exit(1);
    }
    Ok(())
}
