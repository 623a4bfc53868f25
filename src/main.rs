//! RPC runtime demo service.
//!
//! Runs the servers declared in the configuration file with two routes:
//!
//! ```text
//! GET::/health      → OK envelope with the app name
//! POST::/echo/:id   → echoes the path variable, query params and body
//! ```
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   HTTP/JSON ───▶│ HttpServer ──┐                               │
//!                 │              ├──▶ Dispatcher ──▶ handlers    │
//!   binary RPC ──▶│ BinaryServer ┘      (pre-handler, routes)    │
//!                 │                                              │
//!                 │ lifecycle: SIGINT/SIGTERM → Shutdown         │
//!                 │ observability: tracing + Prometheus          │
//!                 └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde_json::{json, Value};

use rpc_runtime::api::{handler_fn, ApiResponse, SharedHandler};
use rpc_runtime::config::{load_config, RuntimeConfig, ServerConfig};
use rpc_runtime::error::HandlerError;
use rpc_runtime::observability::{logging, metrics};
use rpc_runtime::{App, Protocol};

#[derive(Parser)]
#[command(name = "rpc-runtime")]
#[command(about = "Demo service exposing health and echo routes", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults to one HTTP and one binary server
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn health(app_name: String) -> SharedHandler {
    handler_fn(move |_req, res| {
        let app_name = app_name.clone();
        Box::pin(async move {
            res.respond(ApiResponse::ok("healthy").with_data(vec![json!({"app": app_name})]))?;
            Ok::<_, HandlerError>(())
        })
    })
}

fn echo() -> SharedHandler {
    handler_fn(|req, res| {
        Box::pin(async move {
            let body: Value = if req.content_text().is_empty() {
                Value::Null
            } else {
                req.content()?
            };
            let echoed = json!({
                "id": req.var("id"),
                "params": req.params(),
                "body": body,
                "protocol": req.protocol(),
                "clientIp": req.client_ip(),
            });
            res.respond(ApiResponse::ok("echo").with_data(vec![echoed]))?;
            Ok::<_, HandlerError>(())
        })
    })
}

fn default_config() -> RuntimeConfig {
    RuntimeConfig {
        servers: vec![
            ServerConfig {
                protocol: Protocol::Http,
                port: 8080,
                ..Default::default()
            },
            ServerConfig {
                protocol: Protocol::Binary,
                port: 9090,
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };

    logging::init(&config.observability);
    tracing::info!(
        app = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        servers = config.servers.len(),
        clients = config.clients.len(),
        "rpc-runtime starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut app = App::from_config(&config)?;
    let app_name = app.name().to_string();
    for server in app.servers_mut() {
        server.set_route("GET::/health", health(app_name.clone()))?;
        server.set_route("POST::/echo/:id", echo())?;
    }

    app.launch().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
