//! toolbridge server - main entry point.
//!
//! Builds a dispatcher from the selected toolkit(s) and serves it over:
//! - stdio: newline-delimited JSON, native messages or MCP JSON-RPC
//! - tcp: length-prefixed msgpack frames

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use toolbridge::dispatch::Dispatcher;
use toolbridge::ipc::{serve_stdio, IpcServer, LineProtocol, ServerInfo};
use toolbridge::providers::{bindings_for, ServerKind};
use toolbridge::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Protocol {
    Native,
    Mcp,
}

#[derive(Debug, Parser)]
#[command(name = "toolbridge")]
#[command(about = "Serve databases, web APIs and shell commands as tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Toolkit to expose: database, webapi, medical, terminal or all
    #[arg(short, long, default_value = "all")]
    server: ServerKind,

    #[arg(short, long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Message flavor on stdio
    #[arg(short, long, value_enum, default_value_t = Protocol::Mcp)]
    protocol: Protocol,

    /// TCP listen address (overrides server.listen_addr)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // Initialize observability
    toolbridge::observability::init_tracing(
        &config.observability.log_level,
        config.observability.json_logs,
    );

    let bindings = bindings_for(cli.server, &config.backends)?;
    let dispatcher = Arc::new(
        Dispatcher::builder(config.dispatch.clone())
            .register_all(bindings)?
            .build(),
    );

    match cli.transport {
        Transport::Stdio => {
            let protocol = match cli.protocol {
                Protocol::Native => LineProtocol::Native,
                Protocol::Mcp => LineProtocol::Mcp(ServerInfo::new(cli.server.server_name())),
            };
            serve_stdio(dispatcher.clone(), protocol, &config.ipc).await?;
        }
        Transport::Tcp => {
            if cli.protocol == Protocol::Mcp {
                tracing::debug!("--protocol only applies to stdio; tcp speaks msgpack frames");
            }
            let addr = match cli.listen {
                Some(addr) => addr,
                None => config.server.listen_addr.parse()?,
            };
            tracing::info!("toolbridge ({}) starting on {}", cli.server, addr);

            let server = IpcServer::new(dispatcher.clone(), addr, config.ipc.clone());
            tokio::select! {
                result = server.serve() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                    server.shutdown();
                }
            }
        }
    }

    dispatcher.shutdown();
    Ok(())
}
