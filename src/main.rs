//! Termcast CLI - mirror a terminal UI to remote browsers.
//!
//! This is the binary entry point. See the `termcast` library for the
//! core functionality. Both subcommands run the built-in demo
//! application; embedding hosts use the library directly with their
//! own [`termcast::RendererFactory`].

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use termcast::demo::DemoFactory;
use termcast::{
    serve, Config, MuxServer, SessionRegistry, TunnelClient, TunnelConfig, TunnelError,
};

/// Global allocator. mimalloc provides better multi-threaded
/// performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "termcast", about = "Mirror a terminal UI to remote browsers", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve viewer channels directly on a local address.
    Serve {
        /// Listen address (host:port).
        #[arg(long)]
        addr: Option<String>,
        /// Namespace streams are created under.
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Share through a relay and print the public URL.
    Share {
        /// Relay URL (wss:// or https://).
        #[arg(long)]
        relay: Option<String>,
        /// Tunnel id to bind; random when omitted.
        #[arg(long)]
        id: Option<String>,
        /// Namespace on the relay.
        #[arg(long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Command::Serve { addr, namespace } => {
            let addr = addr.unwrap_or_else(|| config.bind_addr.clone());
            let namespace = namespace.unwrap_or_else(|| config.namespace.clone());

            let registry = Arc::new(SessionRegistry::new(Arc::new(DemoFactory)));
            let mux = MuxServer::new(registry, config.stream_defaults(), None);

            println!("Serving on ws://{addr}/multiplexer?namespace={namespace}&id=<id>");
            serve::serve(&addr, mux).await
        }

        Command::Share {
            relay,
            id,
            namespace,
        } => {
            let relay_url = relay.unwrap_or_else(|| config.relay_url.clone());
            let id = id.unwrap_or_else(|| {
                SessionRegistry::allocate_id()
                    .chars()
                    .take(8)
                    .collect::<String>()
            });

            let client = TunnelClient::new(
                TunnelConfig {
                    relay_url,
                    id,
                    namespace,
                    defaults: config.stream_defaults(),
                },
                Arc::new(DemoFactory),
            );

            println!("Share URL: {}", client.share_url());
            match client
                .connect(
                    None,
                    Some(Box::new(|| {
                        println!("Disconnected from relay.");
                    })),
                )
                .await
            {
                Ok(()) => Ok(()),
                Err(TunnelError::AlreadyConnected) => {
                    anyhow::bail!("that tunnel id already has a connected host")
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
