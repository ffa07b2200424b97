use std::net::{Ipv4Addr, SocketAddr};

use clap::Parser;
use tracing::info;

use hfs::config::{Args, ServerConfig};
use hfs::logging::init_tracing;
use hfs::server::FileServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.get_version {
        print!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing(&args.log_level);
    info!("HFS {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from(&args);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let server = FileServer::start(config, addr).await?;
    info!("Started HTTP File Server on port: {}", server.port());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await;
    Ok(())
}
