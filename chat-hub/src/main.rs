use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_hub::{
    cli::{Cli, Command, ServeArgs},
    client,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Connect(args) => client::run(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind chat hub to {}", args.listen))?;
    let server = Server::new(listener, args.server_config());
    let addr = server
        .local_addr()
        .context("chat hub listener has no local address")?;

    // Tests and scripts read the bound address off the end of this line.
    let idle = match args.idle_timeout {
        Some(secs) => format!("{secs}s"),
        None => "off".to_string(),
    };
    info!("chat hub accepting sessions (idle timeout {idle}) on {addr}");

    server.run_until_ctrl_c().await.inspect_err(|err| {
        warn!(error = ?err, "chat hub stopped serving");
    })
}
