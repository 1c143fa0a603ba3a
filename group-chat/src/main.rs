use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use group_chat::{
    cli::{Cli, Command, ServerArgs},
    client,
    server::Server,
};

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let server = Server::bind((args.host.as_str(), args.port)).await?;
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);
    if let Err(err) = server.run_until_operator_exit().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Bad arguments print usage but are not treated as a failure.
            let _ = err.print();
            return;
        }
    };

    init_tracing();

    let result = match cli.command {
        Command::Server(args) => run_server(args).await,
        Command::Client(args) => client::run(args).await,
    };

    // Exit here rather than returning: a pending blocking stdin read would
    // otherwise hold the runtime open until the user presses enter.
    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}
