use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server. Type EXIT on its console to shut it down.
    Server(ServerArgs),
    /// Connect to a server under a client name and chat interactively.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Interface the server binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name to register with; letters and digits only.
    pub name: String,

    /// Host name or address of the server.
    pub host: String,

    /// Port the server listens on.
    pub port: u16,
}
