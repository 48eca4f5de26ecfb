use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatrelay", version, about = "Streaming chat completion relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server (push channel + completion endpoint)
    Serve,

    /// Chat in the terminal through a running relay
    Chat {
        /// Relay base URL, e.g. http://127.0.0.1:8000
        #[arg(short, long)]
        relay: Option<String>,

        /// Model to request
        #[arg(short, long)]
        model: Option<String>,
    },
}
