use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "alumnet-server", about = "Alumnet realtime presence and call signaling gateway")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/alumnet.toml")]
    pub config: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long)]
    pub log_json: bool,
}
