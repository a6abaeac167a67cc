use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "discord-link-relay",
    version,
    about = "Relays link-bearing messages between Discord servers"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<String>,

    /// Load and validate the configuration, then exit.
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}
