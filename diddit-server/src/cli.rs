use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH  (default: ./config.yaml, optional)
  JWT_SECRET   (required unless set in the config file)
  DB_PATH      (alias DATABASE_URL, default: data/diddit.db)
  PORT         (default: 3000 or config.listen_port)
  CORS_ORIGIN  (dev only: allowed browser origin)
  RUST_LOG     (log filter, default: info)

Command-line flags win over the environment, which wins over the config file.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "diddit-server",
    version,
    about = "Diddit! family chore tracker API server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to the YAML config file (overrides CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Port to listen on (overrides PORT and config.listen_port)
    #[arg(long)]
    pub port: Option<u16>,
    /// SQLite database file (overrides DB_PATH)
    #[arg(long)]
    pub db_path: Option<String>,
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a bcrypt hash of a password (read from stdin when omitted)
    HashPassword {
        password: Option<String>,
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}
