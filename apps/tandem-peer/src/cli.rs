use clap::{Args, Parser};
use std::path::PathBuf;

use crate::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tandem-peer",
    about = "Join a tandem session and negotiate synthetic media with the other peer",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "TANDEM_RELAY_URL",
        default_value = "ws://127.0.0.1:8080",
        help = "Base URL of the tandem relay"
    )]
    pub relay: String,

    #[arg(
        long,
        short = 's',
        env = "TANDEM_SESSION",
        help = "Session id shared with the other peer"
    )]
    pub session: String,

    #[arg(long, env = "TANDEM_PEER_ID", help = "Preferred peer id on the relay")]
    pub peer_id: Option<String>,

    #[arg(long, env = "TANDEM_PEER_LABEL", help = "Human readable label shown to the other peer")]
    pub label: Option<String>,

    #[arg(
        long,
        help = "Skip attaching the configured initial tracks when the session opens"
    )]
    pub no_start: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "TANDEM_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "TANDEM_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
