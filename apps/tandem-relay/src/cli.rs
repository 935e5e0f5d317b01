use clap::Parser;
use std::time::Duration;

use tandem_relay::Config;

#[derive(Parser, Debug)]
#[command(name = "tandem-relay")]
#[command(about = "Signaling relay pairing two tandem peers per session")]
pub struct Cli {
    /// Port to listen on (overrides TANDEM_RELAY_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind (overrides TANDEM_RELAY_BIND)
    #[arg(long)]
    pub bind: Option<String>,

    /// Seconds of silence before a participant is dropped
    #[arg(long)]
    pub heartbeat_timeout: Option<u64>,
}

impl Cli {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(secs) = self.heartbeat_timeout.filter(|secs| *secs > 0) {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from(["tandem-relay", "-p", "9000", "--heartbeat-timeout", "5"])
            .unwrap();
        let config = cli.apply(Config::default());
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
    }

    #[test]
    fn no_flags_keeps_config() {
        let cli = Cli::try_parse_from(["tandem-relay"]).unwrap();
        assert_eq!(cli.apply(Config::default()), Config::default());
    }
}
