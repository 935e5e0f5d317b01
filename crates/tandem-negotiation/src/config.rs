use std::env;
use std::fmt;
use std::str::FromStr;

use tandem_proto::MediaKind;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Which side yields when both agents offer at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Politeness {
    /// Rolls back its own offer and answers the remote one.
    Polite,
    /// Ignores the colliding remote offer and keeps waiting for its answer.
    Impolite,
}

impl Politeness {
    /// The participant whose id sorts lower is polite. Both sides compute the
    /// same ordering from the same pair of ids, so exactly one of them yields.
    pub fn from_peer_ids(local_id: &str, remote_id: &str) -> Self {
        if local_id < remote_id {
            Politeness::Polite
        } else {
            Politeness::Impolite
        }
    }

    pub fn is_polite(self) -> bool {
        matches!(self, Politeness::Polite)
    }
}

impl fmt::Display for Politeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Politeness::Polite => f.write_str("polite"),
            Politeness::Impolite => f.write_str("impolite"),
        }
    }
}

impl FromStr for Politeness {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "polite" => Ok(Politeness::Polite),
            "impolite" => Ok(Politeness::Impolite),
            other => Err(format!("unknown politeness '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Settings for one negotiation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// STUN/TURN servers handed to the transport. Empty means host candidates only.
    pub ice_servers: Vec<IceServer>,
    /// Forces a glare role instead of deriving it from the peer ids.
    pub politeness: Option<Politeness>,
    /// Tracks attached by `SessionHandle::start`.
    pub initial_tracks: Vec<MediaKind>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)],
            politeness: None,
            initial_tracks: vec![MediaKind::Video, MediaKind::Audio],
        }
    }
}

impl NegotiationConfig {
    /// No STUN/TURN; useful when both peers share a host or LAN.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `TANDEM_ICE_SERVERS` (comma separated), `TANDEM_TURN_USERNAME`,
    /// `TANDEM_TURN_CREDENTIAL`, `TANDEM_LOCALHOST_ONLY`, `TANDEM_POLITENESS`
    /// and `TANDEM_INITIAL_TRACKS` through `lookup`. Unparseable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(servers) = lookup("TANDEM_ICE_SERVERS") {
            let username = lookup("TANDEM_TURN_USERNAME");
            let credential = lookup("TANDEM_TURN_CREDENTIAL");
            config.ice_servers = split_list(&servers)
                .map(|url| IceServer {
                    // Credentials only make sense for TURN entries.
                    username: url.starts_with("turn").then(|| username.clone()).flatten(),
                    credential: url.starts_with("turn").then(|| credential.clone()).flatten(),
                    urls: vec![url.to_string()],
                })
                .collect();
        }

        if lookup("TANDEM_LOCALHOST_ONLY").is_some() {
            config.ice_servers.clear();
        }

        config.politeness = lookup("TANDEM_POLITENESS").and_then(|value| value.parse().ok());

        if let Some(tracks) = lookup("TANDEM_INITIAL_TRACKS") {
            config.initial_tracks = if tracks.trim().eq_ignore_ascii_case("none") {
                Vec::new()
            } else {
                split_list(&tracks)
                    .filter_map(|kind| kind.parse().ok())
                    .collect()
            };
        }

        config
    }

    pub fn with_politeness(mut self, politeness: Politeness) -> Self {
        self.politeness = Some(politeness);
        self
    }

    pub fn with_initial_tracks(mut self, tracks: impl IntoIterator<Item = MediaKind>) -> Self {
        self.initial_tracks = tracks.into_iter().collect();
        self
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
