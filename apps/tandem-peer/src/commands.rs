use std::str::FromStr;

use tandem_proto::{MediaKind, ParseMediaKindError};
use thiserror::Error;

pub const HELP: &str = "commands: add <video|audio>, remove <video|audio>, tracks, state, help, quit";

/// One line typed at the peer prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerCommand {
    Add(MediaKind),
    Remove(MediaKind),
    Tracks,
    State,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs a media kind (video or audio)")]
    MissingKind(&'static str),
    #[error("unexpected argument '{0}'")]
    Trailing(String),
    #[error(transparent)]
    Kind(#[from] ParseMediaKindError),
}

impl FromStr for PeerCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();

        let command = match verb.as_str() {
            "add" | "+" => PeerCommand::Add(kind_arg(words.next(), "add")?),
            "remove" | "rm" | "-" => PeerCommand::Remove(kind_arg(words.next(), "remove")?),
            "tracks" | "ls" => PeerCommand::Tracks,
            "state" => PeerCommand::State,
            "help" | "?" => PeerCommand::Help,
            "quit" | "exit" | "q" => PeerCommand::Quit,
            _ => return Err(CommandError::Unknown(verb)),
        };

        match words.next() {
            Some(extra) => Err(CommandError::Trailing(extra.to_string())),
            None => Ok(command),
        }
    }
}

fn kind_arg(word: Option<&str>, verb: &'static str) -> Result<MediaKind, CommandError> {
    let word = word.ok_or(CommandError::MissingKind(verb))?;
    Ok(word.parse()?)
}
