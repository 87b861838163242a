//! Interactive operator console
//!
//! Line-oriented commands read from stdin:
//!
//! | Command | Effect |
//! |---|---|
//! | `reload` | reload restream definitions |
//! | `restreams` | list restreams and endpoints |
//! | `restream stop <id>` | stop a live restream |
//! | `debug` | toggle debug logging |
//! | `help` | list commands |
//! | `exit` | leave the console |

use std::fmt::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::registry::RegistryError;
use crate::relay::Relay;

const HELP: &str = "\
Commands:
  reload                 reload configs
  restreams              list restreams
  restream stop <id>     stop a restream
  debug                  toggle debug messages
  help                   show this help
  exit                   leave the console
";

/// Runtime switch for verbose logging
pub trait DebugSwitch: Send + Sync {
    /// Flip debug logging; returns whether it is now on
    fn toggle(&self) -> bool;
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reload,
    Restreams,
    Stop(Option<String>),
    Debug,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (None, _) => Command::Empty,
            (Some("reload"), _) => Command::Reload,
            (Some("restreams"), _) => Command::Restreams,
            (Some("restream"), Some("stop")) => Command::Stop(words.next().map(str::to_string)),
            (Some("debug"), _) => Command::Debug,
            (Some("help"), _) => Command::Help,
            (Some("exit") | Some("quit"), _) => Command::Exit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

pub struct Console {
    relay: Relay,
    debug: Option<Box<dyn DebugSwitch>>,
}

impl Console {
    pub fn new(relay: Relay) -> Self {
        Self { relay, debug: None }
    }

    /// Let the `debug` command flip log verbosity through `switch`
    pub fn with_debug_switch(mut self, switch: Box<dyn DebugSwitch>) -> Self {
        self.debug = Some(switch);
        self
    }

    /// Execute one command, returning what to print
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Reload => match self.relay.reload().await {
                Ok(count) => format!("Loaded {} restreams\n", count),
                Err(e) => format!("Reload failed: {}\n", e),
            },
            Command::Restreams => self.list().await,
            Command::Stop(None) => "Missing restream ID\n".to_string(),
            Command::Stop(Some(id)) => match self.relay.stop(&id).await {
                Ok(name) => format!("Stop command sent to {}\n", name),
                Err(RegistryError::RestreamNotFound(_)) => {
                    "Restream with that ID does not exist.\n".to_string()
                }
                Err(_) => "Restream wasn't live.\n".to_string(),
            },
            Command::Debug => match &self.debug {
                Some(switch) => {
                    if switch.toggle() {
                        "Debug messages on\n".to_string()
                    } else {
                        "Debug messages off\n".to_string()
                    }
                }
                None => "Debug toggle unavailable\n".to_string(),
            },
            Command::Help => HELP.to_string(),
            Command::Exit | Command::Empty => String::new(),
            Command::Unknown(line) => format!("Unknown command: {}\n", line),
        }
    }

    async fn list(&self) -> String {
        let mut out = String::new();
        for restream in self.relay.list().await {
            let _ = writeln!(
                out,
                "{}] {} - streaming: {}",
                restream.id, restream.name, restream.streaming
            );
            for (id, endpoint) in &restream.endpoints {
                let _ = writeln!(
                    out,
                    "\t{}] {} - pushing: {}",
                    id, endpoint.name, endpoint.connected
                );
                if restream.streaming && !endpoint.connected {
                    let _ = writeln!(
                        out,
                        "\t\tError: {}",
                        endpoint.connect_err.as_deref().unwrap_or_default()
                    );
                }
            }
        }
        out
    }

    /// Read commands until `exit` or end of input
    ///
    /// Returns true when the operator asked to exit.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<bool>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output.write_all(b"> ").await?;
        output.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let command = Command::parse(&line);
            if command == Command::Exit {
                return Ok(true);
            }

            let text = self.execute(command).await;
            output.write_all(text.as_bytes()).await?;
            output.write_all(b"> ").await?;
            output.flush().await?;
        }

        tracing::debug!("Console input closed");
        Ok(false)
    }
}
