//! Console Commands
//!
//! Line-oriented commands for driving a [`DownloadManager`] from a terminal.
//! Each command returns a JSON value on success and a message on failure.

use log::debug;
use serde_json::json;
use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::NetworkConstraint;
use crate::format::format_bytes;
use crate::session::DownloadManager;

pub const HELP: &str = "\
Commands:
  download <id> <path> <url>   Start a download under <id>
  pause <id>                   Pause a download
  resume <id>                  Resume a paused download
  cancel <id>                  Cancel a download
  cancel-all                   Cancel every download
  delete-all                   Cancel every download and delete its files
  progress <id>                Percent complete
  size <id>                    Total size
  downloaded <id>              Bytes downloaded so far
  list                         Registered downloads
  network <wifi|any|unmetered|disabled|0-3>
                               Network constraint for new downloads
  help                         Show this help
  quit                         Shut down and exit";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Download {
        id: String,
        destination: PathBuf,
        url: String,
    },
    Pause(String),
    Resume(String),
    Cancel(String),
    CancelAll,
    DeleteAll,
    Progress(String),
    Size(String),
    Downloaded(String),
    List,
    Network(NetworkConstraint),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err("Empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let id = |usage: &str| -> Result<String, String> {
            match args.as_slice() {
                [id] => Ok(id.to_string()),
                _ => Err(format!("Usage: {}", usage)),
            }
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "download" => match args.as_slice() {
                [id, destination, url] => Self::Download {
                    id: id.to_string(),
                    destination: PathBuf::from(destination),
                    url: url.to_string(),
                },
                _ => return Err("Usage: download <id> <path> <url>".to_string()),
            },
            "pause" => Self::Pause(id("pause <id>")?),
            "resume" => Self::Resume(id("resume <id>")?),
            "cancel" => Self::Cancel(id("cancel <id>")?),
            "cancel-all" => Self::CancelAll,
            "delete-all" => Self::DeleteAll,
            "progress" => Self::Progress(id("progress <id>")?),
            "size" => Self::Size(id("size <id>")?),
            "downloaded" => Self::Downloaded(id("downloaded <id>")?),
            "list" | "ls" => Self::List,
            "network" => Self::Network(id("network <mode>")?.parse()?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("Unknown command: {} (try 'help')", other)),
        };
        Ok(command)
    }
}

/// Run a command against the manager
///
/// `Quit` only reports; shutting down is up to the caller.
pub fn execute(
    manager: &DownloadManager,
    command: ConsoleCommand,
) -> Result<serde_json::Value, String> {
    debug!("Console command: {:?}", command);

    let value = match command {
        ConsoleCommand::Download {
            id,
            destination,
            url,
        } => {
            manager.download_file(&id, &destination, &url)?;
            json!({ "submitted": id })
        }
        ConsoleCommand::Pause(id) => {
            manager.pause(&id)?;
            json!({ "pauseRequested": id })
        }
        ConsoleCommand::Resume(id) => {
            manager.resume(&id)?;
            json!({ "resumeRequested": id })
        }
        ConsoleCommand::Cancel(id) => {
            manager.cancel(&id)?;
            json!({ "cancelled": id })
        }
        ConsoleCommand::CancelAll => {
            manager.cancel_all_downloads()?;
            json!({ "cancelledAll": true })
        }
        ConsoleCommand::DeleteAll => {
            manager.delete_all_downloads()?;
            json!({ "deletedAll": true })
        }
        ConsoleCommand::Progress(id) => {
            let progress = manager.progress(&id)?;
            json!({ "id": id, "progress": progress })
        }
        ConsoleCommand::Size(id) => {
            let size = manager.file_size(&id)?;
            json!({ "id": id, "totalBytes": size, "total": format_bytes(size) })
        }
        ConsoleCommand::Downloaded(id) => {
            let downloaded = manager.downloaded_size(&id)?;
            json!({
                "id": id,
                "downloadedBytes": downloaded,
                "downloaded": format_bytes(downloaded),
            })
        }
        ConsoleCommand::List => {
            serde_json::to_value(manager.sessions()).map_err(|e| e.to_string())?
        }
        ConsoleCommand::Network(network) => {
            manager.set_network_constraint(network);
            json!({ "network": network, "code": network.code() })
        }
        ConsoleCommand::Help => json!({ "help": HELP }),
        ConsoleCommand::Quit => json!({ "quit": true }),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use std::sync::Arc;

    #[test]
    fn test_parse_download() {
        let command: ConsoleCommand = "download video-1 /tmp/v.mp4 https://example.com/v.mp4"
            .parse()
            .unwrap();
        assert_eq!(
            command,
            ConsoleCommand::Download {
                id: "video-1".to_string(),
                destination: PathBuf::from("/tmp/v.mp4"),
                url: "https://example.com/v.mp4".to_string(),
            }
        );
        assert!("download video-1".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(
            "pause a".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Pause("a".to_string()))
        );
        assert_eq!("  CANCEL-ALL ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::CancelAll));
        assert_eq!(
            "network wifi".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Network(NetworkConstraint::WifiOnly))
        );
        assert_eq!(
            "network 2".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Network(NetworkConstraint::UnmeteredOnly))
        );
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
        assert!("pause".parse::<ConsoleCommand>().is_err());
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("frobnicate".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test]
    async fn test_execute_against_manager() {
        let engine = Arc::new(InMemoryEngine::new());
        let manager = DownloadManager::new(InMemoryEngine::factory(&engine));

        let err = execute(&manager, ConsoleCommand::Pause("a".to_string())).unwrap_err();
        assert!(err.contains("not initialized"));

        manager.initialize(2, NetworkConstraint::Any, false).await;
        execute(&manager, ConsoleCommand::Network(NetworkConstraint::Disabled)).unwrap();
        assert_eq!(manager.network_constraint(), NetworkConstraint::Disabled);

        let value = execute(
            &manager,
            "download a /tmp/a https://example.com/a".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(value["submitted"], "a");

        let listed = execute(&manager, ConsoleCommand::List).unwrap();
        assert_eq!(listed[0]["id"], "a");
        assert_eq!(listed[0]["status"], "pending");

        let err = execute(&manager, ConsoleCommand::Progress("zzz".to_string())).unwrap_err();
        assert!(err.contains("zzz"));
    }
}
