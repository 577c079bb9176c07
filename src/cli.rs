use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "carenav",
    about = "Care-team client for patient conversations with live sync"
)]
pub struct Cli {
    /// Path to config file (default: ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the in-process store instead of Supabase
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Open a conversation and chat with live updates
    Chat { patient_id: String },
    /// Print a conversation's history
    History {
        patient_id: String,
        /// Mark the patient's unread messages as read
        #[arg(long)]
        mark_read: bool,
    },
    /// Send one message and print the stored row
    Send { patient_id: String, text: String },
    /// List patients, most recently registered first
    Patients {
        /// How many patients to show (at most 200)
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_chat_with_global_flags() {
        let cli = Cli::parse_from([
            "carenav",
            "chat",
            "P1",
            "--config",
            "custom.toml",
            "--offline",
        ]);

        assert_eq!(
            cli.command,
            Command::Chat {
                patient_id: "P1".to_owned()
            }
        );
        assert!(cli.offline);
        assert_eq!(
            cli.config
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("custom.toml".to_owned())
        );
    }

    #[test]
    fn parses_history_flags() {
        let cli = Cli::parse_from(["carenav", "history", "P1", "--mark-read"]);

        assert_eq!(
            cli.command,
            Command::History {
                patient_id: "P1".to_owned(),
                mark_read: true
            }
        );
        assert!(!cli.offline);
    }

    #[test]
    fn parses_send_text() {
        let cli = Cli::parse_from(["carenav", "send", "P1", "see you at 10"]);

        assert_eq!(
            cli.command,
            Command::Send {
                patient_id: "P1".to_owned(),
                text: "see you at 10".to_owned()
            }
        );
    }

    #[test]
    fn parses_patients_with_default_and_explicit_limit() {
        let cli = Cli::parse_from(["carenav", "patients"]);
        assert_eq!(cli.command, Command::Patients { limit: 50 });

        let cli = Cli::parse_from(["carenav", "--offline", "patients", "--limit", "5"]);
        assert_eq!(cli.command, Command::Patients { limit: 5 });
        assert!(cli.offline);
    }

    #[test]
    fn requires_a_command() {
        assert!(Cli::try_parse_from(["carenav"]).is_err());
    }
}
