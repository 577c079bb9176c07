use crate::domain::message::ConversationKey;

/// One line typed into the chat shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Send(String),
    Open(ConversationKey),
    Retry,
    /// Re-submit the last message the store refused.
    Resend,
    Help,
    Quit,
    Invalid(String),
    Empty,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Send(line.to_owned());
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match (name, argument) {
            ("open", "") => Self::Invalid("usage: /open <patient-id>".to_owned()),
            ("open", patient_id) => Self::Open(ConversationKey::new(patient_id)),
            ("retry", _) => Self::Retry,
            ("resend", _) => Self::Resend,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            // a leading double slash sends the literal text
            _ if command.starts_with('/') => Self::Send(command.to_owned()),
            (other, _) => Self::Invalid(format!("unknown command /{other}; try /help")),
        }
    }
}

pub const HELP_LINES: [&str; 6] = [
    "type a line and press enter to send it",
    "/open <patient-id>  switch conversation",
    "/retry              reload the conversation",
    "/resend             send the last failed message again",
    "/quit               leave",
    "//text              send text starting with a slash",
];
