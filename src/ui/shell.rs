use std::io::Write;

use anyhow::Result;

use crate::{
    domain::{conversation_state::MergeOutcome, message::ConversationKey},
    usecases::chat_sync::{ChatSync, SyncUpdate},
};

use super::{
    command::{ShellCommand, HELP_LINES},
    line_source::LineSource,
    transcript::{render_live_message, render_transcript},
};

const SHELL_STARTED: &str = "SHELL_STARTED";
const SHELL_STOPPED: &str = "SHELL_STOPPED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented chat loop: input lines drive the sync, sync updates are printed as they land.
pub struct ChatShell<'a> {
    sync: &'a mut ChatSync,
    out: &'a mut dyn Write,
    last_failed: Option<String>,
}

impl<'a> ChatShell<'a> {
    pub fn new(sync: &'a mut ChatSync, out: &'a mut dyn Write) -> Self {
        Self {
            sync,
            out,
            last_failed: None,
        }
    }

    pub async fn run(
        &mut self,
        initial: ConversationKey,
        source: &mut dyn LineSource,
    ) -> Result<()> {
        tracing::info!(code = SHELL_STARTED, conversation = %initial, "chat shell started");
        self.open(initial)?;

        loop {
            tokio::select! {
                line = source.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if self.handle_command(ShellCommand::parse(&line))? == Flow::Quit {
                        break;
                    }
                }
                update = self.sync.next_update() => self.print_update(update)?,
            }
        }

        self.sync.close();
        tracing::info!(code = SHELL_STOPPED, "chat shell stopped");
        Ok(())
    }

    fn open(&mut self, key: ConversationKey) -> Result<()> {
        writeln!(self.out, "opening conversation {key} ...")?;
        self.last_failed = None;
        self.sync.open(key);
        Ok(())
    }

    fn handle_command(&mut self, command: ShellCommand) -> Result<Flow> {
        match command {
            ShellCommand::Empty => {}
            ShellCommand::Quit => return Ok(Flow::Quit),
            ShellCommand::Help => {
                for line in HELP_LINES {
                    writeln!(self.out, "{line}")?;
                }
            }
            ShellCommand::Invalid(message) => writeln!(self.out, "{message}")?,
            ShellCommand::Open(key) => self.open(key)?,
            ShellCommand::Retry => {
                if self.sync.retry() {
                    writeln!(self.out, "reloading ...")?;
                } else {
                    writeln!(self.out, "no conversation is open")?;
                }
            }
            ShellCommand::Resend => match self.last_failed.take() {
                Some(content) => self.submit(&content)?,
                None => writeln!(self.out, "nothing to resend")?,
            },
            ShellCommand::Send(content) => self.submit(&content)?,
        }

        Ok(Flow::Continue)
    }

    fn submit(&mut self, content: &str) -> Result<()> {
        if let Err(error) = self.sync.send(content) {
            writeln!(self.out, "not sent: {error}")?;
        }
        Ok(())
    }

    fn print_update(&mut self, update: SyncUpdate) -> Result<()> {
        let actor = self.sync.actor();
        match update {
            SyncUpdate::Loaded { conversation, count } => {
                writeln!(self.out, "=== {conversation} ({count} messages) ===")?;
                for line in render_transcript(self.sync.state().messages(), actor) {
                    writeln!(self.out, "{line}")?;
                }
            }
            SyncUpdate::LoadFailed {
                conversation,
                error,
            } => {
                writeln!(
                    self.out,
                    "could not load {conversation}: {error} (type /retry to try again)"
                )?;
            }
            SyncUpdate::ReadSettled { report, .. } => {
                if !report.failed.is_empty() {
                    writeln!(
                        self.out,
                        "{} message(s) could not be marked read; will retry on next load",
                        report.failed.len()
                    )?;
                }
            }
            SyncUpdate::Sent {
                outcome: MergeOutcome::Deferred,
                ..
            } => writeln!(self.out, "message stored; /retry to reload the conversation")?,
            SyncUpdate::Sent { message, outcome } | SyncUpdate::Received { message, outcome } => {
                if outcome.changed() {
                    writeln!(self.out, "{}", render_live_message(&message, actor))?;
                }
            }
            SyncUpdate::SendFailed { content, error, .. } => {
                writeln!(self.out, "not sent: {error} (type /resend to try again)")?;
                self.last_failed = Some(content);
            }
            SyncUpdate::SubscriptionActive { .. } => writeln!(self.out, "live updates on")?,
            SyncUpdate::SubscriptionFailed {
                error, retry_in, ..
            } => {
                writeln!(self.out, "live updates unavailable: {error}")?;
                self.print_retry_hint(retry_in)?;
            }
            SyncUpdate::SubscriptionLost { retry_in, .. } => {
                writeln!(self.out, "live updates interrupted")?;
                self.print_retry_hint(retry_in)?;
            }
            SyncUpdate::Resubscribing { .. } | SyncUpdate::Dropped { .. } => {}
        }

        Ok(())
    }

    fn print_retry_hint(&mut self, retry_in: Option<std::time::Duration>) -> Result<()> {
        match retry_in {
            Some(delay) => writeln!(self.out, "reconnecting in {}ms", delay.as_millis())?,
            None => writeln!(
                self.out,
                "showing fetched history only; /retry to reconnect"
            )?,
        }
        Ok(())
    }
}
