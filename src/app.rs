use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::{
    cli::{Cli, Command},
    domain::{conversation_state::ConversationState, message::ConversationKey},
    ui::{transcript, ChatShell, StdinLineSource},
    usecases::{
        bootstrap,
        context::AppContext,
        list_patients::{list_patients, ListPatientsQuery},
        load_messages::{load_messages, LoadMessagesQuery},
        reconcile_read::reconcile_read_state,
        send_message::{send_message, SendMessageCommand},
    },
};

const COMMAND_FAILED: &str = "APP_COMMAND_FAILED";

pub fn run(cli: Cli) -> Result<()> {
    let context = bootstrap::bootstrap(cli.config.as_deref(), cli.offline)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(dispatch(&context, cli.command));
    if let Err(error) = &result {
        tracing::error!(code = COMMAND_FAILED, error = %error, "command failed");
    }
    result
}

async fn dispatch(context: &AppContext, command: Command) -> Result<()> {
    let mut stdout = io::stdout();

    match command {
        Command::Chat { patient_id } => {
            let mut sync = context.chat_sync();
            let mut source = StdinLineSource::new();
            ChatShell::new(&mut sync, &mut stdout)
                .run(ConversationKey::new(patient_id), &mut source)
                .await
        }
        Command::History {
            patient_id,
            mark_read,
        } => {
            let key = ConversationKey::new(patient_id);
            print_history(context, key, mark_read, &mut stdout).await
        }
        Command::Send { patient_id, text } => {
            send_once(context, ConversationKey::new(patient_id), text, &mut stdout).await
        }
        Command::Patients { limit } => print_patients(context, limit, &mut stdout).await,
    }
}

async fn print_patients(context: &AppContext, limit: usize, out: &mut dyn Write) -> Result<()> {
    let output = list_patients(context.patients.as_ref(), ListPatientsQuery { limit }).await?;

    if output.patients.is_empty() {
        writeln!(out, "(no patients)")?;
        return Ok(());
    }

    for patient in &output.patients {
        let age = patient
            .age
            .map(|age| age.to_string())
            .unwrap_or_else(|| "-".to_owned());
        writeln!(
            out,
            "{:<12} {:<28} {:>3}  {}",
            patient.id.as_str(),
            patient.name,
            age,
            patient.status
        )?;
    }

    Ok(())
}

async fn print_history(
    context: &AppContext,
    key: ConversationKey,
    mark_read: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let output = load_messages(context.store.as_ref(), LoadMessagesQuery::new(key.clone())).await?;

    let mut state = ConversationState::default();
    state.set_loading(key.clone());
    state.apply_fetch(output.messages);

    if mark_read {
        let report =
            reconcile_read_state(context.store.as_ref(), &context.actor, state.messages()).await;
        let flipped = state.mark_read(&report.marked);
        writeln!(out, "marked {flipped} message(s) read")?;
        if !report.is_clean() {
            writeln!(
                out,
                "{} message(s) could not be marked read",
                report.failed.len()
            )?;
        }
    }

    writeln!(out, "=== {key} ({} messages) ===", state.messages().len())?;
    for line in transcript::render_transcript(state.messages(), &context.actor) {
        writeln!(out, "{line}")?;
    }

    Ok(())
}

async fn send_once(
    context: &AppContext,
    key: ConversationKey,
    text: String,
    out: &mut dyn Write,
) -> Result<()> {
    let stored = send_message(
        context.store.as_ref(),
        &context.actor,
        SendMessageCommand {
            conversation: key,
            content: text,
        },
    )
    .await?;

    writeln!(out, "{}", transcript::render_live_message(&stored, &context.actor))?;
    writeln!(out, "stored as {}", stored.id)?;
    Ok(())
}
