//! Plain-text rendering of a conversation for the line shell.
//!
//! Consecutive messages from the same sender share one header line, and a
//! date separator is emitted whenever the local calendar day changes.

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::domain::message::{Actor, Message};

const INDENT: &str = "      ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptElement {
    DateSeparator(String),
    Message {
        time: String,
        /// Present on the first message of a sender run.
        sender: Option<String>,
        content: String,
        unread: bool,
    },
}

pub fn build_transcript(messages: &[Message], actor: &Actor) -> Vec<TranscriptElement> {
    let mut elements = Vec::new();
    let mut prev_date: Option<NaiveDate> = None;
    let mut prev_sender: Option<&str> = None;

    for message in messages {
        let date = local_time(message.created_at).date_naive();

        if prev_date != Some(date) {
            elements.push(TranscriptElement::DateSeparator(format_date(date)));
            prev_sender = None;
        }

        let sender = sender_label(message, actor);
        elements.push(TranscriptElement::Message {
            time: format_time(message.created_at),
            sender: (prev_sender != Some(sender)).then(|| sender.to_owned()),
            content: message.content.clone(),
            unread: message.is_unread_for(actor),
        });

        prev_date = Some(date);
        prev_sender = Some(sender);
    }

    elements
}

pub fn render_transcript(messages: &[Message], actor: &Actor) -> Vec<String> {
    let elements = build_transcript(messages, actor);
    if elements.is_empty() {
        return vec!["(no messages yet)".to_owned()];
    }

    elements.iter().flat_map(render_element).collect()
}

/// One self-contained line for a message that arrived after the transcript was printed.
pub fn render_live_message(message: &Message, actor: &Actor) -> String {
    format!(
        "{:>5} {}: {}",
        format_time(message.created_at),
        sender_label(message, actor),
        message.content.replace('\n', " ")
    )
}

fn render_element(element: &TranscriptElement) -> Vec<String> {
    match element {
        TranscriptElement::DateSeparator(date) => vec![format!("--- {date} ---")],
        TranscriptElement::Message {
            time,
            sender,
            content,
            unread,
        } => {
            let marker = if *unread { " *" } else { "" };
            let mut lines = Vec::new();
            let mut content_lines = content.lines();

            match sender {
                Some(sender) => {
                    lines.push(format!("{time:>5} {sender}:{marker}"));
                    lines.extend(content_lines.map(|line| format!("{INDENT}{line}")));
                }
                None => {
                    let first = content_lines.next().unwrap_or_default();
                    lines.push(format!("{time:>5} {first}{marker}"));
                    lines.extend(content_lines.map(|line| format!("{INDENT}{line}")));
                }
            }

            lines
        }
    }
}

fn sender_label<'a>(message: &'a Message, actor: &Actor) -> &'a str {
    if message.sender_id == actor.id {
        "you"
    } else {
        message.sender_role.as_str()
    }
}

fn local_time(timestamp: DateTime<Utc>) -> DateTime<Local> {
    timestamp.with_timezone(&Local)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%-d %b %Y").to_string()
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    local_time(timestamp).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::domain::message::{ConversationKey, MessageId, SenderRole};

    // Midday UTC keeps both days distinct in every real-world offset.
    fn feb_14_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).single().expect("ts")
    }

    fn msg(
        id: &str,
        sender_id: &str,
        role: SenderRole,
        content: &str,
        at: DateTime<Utc>,
    ) -> Message {
        Message {
            id: MessageId::new(id),
            conversation: ConversationKey::new("P1"),
            sender_id: sender_id.to_owned(),
            sender_role: role,
            content: content.to_owned(),
            is_read: true,
            created_at: at,
        }
    }

    fn doctor() -> Actor {
        Actor::new("doc-1", SenderRole::Doctor)
    }

    #[test]
    fn groups_consecutive_messages_from_same_sender() {
        let messages = vec![
            msg("1", "pat-1", SenderRole::Patient, "First", feb_14_noon()),
            msg(
                "2",
                "pat-1",
                SenderRole::Patient,
                "Second",
                feb_14_noon() + TimeDelta::minutes(1),
            ),
        ];

        let elements = build_transcript(&messages, &doctor());

        assert_eq!(elements.len(), 3);
        assert!(matches!(&elements[0], TranscriptElement::DateSeparator(_)));
        assert!(matches!(
            &elements[1],
            TranscriptElement::Message { sender: Some(sender), .. } if sender == "patient"
        ));
        assert!(matches!(
            &elements[2],
            TranscriptElement::Message { sender: None, .. }
        ));
    }

    #[test]
    fn own_messages_are_labelled_you() {
        let messages = vec![msg("1", "doc-1", SenderRole::Doctor, "Hi", feb_14_noon())];

        let elements = build_transcript(&messages, &doctor());

        assert!(matches!(
            &elements[1],
            TranscriptElement::Message { sender: Some(sender), .. } if sender == "you"
        ));
    }

    #[test]
    fn inserts_separator_and_resets_grouping_on_new_day() {
        let messages = vec![
            msg("1", "pat-1", SenderRole::Patient, "Day 1", feb_14_noon()),
            msg(
                "2",
                "pat-1",
                SenderRole::Patient,
                "Day 2",
                feb_14_noon() + TimeDelta::days(1),
            ),
        ];

        let elements = build_transcript(&messages, &doctor());

        assert_eq!(elements.len(), 4);
        assert!(matches!(&elements[2], TranscriptElement::DateSeparator(_)));
        assert!(matches!(
            &elements[3],
            TranscriptElement::Message { sender: Some(_), .. }
        ));
    }

    #[test]
    fn unread_counterparty_messages_are_flagged() {
        let mut unread = msg("1", "pat-1", SenderRole::Patient, "ping", feb_14_noon());
        unread.is_read = false;

        let lines = render_transcript(&[unread], &doctor());

        assert!(lines[1].ends_with(" *"));
        assert_eq!(lines[2], format!("{INDENT}ping"));
    }

    #[test]
    fn empty_conversation_renders_placeholder() {
        assert_eq!(render_transcript(&[], &doctor()), vec!["(no messages yet)"]);
    }

    #[test]
    fn live_line_flattens_multiline_content() {
        let message = msg("1", "pat-1", SenderRole::Patient, "a\nb", feb_14_noon());

        let line = render_live_message(&message, &doctor());

        assert!(line.ends_with("patient: a b"));
    }

    #[test]
    fn format_date_produces_day_month_year() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 14).expect("date");

        assert_eq!(format_date(date), "14 Feb 2026");
    }
}
