//! Event → [`Document`] construction.
//!
//! [`build`] is pure and total over [`EventKind`]: every variant yields a
//! document with a non-empty `formatted` line, its timestamp, and its
//! channel. All free text passes through [`sanitize`] first.

use chrono::NaiveDateTime;

use crate::models::{nick_of, Document, EventKind};
use crate::sanitize::sanitize;

/// Build the document for one event on `channel` (already unprefixed).
pub fn build(channel: &str, event: &EventKind, received_at: NaiveDateTime) -> Document {
    match event {
        EventKind::Message { actor, text } => {
            let actor = clean_nick(actor);
            let text = sanitize(text);
            let mut doc = Document::new(channel, received_at, format!("<{}> {}", actor, text));
            doc.actor = Some(actor);
            doc.message = Some(text);
            doc
        }
        EventKind::Action { actor, text } => {
            let actor = clean_nick(actor);
            let text = sanitize(text);
            let mut doc = Document::new(channel, received_at, format!("* {} {}", actor, text));
            doc.actor = Some(actor);
            doc.message = Some(text);
            doc
        }
        EventKind::Join { actor } => {
            let actor = clean_nick(actor);
            let mut doc = Document::new(channel, received_at, format!("(-) {} joined", actor));
            doc.actor = Some(actor);
            doc
        }
        EventKind::Part { actor } => {
            let actor = clean_nick(actor);
            let mut doc = Document::new(channel, received_at, format!("(-) {} parted", actor));
            doc.actor = Some(actor);
            doc
        }
        EventKind::Quit { actor, reason } => {
            let actor = clean_nick(actor);
            let reason = non_empty(sanitize(reason));
            let formatted = format!("(-) {} quit{}", actor, parenthesized(&reason));
            let mut doc = Document::new(channel, received_at, formatted);
            doc.actor = Some(actor);
            doc.reason = reason;
            doc
        }
        EventKind::Kick {
            kickee,
            kicker,
            reason,
        } => {
            let kickee = clean_nick(kickee);
            let kicker = clean_nick(kicker);
            let reason = non_empty(sanitize(reason));
            let formatted = format!(
                "(-) {} was kicked by {}{}",
                kickee,
                kicker,
                parenthesized(&reason)
            );
            let mut doc = Document::new(channel, received_at, formatted);
            doc.actor = Some(kickee);
            doc.kicker = Some(kicker);
            doc.reason = reason;
            doc
        }
        EventKind::Rename { old_name, new_name } => {
            let old_name = clean_nick(old_name);
            let new_name = clean_nick(new_name);
            let formatted = format!("(-) {} changed nick from {}", new_name, old_name);
            let mut doc = Document::new(channel, received_at, formatted);
            doc.actor = Some(new_name);
            doc.old_name = Some(old_name);
            doc
        }
        EventKind::Topic { actor, topic } => {
            let actor = clean_nick(actor);
            let topic = sanitize(topic);
            let formatted = format!("(-) {} changed topic to {}", actor, topic);
            let mut doc = Document::new(channel, received_at, formatted);
            doc.actor = Some(actor);
            doc.topic = Some(topic);
            doc
        }
        EventKind::Mode {
            actor,
            adding,
            modes,
            args,
        } => {
            let actor = clean_nick(actor);
            let polarity = if *adding { '+' } else { '-' };
            let args: Vec<String> = args
                .iter()
                .map(|a| sanitize(a))
                .filter(|a| !a.is_empty())
                .collect();
            let mut formatted = format!("(-) {} set mode {}{}", actor, polarity, sanitize(modes));
            if !args.is_empty() {
                formatted.push(' ');
                formatted.push_str(&args.join(" "));
            }
            let mut doc = Document::new(channel, received_at, formatted);
            doc.actor = Some(actor);
            doc
        }
    }
}

/// Render a document as one log line, without the trailing newline.
pub fn format_line(doc: &Document) -> String {
    format!("{} {}", doc.timestamp(), doc.formatted)
}

fn clean_nick(user: &str) -> String {
    sanitize(nick_of(user))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parenthesized(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" ({})", r),
        None => String::new(),
    }
}
