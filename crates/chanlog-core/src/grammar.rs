//! The plaintext log line grammar.
//!
//! Every line written by the channel log writer has the shape
//! `HH:MM:SS <formatted>`, where `formatted` is one of the builder's
//! templates. [`parse_line`] is the inverse used by the batch importer: it
//! recovers every field the template carries and rejects anything else.
//!
//! Known limitation: a message whose text itself looks like a structural
//! line header cannot be told apart from the real thing. Nothing here tries
//! to guess.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;
use crate::models::{Document, DATE_FORMAT, TIME_FORMAT};

static LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<time>[0-9:]{8}) (?P<formatted>",
        r"\(-\) (?P<actor>[^ ]+?) ",
        r"(?:joined|parted|quit",
        r"|was kicked by (?P<kicker>[^ ]+?)",
        r"|changed nick from (?P<old_name>[^ ]+?)",
        r"|changed topic to (?P<topic>.*)",
        r"|set mode .+)",
        r"(?: \((?P<reason>.*)\))?",
        r"|<(?P<message_actor>[^>]+?)> (?P<message>.*)",
        r"|\* (?P<emote_actor>[^ ]+?) (?P<emote>.*)",
        r")$",
    ))
    .expect("log line regex is valid")
});

/// One parsed log line: a time of day plus the fields its template carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub time: NaiveTime,
    pub formatted: String,
    pub actor: Option<String>,
    pub message: Option<String>,
    pub topic: Option<String>,
    pub reason: Option<String>,
    pub old_name: Option<String>,
    pub kicker: Option<String>,
}

impl LogLine {
    /// Attach the channel and calendar day the line's file belongs to.
    pub fn into_document(self, channel: &str, date: NaiveDate) -> Document {
        let mut doc = Document::new(channel, date.and_time(self.time), self.formatted);
        doc.actor = self.actor;
        doc.message = self.message;
        doc.topic = self.topic;
        doc.reason = self.reason;
        doc.old_name = self.old_name;
        doc.kicker = self.kicker;
        doc
    }
}

/// Parse one log line. A trailing `\n` or `\r\n` is ignored.
pub fn parse_line(line: &str) -> Result<LogLine, ParseError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let caps = LINE_PATTERN
        .captures(line)
        .ok_or_else(|| ParseError::NoMatch(line.to_string()))?;

    let time_str = &caps["time"];
    let time = NaiveTime::parse_from_str(time_str, TIME_FORMAT)
        .map_err(|_| ParseError::InvalidTime(time_str.to_string()))?;
    let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

    let mut parsed = LogLine {
        time,
        formatted: caps["formatted"].to_string(),
        actor: None,
        message: None,
        topic: None,
        reason: None,
        old_name: None,
        kicker: None,
    };

    if let Some(actor) = group("message_actor") {
        parsed.actor = Some(actor);
        parsed.message = group("message");
    } else if let Some(actor) = group("emote_actor") {
        parsed.actor = Some(actor);
        parsed.message = group("emote");
    } else {
        parsed.actor = group("actor");
        parsed.kicker = group("kicker");
        parsed.old_name = group("old_name");
        parsed.topic = group("topic");
        parsed.reason = group("reason");
    }

    Ok(parsed)
}

/// Split a log file name `<channel>.<YYYY-MM-DD>` into its parts.
pub fn parse_log_file_name(name: &str) -> Result<(String, NaiveDate), ParseError> {
    let (channel, date) = name
        .rsplit_once('.')
        .ok_or_else(|| ParseError::FileName(name.to_string()))?;
    if channel.is_empty() {
        return Err(ParseError::FileName(name.to_string()));
    }
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|_| ParseError::FileName(name.to_string()))?;
    Ok((channel.to_string(), date))
}
