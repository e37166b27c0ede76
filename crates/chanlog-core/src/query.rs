//! Backend-neutral search queries.
//!
//! The search form only understands a handful of filters. [`SearchFilters`]
//! keeps the recognised ones, and [`build_query`] turns them plus a channel
//! selection into a small boolean [`Query`] tree that each backend
//! translates into its own query language.
//!
//! Free text is never handed to a backend query parser: it is split into
//! word tokens and every token must appear in the `formatted` line.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::QueryError;
use crate::models::unprefixed_channel;

/// Document fields that can appear in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Channel,
    Actor,
    Formatted,
}

impl Field {
    /// Field name as stored in serialized documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Channel => "channel",
            Field::Actor => "actor",
            Field::Formatted => "formatted",
        }
    }
}

/// A boolean query over documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Query {
    /// Every sub-query must match.
    And(Vec<Query>),
    /// At least one sub-query must match.
    Or(Vec<Query>),
    /// Exact, case-sensitive equality on an identifier field.
    Term { field: Field, value: String },
    /// Every token must occur in a full-text field (case-insensitive).
    Match { field: Field, tokens: Vec<String> },
}

impl Query {
    /// Channels named by `Term(channel = …)` leaves, used by backends that
    /// route queries to per-channel indexes.
    pub fn channels(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_channels(&mut out);
        out
    }

    fn collect_channels<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Query::And(qs) | Query::Or(qs) => qs.iter().for_each(|q| q.collect_channels(out)),
            Query::Term {
                field: Field::Channel,
                value,
            } => out.push(value),
            _ => {}
        }
    }
}

/// The recognised filters of one search request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub actor: Option<String>,
    pub text: Option<String>,
}

impl SearchFilters {
    /// Keep only recognised keys with non-blank values.
    ///
    /// `text` and `formatted` are aliases; when both are given, `text` wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filters = SearchFilters::default();
        let mut formatted = None;
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "actor" => filters.actor = Some(value.to_string()),
                "text" => filters.text = Some(value.to_string()),
                "formatted" => formatted = Some(value.to_string()),
                _ => {}
            }
        }
        if filters.text.is_none() {
            filters.text = formatted;
        }
        filters
    }

    pub fn is_empty(&self) -> bool {
        self.actor.is_none() && self.text.is_none()
    }
}

/// Split free text into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Resolve which channels a request may search.
///
/// An empty selection means every allowed channel. A non-empty selection is
/// intersected with the allow-list, ignoring the join prefix and ASCII case,
/// and resolves to the allowed spelling. An empty intersection is an error
/// rather than a silent fallback.
pub fn resolve_channels(
    allowed: &[String],
    selected: &[String],
) -> Result<Vec<String>, QueryError> {
    let by_lower: BTreeMap<String, &str> = allowed
        .iter()
        .map(|c| unprefixed_channel(c.trim()))
        .map(|c| (c.to_ascii_lowercase(), c))
        .collect();
    if selected.is_empty() {
        let all: BTreeSet<&str> = by_lower.into_values().collect();
        return Ok(all.into_iter().map(str::to_string).collect());
    }
    let chosen: BTreeSet<&str> = selected
        .iter()
        .filter_map(|c| {
            by_lower
                .get(&unprefixed_channel(c.trim()).to_ascii_lowercase())
                .copied()
        })
        .collect();
    if chosen.is_empty() {
        return Err(QueryError::NoAllowedChannels(selected.to_vec()));
    }
    Ok(chosen.into_iter().map(str::to_string).collect())
}

/// Build the backend query, or `None` when there is nothing to search for.
///
/// The shape is `And[Or[channel terms], And[filter queries]]`.
pub fn build_query(
    filters: &SearchFilters,
    channels: &[String],
) -> Result<Option<Query>, QueryError> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut clauses = Vec::new();
    if let Some(actor) = &filters.actor {
        clauses.push(Query::Term {
            field: Field::Actor,
            value: actor.clone(),
        });
    }
    if let Some(text) = &filters.text {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(QueryError::UnsearchableText {
                field: "text".to_string(),
                value: text.clone(),
            });
        }
        clauses.push(Query::Match {
            field: Field::Formatted,
            tokens,
        });
    }

    let channel_terms = channels
        .iter()
        .map(|c| Query::Term {
            field: Field::Channel,
            value: c.clone(),
        })
        .collect();

    Ok(Some(Query::And(vec![
        Query::Or(channel_terms),
        Query::And(clauses),
    ])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filters_ignore_unknown_and_blank_keys() {
        let filters = SearchFilters::from_pairs([
            ("actor", "alice"),
            ("text", "   "),
            ("channel", "general"),
            ("__proto__", "x"),
        ]);
        assert_eq!(
            filters,
            SearchFilters {
                actor: Some("alice".into()),
                text: None
            }
        );
    }

    #[test]
    fn test_formatted_is_alias_for_text() {
        let filters = SearchFilters::from_pairs([("formatted", "deploy")]);
        assert_eq!(filters.text.as_deref(), Some("deploy"));
        let filters = SearchFilters::from_pairs([("formatted", "a"), ("text", "b")]);
        assert_eq!(filters.text.as_deref(), Some("b"));
    }

    #[test]
    fn test_no_filters_no_query() {
        let q = build_query(&SearchFilters::default(), &strings(&["general"])).unwrap();
        assert_eq!(q, None);
    }

    #[test]
    fn test_query_shape() {
        let filters = SearchFilters {
            actor: Some("alice".into()),
            text: Some("Deploy, NOW!".into()),
        };
        let q = build_query(&filters, &strings(&["dev", "general"]))
            .unwrap()
            .unwrap();
        assert_eq!(
            q,
            Query::And(vec![
                Query::Or(vec![
                    Query::Term {
                        field: Field::Channel,
                        value: "dev".into()
                    },
                    Query::Term {
                        field: Field::Channel,
                        value: "general".into()
                    },
                ]),
                Query::And(vec![
                    Query::Term {
                        field: Field::Actor,
                        value: "alice".into()
                    },
                    Query::Match {
                        field: Field::Formatted,
                        tokens: strings(&["deploy", "now"])
                    },
                ]),
            ])
        );
        assert_eq!(q.channels(), vec!["dev", "general"]);
    }

    #[test]
    fn test_query_syntax_is_literal() {
        // Operators from backend query languages are just punctuation here.
        assert_eq!(tokenize("foo AND (bar OR \"baz\")*"), strings(&["foo", "and", "bar", "or", "baz"]));
    }

    #[test]
    fn test_unsearchable_text() {
        let filters = SearchFilters {
            actor: None,
            text: Some("?!*".into()),
        };
        assert!(matches!(
            build_query(&filters, &strings(&["general"])),
            Err(QueryError::UnsearchableText { .. })
        ));
    }

    #[test]
    fn test_resolve_channels_defaults_to_allow_list() {
        let allowed = strings(&["#general", "#dev"]);
        assert_eq!(
            resolve_channels(&allowed, &[]).unwrap(),
            strings(&["dev", "general"])
        );
    }

    #[test]
    fn test_resolve_channels_intersects() {
        let allowed = strings(&["#general", "#dev"]);
        assert_eq!(
            resolve_channels(&allowed, &strings(&["#general", "secret"])).unwrap(),
            strings(&["general"])
        );
        assert!(matches!(
            resolve_channels(&allowed, &strings(&["secret"])),
            Err(QueryError::NoAllowedChannels(_))
        ));
    }

    #[test]
    fn test_resolve_channels_ignores_case() {
        let allowed = strings(&["#General"]);
        assert_eq!(
            resolve_channels(&allowed, &strings(&["#general"])).unwrap(),
            strings(&["General"])
        );
        assert_eq!(
            resolve_channels(&allowed, &strings(&["GENERAL"])).unwrap(),
            strings(&["General"])
        );
    }
}
