use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::{LogEntry, LogLevel, LogSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub source_filters: BTreeSet<LogSource>,
    pub level_filters: BTreeSet<LogLevel>,
    pub search_query: String,
    pub paused: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            source_filters: LogSource::ALL.into_iter().collect(),
            level_filters: LogLevel::ALL.into_iter().collect(),
            search_query: String::new(),
            paused: false,
        }
    }
}

/// Partial filter update. `None` leaves the dimension untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPatch {
    pub source_filters: Option<BTreeSet<LogSource>>,
    pub level_filters: Option<BTreeSet<LogLevel>>,
    pub search_query: Option<String>,
    pub paused: Option<bool>,
}

impl FilterPatch {
    pub fn levels(levels: impl IntoIterator<Item = LogLevel>) -> Self {
        Self {
            level_filters: Some(levels.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn sources(sources: impl IntoIterator<Item = LogSource>) -> Self {
        Self {
            source_filters: Some(sources.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self {
            search_query: Some(query.into()),
            ..Self::default()
        }
    }
}

/// A `FilterState` prepared for repeated matching.
pub(crate) struct Matcher<'a> {
    state: &'a FilterState,
    folded_query: String,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(state: &'a FilterState) -> Self {
        Self {
            state,
            folded_query: state.search_query.to_lowercase(),
        }
    }

    /// `folded_message` is the entry's message already lowercased at append time.
    pub(crate) fn matches(&self, entry: &LogEntry, folded_message: &str) -> bool {
        match entry {
            LogEntry::Notice(_) => true,
            LogEntry::Record(record) => {
                self.state.source_filters.contains(&record.source)
                    && self.state.level_filters.contains(&record.level)
                    && (self.folded_query.is_empty() || folded_message.contains(&self.folded_query))
            }
        }
    }
}
