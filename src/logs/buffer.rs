use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::config::LogSettings;
use crate::models::{LogEntry, LogLevel, LogRecord, SessionNotice};

use super::filter::{FilterPatch, FilterState, Matcher};

struct Buffered {
    seq: u64,
    entry: Arc<LogEntry>,
    folded: String,
}

/// One line of the visible projection. `seq` is a stable rendering key for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLine {
    pub seq: u64,
    pub entry: Arc<LogEntry>,
}

/// Bounded, append-only log store with a lazily recomputed filtered view.
///
/// The projection is never patched incrementally. Any change that can alter it drops the
/// cached copy, and the next read rebuilds it from the buffer and the current filter.
pub struct LogBuffer {
    entries: VecDeque<Buffered>,
    capacity: usize,
    next_seq: u64,
    filter: FilterState,
    /// Entries with `seq` below this are the frozen view while paused.
    pause_watermark: Option<u64>,
    projection: Option<Arc<[VisibleLine]>>,
}

impl LogBuffer {
    pub fn new(settings: &LogSettings) -> Self {
        let capacity = settings.capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(8_192)),
            capacity,
            next_seq: 0,
            filter: FilterState::default(),
            pause_watermark: None,
            projection: None,
        }
    }

    /// Append a record, evicting the oldest entry when full. Returns how many entries were evicted.
    pub fn append(&mut self, record: LogRecord) -> usize {
        self.push(LogEntry::Record(record))
    }

    pub fn push_notice(&mut self, notice: SessionNotice) -> usize {
        self.push(LogEntry::Notice(notice))
    }

    fn push(&mut self, entry: LogEntry) -> usize {
        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                evicted += 1;
                if self.pause_watermark.is_some_and(|mark| oldest.seq < mark) {
                    self.projection = None;
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(Buffered {
            seq,
            folded: entry.message().to_lowercase(),
            entry: Arc::new(entry),
        });

        if self.pause_watermark.is_none() {
            self.projection = None;
        }
        evicted
    }

    pub fn set_filter(&mut self, patch: FilterPatch) {
        if let Some(sources) = patch.source_filters {
            self.filter.source_filters = sources;
        }
        if let Some(levels) = patch.level_filters {
            self.filter.level_filters = levels;
        }
        if let Some(query) = patch.search_query {
            self.filter.search_query = query;
        }
        match patch.paused {
            Some(true) => self.pause(),
            Some(false) => self.resume(),
            None => {}
        }
        self.projection = None;
    }

    pub fn filter(&self) -> FilterState {
        FilterState {
            paused: self.is_paused(),
            ..self.filter.clone()
        }
    }

    /// Freeze the projection at its current contents. Appends keep landing in the buffer.
    pub fn pause(&mut self) {
        if self.pause_watermark.is_none() {
            self.pause_watermark = Some(self.next_seq);
        }
    }

    /// Unfreeze; the next read catches up with everything buffered meanwhile.
    pub fn resume(&mut self) {
        if self.pause_watermark.take().is_some() {
            self.projection = None;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_watermark.is_some()
    }

    /// Entries buffered since `pause()` that the frozen view does not show yet.
    pub fn pending_while_paused(&self) -> usize {
        match self.pause_watermark {
            Some(mark) => self.entries.iter().filter(|b| b.seq >= mark).count(),
            None => 0,
        }
    }

    /// Cached projection; rebuilt only when something changed since the last read.
    pub fn visible(&mut self) -> Arc<[VisibleLine]> {
        if let Some(projection) = &self.projection {
            return Arc::clone(projection);
        }
        let projection: Arc<[VisibleLine]> = self.compute_projection().into();
        self.projection = Some(Arc::clone(&projection));
        projection
    }

    /// Pure recomputation of the projection from buffer, filter and pause state.
    pub fn compute_projection(&self) -> Vec<VisibleLine> {
        let matcher = Matcher::new(&self.filter);
        let limit = self.pause_watermark.unwrap_or(u64::MAX);

        self.entries
            .iter()
            .take_while(|b| b.seq < limit)
            .filter(|b| matcher.matches(&b.entry, &b.folded))
            .map(|b| VisibleLine {
                seq: b.seq,
                entry: Arc::clone(&b.entry),
            })
            .collect()
    }

    /// Owned copy of every buffered entry, oldest first, for export.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().map(|b| (*b.entry).clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.projection = None;
    }

    pub fn level_counts(&self) -> BTreeMap<LogLevel, usize> {
        let mut counts: BTreeMap<LogLevel, usize> =
            LogLevel::ALL.into_iter().map(|level| (level, 0)).collect();
        for record in self.entries.iter().filter_map(|b| b.entry.as_record()) {
            *counts.entry(record.level).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
