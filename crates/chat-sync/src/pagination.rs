//! "Load older" pagination driven by scroll position.

use chat_core::{HistoryQuery, SortOrder};
use tracing::debug;

/// Messages per history page.
pub const PAGE_SIZE: usize = 30;

/// Distance from the top of the thread, in pixels, that triggers a load.
pub const LOAD_THRESHOLD: f64 = 100.0;

/// Pagination bookkeeping for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub limit: usize,
    /// Offset of the last page applied, counted from the newest message.
    pub offset: usize,
    pub order: SortOrder,
    pub has_more: bool,
    pub is_loading_more: bool,
}

impl Cursor {
    /// A fresh cursor: nothing loaded, more assumed.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            offset: 0,
            order: SortOrder::Descending,
            has_more: true,
            is_loading_more: false,
        }
    }
}

/// How a page fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page arrived with this many rows.
    Loaded(usize),
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationController {
    limit: usize,
    threshold: f64,
}

impl Default for PaginationController {
    fn default() -> Self {
        Self::new(PAGE_SIZE, LOAD_THRESHOLD)
    }
}

impl PaginationController {
    pub fn new(limit: usize, threshold: f64) -> Self {
        Self { limit, threshold }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.limit)
    }

    /// Query for the newest page of a conversation.
    pub fn initial_query(&self) -> HistoryQuery {
        HistoryQuery::latest(self.limit)
    }

    /// Record the outcome of the initial page.
    pub fn complete_initial(&self, cursor: &mut Cursor, outcome: PageOutcome) {
        if let PageOutcome::Loaded(returned) = outcome {
            cursor.offset = 0;
            cursor.has_more = returned == cursor.limit;
        }
    }

    /// Request the next older page if the reader is near the top.
    ///
    /// Marks the cursor as loading before returning, so a second call made
    /// while the page is in flight returns `None`.
    pub fn maybe_load_older(
        &self,
        cursor: &mut Cursor,
        distance_from_top: f64,
    ) -> Option<HistoryQuery> {
        if distance_from_top > self.threshold || !cursor.has_more || cursor.is_loading_more {
            return None;
        }

        cursor.is_loading_more = true;
        let query = HistoryQuery {
            limit: cursor.limit,
            offset: cursor.offset + cursor.limit,
            order: SortOrder::Descending,
        };
        debug!(offset = query.offset, "Loading older messages");
        Some(query)
    }

    /// Record the outcome of an older page.
    ///
    /// The loading flag is always cleared; offset and `has_more` only move
    /// on success, so a failed page can be retried by scrolling again.
    pub fn complete(&self, cursor: &mut Cursor, request: HistoryQuery, outcome: PageOutcome) {
        cursor.is_loading_more = false;
        if let PageOutcome::Loaded(returned) = outcome {
            cursor.offset = request.offset;
            cursor.has_more = returned == request.limit;
        }
    }
}

/// Keeps the visible line in place when older messages are prepended.
///
/// Capture the content height before applying the page, then pass the
/// height after it to [`delta`](Self::delta); add the result to the
/// viewport's scroll offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    height_before: f64,
}

impl ScrollAnchor {
    pub fn capture(height_before: f64) -> Self {
        Self { height_before }
    }

    pub fn delta(&self, height_after: f64) -> f64 {
        height_after - self.height_before
    }
}
