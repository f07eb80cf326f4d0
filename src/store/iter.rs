//! Paged history iteration.
//!
//! Both history shapes (bounded above, descending; bounded below, ascending)
//! share one advancement rule so cursoring across page boundaries never
//! duplicates or skips a version: after the first page, request one extra
//! row starting at the cursor and drop it if it repeats the cursor. Each
//! page is an independent request; abandoning the iterator leaks nothing.

use crate::error::EvdbError;
use crate::mvcc::{MvccEntity, MvccLogEntry};
use std::collections::VecDeque;
use uuid::Uuid;

pub trait Versioned {
    fn version(&self) -> Uuid;
}

impl Versioned for MvccEntity {
    fn version(&self) -> Uuid {
        self.version
    }
}

impl Versioned for MvccLogEntry {
    fn version(&self) -> Uuid {
        self.version
    }
}

/// Lazy, finite, forward-only sequence of versioned rows.
///
/// `fetch(start, limit)` must return up to `limit` rows beginning at `start`
/// inclusive, in the sequence's own order. The `tolerant` flag is for the
/// reversed (re-query and reverse) shape, where the boundary duplicate may
/// legitimately be missing from a page.
pub struct PagedHistoryIter<T, F> {
    fetch: F,
    page_size: usize,
    cursor: Uuid,
    started: bool,
    tolerant: bool,
    buffered: VecDeque<T>,
    done: bool,
}

impl<T, F> PagedHistoryIter<T, F>
where
    T: Versioned,
    F: FnMut(Uuid, usize) -> Result<Vec<T>, EvdbError>,
{
    pub fn new(start: Uuid, page_size: usize, tolerant: bool, fetch: F) -> Self {
        Self {
            fetch,
            page_size: page_size.max(1),
            cursor: start,
            started: false,
            tolerant,
            buffered: VecDeque::new(),
            done: false,
        }
    }

    fn advance(&mut self) -> Result<(), EvdbError> {
        let request = if self.started {
            self.page_size + 1
        } else {
            self.page_size
        };
        let mut rows = (self.fetch)(self.cursor, request)?;
        if self.started {
            if rows.first().map(|r| r.version()) == Some(self.cursor) {
                rows.remove(0);
            }
        }
        self.started = true;

        let full_page = if self.tolerant {
            rows.len() >= self.page_size
        } else {
            rows.len() == self.page_size
        };
        match (full_page, rows.last()) {
            (true, Some(last)) => self.cursor = last.version(),
            _ => self.done = true,
        }
        self.buffered = rows.into();
        Ok(())
    }
}

impl<T, F> Iterator for PagedHistoryIter<T, F>
where
    T: Versioned,
    F: FnMut(Uuid, usize) -> Result<Vec<T>, EvdbError>,
{
    type Item = Result<T, EvdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.advance() {
                self.done = true;
                return Some(Err(err));
            }
            if self.buffered.is_empty() && self.done {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PagedHistoryIter;
    use crate::error::EvdbError;
    use crate::model::{time_uuid, uuid_timestamp, Id};
    use crate::mvcc::{MvccLogEntry, Stage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn entries(count: usize) -> Vec<MvccLogEntry> {
        let id = Id::new("user");
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(MvccLogEntry::new(id.clone(), time_uuid(), Stage::Committed));
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        out
    }

    /// Serves `versions ≤ start`, newest first, like the descending store.
    fn descending_fetch(
        data: Vec<MvccLogEntry>,
    ) -> impl FnMut(Uuid, usize) -> Result<Vec<MvccLogEntry>, EvdbError> {
        move |start, limit| {
            let mut page: Vec<_> = data
                .iter()
                .filter(|e| uuid_timestamp(&e.version) <= uuid_timestamp(&start))
                .cloned()
                .collect();
            page.sort_by_key(|e| std::cmp::Reverse(uuid_timestamp(&e.version)));
            page.truncate(limit);
            Ok(page)
        }
    }

    #[test]
    fn five_versions_page_size_two_yields_exact_pages() {
        let data = entries(5);
        let newest = data[4].version;
        let iter = PagedHistoryIter::new(newest, 2, false, descending_fetch(data.clone()));
        let seen: Vec<Uuid> = iter.map(|r| r.expect("entry").version).collect();
        let expected: Vec<Uuid> = data.iter().rev().map(|e| e.version).collect();
        assert_eq!(seen, expected, "no duplicates or gaps across page boundaries");
    }

    #[test]
    fn short_first_page_terminates_the_sequence() {
        let data = entries(3);
        let newest = data[2].version;
        let fetch_calls = AtomicUsize::new(0);
        let mut inner = descending_fetch(data);
        let counting = |start, limit| {
            fetch_calls.fetch_add(1, Ordering::Relaxed);
            inner(start, limit)
        };
        let iter = PagedHistoryIter::new(newest, 10, false, counting);
        assert_eq!(iter.count(), 3);
        assert_eq!(fetch_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn fetch_errors_surface_once_then_stop() {
        let mut iter = PagedHistoryIter::new(time_uuid(), 2, false, |_, _| {
            Err::<Vec<MvccLogEntry>, _>(EvdbError::Transport("unreachable".into()))
        });
        assert!(matches!(iter.next(), Some(Err(EvdbError::Transport(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn empty_history_is_an_empty_sequence() {
        let iter = PagedHistoryIter::new(time_uuid(), 2, false, descending_fetch(Vec::new()));
        assert_eq!(iter.count(), 0);
    }
}
