//! Versioned list frames
//! Each frame links to its parent and carries the diff against it

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use uuid::Uuid;

/// Entries with a stable identity across frames
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Positional diff between two consecutive frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    /// Indices into the new list
    pub inserted: Vec<usize>,
    /// Indices into the previous list
    pub removed: Vec<usize>,
    /// Indices into the new list of entries whose content changed
    pub changed: Vec<usize>,
}

impl ListDiff {
    pub fn between<T: Keyed + PartialEq>(previous: &[T], next: &[T]) -> Self {
        let old: HashMap<&str, &T> = previous.iter().map(|e| (e.key(), e)).collect();
        let new: HashMap<&str, ()> = next.iter().map(|e| (e.key(), ())).collect();

        let mut diff = ListDiff::default();
        for (index, entry) in next.iter().enumerate() {
            match old.get(entry.key()) {
                None => diff.inserted.push(index),
                Some(before) if *before != entry => diff.changed.push(index),
                Some(_) => {}
            }
        }
        diff.removed = previous
            .iter()
            .enumerate()
            .filter(|(_, e)| !new.contains_key(e.key()))
            .map(|(index, _)| index)
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// `None` only on the root frame
    pub diff: Option<ListDiff>,
    pub entries: Vec<T>,
}

impl<T> Frame<T> {
    /// Empty root frame
    pub fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            diff: None,
            entries: Vec::new(),
        }
    }
}

/// Tracks the latest frame and derives the next one from a new list
#[derive(Debug, Clone)]
pub struct Changefeed<T> {
    current: Frame<T>,
}

impl<T: Keyed + PartialEq + Clone> Changefeed<T> {
    pub fn new() -> Self {
        Self { current: Frame::root() }
    }

    pub fn current(&self) -> &Frame<T> {
        &self.current
    }

    /// Replace the list, returning the new frame
    pub fn advance(&mut self, entries: Vec<T>) -> Frame<T> {
        let diff = ListDiff::between(&self.current.entries, &entries);
        self.current = Frame {
            id: Uuid::new_v4(),
            parent_id: Some(self.current.id),
            diff: Some(diff),
            entries,
        };
        self.current.clone()
    }
}

impl<T: Keyed + PartialEq + Clone> Default for Changefeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a stream of lists into a frame chain.
///
/// The root frame is emitted before the upstream is polled. An upstream error
/// is forwarded once and ends the stream.
pub fn frames<T, E>(
    upstream: BoxStream<'static, Result<Vec<T>, E>>,
) -> BoxStream<'static, Result<Frame<T>, E>>
where
    T: Keyed + PartialEq + Clone + Send + 'static,
    E: Send + 'static,
{
    let feed = Changefeed::new();
    let root = feed.current().clone();

    // `None` once an error went out; upstream is not polled again
    let chained = stream::unfold(Some((upstream, feed)), |state| async move {
        let (mut upstream, mut feed) = state?;
        match upstream.next().await? {
            Ok(entries) => {
                let frame = feed.advance(entries);
                Some((Ok(frame), Some((upstream, feed))))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    stream::once(future::ready(Ok(root))).chain(chained).boxed()
}
