//! The live slide sequence and the current position within it.
//!
//! Fresh fetch results are merged in without disturbing what viewers are
//! looking at: new URLs are queued right after the current slide, and URLs
//! that disappear from the source are dropped while `position` keeps
//! tracking the displayed slide.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::PlaylistError;

/// What a [`Playlist::merge`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// New URLs, in the (shuffled) order they were spliced in.
    pub added: Vec<String>,
    /// URLs dropped because the source no longer lists them.
    pub removed: Vec<String>,
}

impl MergeResult {
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Ordered slide URLs plus the index of the slide on screen.
///
/// `position` is `None` exactly when `sequence` is empty.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    sequence: Vec<String>,
    position: Option<usize>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a playlist in the given order with position 0 (no shuffling).
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let sequence: Vec<String> = urls
            .into_iter()
            .map(Into::into)
            .filter(|u| seen.insert(u.clone()))
            .collect();
        let position = if sequence.is_empty() { None } else { Some(0) };
        Self { sequence, position }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn urls(&self) -> &[String] {
        &self.sequence
    }

    /// The slide currently on screen.
    pub fn current(&self) -> Option<&str> {
        self.position
            .and_then(|p| self.sequence.get(p))
            .map(String::as_str)
    }

    /// The slide the next `advance()` will show, unless it wraps.
    pub fn upcoming(&self) -> Option<&str> {
        let pos = self.position?;
        self.sequence.get(pos + 1).map(String::as_str)
    }

    pub fn merge<I>(&mut self, candidates: I) -> MergeResult
    where
        I: IntoIterator<Item = String>,
    {
        self.merge_with_rng(candidates, &mut rand::thread_rng())
    }

    /// Reconcile the sequence with a freshly fetched candidate set.
    pub fn merge_with_rng<I, R>(&mut self, candidates: I, rng: &mut R) -> MergeResult
    where
        I: IntoIterator<Item = String>,
        R: Rng + ?Sized,
    {
        let mut wanted: HashSet<String> = HashSet::new();
        let candidates: Vec<String> = candidates
            .into_iter()
            .filter(|u| wanted.insert(u.clone()))
            .collect();

        let (mut added, removed) = {
            let live: HashSet<&str> = self.sequence.iter().map(String::as_str).collect();
            let added: Vec<String> = candidates
                .into_iter()
                .filter(|u| !live.contains(u.as_str()))
                .collect();
            let removed: Vec<String> = self
                .sequence
                .iter()
                .filter(|u| !wanted.contains(u.as_str()))
                .cloned()
                .collect();
            (added, removed)
        };

        added.shuffle(rng);
        let insert_at = self.position.map_or(0, |p| p + 1);
        self.sequence
            .splice(insert_at..insert_at, added.iter().cloned());

        for url in &removed {
            let Some(idx) = self.sequence.iter().position(|u| u == url) else {
                continue;
            };
            if let Some(pos) = self.position.as_mut() {
                if idx < *pos {
                    *pos -= 1;
                }
            }
            self.sequence.remove(idx);
        }

        // Dropping the slide on screen when it was the tail leaves position
        // one past the end; pin it to the last item so the next advance wraps.
        self.position = match self.position {
            _ if self.sequence.is_empty() => None,
            None => Some(0),
            Some(p) => Some(p.min(self.sequence.len() - 1)),
        };

        MergeResult { added, removed }
    }

    pub fn advance(&mut self) -> Result<&str, PlaylistError> {
        self.advance_with_rng(&mut rand::thread_rng())
    }

    /// Step forward. Running off the end wraps to 0 and reshuffles the lap.
    pub fn advance_with_rng<R>(&mut self, rng: &mut R) -> Result<&str, PlaylistError>
    where
        R: Rng + ?Sized,
    {
        let pos = self.position.ok_or(PlaylistError::EmptyPlaylist)?;
        let mut next = pos + 1;
        if next >= self.sequence.len() {
            next = 0;
            self.sequence.shuffle(rng);
        }
        self.position = Some(next);
        Ok(&self.sequence[next])
    }

    /// Step back, wrapping to the tail. Never reshuffles.
    pub fn retreat(&mut self) -> Result<&str, PlaylistError> {
        let pos = self.position.ok_or(PlaylistError::EmptyPlaylist)?;
        let len = self.sequence.len();
        let prev = (pos + len - 1) % len;
        self.position = Some(prev);
        Ok(&self.sequence[prev])
    }
}
