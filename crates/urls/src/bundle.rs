//! Collecting URLs into deduplicated, prioritized batches.

use crate::error::Result;
use crate::sanitise::Sanitiser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Priority given to URLs added without an explicit priority.
pub const DEFAULT_PRIORITY: i64 = 0;

/// A normalized URL and the priority it should be regenerated with. Higher
/// numbers are processed sooner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritizedUrl {
    pub url: String,
    pub priority: i64,
}

/// A URL as it appears in a job batch: its priority plus its position within
/// the batch (`0..n`), which breaks ties between equal priorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchedUrl {
    pub url: String,
    pub priority: i64,
    pub ordinal: usize,
}

/// Accumulates URLs, collapsing duplicates onto their normalized form.
///
/// Insertion order is remembered and used as the tie-break between equal
/// priorities. Adding a URL that is already present keeps its original
/// position and raises its priority if the new one is higher; it never
/// lowers it.
///
/// ```
/// use staticpub_urls::{Sanitiser, UrlBundler};
///
/// let mut bundler = UrlBundler::new(Sanitiser::default());
/// bundler.add_url_with_priority("https://example.com/a", 1).unwrap();
/// bundler.add_url_with_priority("https://example.com/a/", 10).unwrap();
/// bundler.add_url_with_priority("https://example.com/a/?stage=Stage", 1).unwrap();
/// let urls = bundler.urls();
/// assert_eq!(urls.len(), 1);
/// assert_eq!(urls[0].priority, 10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct UrlBundler {
    sanitiser: Sanitiser,
    urls: Vec<PrioritizedUrl>,
    index: HashMap<String, usize>,
}
impl UrlBundler {
    pub fn new(sanitiser: Sanitiser) -> Self {
        Self { sanitiser, urls: Vec::new(), index: HashMap::new() }
    }

    /// Add a URL with [`DEFAULT_PRIORITY`].
    pub fn add_url(&mut self, raw: impl AsRef<str>) -> Result<()> {
        self.add_url_with_priority(raw, DEFAULT_PRIORITY)
    }

    /// Add a URL with an explicit priority; the maximum of all priorities
    /// seen for the same normalized URL wins.
    pub fn add_url_with_priority(&mut self, raw: impl AsRef<str>, priority: i64) -> Result<()> {
        let url = self.sanitiser.normalize(raw)?;
        match self.index.get(&url) {
            Some(&position) => {
                let existing = &mut self.urls[position];
                existing.priority = existing.priority.max(priority);
            },
            None => {
                self.index.insert(url.clone(), self.urls.len());
                self.urls.push(PrioritizedUrl { url, priority });
            },
        }
        Ok(())
    }

    /// Add several URLs with [`DEFAULT_PRIORITY`], stopping at the first
    /// invalid one.
    pub fn add_urls<S: AsRef<str>>(&mut self, urls: impl IntoIterator<Item = S>) -> Result<()> {
        for url in urls {
            self.add_url(url)?;
        }
        Ok(())
    }

    /// Add entries from a URL to priority map, stopping at the first invalid URL.
    pub fn add_url_map<S: AsRef<str>>(&mut self, urls: impl IntoIterator<Item = (S, i64)>) -> Result<()> {
        for (url, priority) in urls {
            self.add_url_with_priority(url, priority)?;
        }
        Ok(())
    }

    /// Whether the (normalized form of the) URL has been added.
    pub fn contains(&self, raw: impl AsRef<str>) -> bool {
        self.sanitiser.normalize(raw).is_ok_and(|url| self.index.contains_key(&url))
    }

    /// Keep only the URLs for which the predicate returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&PrioritizedUrl) -> bool) {
        self.urls.retain(|u| keep(u));
        self.index = self.urls.iter().enumerate().map(|(i, u)| (u.url.clone(), i)).collect();
    }

    /// Unique URLs, highest priority first; equal priorities keep the order
    /// in which they were first added.
    pub fn urls(&self) -> Vec<PrioritizedUrl> {
        let mut urls = self.urls.clone();
        // Stable sort: insertion order survives as the tie-break.
        urls.sort_by(|a, b| b.priority.cmp(&a.priority));
        urls
    }

    /// Split [`urls()`](Self::urls) into batches of at most `urls_per_job`
    /// entries (`0` means a single unbounded batch). Each batch numbers its
    /// entries `0..n`.
    pub fn batches(&self, urls_per_job: usize) -> Vec<Vec<BatchedUrl>> {
        let urls = self.urls();
        if urls.is_empty() {
            return Vec::new();
        }
        let size = match urls_per_job {
            0 => urls.len(),
            n => n,
        };
        urls.chunks(size)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(ordinal, u)| BatchedUrl { url: u.url.clone(), priority: u.priority, ordinal })
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn clear(&mut self) {
        self.urls.clear();
        self.index.clear();
    }
}
