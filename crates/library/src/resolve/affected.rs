use crate::content::{Publishable, UrlMap};
use std::collections::BTreeSet;

/// Snapshot of one publishable taken during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affected {
    pub key: String,
    pub urls: UrlMap,
}
impl Affected {
    pub fn of(publishable: &(impl Publishable + ?Sized)) -> Self {
        Self { key: publishable.key(), urls: publishable.urls_to_cache() }
    }
}
impl Publishable for Affected {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn urls_to_cache(&self) -> UrlMap {
        self.urls.clone()
    }
}

/// Everything one content change requires regenerating or purging.
///
/// Both sides keep insertion order and ignore publishables already present
/// (by key) or that have no URLs.
#[derive(Debug, Clone, Default)]
pub struct AffectedSet {
    to_update: Vec<Affected>,
    to_delete: Vec<Affected>,
    update_keys: BTreeSet<String>,
    delete_keys: BTreeSet<String>,
}
impl AffectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, publishable: &(impl Publishable + ?Sized)) {
        Self::insert(&mut self.to_update, &mut self.update_keys, Affected::of(publishable));
    }

    pub fn delete(&mut self, publishable: &(impl Publishable + ?Sized)) {
        Self::insert(&mut self.to_delete, &mut self.delete_keys, Affected::of(publishable));
    }

    fn insert(side: &mut Vec<Affected>, keys: &mut BTreeSet<String>, affected: Affected) {
        if affected.urls.is_empty() || !keys.insert(affected.key.clone()) {
            return;
        }
        side.push(affected);
    }

    pub fn to_update(&self) -> &[Affected] {
        &self.to_update
    }

    pub fn to_delete(&self) -> &[Affected] {
        &self.to_delete
    }

    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Every URL to regenerate. A URL claimed by several publishables keeps
    /// the highest priority.
    pub fn update_urls(&self) -> UrlMap {
        Self::merge(&self.to_update)
    }

    pub fn delete_urls(&self) -> UrlMap {
        Self::merge(&self.to_delete)
    }

    fn merge(side: &[Affected]) -> UrlMap {
        let mut merged = UrlMap::new();
        for (url, priority) in side.iter().flat_map(|a| a.urls.iter()) {
            merged.entry(url.clone()).and_modify(|p| *p = (*p).max(*priority)).or_insert(*priority);
        }
        merged
    }

    /// Drop from the delete side every URL that is also being regenerated.
    /// A URL belongs to exactly one cache slot.
    pub(crate) fn reconcile(&mut self) {
        let keep = self.update_urls();
        for affected in &mut self.to_delete {
            affected.urls.retain(|url, _| !keep.contains_key(url));
        }
        self.to_delete.retain(|a| !a.urls.is_empty());
        self.delete_keys = self.to_delete.iter().map(|a| a.key.clone()).collect();
    }
}
