use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::entry::PackageEntry;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::status::{Status, StatusSet};

#[derive(Debug, Clone)]
struct Tracked {
    entry: PackageEntry,
    status: Status,
}

/// Column used to order query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Last-updated marker.
    #[default]
    Date,
    /// Display name, case-insensitive.
    Name,
    /// Declared size, numerically.
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Filter and ordering applied by [`CatalogStore::query`].
///
/// The default lists every entry, most recently updated first.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub name_filter: Option<String>,
    pub status_mask: Option<StatusSet>,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl CatalogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    pub fn statuses(mut self, mask: impl Into<StatusSet>) -> Self {
        self.status_mask = Some(mask.into());
        self
    }

    pub fn sort(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort = key;
        self.order = order;
        self
    }

    fn matches(&self, tracked: &Tracked, needle: Option<&str>) -> bool {
        if let Some(mask) = self.status_mask {
            if !mask.contains(tracked.status) {
                return false;
            }
        }
        match needle {
            None => true,
            Some(needle) => squash(&tracked.entry.name).contains(needle),
        }
    }

    fn compare(&self, a: &PackageEntry, b: &PackageEntry) -> Ordering {
        let ord = match self.sort {
            SortKey::Date => a.last_updated.cmp(&b.last_updated),
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Size => a.size_number().cmp(&b.size_number()),
        };
        match self.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

/// Lowercase and drop all whitespace, for name matching.
fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Authoritative map from catalog entry to its current [`Status`].
///
/// Keyed by release name. Every status write goes through
/// [`CatalogStore::set_status`] (or [`CatalogStore::apply`]) so that a
/// `StatusChanged` event is published for it.
#[derive(Debug)]
pub struct CatalogStore {
    entries: BTreeMap<String, Tracked>,
    events: EventBus,
    /// Bumped on every mutation; used to detect unsaved changes.
    revision: u64,
}

impl CatalogStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            entries: BTreeMap::new(),
            events,
            revision: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, release_name: &str) -> bool {
        self.entries.contains_key(release_name)
    }

    pub fn entry(&self, release_name: &str) -> Option<&PackageEntry> {
        self.entries.get(release_name).map(|t| &t.entry)
    }

    /// Current status, `Unknown` for untracked entries.
    pub fn status(&self, release_name: &str) -> Status {
        self.entries
            .get(release_name)
            .map_or(Status::Unknown, |t| t.status)
    }

    /// Replace the status of a tracked entry and publish `StatusChanged`.
    ///
    /// Untracked entries are ignored and no event is published. Returns
    /// whether the entry was tracked.
    pub fn set_status(&mut self, release_name: &str, status: Status) -> bool {
        let Some(tracked) = self.entries.get_mut(release_name) else {
            return false;
        };
        debug!(release_name, from = %tracked.status, to = %status, "status transition");
        tracked.status = status;
        self.revision += 1;
        self.events.status_changed(release_name, status);
        true
    }

    /// Start tracking an entry with a given status, without publishing.
    ///
    /// Used when restoring persisted state; replaces any existing record.
    pub fn track(&mut self, entry: PackageEntry, status: Status) {
        self.revision += 1;
        self.entries
            .insert(entry.release_name.clone(), Tracked { entry, status });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PackageEntry, Status)> {
        self.entries.values().map(|t| (&t.entry, t.status))
    }

    /// Recompute statuses with `f`, publishing an event for each entry whose
    /// status actually changed. Returns the number of changed entries.
    pub fn apply<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&PackageEntry, Status) -> Option<Status>,
    {
        let mut changed = 0;
        for tracked in self.entries.values_mut() {
            let Some(next) = f(&tracked.entry, tracked.status) else {
                continue;
            };
            if next == tracked.status {
                continue;
            }
            debug!(
                release_name = %tracked.entry.release_name,
                from = %tracked.status,
                to = %next,
                "status transition"
            );
            tracked.status = next;
            self.events.status_changed(&tracked.entry.release_name, next);
            changed += 1;
        }
        if changed > 0 {
            self.revision += 1;
        }
        changed
    }

    /// Entries matching `query`, ordered as it requests.
    pub fn query(&self, query: &CatalogQuery) -> Vec<(PackageEntry, Status)> {
        let needle = query
            .name_filter
            .as_deref()
            .map(squash)
            .filter(|n| !n.is_empty());

        let mut items: Vec<(PackageEntry, Status)> = self
            .entries
            .values()
            .filter(|t| query.matches(t, needle.as_deref()))
            .map(|t| (t.entry.clone(), t.status))
            .collect();

        // Stable sort keeps release-name order among equal keys.
        items.sort_by(|(a, _), (b, _)| query.compare(a, b));
        items
    }

    /// Merge a freshly fetched catalog.
    ///
    /// Remote-only (`Downloadable`) entries missing from `fresh` are retired,
    /// then entries not yet tracked are added as `Downloadable`. Entries with
    /// any other status are left alone. An empty `fresh` list is rejected and
    /// the current catalog is kept. Returns the number of added entries.
    pub fn refresh(&mut self, fresh: Vec<PackageEntry>) -> Result<usize, EngineError> {
        if fresh.is_empty() {
            return Err(EngineError::CatalogParse(
                "catalog contains no valid records".to_owned(),
            ));
        }

        let incoming: std::collections::HashSet<&str> =
            fresh.iter().map(|e| e.release_name.as_str()).collect();
        let before = self.entries.len();
        self.entries
            .retain(|name, t| t.status != Status::Downloadable || incoming.contains(name.as_str()));
        let retired = before - self.entries.len();

        let mut added = 0;
        for entry in fresh {
            if self.entries.contains_key(&entry.release_name) {
                continue;
            }
            self.entries.insert(
                entry.release_name.clone(),
                Tracked {
                    entry,
                    status: Status::Downloadable,
                },
            );
            added += 1;
        }

        self.revision += 1;
        info!(added, retired, total = self.entries.len(), "catalog refreshed");
        self.events.publish(EngineEvent::CatalogChanged);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(release: &str, name: &str, updated: &str, size: &str) -> PackageEntry {
        PackageEntry {
            name: name.into(),
            release_name: release.into(),
            package_name: format!("com.{}", release.to_lowercase()),
            version_code: "1".into(),
            last_updated: updated.into(),
            size: size.into(),
        }
    }

    fn store() -> CatalogStore {
        let mut store = CatalogStore::new(EventBus::new(64));
        store
            .refresh(vec![
                entry("A", "Alpha Quest", "2024-01-01", "300"),
                entry("B", "beta   run", "2024-03-01", "20"),
                entry("C", "Gamma", "2024-02-01", "1000"),
            ])
            .unwrap();
        store
    }

    #[test]
    fn untracked_status_is_unknown_and_set_is_noop() {
        let mut store = store();
        let mut rx = store.events.subscribe();
        assert_eq!(store.status("Z"), Status::Unknown);
        assert!(!store.set_status("Z", Status::Queued));
        assert!(rx.try_recv().is_err());
        assert!(!store.contains("Z"));
    }

    #[test]
    fn set_status_publishes() {
        let mut store = store();
        let mut rx = store.events.subscribe();
        assert!(store.set_status("A", Status::Queued));
        assert_eq!(store.status("A"), Status::Queued);
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::StatusChanged {
                release_name: "A".into(),
                status: Status::Queued
            }
        );
    }

    #[test]
    fn default_query_is_newest_first() {
        let names: Vec<String> = store()
            .query(&CatalogQuery::new())
            .into_iter()
            .map(|(e, _)| e.release_name)
            .collect();
        assert_eq!(names, ["B", "C", "A"]);
    }

    #[test]
    fn sorts_by_size_numerically_and_by_name() {
        let store = store();
        let by_size: Vec<String> = store
            .query(&CatalogQuery::new().sort(SortKey::Size, SortOrder::Ascending))
            .into_iter()
            .map(|(e, _)| e.release_name)
            .collect();
        assert_eq!(by_size, ["B", "A", "C"]);

        let by_name: Vec<String> = store
            .query(&CatalogQuery::new().sort(SortKey::Name, SortOrder::Descending))
            .into_iter()
            .map(|(e, _)| e.release_name)
            .collect();
        assert_eq!(by_name, ["C", "B", "A"]);
    }

    #[test]
    fn name_filter_ignores_case_and_whitespace() {
        let store = store();
        let hits = store.query(&CatalogQuery::new().name(" BetaRun "));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.release_name, "B");

        let hits = store.query(&CatalogQuery::new().name("a q"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.release_name, "A");

        assert_eq!(store.query(&CatalogQuery::new().name("   ")).len(), 3);
    }

    #[test]
    fn status_mask_filters() {
        let mut store = store();
        store.set_status("C", Status::Local);
        let hits = store.query(
            &CatalogQuery::new().statuses(StatusSet::of(&[Status::Local, Status::Installable])),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], (store.entry("C").unwrap().clone(), Status::Local));
    }

    #[test]
    fn refresh_retires_stale_remote_entries_only() {
        let mut store = store();
        store.set_status("A", Status::Local);

        let added = store
            .refresh(vec![entry("C", "Gamma", "2024-02-01", "1000"), entry("D", "Delta", "2024-04-01", "5")])
            .unwrap();

        assert_eq!(added, 1);
        assert!(store.contains("A"), "non-remote entries survive");
        assert!(!store.contains("B"), "stale remote entry retired");
        assert_eq!(store.status("C"), Status::Downloadable);
        assert_eq!(store.status("D"), Status::Downloadable);
    }

    #[test]
    fn refresh_keeps_status_of_tracked_entries() {
        let mut store = store();
        store.set_status("B", Status::Queued);
        store
            .refresh(vec![entry("B", "beta run", "2024-03-01", "20")])
            .unwrap();
        assert_eq!(store.status("B"), Status::Queued);
    }

    #[test]
    fn empty_refresh_fails_and_keeps_catalog() {
        let mut store = store();
        let err = store.refresh(Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::CatalogParse(_)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn apply_only_publishes_changes() {
        let mut store = store();
        let mut rx = store.events.subscribe();
        let changed = store.apply(|e, s| {
            if e.release_name == "A" {
                Some(Status::Local)
            } else {
                Some(s)
            }
        });
        assert_eq!(changed, 1);
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::StatusChanged { .. }));
        assert!(rx.try_recv().is_err());
    }
}
