use crate::catalog::CatalogStore;
use crate::status::Status;

/// FIFO list of release names awaiting or undergoing download.
///
/// The queue does not own statuses: the next entry to download is the first
/// one whose catalog status is `Queued`, so cancelled or failed entries that
/// are still listed are simply skipped.
#[derive(Debug, Clone, Default)]
pub struct DownloadQueue {
    order: Vec<String>,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail, dropping any earlier occurrence first.
    pub fn push_back(&mut self, release_name: &str) {
        self.remove(release_name);
        self.order.push(release_name.to_owned());
    }

    pub fn remove(&mut self, release_name: &str) -> bool {
        let before = self.order.len();
        self.order.retain(|r| r != release_name);
        before != self.order.len()
    }

    pub fn contains(&self, release_name: &str) -> bool {
        self.order.iter().any(|r| r == release_name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// First listed entry whose catalog status is `status`.
    pub fn first_with(&self, catalog: &CatalogStore, status: Status) -> Option<&str> {
        self.iter().find(|r| catalog.status(r) == status)
    }

    /// Entry currently being downloaded, if any.
    pub fn downloading(&self, catalog: &CatalogStore) -> Option<&str> {
        self.first_with(catalog, Status::Downloading)
    }

    /// Next entry to download.
    pub fn first_queued(&self, catalog: &CatalogStore) -> Option<&str> {
        self.first_with(catalog, Status::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PackageEntry;
    use crate::events::EventBus;

    fn catalog(names: &[&str]) -> CatalogStore {
        let mut store = CatalogStore::new(EventBus::new(16));
        for name in names {
            store.track(
                PackageEntry {
                    release_name: (*name).into(),
                    ..Default::default()
                },
                Status::Downloadable,
            );
        }
        store
    }

    #[test]
    fn requeue_moves_to_back() {
        let mut queue = DownloadQueue::new();
        queue.push_back("A");
        queue.push_back("B");
        queue.push_back("A");
        assert_eq!(queue.iter().collect::<Vec<_>>(), ["B", "A"]);
    }

    #[test]
    fn first_queued_skips_gaps() {
        let mut store = catalog(&["A", "B", "C"]);
        let mut queue = DownloadQueue::new();
        for r in ["A", "B", "C"] {
            queue.push_back(r);
        }
        store.set_status("A", Status::DownloadError);
        store.set_status("B", Status::Downloadable);
        store.set_status("C", Status::Queued);

        assert_eq!(queue.first_queued(&store), Some("C"));
        assert_eq!(queue.downloading(&store), None);

        store.set_status("C", Status::Downloading);
        assert_eq!(queue.first_queued(&store), None);
        assert_eq!(queue.downloading(&store), Some("C"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut queue = DownloadQueue::new();
        queue.push_back("A");
        assert!(queue.remove("A"));
        assert!(!queue.remove("A"));
        assert!(queue.is_empty());
    }
}
