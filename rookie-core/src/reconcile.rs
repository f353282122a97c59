//! Derives device-dependent statuses from an installed-app snapshot.

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::CatalogStore;
use crate::entry::{InstalledApp, PackageEntry};
use crate::status::{Status, StatusSet};

/// Bring every catalog status in line with the device.
///
/// `installed` is `None` when no device is connected. Entries in the middle
/// of the download/extract pipeline (or in one of its error states) are never
/// touched; only entries whose device-free status is `Local` or
/// `Downloadable` are recomputed. Returns the number of changed entries.
pub fn reconcile(catalog: &mut CatalogStore, installed: Option<&[InstalledApp]>) -> usize {
    let changed = match installed {
        None => catalog.apply(|_, status| disconnected_status(status)),
        Some(apps) => {
            let versions: HashMap<&str, i64> = apps
                .iter()
                .map(|a| (a.package_name.as_str(), a.version_code))
                .collect();
            catalog.apply(|entry, status| connected_status(entry, status, &versions))
        }
    };
    debug!(
        changed,
        connected = installed.is_some(),
        "reconciled catalog with device"
    );
    changed
}

fn disconnected_status(status: Status) -> Option<Status> {
    if StatusSet::REMOTE_DEVICE.contains(status) {
        Some(Status::Downloadable)
    } else if StatusSet::LOCAL_DEVICE.contains(status) {
        Some(Status::Local)
    } else {
        None
    }
}

fn connected_status(
    entry: &PackageEntry,
    status: Status,
    installed: &HashMap<&str, i64>,
) -> Option<Status> {
    let base = status.device_base();
    let local = match base {
        Status::Local => true,
        Status::Downloadable => false,
        _ => return None,
    };

    let next = match installed.get(entry.package_name.as_str()) {
        Some(&installed_version) if entry.version_number() > installed_version => {
            if local {
                Status::UpdatableLocally
            } else {
                Status::UpdatableRemotely
            }
        }
        Some(_) => {
            if local {
                Status::InstalledAndLocally
            } else {
                Status::InstalledAndRemotely
            }
        }
        None if local => Status::Installable,
        None => Status::Downloadable,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn catalog(rows: &[(&str, &str, &str, Status)]) -> CatalogStore {
        let mut store = CatalogStore::new(EventBus::new(64));
        for (release, package, version, status) in rows {
            store.track(
                PackageEntry {
                    name: (*release).into(),
                    release_name: (*release).into(),
                    package_name: (*package).into(),
                    version_code: (*version).into(),
                    ..Default::default()
                },
                *status,
            );
        }
        store
    }

    #[test]
    fn local_entry_at_same_version_is_installed() {
        let mut store = catalog(&[("R1", "com.foo", "5", Status::Local)]);
        reconcile(&mut store, Some(&[InstalledApp::new("com.foo", 5)]));
        assert_eq!(store.status("R1"), Status::InstalledAndLocally);
    }

    #[test]
    fn newer_catalog_version_is_updatable() {
        let mut store = catalog(&[
            ("R1", "com.foo", "7", Status::Local),
            ("R2", "com.bar", "9", Status::Downloadable),
        ]);
        reconcile(
            &mut store,
            Some(&[InstalledApp::new("com.foo", 5), InstalledApp::new("com.bar", 3)]),
        );
        assert_eq!(store.status("R1"), Status::UpdatableLocally);
        assert_eq!(store.status("R2"), Status::UpdatableRemotely);
    }

    #[test]
    fn version_comparison_is_numeric() {
        let mut store = catalog(&[("R1", "com.foo", "10", Status::Local)]);
        reconcile(&mut store, Some(&[InstalledApp::new("com.foo", 9)]));
        assert_eq!(store.status("R1"), Status::UpdatableLocally);
    }

    #[test]
    fn malformed_version_never_updates() {
        let mut store = catalog(&[("R1", "com.foo", "beta", Status::Local)]);
        reconcile(&mut store, Some(&[InstalledApp::new("com.foo", 1)]));
        assert_eq!(store.status("R1"), Status::InstalledAndLocally);
    }

    #[test]
    fn cached_entry_missing_from_device_is_installable() {
        let mut store = catalog(&[
            ("R1", "com.foo", "5", Status::Local),
            ("R2", "com.bar", "5", Status::Downloadable),
        ]);
        reconcile(&mut store, Some(&[InstalledApp::new("com.other", 1)]));
        assert_eq!(store.status("R1"), Status::Installable);
        assert_eq!(store.status("R2"), Status::Downloadable);
    }

    #[test]
    fn uninstalled_remote_entry_falls_back_to_downloadable() {
        let mut store = catalog(&[("R1", "com.foo", "5", Status::InstalledAndRemotely)]);
        reconcile(&mut store, Some(&[]));
        assert_eq!(store.status("R1"), Status::Downloadable);
    }

    #[test]
    fn disconnect_demotes_device_states() {
        let mut store = catalog(&[
            ("R1", "com.foo", "5", Status::InstalledAndLocally),
            ("R2", "com.foo", "7", Status::UpdatableLocally),
            ("R3", "com.bar", "1", Status::InstalledAndRemotely),
            ("R4", "com.baz", "1", Status::Installing),
            ("R5", "com.qux", "1", Status::Queued),
        ]);
        let changed = reconcile(&mut store, None);
        assert_eq!(changed, 4);
        assert_eq!(store.status("R1"), Status::Local);
        assert_eq!(store.status("R2"), Status::Local);
        assert_eq!(store.status("R3"), Status::Downloadable);
        assert_eq!(store.status("R4"), Status::Local);
        assert_eq!(store.status("R5"), Status::Queued);
    }

    #[test]
    fn pipeline_states_are_left_alone() {
        let mut store = catalog(&[
            ("R1", "com.foo", "5", Status::Downloading),
            ("R2", "com.foo", "5", Status::DecompressionError),
        ]);
        assert_eq!(reconcile(&mut store, Some(&[InstalledApp::new("com.foo", 5)])), 0);
        assert_eq!(store.status("R1"), Status::Downloading);
        assert_eq!(store.status("R2"), Status::DecompressionError);
    }

    #[test]
    fn only_changed_entries_publish() {
        let mut store = catalog(&[
            ("R1", "com.foo", "5", Status::InstalledAndLocally),
            ("R2", "com.bar", "5", Status::Downloadable),
        ]);
        let mut rx = store.events().subscribe();
        let changed = reconcile(&mut store, Some(&[InstalledApp::new("com.foo", 5)]));
        assert_eq!(changed, 0);
        assert!(rx.try_recv().is_err());
    }
}
