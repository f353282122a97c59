use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// One catalog item.
///
/// Identity is the release name alone: the same package name and version
/// code may appear under several releases over time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub version_code: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub size: String,
}

impl PackageEntry {
    /// Number of `;`-separated fields in a catalog record.
    pub const RECORD_FIELDS: usize = 6;

    /// Parse one catalog line: `name;release;package;version;updated;size`.
    ///
    /// Returns `None` for lines with the wrong field count or an empty
    /// release name.
    pub fn parse_record(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = line.split(';').collect();
        if parts.len() != Self::RECORD_FIELDS {
            return None;
        }
        let entry = Self {
            name: parts[0].trim().to_owned(),
            release_name: parts[1].trim().to_owned(),
            package_name: parts[2].trim().to_owned(),
            version_code: parts[3].trim().to_owned(),
            last_updated: parts[4].trim().to_owned(),
            size: parts[5].trim().to_owned(),
        };
        if entry.release_name.is_empty() {
            return None;
        }
        Some(entry)
    }

    /// Key addressing this entry's archive on the mirror and in the cache:
    /// hex MD5 of the release name followed by a newline.
    pub fn content_id(&self) -> String {
        content_id(&self.release_name)
    }

    /// Version code as an integer; malformed codes compare as 0.
    pub fn version_number(&self) -> i64 {
        parse_number(&self.version_code)
    }

    /// Declared size as an integer; malformed sizes sort as 0.
    pub fn size_number(&self) -> i64 {
        parse_number(&self.size)
    }
}

impl PartialEq for PackageEntry {
    fn eq(&self, other: &Self) -> bool {
        self.release_name == other.release_name
    }
}

impl Eq for PackageEntry {}

impl Hash for PackageEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.release_name.hash(state);
    }
}

impl PartialOrd for PackageEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_name.cmp(&other.release_name)
    }
}

/// Content identifier for a release name.
pub fn content_id(release_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(release_name.as_bytes());
    hasher.update(b"\n");
    hex::encode(hasher.finalize())
}

fn parse_number(value: &str) -> i64 {
    value.trim().parse::<i64>().unwrap_or(0)
}

/// A package observed on the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstalledApp {
    pub package_name: String,
    pub version_code: i64,
}

impl InstalledApp {
    pub fn new(package_name: impl Into<String>, version_code: i64) -> Self {
        Self {
            package_name: package_name.into(),
            version_code,
        }
    }
}

/// Descriptive properties of the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceProperties {
    pub serial: String,
    pub model: String,
    /// Storage size in KiB.
    pub total_space_kib: u64,
    /// Free storage in KiB.
    pub free_space_kib: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_record() {
        let entry = PackageEntry::parse_record(
            "Foo Game;Foo-1 v5;com.foo;5;2024-01-02 10:00 UTC;1024\r",
        )
        .unwrap();
        assert_eq!(entry.name, "Foo Game");
        assert_eq!(entry.release_name, "Foo-1 v5");
        assert_eq!(entry.package_name, "com.foo");
        assert_eq!(entry.version_number(), 5);
        assert_eq!(entry.size_number(), 1024);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(PackageEntry::parse_record("a;b;c;d;e").is_none());
        assert!(PackageEntry::parse_record("a;b;c;d;e;f;g").is_none());
        assert!(PackageEntry::parse_record("").is_none());
        assert!(PackageEntry::parse_record("a;;c;d;e;f").is_none());
    }

    #[test]
    fn identity_is_release_name() {
        let a = PackageEntry {
            release_name: "R1".into(),
            version_code: "1".into(),
            ..Default::default()
        };
        let b = PackageEntry {
            release_name: "R1".into(),
            version_code: "2".into(),
            ..Default::default()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_numbers_are_zero() {
        let entry = PackageEntry {
            version_code: "v12".into(),
            size: "".into(),
            ..Default::default()
        };
        assert_eq!(entry.version_number(), 0);
        assert_eq!(entry.size_number(), 0);
    }

    #[test]
    fn content_id_hashes_release_name_with_newline() {
        // `printf 'abc\n' | md5sum`
        assert_eq!(content_id("abc"), "0bee89b07a248e27c83fc3d5951213c1");
        assert_eq!(content_id("abc").len(), 32);
        assert_ne!(content_id("abc"), content_id("abd"));
    }
}
