use std::ops::BitOr;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Lifecycle state of a single catalog entry.
///
/// Exactly one `Status` is current for every tracked entry. Filtering over
/// several states uses [`StatusSet`] instead, so a multi-state value can never
/// be stored against an entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[repr(u16)]
pub enum Status {
    /// Loaded from a record whose status could not be parsed.
    #[default]
    Unknown = 0,
    /// Installed on the device at an older version, not cached locally.
    UpdatableRemotely = 1,
    /// Only present in the remote catalog.
    Downloadable = 2,
    Queued = 3,
    Downloading = 4,
    DownloadError = 5,
    Decompressing = 6,
    DecompressionError = 7,
    /// Extracted into the local library, no device connected.
    Local = 8,
    /// Cached locally and installed on the device at an older version.
    UpdatableLocally = 9,
    /// Cached locally, device connected, package not installed.
    Installable = 10,
    Installing = 11,
    InstallError = 12,
    /// Installed and current on the device, not cached locally.
    InstalledAndRemotely = 13,
    /// Installed and current on the device, cached locally.
    InstalledAndLocally = 14,
}

impl Status {
    /// Bit used for this status inside a [`StatusSet`].
    pub const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Stable status written to the state file.
    ///
    /// Transient states fold onto the state they resume from after a
    /// restart: anything in the download/extract half of the pipeline resumes
    /// as `Queued`, anything device-derived collapses back to `Local` or
    /// `Downloadable` until the next reconciliation.
    pub const fn persisted(self) -> Status {
        match self {
            Status::Downloading
            | Status::DownloadError
            | Status::Decompressing
            | Status::DecompressionError => Status::Queued,
            Status::Installable
            | Status::Installing
            | Status::InstallError
            | Status::UpdatableLocally
            | Status::InstalledAndLocally => Status::Local,
            Status::UpdatableRemotely | Status::InstalledAndRemotely | Status::Unknown => {
                Status::Downloadable
            }
            Status::Queued | Status::Local | Status::Downloadable => self,
        }
    }

    /// Status the entry would have with no device attached.
    pub const fn device_base(self) -> Status {
        if StatusSet::LOCAL_DEVICE.contains(self) {
            Status::Local
        } else if StatusSet::REMOTE_DEVICE.contains(self) {
            Status::Downloadable
        } else {
            self
        }
    }

    pub const fn is_queueable(self) -> bool {
        StatusSet::QUEUEABLE.contains(self)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A set of [`Status`] values, used only as a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusSet(u16);

impl StatusSet {
    pub const EMPTY: StatusSet = StatusSet(0);

    /// States from which an entry may be (re-)queued for download.
    pub const QUEUEABLE: StatusSet = StatusSet::of(&[
        Status::Downloadable,
        Status::UpdatableRemotely,
        Status::DownloadError,
        Status::DecompressionError,
    ]);

    /// Device-derived states of entries that are not cached locally.
    pub const REMOTE_DEVICE: StatusSet =
        StatusSet::of(&[Status::UpdatableRemotely, Status::InstalledAndRemotely]);

    /// Device-derived states of entries cached in the local library.
    pub const LOCAL_DEVICE: StatusSet = StatusSet::of(&[
        Status::UpdatableLocally,
        Status::InstalledAndLocally,
        Status::Installable,
        Status::InstallError,
        Status::Installing,
    ]);

    /// States that keep an entry in the download list.
    pub const DOWNLOAD_LIST: StatusSet = StatusSet::of(&[
        Status::Queued,
        Status::Downloading,
        Status::DownloadError,
        Status::Decompressing,
        Status::DecompressionError,
    ]);

    /// States that keep an entry in the local library list.
    pub const LOCAL_LIST: StatusSet = StatusSet::of(&[
        Status::Local,
        Status::Installable,
        Status::InstalledAndLocally,
        Status::InstallError,
    ]);

    pub const fn of(statuses: &[Status]) -> StatusSet {
        let mut bits = 0;
        let mut i = 0;
        while i < statuses.len() {
            bits |= statuses[i].bit();
            i += 1;
        }
        StatusSet(bits)
    }

    pub fn all() -> StatusSet {
        Status::iter().collect()
    }

    pub const fn contains(self, status: Status) -> bool {
        self.0 & status.bit() != 0
    }

    pub fn insert(&mut self, status: Status) {
        self.0 |= status.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = Status> {
        Status::iter().filter(move |s| self.contains(*s))
    }
}

impl From<Status> for StatusSet {
    fn from(status: Status) -> Self {
        StatusSet(status.bit())
    }
}

impl FromIterator<Status> for StatusSet {
    fn from_iter<I: IntoIterator<Item = Status>>(iter: I) -> Self {
        let mut set = StatusSet::EMPTY;
        for status in iter {
            set.insert(status);
        }
        set
    }
}

impl BitOr for StatusSet {
    type Output = StatusSet;

    fn bitor(self, rhs: StatusSet) -> StatusSet {
        StatusSet(self.0 | rhs.0)
    }
}

impl BitOr<Status> for StatusSet {
    type Output = StatusSet;

    fn bitor(self, rhs: Status) -> StatusSet {
        StatusSet(self.0 | rhs.bit())
    }
}
