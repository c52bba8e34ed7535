//! Local filesystem gateway
//!
//! The firmware's view of the medium. Implementations wrap a real filesystem (FAT on top of
//! a [BlockDevice]) and are only ever called by the [Arbiter] while the firmware owns the
//! medium.
//!
//! [BlockDevice]: crate::block::BlockDevice
//! [Arbiter]: crate::arbiter::Arbiter

use heapless::String;

/// Longest file name carried by a [DirEntry]
pub const MAX_NAME_LEN: usize = 32;

/// Name of the file [Filesystem::append_record] appends to
pub const RECORD_FILE: &str = "log_data.txt";

pub type FileName = String<MAX_NAME_LEN>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MountError {
    /// The underlying disk could not be initialized
    DiskNotReady,
    /// No filesystem found on the medium. It has to be formatted first
    NoFilesystem,
    /// Any other filesystem driver failure
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoError {
    NotFound,
    Denied,
    NoSpace,
    InvalidName,
    /// Disk level read/write failure
    Disk,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryKind {
    File { size: u64 },
    Directory,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: FileName,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// Filesystem operations needed by the firmware
///
/// All calls are synchronous and are expected to return in bounded time: a driver that can
/// hang must report an error instead.
pub trait Filesystem {
    /// Lazy listing of the root directory
    type Entries<'a>: Iterator<Item = Result<DirEntry, IoError>>
    where
        Self: 'a;

    fn mount(&mut self) -> Result<(), MountError>;

    /// Flushes and releases the volume. Must not fail; errors are the driver's to log.
    fn unmount(&mut self);

    fn list_root(&mut self) -> Result<Self::Entries<'_>, IoError>;

    /// Creates `name` in the root directory, truncating an existing file
    fn create_file(&mut self, name: &str) -> Result<(), IoError>;

    /// Appends `record` to [RECORD_FILE], creating it when missing
    fn append_record(&mut self, record: &[u8]) -> Result<(), IoError>;

    /// Writes a fresh, empty filesystem. Called with the volume unmounted.
    fn format(&mut self) -> Result<(), IoError>;
}
