//! Work items run by the scheduler
//!
//! Every job goes through [Arbiter::with_filesystem] (or [Arbiter::reformat]), so a job that
//! runs while the host owns the medium is rejected there and only logged.
//!
//! [Arbiter::with_filesystem]: crate::arbiter::Arbiter::with_filesystem
//! [Arbiter::reformat]: crate::arbiter::Arbiter::reformat

use crate::device::Storage;
use crate::event::EventKind;
use crate::fs::{EntryKind, FileName, Filesystem, IoError};
use crate::scheduler::Handler;
use crate::usb::UsbStack;
use core::fmt::Write;
use heapless::String;

/// Longest line appended by [create_random_file]
const MAX_RECORD_LEN: usize = 64;

/// Work item for a drained event kind. `ToggleUsb` has none: it is an arbiter request.
pub fn for_event<U, F>(kind: EventKind) -> Option<Handler<Storage<U, F>>>
where
    U: UsbStack,
    F: Filesystem,
{
    let handler: Handler<Storage<U, F>> = match kind {
        EventKind::CreateFile => create_random_file,
        EventKind::ListDir => list_root,
        EventKind::Reformat => reformat,
        EventKind::ToggleUsb => return None,
    };
    Some(handler)
}

/// Creates `XXXXXXXX.txt` with a random name and logs it to the record file
pub fn create_random_file<U, F>(storage: &mut Storage<U, F>, _data: &[u8])
where
    U: UsbStack,
    F: Filesystem,
{
    let mut name = FileName::new();
    let record_number = storage.record_number + 1;
    let random = storage.next_random();

    let result = storage.arbiter.with_filesystem(|fs| {
        write!(name, "{:08x}.txt", random).map_err(|_| IoError::InvalidName)?;
        info!("jobs: Creating random file: {} ...", name.as_str());
        fs.create_file(&name)?;

        let mut record = String::<MAX_RECORD_LEN>::new();
        write!(record, "{:08} {}\r\n", record_number, name).map_err(|_| IoError::Failed)?;
        fs.append_record(record.as_bytes())
    });

    if result.is_ok() {
        storage.record_number = record_number;
        info!("jobs: Wrote data record: {}", record_number);
    }
    storage.finish("create file", result);
}

/// Logs the root directory, one line per entry
pub fn list_root<U, F>(storage: &mut Storage<U, F>, _data: &[u8])
where
    U: UsbStack,
    F: Filesystem,
{
    info!("jobs: Listing directory: /");

    let result = storage.arbiter.with_filesystem(|fs| {
        let mut count = 0;
        for entry in fs.list_root()? {
            let entry = entry?;
            match entry.kind {
                EntryKind::Directory => info!("jobs:    <DIR>   {}", entry.name.as_str()),
                EntryKind::File { size } => info!("jobs: {} bytes  {}", size, entry.name.as_str()),
            }
            count += 1;
        }
        Ok(count)
    });

    let result = result.map(|count| {
        info!("jobs: Entries count: {}", count);
        storage.stats.last_listing = Some(count);
    });
    storage.finish("list directory", result);
}

/// Formats the medium and mounts the empty volume
pub fn reformat<U, F>(storage: &mut Storage<U, F>, _data: &[u8])
where
    U: UsbStack,
    F: Filesystem,
{
    let result = storage.arbiter.reformat();
    if result.is_ok() {
        info!("jobs: Done");
    }
    storage.finish("reformat", result);
}
