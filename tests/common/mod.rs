#![allow(dead_code)]

use msc_arbiter::fs::{DirEntry, EntryKind, FileName, Filesystem, IoError, MountError, RECORD_FILE};
use msc_arbiter::usb::{Indicators, Led, UsbStack};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Duration;

#[cfg(feature = "msc")]
pub mod bbb;

/// USB stack double recording every control call
#[derive(Debug, Default)]
pub struct MockUsb {
    pub enabled: bool,
    pub started: bool,
    pub enable_calls: usize,
    pub disable_calls: usize,
    pub start_calls: usize,
    pub stop_calls: usize,
    /// `enable` while enabled or `start` while started
    pub redundant_calls: usize,
}

impl UsbStack for MockUsb {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        if self.enabled {
            self.redundant_calls += 1;
        }
        self.enabled = true;
        self.enable_calls += 1;
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.started = false;
        self.disable_calls += 1;
    }

    fn start(&mut self) {
        if self.started {
            self.redundant_calls += 1;
        }
        self.started = true;
        self.start_calls += 1;
    }

    fn stop(&mut self) {
        self.started = false;
        self.stop_calls += 1;
    }
}

/// Contents of the physical medium, shared between the firmware's filesystem and the "host"
#[derive(Debug, Default)]
pub struct Medium {
    pub formatted: bool,
    pub files: Vec<(String, Vec<u8>)>,
    pub dirs: Vec<String>,
}

impl Medium {
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|(name, _)| name.clone()).collect()
    }
}

pub type SharedMedium = Rc<RefCell<Medium>>;

pub fn formatted_medium() -> SharedMedium {
    Rc::new(RefCell::new(Medium {
        formatted: true,
        ..Default::default()
    }))
}

pub fn blank_medium() -> SharedMedium {
    Rc::new(RefCell::new(Medium::default()))
}

/// Filesystem double over a [Medium]
#[derive(Debug)]
pub struct MockFs {
    pub medium: SharedMedium,
    pub mounted: bool,
    pub disk_ready: bool,
    pub fail_format: bool,
    /// The disk stops answering once a format completes
    pub lose_disk_on_format: bool,
    pub mount_calls: usize,
    pub unmount_calls: usize,
    pub format_calls: usize,
    /// Operations attempted on an unmounted volume, or formatting a mounted one
    pub violations: usize,
}

impl MockFs {
    pub fn new(medium: SharedMedium) -> Self {
        Self {
            medium,
            mounted: false,
            disk_ready: true,
            fail_format: false,
            lose_disk_on_format: false,
            mount_calls: 0,
            unmount_calls: 0,
            format_calls: 0,
            violations: 0,
        }
    }

    fn check_mounted(&mut self) -> Result<(), IoError> {
        if !self.mounted {
            self.violations += 1;
            return Err(IoError::Failed);
        }
        Ok(())
    }
}

fn file_name(name: &str) -> Result<FileName, IoError> {
    let mut file_name = FileName::new();
    file_name
        .push_str(name)
        .map_err(|_| IoError::InvalidName)?;
    Ok(file_name)
}

impl Filesystem for MockFs {
    type Entries<'a> = std::vec::IntoIter<Result<DirEntry, IoError>>;

    fn mount(&mut self) -> Result<(), MountError> {
        self.mount_calls += 1;
        if !self.disk_ready {
            return Err(MountError::DiskNotReady);
        }
        if !self.medium.borrow().formatted {
            return Err(MountError::NoFilesystem);
        }
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) {
        if !self.mounted {
            self.violations += 1;
        }
        self.unmount_calls += 1;
        self.mounted = false;
    }

    fn list_root(&mut self) -> Result<Self::Entries<'_>, IoError> {
        self.check_mounted()?;

        let medium = self.medium.borrow();
        let dirs = medium.dirs.iter().map(|name| -> Result<DirEntry, IoError> {
            Ok(DirEntry {
                name: file_name(name)?,
                kind: EntryKind::Directory,
            })
        });
        let files = medium.files.iter().map(|(name, data)| -> Result<DirEntry, IoError> {
            Ok(DirEntry {
                name: file_name(name)?,
                kind: EntryKind::File {
                    size: data.len() as u64,
                },
            })
        });
        let entries: Vec<_> = dirs.chain(files).collect();
        Ok(entries.into_iter())
    }

    fn create_file(&mut self, name: &str) -> Result<(), IoError> {
        self.check_mounted()?;
        file_name(name)?;

        let mut medium = self.medium.borrow_mut();
        match medium.files.iter().position(|(n, _)| n == name) {
            Some(index) => medium.files[index].1.clear(),
            None => medium.files.push((name.to_string(), Vec::new())),
        }
        Ok(())
    }

    fn append_record(&mut self, record: &[u8]) -> Result<(), IoError> {
        self.check_mounted()?;

        let mut medium = self.medium.borrow_mut();
        match medium.files.iter().position(|(n, _)| n == RECORD_FILE) {
            Some(index) => medium.files[index].1.extend_from_slice(record),
            None => medium.files.push((RECORD_FILE.to_string(), record.to_vec())),
        }
        Ok(())
    }

    fn format(&mut self) -> Result<(), IoError> {
        self.format_calls += 1;
        if self.mounted {
            self.violations += 1;
        }
        if self.fail_format {
            return Err(IoError::Disk);
        }

        let mut medium = self.medium.borrow_mut();
        medium.files.clear();
        medium.dirs.clear();
        medium.formatted = true;
        if self.lose_disk_on_format {
            self.disk_ready = false;
        }
        Ok(())
    }
}

/// Indicator double keeping the current LED levels
#[derive(Debug, Default)]
pub struct LedLog {
    pub usb_resume: bool,
    pub usb_started: bool,
    pub all_off_calls: usize,
}

impl Indicators for LedLog {
    fn set(&mut self, led: Led, on: bool) {
        match led {
            Led::UsbResume => self.usb_resume = on,
            Led::UsbStarted => self.usb_started = on,
        }
    }

    fn all_off(&mut self) {
        self.usb_resume = false;
        self.usb_started = false;
        self.all_off_calls += 1;
    }
}

pub fn timeout<F, T>(timeout: Duration, f: F)
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = sync_channel(0);
    thread::spawn(move || {
        f();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(timeout).expect("timeout");
}
