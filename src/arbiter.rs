//! Storage arbitration state machine
//!
//! The medium is a single physical resource. Either the host holds it through the USB mass
//! storage export, or the firmware holds it through its local filesystem, never both: each
//! side caches filesystem metadata on its own, so sharing would corrupt the volume silently.
//!
//! ```text
//!              SessionStarted / Toggle
//!   Detached ─────────────────────────┐
//!      ▲  │                           ▼
//!      │  │ SessionStopped      Transitioning ──> HostOwned
//!      │  ▼ (mount)                   ▲              │  │
//!      │ Transitioning                │ (unmount)    │  │
//!      │  │                           │              │  │
//!      │  ├─ mount failed ──> Detached│              │  │
//!      │  ▼                           │              │  │
//!   FirmwareOwned ────────────────────┘              │  │
//!      ▲           SessionStarted / Toggle           │  │
//!      │                                             │  │
//!      └──────────── SessionStopped ─────────────────┘  │
//!   Detached <─────── PowerRemoved / Toggle ────────────┘
//! ```
//!
//! `Transitioning` is only ever observed from inside a transition: unmounting before the
//! export starts and stopping the export before mounting are explicit, ordered steps.

use crate::fs::{Filesystem, IoError, MountError};
use crate::usb::UsbStack;

/// Who owns the medium
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArbitrationState {
    /// Nobody: no USB export, no mounted filesystem
    Detached,
    /// The host, through the USB mass storage export
    HostOwned,
    /// Ownership is being handed over
    Transitioning,
    /// The firmware, through its mounted filesystem
    FirmwareOwned,
}

/// State transition request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    PowerDetected,
    PowerReady,
    PowerRemoved,
    SessionStarted,
    /// The USB session ended, either after power loss or because the host ejected the medium
    SessionStopped,
    Suspended,
    Resumed,
    /// Local user request to attach to or detach from the host
    Toggle,
    /// Local request to try mounting again after a failed mount
    RetryMount,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The firmware does not own the medium right now. Carries the state at rejection
    Busy(ArbitrationState),
    Io(IoError),
    Mount(MountError),
}

impl From<IoError> for StorageError {
    fn from(err: IoError) -> Self {
        StorageError::Io(err)
    }
}

impl From<MountError> for StorageError {
    fn from(err: MountError) -> Self {
        StorageError::Mount(err)
    }
}

/// Gatekeeper between the USB export and the local filesystem
pub struct Arbiter<U: UsbStack, F: Filesystem> {
    usb: U,
    fs: F,
    state: ArbitrationState,
    mounted: bool,
    exporting: bool,
    usb_connected: bool,
}

impl<U, F> Arbiter<U, F>
where
    U: UsbStack,
    F: Filesystem,
{
    /// Creates a detached arbiter. Nothing is mounted and the USB stack is left as is.
    pub fn new(usb: U, fs: F) -> Self {
        Self {
            usb,
            fs,
            state: ArbitrationState::Detached,
            mounted: false,
            exporting: false,
            usb_connected: false,
        }
    }

    pub fn state(&self) -> ArbitrationState {
        self.state
    }

    /// Whether the USB mass storage export may serve the medium to the host
    pub fn export_active(&self) -> bool {
        self.exporting
    }

    pub fn fs_mounted(&self) -> bool {
        self.mounted
    }

    /// Whether the firmware has started the USB stack
    pub fn usb_connected(&self) -> bool {
        self.usb_connected
    }

    pub fn usb(&self) -> &U {
        &self.usb
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Applies `request` and returns the resulting state
    pub fn handle(&mut self, request: Request) -> ArbitrationState {
        use ArbitrationState::*;

        debug!("arbiter: {} in {}", request, self.state);

        match (self.state, request) {
            (Transitioning, _) => {
                // transitions complete synchronously, so this is a re-entrant call
                warn!("arbiter: Ignoring {} during transition", request);
            }
            (_, Request::Suspended | Request::Resumed) => {}
            (HostOwned, Request::PowerDetected | Request::PowerReady | Request::SessionStarted) => {}
            (_, Request::PowerDetected) => self.enable_usb(),
            (_, Request::PowerReady) => self.start_usb(),
            (_, Request::SessionStarted) => self.export(),
            (HostOwned, Request::PowerRemoved | Request::Toggle) => self.release_host(),
            (_, Request::PowerRemoved) => self.stop_usb(),
            (_, Request::SessionStopped) => self.session_stopped(),
            (_, Request::Toggle) => {
                self.enable_usb();
                self.start_usb();
                self.export();
            }
            (Detached, Request::RetryMount) if !self.usb_connected => {
                // failures are logged and leave the arbiter detached
                let _ = self.mount_local();
            }
            (_, Request::RetryMount) => {
                debug!("arbiter: Mount retry not applicable");
            }
        }

        self.state
    }

    /// Runs `op` against the filesystem if the firmware owns the medium
    ///
    /// # Errors
    /// * [StorageError::Busy] - the medium is not firmware owned or USB is connected; `op`
    /// is not called
    /// * [StorageError::Io] - `op` failed
    pub fn with_filesystem<T>(
        &mut self,
        op: impl FnOnce(&mut F) -> Result<T, IoError>,
    ) -> Result<T, StorageError> {
        self.check_local_access()?;
        op(&mut self.fs).map_err(StorageError::Io)
    }

    /// Replaces the volume with an empty filesystem and mounts it again
    ///
    /// # Errors
    /// * [StorageError::Busy] - the medium is not firmware owned or USB is connected
    /// * [StorageError::Io] - formatting failed, the previous volume is mounted again
    /// * [StorageError::Mount] - mounting afterwards failed, the arbiter is `Detached`
    pub fn reformat(&mut self) -> Result<(), StorageError> {
        self.check_local_access()?;

        self.state = ArbitrationState::Transitioning;
        self.unmount_local();

        info!("arbiter: Creating filesystem...");
        let formatted = self.fs.format();
        if let Err(err) = formatted {
            error!("arbiter: Mkfs failed: {}", err);
        }

        self.mount_local()?;
        formatted?;
        Ok(())
    }

    fn check_local_access(&self) -> Result<(), StorageError> {
        if self.state != ArbitrationState::FirmwareOwned || self.usb_connected {
            warn!(
                "arbiter: Unable to operate on filesystem in {} (usb connected: {})",
                self.state,
                self.usb_connected
            );
            return Err(StorageError::Busy(self.state));
        }
        Ok(())
    }

    fn enable_usb(&mut self) {
        if !self.usb.is_enabled() {
            info!("arbiter: Enable USB");
            self.usb.enable();
        }
    }

    fn start_usb(&mut self) {
        if !self.usb_connected {
            info!("arbiter: Start USB");
            self.usb.start();
            self.usb_connected = true;
        }
    }

    fn stop_usb(&mut self) {
        if self.usb_connected {
            info!("arbiter: Stop USB");
            self.usb.stop();
            self.usb_connected = false;
        }
    }

    /// Hands the medium to the host: unmount first, export second
    fn export(&mut self) {
        self.state = ArbitrationState::Transitioning;
        self.unmount_local();

        info!("arbiter: Exporting medium");
        // a started session implies a started stack
        self.usb_connected = true;
        self.exporting = true;
        self.state = ArbitrationState::HostOwned;
    }

    fn release_host(&mut self) {
        info!("arbiter: Stop export");
        self.exporting = false;
        self.stop_usb();
        self.state = ArbitrationState::Detached;
    }

    /// Hands the medium to the firmware: stop the export first, mount second
    fn session_stopped(&mut self) {
        self.state = ArbitrationState::Transitioning;
        if self.exporting {
            info!("arbiter: Stop export");
            self.exporting = false;
        }
        self.usb_connected = false;
        self.usb.disable();

        // a failed mount is logged and leaves the arbiter detached
        let _ = self.mount_local();
    }

    fn unmount_local(&mut self) {
        if self.mounted {
            info!("arbiter: Unmounting volume...");
            self.fs.unmount();
            self.mounted = false;
        }
    }

    fn mount_local(&mut self) -> Result<(), MountError> {
        debug_assert!(!self.exporting);

        if self.mounted {
            self.state = ArbitrationState::FirmwareOwned;
            return Ok(());
        }

        self.state = ArbitrationState::Transitioning;
        info!("arbiter: Mounting volume...");
        match self.fs.mount() {
            Ok(()) => {
                self.mounted = true;
                self.state = ArbitrationState::FirmwareOwned;
                Ok(())
            }
            Err(MountError::NoFilesystem) => {
                error!("arbiter: Mount failed. Filesystem not found. Please format device.");
                self.state = ArbitrationState::Detached;
                Err(MountError::NoFilesystem)
            }
            Err(err) => {
                error!("arbiter: Mount failed: {}", err);
                self.state = ArbitrationState::Detached;
                Err(err)
            }
        }
    }
}
