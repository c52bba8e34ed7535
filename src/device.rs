//! Process-wide device context
//!
//! [Device] owns every piece of mutable state the foreground loop needs. Only the
//! [PendingEvents] mask lives outside of it, since interrupt handlers write to it.
//!
//! A firmware main loop looks like:
//!
//! ```ignore
//! static EVENTS: PendingEvents = PendingEvents::new();
//!
//! let mut device: Device<_, _, _> = Device::new(usb, fs, leds, Config::default());
//! device.start();
//! loop {
//!     // the USB stack calls `device.on_usb_event(..)` for each queued notification
//!     usb_stack.process_events(&mut device);
//!     if device.poll(&EVENTS) {
//!         cortex_m::asm::wfe();
//!     }
//! }
//! ```

use crate::arbiter::{Arbiter, ArbitrationState, Request, StorageError};
use crate::event::PendingEvents;
use crate::fs::Filesystem;
use crate::jobs;
use crate::scheduler::{Scheduler, SchedulerError, DEFAULT_QUEUE_SIZE};
use crate::usb::{Indicators, SessionObserver, UsbEvent, UsbEventHandler, UsbStack};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Startup configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Wait for VBUS notifications before starting USB. Without it, USB is started at boot.
    pub power_detection: bool,
    /// Seed for random file names
    pub rng_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            power_detection: true,
            rng_seed: 0x5EED_0F_F11E,
        }
    }
}

/// Job bookkeeping
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct JobStats {
    pub completed: u32,
    /// Jobs refused because the firmware did not own the medium
    pub rejected: u32,
    pub failed: u32,
    /// Number of entries found by the last successful listing
    pub last_listing: Option<usize>,
}

/// Context handed to work items
pub struct Storage<U: UsbStack, F: Filesystem> {
    pub arbiter: Arbiter<U, F>,
    pub stats: JobStats,
    pub(crate) record_number: u32,
    rng: SmallRng,
}

impl<U, F> Storage<U, F>
where
    U: UsbStack,
    F: Filesystem,
{
    pub fn new(arbiter: Arbiter<U, F>, rng_seed: u64) -> Self {
        Self {
            arbiter,
            stats: JobStats::default(),
            record_number: 0,
            rng: SmallRng::seed_from_u64(rng_seed),
        }
    }

    /// Records written so far
    pub fn record_number(&self) -> u32 {
        self.record_number
    }

    pub(crate) fn next_random(&mut self) -> u32 {
        self.rng.next_u32()
    }

    /// Reports the outcome of job `name`. Storage errors end here.
    pub(crate) fn finish(&mut self, name: &str, result: Result<(), StorageError>) {
        match result {
            Ok(()) => self.stats.completed += 1,
            Err(StorageError::Busy(state)) => {
                warn!("jobs: {} rejected, storage busy ({})", name, state);
                self.stats.rejected += 1;
            }
            Err(err) => {
                error!("jobs: {} failed: {}", name, err);
                self.stats.failed += 1;
            }
        }
    }
}

/// The device: arbiter, work queue and USB observer
pub struct Device<U, F, I, const N: usize = DEFAULT_QUEUE_SIZE>
where
    U: UsbStack,
    F: Filesystem,
    I: Indicators,
{
    storage: Storage<U, F>,
    scheduler: Scheduler<Storage<U, F>, N>,
    observer: SessionObserver<I>,
    config: Config,
}

impl<U, F, I, const N: usize> Device<U, F, I, N>
where
    U: UsbStack,
    F: Filesystem,
    I: Indicators,
{
    pub fn new(usb: U, fs: F, indicators: I, config: Config) -> Self {
        Self {
            storage: Storage::new(Arbiter::new(usb, fs), config.rng_seed),
            scheduler: Scheduler::new(),
            observer: SessionObserver::new(indicators),
            config,
        }
    }

    pub fn storage(&self) -> &Storage<U, F> {
        &self.storage
    }

    pub fn arbiter(&self) -> &Arbiter<U, F> {
        &self.storage.arbiter
    }

    pub fn state(&self) -> ArbitrationState {
        self.storage.arbiter.state()
    }

    pub fn indicators(&self) -> &I {
        self.observer.indicators()
    }

    /// Number of queued work items
    pub fn pending_jobs(&self) -> usize {
        self.scheduler.len()
    }

    /// Boot sequence: mount the medium and exercise it once, then bring up USB
    pub fn start(&mut self) {
        if self.storage.arbiter.handle(Request::RetryMount) == ArbitrationState::FirmwareOwned {
            jobs::list_root(&mut self.storage, &[]);
            jobs::create_random_file(&mut self.storage, &[]);
        }

        if self.config.power_detection {
            info!("device: Waiting for USB power");
        } else {
            info!("device: No USB power detection enabled, starting USB now");
            self.storage.arbiter.handle(Request::PowerDetected);
            self.storage.arbiter.handle(Request::PowerReady);
        }
    }

    /// Drains `events` and queues one work item per pending kind
    ///
    /// `ToggleUsb` is applied to the arbiter right away. Kinds that do not fit into the queue
    /// are raised again and retried on the next pass. Returns the number of queued items.
    pub fn dispatch(&mut self, events: &PendingEvents) -> usize {
        let mut submitted = 0;

        for kind in events.drain().kinds() {
            let Some(handler) = jobs::for_event::<U, F>(kind) else {
                self.toggle();
                continue;
            };

            match self.scheduler.submit(handler) {
                Ok(()) => submitted += 1,
                Err(err) if retry_later(err) => {
                    warn!("device: Work queue full, retrying {} next pass", kind);
                    events.raise(kind);
                }
                Err(err) => error!("device: Dropping {}: {}", kind, err),
            }
        }

        submitted
    }

    /// Runs every queued work item
    pub fn run_pending(&mut self) -> usize {
        self.scheduler.run_pending(&mut self.storage)
    }

    /// One main loop pass. Returns `true` when nothing is left to do and the core may sleep.
    pub fn poll(&mut self, events: &PendingEvents) -> bool {
        self.dispatch(events);
        self.run_pending();
        events.is_empty() && self.scheduler.is_empty()
    }

    fn toggle(&mut self) {
        let state = self.storage.arbiter.handle(Request::Toggle);
        if state == ArbitrationState::HostOwned {
            info!("device: Enable the USB");
        } else {
            self.observer.indicators_mut().all_off();
            info!("device: Disable the USB");
        }
    }
}

/// Whether a work item refused by the scheduler can be submitted again on a later pass
fn retry_later(err: SchedulerError) -> bool {
    match err {
        SchedulerError::QueueFull => true,
        SchedulerError::PayloadTooLarge => false,
    }
}

impl<U, F, I, const N: usize> UsbEventHandler for Device<U, F, I, N>
where
    U: UsbStack,
    F: Filesystem,
    I: Indicators,
{
    fn on_usb_event(&mut self, event: UsbEvent) {
        self.observer.notify(&mut self.storage.arbiter, event);
    }
}
