//! Storage arbitration and event dispatch for USB Mass Storage devices
//!
//! A device that exports its storage medium to a USB host also wants to use that medium
//! itself while no host is attached. This crate is the coordination layer between the two:
//!
//! * [Event Aggregator] - interrupt-safe bitmask of pending user requests
//! * [Scheduler] - bounded, cooperative queue of deferred work items
//! * [Arbiter] - decides whether the host or the firmware owns the medium
//! * [Session Observer] - turns USB stack notifications into arbiter requests
//! * [Device] - the process-wide context driven by the main loop
//!
//! The USB stack, the filesystem and the block device are collaborators behind
//! [UsbStack], [Filesystem] and [BlockDevice].
//!
//! # Features
//! | Feature | Description                           |
//! | ------- |---------------------------------------|
//! | `msc` | Include the SCSI export path built on [usbd-storage] (default) |
//! | `defmt` | Enable logging via [defmt](https://crates.io/crates/defmt) crate |
//! | `critical-section` | Atomic swap via `critical-section` on cores without CAS |
//!
//! [usbd-storage]: https://crates.io/crates/usbd-storage
//! [Event Aggregator]: crate::event::PendingEvents
//! [Scheduler]: crate::scheduler::Scheduler
//! [Arbiter]: crate::arbiter::Arbiter
//! [Session Observer]: crate::usb::SessionObserver
//! [Device]: crate::device::Device
//! [UsbStack]: crate::usb::UsbStack
//! [Filesystem]: crate::fs::Filesystem
//! [BlockDevice]: crate::block::BlockDevice

#![no_std]

#[macro_use]
mod fmt;

pub mod arbiter;
pub mod block;
pub mod device;
pub mod event;
#[cfg(feature = "msc")]
pub mod export;
pub mod fs;
pub mod jobs;
pub mod scheduler;
pub mod usb;
