//! USB session observer
//!
//! Adapter between the USB device stack and the [Arbiter]. The stack reports lifecycle
//! notifications as [UsbEvent]s; each one becomes exactly one [Request]. Indicator updates
//! are cosmetic and have no bearing on ownership.
//!
//! [Arbiter]: crate::arbiter::Arbiter

use crate::arbiter::{Arbiter, ArbitrationState, Request};
use crate::fs::Filesystem;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Lifecycle notification from the USB stack
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbEvent {
    /// The bus went to sleep
    DriversSuspended = 0,
    /// The bus woke up
    DriversResumed = 1,
    /// The stack started and the host may enumerate the device
    SessionStarted = 2,
    /// The stack stopped: cable pulled or the host ejected the medium
    SessionStopped = 3,
    /// VBUS appeared
    PowerDetected = 4,
    /// VBUS disappeared
    PowerRemoved = 5,
    /// VBUS is stable, the stack may be started
    PowerReady = 6,
}

impl From<UsbEvent> for Request {
    fn from(event: UsbEvent) -> Self {
        match event {
            UsbEvent::DriversSuspended => Request::Suspended,
            UsbEvent::DriversResumed => Request::Resumed,
            UsbEvent::SessionStarted => Request::SessionStarted,
            UsbEvent::SessionStopped => Request::SessionStopped,
            UsbEvent::PowerDetected => Request::PowerDetected,
            UsbEvent::PowerRemoved => Request::PowerRemoved,
            UsbEvent::PowerReady => Request::PowerReady,
        }
    }
}

/// Control surface of the USB device stack
pub trait UsbStack {
    fn is_enabled(&self) -> bool;

    /// Powers up the USB peripheral
    fn enable(&mut self);

    fn disable(&mut self);

    /// Attaches to the bus. The stack answers with [UsbEvent::SessionStarted]
    fn start(&mut self);

    /// Detaches from the bus. The stack answers with [UsbEvent::SessionStopped]
    fn stop(&mut self);
}

/// Receiver of USB stack notifications
///
/// Must be called from the foreground loop (e.g. while the stack drains its event queue),
/// never from an interrupt handler.
pub trait UsbEventHandler {
    fn on_usb_event(&mut self, event: UsbEvent);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    /// Lit while the bus is awake
    UsbResume,
    /// Lit while the USB session is running
    UsbStarted,
}

/// Status indicators (LEDs)
pub trait Indicators {
    fn set(&mut self, led: Led, on: bool);

    fn all_off(&mut self);
}

impl Indicators for () {
    fn set(&mut self, _led: Led, _on: bool) {}

    fn all_off(&mut self) {}
}

/// Forwards USB notifications to the arbiter and mirrors them on indicators
pub struct SessionObserver<I: Indicators> {
    indicators: I,
}

impl<I: Indicators> SessionObserver<I> {
    pub fn new(indicators: I) -> Self {
        Self { indicators }
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    pub fn indicators_mut(&mut self) -> &mut I {
        &mut self.indicators
    }

    /// Handles one notification and returns the resulting ownership state
    pub fn notify<U, F>(&mut self, arbiter: &mut Arbiter<U, F>, event: UsbEvent) -> ArbitrationState
    where
        U: UsbStack,
        F: Filesystem,
    {
        info!("usb: Event: {}", event);

        match event {
            UsbEvent::DriversSuspended => self.indicators.set(Led::UsbResume, false),
            UsbEvent::DriversResumed => self.indicators.set(Led::UsbResume, true),
            UsbEvent::SessionStarted => self.indicators.set(Led::UsbStarted, true),
            UsbEvent::SessionStopped => self.indicators.all_off(),
            UsbEvent::PowerDetected | UsbEvent::PowerRemoved | UsbEvent::PowerReady => {}
        }

        arbiter.handle(Request::from(event))
    }
}
