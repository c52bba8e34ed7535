//! Pending event aggregation
//!
//! Interrupt handlers record user requests by OR-ing a bit into [PendingEvents]. The main
//! loop takes the whole mask with a single atomic swap once per iteration. Several raises
//! of the same kind between two drains collapse into one bit and therefore one dispatched
//! work item.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use portable_atomic::{AtomicU32, Ordering};

/// Kind of a user-triggered request. The discriminant is the bit index in [EventMask].
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    CreateFile = 0,
    ListDir = 1,
    Reformat = 2,
    ToggleUsb = 3,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::CreateFile,
        EventKind::ListDir,
        EventKind::Reformat,
        EventKind::ToggleUsb,
    ];

    pub fn mask(self) -> EventMask {
        EventMask::from_bits_retain(1 << u8::from(self))
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const CREATE_FILE = 1 << 0;
        const LIST_DIR = 1 << 1;
        const REFORMAT = 1 << 2;
        const TOGGLE_USB = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "EventMask({=u32:#b})", self.bits());
    }
}

impl EventMask {
    /// Kinds set in this mask, lowest bit first.
    ///
    /// Raises of different kinds within one drain window are unordered; the iteration
    /// order is not the order in which they were raised.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.mask()))
    }
}

/// Logical buttons of the device
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    ToggleUsb = 0,
    CreateFile = 1,
    ListDir = 2,
    Reformat = 3,
}

impl Button {
    pub fn event(self) -> EventKind {
        match self {
            Button::ToggleUsb => EventKind::ToggleUsb,
            Button::CreateFile => EventKind::CreateFile,
            Button::ListDir => EventKind::ListDir,
            Button::Reformat => EventKind::Reformat,
        }
    }
}

/// Debounced button transition
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonAction {
    Push,
    Release,
}

/// Interrupt-safe set of pending [EventKind]s
///
/// Meant to live in a `static`:
///
/// ```
/// use msc_arbiter::event::{EventKind, PendingEvents};
///
/// static EVENTS: PendingEvents = PendingEvents::new();
///
/// // interrupt context
/// EVENTS.raise(EventKind::ListDir);
/// EVENTS.raise(EventKind::ListDir);
///
/// // main loop
/// let events = EVENTS.drain();
/// assert_eq!(1, events.kinds().count());
/// assert!(EVENTS.is_empty());
/// ```
pub struct PendingEvents {
    bits: AtomicU32,
}

impl PendingEvents {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Marks `kind` as pending. Callable from interrupt context.
    #[inline]
    pub fn raise(&self, kind: EventKind) {
        self.raise_mask(kind.mask());
    }

    /// Marks every kind in `mask` as pending. Callable from interrupt context.
    #[inline]
    pub fn raise_mask(&self, mask: EventMask) {
        self.bits.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    /// Raises the event bound to `button` on a push. Releases are ignored.
    pub fn on_button(&self, button: Button, action: ButtonAction) {
        if action == ButtonAction::Push {
            self.raise(button.event());
        }
    }

    /// Takes and clears all pending kinds. Main loop only.
    pub fn drain(&self) -> EventMask {
        EventMask::from_bits_truncate(self.bits.swap(0, Ordering::AcqRel))
    }

    pub fn is_empty(&self) -> bool {
        self.bits.load(Ordering::Acquire) == 0
    }
}

impl Default for PendingEvents {
    fn default() -> Self {
        Self::new()
    }
}
