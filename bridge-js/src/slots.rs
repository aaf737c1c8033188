use crate::handle::{BORROW_TAG, RESERVED_SLOTS};
use crate::{Handle, HostValue, ProtocolViolation};
use core::mem;
use std::cell::{Cell, RefCell};

enum Slot {
  Live(HostValue),
  /// Link in the free list: the next free index, or the table length if this is the last one.
  Free { next: u32 },
}

/// Arena of host values addressable by small integers.
///
/// Freed slots are threaded into a singly-linked free list; the free-list head equals the table
/// length when no freed slot is available, in which case allocation appends.
///
/// All methods take `&self`. The inner table is only borrowed for the duration of a single
/// operation and never across a call into host or guest code, so nested boundary calls may
/// allocate and release while an outer call still holds handles.
pub struct SlotTable {
  slots: RefCell<Vec<Slot>>,
  head: Cell<u32>,
  live: Cell<usize>,
}

#[allow(clippy::len_without_is_empty)]
impl SlotTable {
  pub fn new() -> Self {
    Self::with_capacity(0)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    let mut slots = Vec::with_capacity(capacity.max(RESERVED_SLOTS as usize));
    slots.push(Slot::Live(HostValue::Undefined));
    slots.push(Slot::Live(HostValue::Null));
    slots.push(Slot::Live(HostValue::Bool(true)));
    slots.push(Slot::Live(HostValue::Bool(false)));
    debug_assert_eq!(slots.len(), RESERVED_SLOTS as usize);

    Self {
      slots: RefCell::new(slots),
      head: Cell::new(RESERVED_SLOTS),
      live: Cell::new(0),
    }
  }

  /// Stores `value` in a fresh slot and returns its index.
  ///
  /// Reuses the most recently released slot if there is one, otherwise appends.
  pub fn allocate(&self, value: HostValue) -> Handle {
    let mut slots = self.slots.borrow_mut();
    let head = self.head.get() as usize;
    let (idx, next) = match slots.get(head) {
      Some(Slot::Free { next }) => (head, *next),
      _ => {
        debug_assert_eq!(head, slots.len(), "free-list head points to a live slot");
        let idx = slots.len();
        slots.push(Slot::Free { next: 0 });
        (idx, idx as u32 + 1)
      }
    };
    debug_assert!(
      (idx as u32) & BORROW_TAG == 0,
      "slot index overflowed into the borrow tag"
    );

    slots[idx] = Slot::Live(value);
    self.head.set(next);
    self.live.set(self.live.get() + 1);
    tracing::trace!(handle = idx, "slot allocated");
    Handle(idx as u32)
  }

  /// Returns the value at `handle` for the duration of the current call.
  pub fn resolve(&self, handle: Handle) -> Result<HostValue, ProtocolViolation> {
    let slots = self.slots.borrow();
    match slots.get(handle.index()) {
      Some(Slot::Live(value)) if !handle.is_borrowed() => Ok(value.clone()),
      Some(Slot::Free { .. }) => Err(ProtocolViolation::StaleHandle(handle.raw())),
      _ => Err(ProtocolViolation::HandleOutOfRange(handle.raw())),
    }
  }

  /// Returns the value at `handle` without consuming the handle, for the host to retain beyond
  /// the inbound call (e.g. a listener callback registered with a host object).
  pub fn duplicate(&self, handle: Handle) -> Result<HostValue, ProtocolViolation> {
    self.resolve(handle)
  }

  /// Frees `handle`, dropping the table's ownership of its value.
  ///
  /// Sentinel handles are immortal; releasing them is a no-op.
  pub fn release(&self, handle: Handle) -> Result<(), ProtocolViolation> {
    if handle.is_reserved() {
      return Ok(());
    }
    let old = {
      let mut slots = self.slots.borrow_mut();
      let head = self.head.get();
      match slots.get_mut(handle.index()) {
        Some(slot @ Slot::Live(_)) if !handle.is_borrowed() => {
          self.head.set(handle.raw());
          mem::replace(slot, Slot::Free { next: head })
        }
        Some(Slot::Free { .. }) => return Err(ProtocolViolation::DoubleRelease(handle.raw())),
        _ => return Err(ProtocolViolation::HandleOutOfRange(handle.raw())),
      }
    };
    self.live.set(self.live.get() - 1);
    tracing::trace!(handle = handle.raw(), "slot released");
    // Dropped outside the borrow: host destructors may re-enter the table.
    drop(old);
    Ok(())
  }

  /// Resolves and releases `handle` in one step.
  pub fn take(&self, handle: Handle) -> Result<HostValue, ProtocolViolation> {
    let value = self.resolve(handle)?;
    self.release(handle)?;
    Ok(value)
  }

  /// Returns `true` if `handle` currently refers to a populated entry.
  pub fn is_live(&self, handle: Handle) -> bool {
    !handle.is_borrowed()
      && matches!(
        self.slots.borrow().get(handle.index()),
        Some(Slot::Live(_))
      )
  }

  /// Total number of entries (sentinels, live and free).
  pub fn len(&self) -> usize {
    self.slots.borrow().len()
  }

  /// Whether every non-sentinel entry is free. Sentinels still count towards [`len`](Self::len).
  pub fn has_no_live(&self) -> bool {
    self.live.get() == 0
  }

  /// Number of live, non-sentinel entries.
  pub fn live_count(&self) -> usize {
    self.live.get()
  }
}

impl Default for SlotTable {
  fn default() -> Self {
    Self::new()
  }
}
