use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of low slot indices reserved for immortal sentinel values.
///
/// Indices `0..RESERVED_SLOTS` hold `undefined`, `null`, `true` and `false` (in that order) and are
/// never handed out by [`SlotTable::allocate`](crate::SlotTable::allocate) nor freed by
/// [`SlotTable::release`](crate::SlotTable::release).
pub const RESERVED_SLOTS: u32 = 4;

/// Tag bit marking a handle that refers to the borrow stack instead of the slot table.
pub const BORROW_TAG: u32 = 1 << 31;

/// An integer reference to a host value, as seen by the guest.
///
/// The guest never holds host values directly; it only holds:
/// - a slot-table index (`0..len`), owned until released, or
/// - a borrow-stack index (bit 31 set), valid only during the boundary call that produced it.
///
/// Index `0` ([`Handle::UNDEFINED`]) doubles as the "absent object" handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Handle(pub(crate) u32);

impl Handle {
  pub const UNDEFINED: Handle = Handle(0);
  pub const NULL: Handle = Handle(1);
  pub const TRUE: Handle = Handle(2);
  pub const FALSE: Handle = Handle(3);
  /// The handle used for "no object".
  pub const ABSENT: Handle = Handle::UNDEFINED;

  /// Reinterprets a raw boundary integer as a handle.
  #[inline]
  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  /// The raw integer passed across the boundary.
  #[inline]
  pub const fn raw(self) -> u32 {
    self.0
  }

  #[inline]
  pub const fn from_bool(value: bool) -> Self {
    if value {
      Handle::TRUE
    } else {
      Handle::FALSE
    }
  }

  /// Returns `true` for the immortal sentinel handles.
  #[inline]
  pub const fn is_reserved(self) -> bool {
    self.0 < RESERVED_SLOTS
  }

  #[inline]
  pub const fn is_borrowed(self) -> bool {
    self.0 & BORROW_TAG != 0
  }

  /// The borrow-stack slot selected by this handle, if it is a borrowed handle.
  #[inline]
  pub const fn borrow_slot(self) -> Option<u32> {
    if self.is_borrowed() {
      Some(self.0 & !BORROW_TAG)
    } else {
      None
    }
  }

  #[inline]
  pub(crate) const fn borrowed(slot: u32) -> Self {
    Self(slot | BORROW_TAG)
  }

  #[inline]
  pub(crate) fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Debug for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.borrow_slot() {
      Some(slot) => write!(f, "Handle(borrow {slot})"),
      None => write!(f, "Handle({})", self.0),
    }
  }
}

impl fmt::Display for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// Identifier of a guest export that invokes a closure body.
///
/// The guest is expected to maintain a dispatch table keyed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct GuestExport(pub u32);

/// Identifier of a guest destructor in the guest's destructor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct DestructorId(pub u32);

/// Identifier of a registered boundary function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BoundaryId(pub u32);
