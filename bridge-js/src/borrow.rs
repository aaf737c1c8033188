use crate::{Handle, HostValue, ProtocolViolation};
use std::cell::{Cell, RefCell};

/// Fixed-capacity stack for lending host values to the guest without transferring ownership.
///
/// The stack pointer grows from `capacity` down to `0`. A borrowed handle is valid only while
/// its slot is at or above the stack pointer; once popped, resolving it is a protocol violation.
pub struct BorrowStack {
  slots: RefCell<Vec<Option<HostValue>>>,
  sp: Cell<usize>,
}

impl BorrowStack {
  pub fn new(capacity: usize) -> Self {
    Self {
      slots: RefCell::new(vec![None; capacity]),
      sp: Cell::new(capacity),
    }
  }

  pub fn capacity(&self) -> usize {
    self.slots.borrow().len()
  }

  /// Number of values currently lent out.
  pub fn depth(&self) -> usize {
    self.capacity() - self.sp.get()
  }

  /// Pushes `value` and returns its borrowed handle.
  ///
  /// Exceeding the capacity is fatal: the caller cannot safely continue the call chain.
  pub fn push(&self, value: HostValue) -> Result<Handle, ProtocolViolation> {
    let mut slots = self.slots.borrow_mut();
    let sp = self.sp.get();
    if sp == 0 {
      return Err(ProtocolViolation::BorrowStackOverflow {
        capacity: slots.len(),
      });
    }
    let sp = sp - 1;
    slots[sp] = Some(value);
    self.sp.set(sp);
    tracing::trace!(slot = sp, "borrow pushed");
    Ok(Handle::borrowed(sp as u32))
  }

  /// Pops the top value, discarding it.
  pub fn pop(&self) -> Result<(), ProtocolViolation> {
    let old = {
      let mut slots = self.slots.borrow_mut();
      let sp = self.sp.get();
      if sp >= slots.len() {
        return Err(ProtocolViolation::BorrowStackUnderflow);
      }
      self.sp.set(sp + 1);
      tracing::trace!(slot = sp, "borrow popped");
      slots[sp].take()
    };
    drop(old);
    Ok(())
  }

  pub fn resolve(&self, handle: Handle) -> Result<HostValue, ProtocolViolation> {
    let Some(slot) = handle.borrow_slot() else {
      return Err(ProtocolViolation::HandleOutOfRange(handle.raw()));
    };
    let slot = slot as usize;
    let slots = self.slots.borrow();
    if slot >= slots.len() {
      return Err(ProtocolViolation::HandleOutOfRange(handle.raw()));
    }
    if slot < self.sp.get() {
      return Err(ProtocolViolation::ExpiredBorrow(handle.raw()));
    }
    slots[slot]
      .clone()
      .ok_or(ProtocolViolation::ExpiredBorrow(handle.raw()))
  }

  /// Opens a scope; every value pushed through it is popped when the scope is dropped.
  pub fn scope(&self) -> BorrowScope<'_> {
    BorrowScope {
      stack: self,
      sp_at_entry: self.sp.get(),
    }
  }

  /// Lends `value` for the duration of `f`.
  pub fn with_borrowed<R, E>(
    &self,
    value: HostValue,
    f: impl FnOnce(Handle) -> Result<R, E>,
  ) -> Result<R, E>
  where
    E: From<ProtocolViolation>,
  {
    let scope = self.scope();
    let handle = scope.push(value)?;
    let result = f(handle);
    drop(scope);
    result
  }

  fn unwind_to(&self, sp: usize) {
    let popped: Vec<HostValue> = {
      let mut slots = self.slots.borrow_mut();
      let current = self.sp.get();
      debug_assert!(current <= sp, "borrow scope closed out of order");
      self.sp.set(sp);
      slots[current.min(sp)..sp]
        .iter_mut()
        .filter_map(Option::take)
        .collect()
    };
    drop(popped);
  }
}

/// RAII guard returned by [`BorrowStack::scope`].
///
/// On drop the stack pointer is restored to its value at entry, so borrows are released even when
/// the guarded call fails.
pub struct BorrowScope<'a> {
  stack: &'a BorrowStack,
  sp_at_entry: usize,
}

impl BorrowScope<'_> {
  pub fn push(&self, value: HostValue) -> Result<Handle, ProtocolViolation> {
    self.stack.push(value)
  }
}

impl Drop for BorrowScope<'_> {
  fn drop(&mut self) {
    self.stack.unwind_to(self.sp_at_entry);
  }
}
