use crate::Handle;
use std::cell::Cell;

/// Single-slot register holding the handle of the most recently captured host failure.
///
/// Not a queue: a boundary call does not re-enter while its failure is still unread.
#[derive(Debug, Default)]
pub struct ExceptionRegister {
  pending: Cell<Option<Handle>>,
}

impl ExceptionRegister {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores `handle`, returning any previous, unread exception handle.
  pub fn store(&self, handle: Handle) -> Option<Handle> {
    self.pending.replace(Some(handle))
  }

  /// Retrieves and clears the pending exception.
  pub fn take(&self) -> Option<Handle> {
    self.pending.take()
  }

  pub fn peek(&self) -> Option<Handle> {
    self.pending.get()
  }

  pub fn is_pending(&self) -> bool {
    self.pending.get().is_some()
  }
}
