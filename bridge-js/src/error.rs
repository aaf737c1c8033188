use crate::value::HostException;
use crate::value::HostValue;

/// Errors produced while servicing a boundary call.
///
/// The three variants mirror the failure taxonomy of the bridge:
/// - [`BridgeError::Protocol`] is fatal: the guest and host disagree about the boundary contract.
/// - [`BridgeError::Closure`] is a closure lifecycle bug reachable from ordinary guest logic.
/// - [`BridgeError::Throw`] is a recoverable host failure, captured by
///   [`Bridge::guarded`](crate::Bridge::guarded) into the pending-exception register.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
  #[error("protocol violation: {0}")]
  Protocol(#[from] ProtocolViolation),

  #[error("closure misuse: {0}")]
  Closure(#[from] ClosureError),

  /// A host-side failure value. This is catchable by the guest via the error channel.
  #[error("uncaught host exception")]
  Throw(HostValue),
}

impl BridgeError {
  /// Builds a [`BridgeError::Throw`] carrying a [`HostException`].
  pub fn throw_error(name: impl Into<String>, message: impl Into<String>) -> Self {
    BridgeError::Throw(HostValue::Error(HostException::new(name, message)))
  }

  pub fn type_error(message: impl Into<String>) -> Self {
    Self::throw_error("TypeError", message)
  }

  /// Returns `true` if this error must abort the boundary call chain.
  pub fn is_fatal(&self) -> bool {
    matches!(self, BridgeError::Protocol(_))
  }

  pub fn protocol(&self) -> Option<&ProtocolViolation> {
    match self {
      BridgeError::Protocol(violation) => Some(violation),
      _ => None,
    }
  }
}

/// A breach of the guest/host boundary contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
  #[error("handle {0} is out of range")]
  HandleOutOfRange(u32),

  #[error("handle {0} refers to a released slot")]
  StaleHandle(u32),

  #[error("handle {0} was released twice")]
  DoubleRelease(u32),

  #[error("borrowed handle {0:#x} was used after its call returned")]
  ExpiredBorrow(u32),

  #[error("borrow stack overflow (capacity {capacity})")]
  BorrowStackOverflow { capacity: usize },

  #[error("borrow stack underflow")]
  BorrowStackUnderflow,

  #[error("guest bytes at {ptr:#x}+{len} are not valid UTF-8")]
  InvalidUtf8 { ptr: u32, len: u32 },

  #[error("string of {code_units} code units does not fit in guest memory")]
  StringTooLarge { code_units: usize },

  #[error("guest memory access at {ptr:#x}+{len} is out of bounds (memory size {size})")]
  MemoryOutOfBounds { ptr: u32, len: u32, size: usize },

  #[error("expected {expected} at handle {handle}")]
  TypeMismatch { handle: u32, expected: &'static str },

  #[error("unknown boundary function id {0}")]
  UnknownBoundary(u32),

  #[error("unknown boundary function `{0}`")]
  UnknownBoundaryName(String),

  #[error("boundary function `{name}` expects {expected} arguments, got {got}")]
  ArityMismatch {
    name: String,
    expected: usize,
    got: usize,
  },

  #[error("unknown guest export {0}")]
  UnknownExport(u32),

  #[error("unknown guest destructor {0}")]
  UnknownDestructor(u32),

  #[error("bridge is poisoned by an earlier protocol violation")]
  Poisoned,
}

/// Misuse of a closure handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ClosureError {
  #[error("closure invoked after being destroyed")]
  Destroyed,

  #[error("closure invoked recursively while its environment is in use")]
  Reentered,
}
