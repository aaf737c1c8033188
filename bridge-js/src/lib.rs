//! Host-side object bridge for sandboxed linear-memory guests.
//!
//! A guest module (e.g. a WebAssembly instance) can only exchange integers with its host. This
//! crate lets it hold, pass and release references to host values it cannot store in its own
//! memory:
//! - a slot table ([`SlotTable`]) maps small integer [`Handle`]s to owned host values, reusing
//!   released indices through a free list threaded through the table,
//! - a borrow stack ([`BorrowStack`]) lends values for the duration of one call without
//!   transferring ownership,
//! - the [`string`] codec moves UTF-8 text in and out of guest memory,
//! - the closure trampoline ([`ClosureRef`]) wraps guest closures as host functions with
//!   reference-counted, re-entrancy-safe teardown,
//! - boundary functions ([`Adapters`]) translate raw integer calls into host operations, and
//! - the error channel ([`Bridge::guarded`]) turns host failures into a pending exception the
//!   guest retrieves by handle.
//!
//! # Failure model
//!
//! [`BridgeError::Protocol`] means the guest broke the boundary contract (out-of-range handle,
//! malformed UTF-8, borrow stack overflow). It aborts the call chain and poisons the [`Bridge`].
//! [`BridgeError::Closure`] is closure misuse reachable from ordinary guest logic.
//! [`BridgeError::Throw`] is a recoverable host failure.
//!
//! # Example
//!
//! ```
//! use bridge_js::{names, Bridge, BridgeOptions, Handle, HostValue, MemoryGuest};
//! use std::rc::Rc;
//!
//! let guest = Rc::new(MemoryGuest::new());
//! let bridge = Bridge::new(guest.clone(), BridgeOptions::default());
//!
//! let a = bridge.allocate(HostValue::string("A"));
//! let b = bridge.allocate(HostValue::string("B"));
//! assert_eq!((a.raw(), b.raw()), (4, 5));
//!
//! bridge.invoke_by_name(names::OBJECT_DROP_REF, &[a.raw()]).unwrap();
//! let c = bridge.allocate(HostValue::string("C"));
//! assert_eq!(c, Handle::from_raw(4));
//! ```

mod adapter;
mod borrow;
mod bridge;
mod closure;
mod debug;
mod error;
mod exception;
mod guest;
mod handle;
mod slots;
pub mod string;
mod value;

pub use crate::adapter::names;
pub use crate::adapter::Adapters;
pub use crate::adapter::Boundary;
pub use crate::adapter::BoundaryFn;
pub use crate::borrow::BorrowScope;
pub use crate::borrow::BorrowStack;
pub use crate::bridge::Bridge;
pub use crate::bridge::BridgeOptions;
pub use crate::bridge::BridgeStats;
pub use crate::closure::ArgPassing;
pub use crate::closure::ClosureKind;
pub use crate::closure::ClosureRef;
pub use crate::closure::ClosureReturn;
pub use crate::closure::ClosureSignature;
pub use crate::debug::debug_string;
pub use crate::error::BridgeError;
pub use crate::error::ClosureError;
pub use crate::error::ProtocolViolation;
pub use crate::exception::ExceptionRegister;
pub use crate::guest::Guest;
pub use crate::guest::GuestDtor;
pub use crate::guest::GuestFn;
pub use crate::guest::MemoryGuest;
pub use crate::handle::BoundaryId;
pub use crate::handle::DestructorId;
pub use crate::handle::GuestExport;
pub use crate::handle::Handle;
pub use crate::handle::BORROW_TAG;
pub use crate::handle::RESERVED_SLOTS;
pub use crate::slots::SlotTable;
pub use crate::string::EncodedString;
pub use crate::string::EncodingStrategy;
pub use crate::value::HostArray;
pub use crate::value::HostException;
pub use crate::value::HostFunction;
pub use crate::value::HostObject;
pub use crate::value::HostObjectRef;
pub use crate::value::HostString;
pub use crate::value::HostValue;
pub use crate::value::NativeFn;
