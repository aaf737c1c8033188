use crate::{Bridge, BridgeError, ClosureError, DestructorId, GuestExport, Handle, HostValue};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Whether a closure's environment may be mutated by its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureKind {
  /// `Fn`-style: the environment is read-only and invocations may nest freely.
  Shared,
  /// `FnMut`-style: the environment is taken out of the handle for the duration of each
  /// invocation, so the closure cannot run re-entrantly or be destroyed mid-call.
  Mut,
}

/// How host arguments are handed to the closure body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgPassing {
  /// Each argument gets a fresh slot; the guest owns (and must release) it.
  Owned,
  /// Arguments are lent through the borrow stack and expire when the body returns.
  Borrowed,
}

/// What the closure body's integer return value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureReturn {
  Void,
  /// An owned slot handle whose ownership passes back to the host.
  Owned,
}

/// Fixed shape of a family of guest closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureSignature {
  pub kind: ClosureKind,
  pub destructor: DestructorId,
  pub invoke: GuestExport,
  pub args: ArgPassing,
  pub returns: ClosureReturn,
}

struct ClosureState {
  /// First environment word. `None` while a `Mut` invocation has it taken, or after destruction.
  a: Cell<Option<u32>>,
  b: Cell<u32>,
  /// Live references: one for the guest's handle plus one per in-flight invocation.
  count: Cell<u32>,
  /// Set once the guest's own reference has been dropped.
  dropped: Cell<bool>,
  destroyed: Cell<bool>,
  signature: ClosureSignature,
}

/// A guest closure wrapped as a host-callable value.
///
/// The destructor runs exactly once, when the reference count drops from one to zero. That
/// happens either in [`ClosureRef::drop_ref`] (no invocation in flight) or at the end of the last
/// in-flight invocation after the guest dropped its reference.
#[derive(Clone)]
pub struct ClosureRef(Rc<ClosureState>);

impl ClosureRef {
  pub fn new(a: u32, b: u32, signature: ClosureSignature) -> Self {
    tracing::debug!(a, b, kind = ?signature.kind, "closure created");
    Self(Rc::new(ClosureState {
      a: Cell::new(Some(a)),
      b: Cell::new(b),
      count: Cell::new(1),
      dropped: Cell::new(false),
      destroyed: Cell::new(false),
      signature,
    }))
  }

  pub fn signature(&self) -> ClosureSignature {
    self.0.signature
  }

  pub fn kind(&self) -> ClosureKind {
    self.0.signature.kind
  }

  pub fn ref_count(&self) -> u32 {
    self.0.count.get()
  }

  pub fn is_destroyed(&self) -> bool {
    self.0.destroyed.get()
  }

  /// The environment pair, or `None` while taken by an invocation or after destruction.
  pub fn env(&self) -> Option<(u32, u32)> {
    self.0.a.get().map(|a| (a, self.0.b.get()))
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  /// Invokes the closure body with `args` and returns its raw integer result.
  pub fn invoke(&self, bridge: &Bridge, args: &[HostValue]) -> Result<u32, BridgeError> {
    let state = &*self.0;
    if state.destroyed.get() {
      return Err(ClosureError::Destroyed.into());
    }
    let a = match state.signature.kind {
      ClosureKind::Shared => state.a.get().ok_or(ClosureError::Destroyed)?,
      // Taken until the invocation finishes.
      ClosureKind::Mut => state.a.take().ok_or(ClosureError::Reentered)?,
    };
    let b = state.b.get();
    state.count.set(state.count.get() + 1);

    let invocation = Invocation {
      closure: self,
      bridge,
      a,
      b,
      finished: false,
    };
    let result = self.call_body(bridge, a, b, args);
    let finished = invocation.finish();
    let ret = result?;
    finished?;
    Ok(ret)
  }

  /// Invokes the closure and interprets its result according to [`ClosureReturn`].
  pub fn call(&self, bridge: &Bridge, args: &[HostValue]) -> Result<HostValue, BridgeError> {
    let ret = self.invoke(bridge, args)?;
    match self.0.signature.returns {
      ClosureReturn::Void => Ok(HostValue::Undefined),
      ClosureReturn::Owned => bridge.take(Handle::from_raw(ret)),
    }
  }

  /// Drops the guest's reference.
  ///
  /// Returns `true` if the destructor ran synchronously. Otherwise an invocation is still in
  /// flight and the destructor runs when it returns.
  pub fn drop_ref(&self, bridge: &Bridge) -> Result<bool, BridgeError> {
    let state = &*self.0;
    let count = state.count.get();
    if state.destroyed.get() || state.dropped.get() || count == 0 {
      return Err(ClosureError::Destroyed.into());
    }
    state.dropped.set(true);
    state.count.set(count - 1);
    if count > 1 {
      tracing::debug!(pending = count - 1, "closure drop deferred to in-flight invocation");
      return Ok(false);
    }
    let Some(a) = state.a.get() else {
      debug_assert!(false, "closure environment taken with no invocation in flight");
      return Err(ClosureError::Reentered.into());
    };
    self.destroy(bridge, a, state.b.get())?;
    Ok(true)
  }

  fn call_body(
    &self,
    bridge: &Bridge,
    a: u32,
    b: u32,
    args: &[HostValue],
  ) -> Result<u32, BridgeError> {
    let signature = self.0.signature;
    let guest = bridge.guest();
    match signature.args {
      ArgPassing::Owned => {
        let handles: Vec<u32> = args
          .iter()
          .map(|arg| bridge.allocate(arg.clone()).raw())
          .collect();
        guest.invoke(bridge, signature.invoke, a, b, &handles)
      }
      ArgPassing::Borrowed => {
        let scope = bridge.borrows().scope();
        let mut handles = Vec::with_capacity(args.len());
        for arg in args {
          handles.push(scope.push(arg.clone())?.raw());
        }
        let result = guest.invoke(bridge, signature.invoke, a, b, &handles);
        drop(scope);
        result
      }
    }
  }

  /// Runs after every invocation, whether the body succeeded, failed or unwound.
  fn finish_invocation(&self, bridge: &Bridge, a: u32, b: u32) -> Result<(), BridgeError> {
    let state = &*self.0;
    let count = state.count.get() - 1;
    state.count.set(count);
    if count == 0 {
      return self.destroy(bridge, a, b);
    }
    if state.signature.kind == ClosureKind::Mut {
      state.a.set(Some(a));
    }
    Ok(())
  }

  fn destroy(&self, bridge: &Bridge, a: u32, b: u32) -> Result<(), BridgeError> {
    let state = &*self.0;
    state.destroyed.set(true);
    state.a.set(None);
    state.b.set(0);
    tracing::debug!(a, b, "closure destroyed");
    bridge.guest().destroy(state.signature.destructor, a, b)
  }
}

/// An invocation in flight. Dropping it without [`finish`](Self::finish) (when the body unwinds)
/// still returns the count and the environment.
struct Invocation<'a> {
  closure: &'a ClosureRef,
  bridge: &'a Bridge,
  a: u32,
  b: u32,
  finished: bool,
}

impl Invocation<'_> {
  fn finish(mut self) -> Result<(), BridgeError> {
    self.finished = true;
    self.closure.finish_invocation(self.bridge, self.a, self.b)
  }
}

impl Drop for Invocation<'_> {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    if let Err(err) = self.closure.finish_invocation(self.bridge, self.a, self.b) {
      tracing::error!(%err, "closure destructor failed during unwinding");
    }
  }
}

impl fmt::Debug for ClosureRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClosureRef")
      .field("kind", &self.0.signature.kind)
      .field("env", &self.env())
      .field("count", &self.0.count.get())
      .field("destroyed", &self.0.destroyed.get())
      .finish()
  }
}
