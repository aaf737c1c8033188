use crate::adapter::{names, register_builtins, unpack, Adapters};
use crate::string::{encode_with, write_ret, EncodedString, EncodingStrategy};
use crate::{
  BorrowStack, BoundaryId, BridgeError, ClosureRef, ClosureSignature, ExceptionRegister, Guest,
  Handle, HostFunction, HostString, HostValue, ProtocolViolation, SlotTable,
};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

/// Configuration for a [`Bridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeOptions {
  /// Number of values that may be lent to the guest at once.
  pub borrow_stack_capacity: usize,
  /// Initial capacity of the slot table, sentinels included.
  pub initial_slots: usize,
  pub string_encoding: EncodingStrategy,
}

impl Default for BridgeOptions {
  fn default() -> Self {
    Self {
      borrow_stack_capacity: 32,
      initial_slots: 128,
      string_encoding: EncodingStrategy::default(),
    }
  }
}

/// Point-in-time counters, for tests and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
  /// Slot table entries, including sentinels and free slots.
  pub slots: usize,
  /// Live, non-sentinel slots.
  pub live: usize,
  pub borrow_depth: usize,
  pub pending_exception: Option<u32>,
}

/// The bridge context for one loaded guest module.
///
/// Owns the slot table, borrow stack, pending-exception register and boundary function registry.
/// Created once per guest module load; its lifetime is the guest's lifetime.
///
/// The bridge is single-threaded but re-entrant: a boundary function may invoke a guest closure
/// that calls further boundary functions before the outer one returns. No internal borrow is held
/// across such calls.
pub struct Bridge {
  guest: Rc<dyn Guest>,
  options: BridgeOptions,
  slots: SlotTable,
  borrows: BorrowStack,
  exception: ExceptionRegister,
  adapters: Adapters,
  poisoned: Cell<bool>,
}

impl Bridge {
  pub fn new(guest: Rc<dyn Guest>, options: BridgeOptions) -> Self {
    let adapters = Adapters::new();
    register_builtins(&adapters);
    Self {
      guest,
      options,
      slots: SlotTable::with_capacity(options.initial_slots),
      borrows: BorrowStack::new(options.borrow_stack_capacity),
      exception: ExceptionRegister::new(),
      adapters,
      poisoned: Cell::new(false),
    }
  }

  pub fn guest(&self) -> &dyn Guest {
    &*self.guest
  }

  pub fn options(&self) -> &BridgeOptions {
    &self.options
  }

  pub fn slots(&self) -> &SlotTable {
    &self.slots
  }

  pub fn borrows(&self) -> &BorrowStack {
    &self.borrows
  }

  pub fn adapters(&self) -> &Adapters {
    &self.adapters
  }

  /// Returns `true` once a protocol violation has aborted a boundary call.
  pub fn is_poisoned(&self) -> bool {
    self.poisoned.get()
  }

  // Handles.

  /// Hands ownership of `value` to the guest.
  ///
  /// `undefined`, `null` and booleans map onto their immortal sentinels and use no slot.
  pub fn allocate(&self, value: HostValue) -> Handle {
    match value {
      HostValue::Undefined => Handle::UNDEFINED,
      HostValue::Null => Handle::NULL,
      HostValue::Bool(b) => Handle::from_bool(b),
      value => self.slots.allocate(value),
    }
  }

  /// Like [`Bridge::allocate`], but maps `undefined` and `null` to the absent handle `0`.
  pub fn allocate_optional(&self, value: HostValue) -> Handle {
    if value.is_nullish() {
      Handle::ABSENT
    } else {
      self.allocate(value)
    }
  }

  /// Resolves an owned or borrowed handle.
  pub fn resolve(&self, handle: Handle) -> Result<HostValue, BridgeError> {
    let value = if handle.is_borrowed() {
      self.borrows.resolve(handle)?
    } else {
      self.slots.resolve(handle)?
    };
    Ok(value)
  }

  /// Resolves `handle` for the host to keep beyond the current call; the guest keeps its handle.
  pub fn duplicate(&self, handle: Handle) -> Result<HostValue, BridgeError> {
    if handle.is_borrowed() {
      return Ok(self.borrows.resolve(handle)?);
    }
    Ok(self.slots.duplicate(handle)?)
  }

  /// Releases the guest's ownership of `handle`. Sentinels and borrowed handles are not owned by
  /// the table, so releasing them does nothing.
  pub fn release(&self, handle: Handle) -> Result<(), BridgeError> {
    if handle.is_borrowed() {
      return Ok(());
    }
    Ok(self.slots.release(handle)?)
  }

  /// Resolves and releases `handle`.
  pub fn take(&self, handle: Handle) -> Result<HostValue, BridgeError> {
    let value = self.resolve(handle)?;
    self.release(handle)?;
    Ok(value)
  }

  /// Lends `value` to the guest for the duration of `f`.
  pub fn with_borrowed<R>(
    &self,
    value: HostValue,
    f: impl FnOnce(Handle) -> Result<R, BridgeError>,
  ) -> Result<R, BridgeError> {
    self.borrows.with_borrowed(value, f)
  }

  // Strings.

  /// Encodes `s` into guest memory using the configured strategy.
  pub fn encode_string(&self, s: &HostString) -> Result<EncodedString, BridgeError> {
    encode_with(self.guest(), s, self.options.string_encoding)
  }

  /// Writes an optional string through the out-parameter area at `ret_ptr`; `None` writes
  /// `(0, 0)`.
  pub fn write_string_ret(&self, ret_ptr: u32, s: Option<&HostString>) -> Result<(), BridgeError> {
    let encoded = match s {
      Some(s) => self.encode_string(s)?,
      None => EncodedString::NONE,
    };
    write_ret(self.guest(), ret_ptr, encoded)
  }

  // Error channel.

  /// Runs a boundary operation, capturing a host failure into the pending-exception register.
  ///
  /// On a [`BridgeError::Throw`] the thrown value gets its own slot, its handle becomes the
  /// pending exception and the guest receives `0`. Protocol violations and closure misuse pass
  /// through.
  pub fn guarded(
    &self,
    f: impl FnOnce() -> Result<u32, BridgeError>,
  ) -> Result<u32, BridgeError> {
    match f() {
      Err(BridgeError::Throw(value)) => {
        let handle = self.slots.allocate(value);
        if let Some(previous) = self.exception.store(handle) {
          tracing::warn!(
            previous = previous.raw(),
            handle = handle.raw(),
            "pending exception overwritten before it was taken"
          );
        }
        tracing::trace!(handle = handle.raw(), "host exception captured");
        Ok(Handle::UNDEFINED.raw())
      }
      other => other,
    }
  }

  /// Retrieves and clears the pending exception. The guest owns the returned handle.
  pub fn take_exception(&self) -> Option<Handle> {
    self.exception.take()
  }

  pub fn pending_exception(&self) -> Option<Handle> {
    self.exception.peek()
  }

  // Boundary calls.

  /// Registers a boundary function.
  pub fn register(
    &self,
    name: &str,
    arity: usize,
    call: impl Fn(&Bridge, &[u32]) -> Result<u32, BridgeError> + 'static,
  ) -> BoundaryId {
    self.adapters.register(name, arity, call)
  }

  pub fn lookup(&self, name: &str) -> Option<BoundaryId> {
    self.adapters.lookup(name)
  }

  /// Services the boundary call `id` with raw guest arguments.
  ///
  /// A protocol violation poisons the bridge: every later call fails with
  /// [`ProtocolViolation::Poisoned`].
  pub fn invoke(&self, id: BoundaryId, args: &[u32]) -> Result<u32, BridgeError> {
    if self.poisoned.get() {
      return Err(ProtocolViolation::Poisoned.into());
    }
    let result = self.invoke_unpoisoned(id, args);
    if let Err(BridgeError::Protocol(violation)) = &result {
      if !self.poisoned.replace(true) {
        tracing::error!(%violation, boundary = id.0, "protocol violation; bridge poisoned");
      }
    }
    result
  }

  pub fn invoke_by_name(&self, name: &str, args: &[u32]) -> Result<u32, BridgeError> {
    let id = self
      .lookup(name)
      .ok_or_else(|| ProtocolViolation::UnknownBoundaryName(name.to_string()))?;
    self.invoke(id, args)
  }

  fn invoke_unpoisoned(&self, id: BoundaryId, args: &[u32]) -> Result<u32, BridgeError> {
    let boundary = self.adapters.get(id)?;
    if boundary.arity != args.len() {
      return Err(
        ProtocolViolation::ArityMismatch {
          name: boundary.name.to_string(),
          expected: boundary.arity,
          got: args.len(),
        }
        .into(),
      );
    }
    let _span = tracing::debug_span!("boundary", name = &*boundary.name).entered();
    (boundary.call)(self, args)
  }

  /// Registers a boundary function `(a, b) -> handle` that wraps the guest closure environment
  /// `(a, b)` as a host function with the given signature.
  pub fn register_closure_wrapper(&self, signature: ClosureSignature) -> BoundaryId {
    let name = format!("{}{}", names::CLOSURE_WRAPPER_PREFIX, self.adapters.len());
    let wrapper_name = name.clone();
    self.adapters.register(&name, 2, move |bridge, args| {
      let [a, b] = unpack(&wrapper_name, args)?;
      let closure = ClosureRef::new(a, b, signature);
      Ok(
        bridge
          .allocate(HostValue::Function(HostFunction::Closure(closure)))
          .raw(),
      )
    })
  }

  // Host operations.

  /// Calls a host function value: a native function or a wrapped guest closure.
  pub fn call_function(
    &self,
    function: &HostValue,
    this: HostValue,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    match function {
      HostValue::Function(HostFunction::Native { call, .. }) => (**call)(self, this, args),
      HostValue::Function(HostFunction::Closure(closure)) => closure.call(self, args),
      other => Err(BridgeError::type_error(format!(
        "{} is not a function",
        other.type_name()
      ))),
    }
  }

  pub fn get_property(&self, target: &HostValue, key: &str) -> Result<HostValue, BridgeError> {
    match target {
      HostValue::Undefined | HostValue::Null => Err(BridgeError::type_error(format!(
        "cannot read properties of {} (reading '{key}')",
        target.type_name()
      ))),
      HostValue::Object(object) => object.get(self, key),
      HostValue::Array(array) => Ok(match key {
        "length" => HostValue::Number(array.len() as f64),
        _ => key
          .parse::<usize>()
          .ok()
          .and_then(|index| array.get(index))
          .unwrap_or(HostValue::Undefined),
      }),
      HostValue::String(s) if key == "length" => Ok(HostValue::Number(s.len_code_units() as f64)),
      HostValue::Error(err) => Ok(match key {
        "name" => HostValue::string(&err.name),
        "message" => HostValue::string(&err.message),
        _ => HostValue::Undefined,
      }),
      HostValue::Function(f) if key == "name" => Ok(HostValue::string(f.name().unwrap_or(""))),
      _ => Ok(HostValue::Undefined),
    }
  }

  pub fn set_property(
    &self,
    target: &HostValue,
    key: &str,
    value: HostValue,
  ) -> Result<(), BridgeError> {
    match target {
      HostValue::Object(object) => object.set(self, key, value),
      _ => Err(BridgeError::type_error(format!(
        "cannot set property '{key}' on {}",
        target.type_name()
      ))),
    }
  }

  pub fn call_method(
    &self,
    target: &HostValue,
    name: &str,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    match target {
      HostValue::Object(object) => object.call_method(self, name, args),
      HostValue::Array(array) if name == "push" => {
        let mut len = array.len();
        for arg in args {
          len = array.push(arg.clone());
        }
        Ok(HostValue::Number(len as f64))
      }
      _ => Err(BridgeError::type_error(format!(
        "{}.{name} is not a function",
        target.type_name()
      ))),
    }
  }

  pub fn stats(&self) -> BridgeStats {
    BridgeStats {
      slots: self.slots.len(),
      live: self.slots.live_count(),
      borrow_depth: self.borrows.depth(),
      pending_exception: self.exception.peek().map(Handle::raw),
    }
  }
}

impl std::fmt::Debug for Bridge {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Bridge")
      .field("options", &self.options)
      .field("stats", &self.stats())
      .field("poisoned", &self.poisoned.get())
      .finish_non_exhaustive()
  }
}
