use crate::closure::ClosureRef;
use crate::{Bridge, BridgeError};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A host-native string.
///
/// Host strings are sequences of UTF-16 code units and may contain unpaired surrogates. The
/// buffer is shared, so cloning is cheap.
#[derive(Clone)]
pub struct HostString {
  units: Rc<[u16]>,
  hash64: u64,
}

impl HostString {
  pub fn new(s: &str) -> Self {
    Self::from_u16_vec(s.encode_utf16().collect())
  }

  pub fn from_code_units(units: &[u16]) -> Self {
    Self::from_u16_vec(units.to_vec())
  }

  pub fn from_u16_vec(units: Vec<u16>) -> Self {
    let hash64 = stable_hash64(&units);
    Self {
      units: units.into(),
      hash64,
    }
  }

  pub fn len_code_units(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn as_code_units(&self) -> &[u16] {
    &self.units
  }

  /// Converts to UTF-8, replacing unpaired surrogates with U+FFFD.
  pub fn to_utf8_lossy(&self) -> String {
    String::from_utf16_lossy(&self.units)
  }

  pub fn stable_hash64(&self) -> u64 {
    self.hash64
  }
}

impl PartialEq for HostString {
  fn eq(&self, other: &Self) -> bool {
    self.hash64 == other.hash64 && self.units == other.units
  }
}

impl Eq for HostString {}

impl Hash for HostString {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u64(self.hash64);
  }
}

impl PartialEq<str> for HostString {
  fn eq(&self, other: &str) -> bool {
    self.units.iter().copied().eq(other.encode_utf16())
  }
}

impl PartialEq<&str> for HostString {
  fn eq(&self, other: &&str) -> bool {
    *self == **other
  }
}

impl From<&str> for HostString {
  fn from(s: &str) -> Self {
    Self::new(s)
  }
}

impl From<String> for HostString {
  fn from(s: String) -> Self {
    Self::new(&s)
  }
}

impl fmt::Debug for HostString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HostString")
      .field("len_code_units", &self.len_code_units())
      .field("utf8_lossy", &self.to_utf8_lossy())
      .finish()
  }
}

impl fmt::Display for HostString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_utf8_lossy())
  }
}

const FNV_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
const FNV_PRIME_64: u64 = 0x00000100000001B3;

fn stable_hash64(units: &[u16]) -> u64 {
  let mut hash = FNV_OFFSET_BASIS_64;
  for unit in units {
    for byte in unit.to_le_bytes() {
      hash ^= byte as u64;
      hash = hash.wrapping_mul(FNV_PRIME_64);
    }
  }
  hash
}

/// A shared, growable host list.
///
/// Used for variadic arguments (e.g. spreading a list of nodes into a host method call).
#[derive(Clone, Default)]
pub struct HostArray(Rc<RefCell<Vec<HostValue>>>);

impl HostArray {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_vec(values: Vec<HostValue>) -> Self {
    Self(Rc::new(RefCell::new(values)))
  }

  /// Appends `value` and returns the new length.
  pub fn push(&self, value: HostValue) -> usize {
    let mut values = self.0.borrow_mut();
    values.push(value);
    values.len()
  }

  pub fn len(&self) -> usize {
    self.0.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.borrow().is_empty()
  }

  pub fn get(&self, index: usize) -> Option<HostValue> {
    self.0.borrow().get(index).cloned()
  }

  /// Snapshot of the current elements.
  pub fn to_vec(&self) -> Vec<HostValue> {
    self.0.borrow().clone()
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for HostArray {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0.try_borrow() {
      Ok(values) => f.debug_list().entries(values.iter()).finish(),
      Err(_) => f.write_str("[<in use>]"),
    }
  }
}

/// A host error value, as captured by the error channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostException {
  pub name: String,
  pub message: String,
}

impl HostException {
  pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      message: message.into(),
    }
  }
}

impl fmt::Display for HostException {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.name, self.message)
  }
}

/// A host-managed object reachable from the guest only through handles.
///
/// This is the seam for surrounding glue code (DOM nodes, editor instances, timers, ...). The
/// bridge is agnostic to what implementors are; it only routes property access and method calls.
///
/// Implementations receive the [`Bridge`] so they can invoke guest closures (e.g. dispatching an
/// event to a registered listener), which may in turn re-enter the bridge.
pub trait HostObject: fmt::Debug {
  fn class_name(&self) -> &str;

  /// `instanceof`-style check. Defaults to comparing against [`HostObject::class_name`].
  fn instance_of(&self, class: &str) -> bool {
    self.class_name() == class
  }

  /// Reads a property. Unknown properties read as `undefined`.
  fn get(&self, _bridge: &Bridge, _key: &str) -> Result<HostValue, BridgeError> {
    Ok(HostValue::Undefined)
  }

  fn set(&self, _bridge: &Bridge, key: &str, _value: HostValue) -> Result<(), BridgeError> {
    Err(BridgeError::type_error(format!(
      "cannot assign to property '{key}' of {}",
      self.class_name()
    )))
  }

  fn call_method(
    &self,
    _bridge: &Bridge,
    name: &str,
    _args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    Err(BridgeError::type_error(format!(
      "{}.{name} is not a function",
      self.class_name()
    )))
  }
}

pub type HostObjectRef = Rc<dyn HostObject>;

/// A host function implemented in Rust: `(bridge, this, args) -> value`.
pub type NativeFn = dyn Fn(&Bridge, HostValue, &[HostValue]) -> Result<HostValue, BridgeError>;

/// A callable host value.
#[derive(Clone)]
pub enum HostFunction {
  Native { name: Rc<str>, call: Rc<NativeFn> },
  /// A guest closure wrapped by the closure trampoline.
  Closure(ClosureRef),
}

impl HostFunction {
  pub fn native(
    name: &str,
    call: impl Fn(&Bridge, HostValue, &[HostValue]) -> Result<HostValue, BridgeError> + 'static,
  ) -> Self {
    HostFunction::Native {
      name: Rc::from(name),
      call: Rc::new(call),
    }
  }

  pub fn name(&self) -> Option<&str> {
    match self {
      HostFunction::Native { name, .. } if !name.is_empty() => Some(&**name),
      _ => None,
    }
  }

  pub fn as_closure(&self) -> Option<&ClosureRef> {
    match self {
      HostFunction::Closure(closure) => Some(closure),
      HostFunction::Native { .. } => None,
    }
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    match (self, other) {
      (HostFunction::Native { call: a, .. }, HostFunction::Native { call: b, .. }) => {
        Rc::ptr_eq(a, b)
      }
      (HostFunction::Closure(a), HostFunction::Closure(b)) => a.ptr_eq(b),
      _ => false,
    }
  }
}

impl fmt::Debug for HostFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HostFunction::Native { name, .. } => f.debug_tuple("Native").field(name).finish(),
      HostFunction::Closure(closure) => f.debug_tuple("Closure").field(closure).finish(),
    }
  }
}

/// A host value that may be stored in the slot table.
#[derive(Clone, Debug)]
pub enum HostValue {
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(HostString),
  Array(HostArray),
  Function(HostFunction),
  Object(HostObjectRef),
  Error(HostException),
}

impl HostValue {
  pub fn string(s: &str) -> Self {
    HostValue::String(HostString::new(s))
  }

  pub fn object(object: impl HostObject + 'static) -> Self {
    HostValue::Object(Rc::new(object))
  }

  /// `undefined` or `null`.
  pub fn is_nullish(&self) -> bool {
    matches!(self, HostValue::Undefined | HostValue::Null)
  }

  pub fn is_function(&self) -> bool {
    matches!(self, HostValue::Function(_))
  }

  pub fn as_string(&self) -> Option<&HostString> {
    match self {
      HostValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&HostArray> {
    match self {
      HostValue::Array(array) => Some(array),
      _ => None,
    }
  }

  pub fn as_function(&self) -> Option<&HostFunction> {
    match self {
      HostValue::Function(f) => Some(f),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&HostObjectRef> {
    match self {
      HostValue::Object(object) => Some(object),
      _ => None,
    }
  }

  /// A `typeof`-like name.
  pub fn type_name(&self) -> &'static str {
    match self {
      HostValue::Undefined => "undefined",
      HostValue::Null => "null",
      HostValue::Bool(_) => "boolean",
      HostValue::Number(_) => "number",
      HostValue::String(_) => "string",
      HostValue::Array(_) => "array",
      HostValue::Function(_) => "function",
      HostValue::Object(_) => "object",
      HostValue::Error(_) => "error",
    }
  }

  /// Identity comparison: reference types compare by allocation, primitives by value.
  pub fn same_identity(&self, other: &HostValue) -> bool {
    match (self, other) {
      (HostValue::Undefined, HostValue::Undefined) => true,
      (HostValue::Null, HostValue::Null) => true,
      (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
      (HostValue::Number(a), HostValue::Number(b)) => a.to_bits() == b.to_bits(),
      (HostValue::String(a), HostValue::String(b)) => a == b,
      (HostValue::Array(a), HostValue::Array(b)) => a.ptr_eq(b),
      (HostValue::Function(a), HostValue::Function(b)) => a.ptr_eq(b),
      (HostValue::Object(a), HostValue::Object(b)) => Rc::ptr_eq(a, b),
      (HostValue::Error(a), HostValue::Error(b)) => a == b,
      _ => false,
    }
  }
}

impl From<bool> for HostValue {
  fn from(value: bool) -> Self {
    HostValue::Bool(value)
  }
}

impl From<f64> for HostValue {
  fn from(value: f64) -> Self {
    HostValue::Number(value)
  }
}

impl From<HostString> for HostValue {
  fn from(value: HostString) -> Self {
    HostValue::String(value)
  }
}

impl From<&str> for HostValue {
  fn from(value: &str) -> Self {
    HostValue::string(value)
  }
}

impl From<HostException> for HostValue {
  fn from(value: HostException) -> Self {
    HostValue::Error(value)
  }
}
