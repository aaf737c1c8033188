//! Boundary functions: the guest's import table.
//!
//! Every boundary function receives and returns raw 32-bit integers (handles, pointers, lengths,
//! small numbers). Adapters translate those into host operations and back.

use crate::debug::debug_string;
use crate::string::{decode_cached, decode_str};
use crate::{
  Bridge, BoundaryId, BridgeError, Handle, HostArray, HostFunction, HostString, HostValue,
  ProtocolViolation,
};
use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A boundary function: raw guest arguments in, raw result out.
pub type BoundaryFn = dyn Fn(&Bridge, &[u32]) -> Result<u32, BridgeError>;

/// Names of the built-in boundary functions.
pub mod names {
  pub const OBJECT_DROP_REF: &str = "__bridge_object_drop_ref";
  pub const OBJECT_CLONE_REF: &str = "__bridge_object_clone_ref";
  pub const STRING_NEW: &str = "__bridge_string_new";
  pub const STRING_GET: &str = "__bridge_string_get";
  pub const NUMBER_NEW: &str = "__bridge_number_new";
  pub const IS_UNDEFINED: &str = "__bridge_is_undefined";
  pub const IS_NULL: &str = "__bridge_is_null";
  pub const IS_FUNCTION: &str = "__bridge_is_function";
  pub const IS_STRING: &str = "__bridge_is_string";
  pub const IS_OBJECT: &str = "__bridge_is_object";
  pub const CB_DROP: &str = "__bridge_cb_drop";
  pub const DEBUG_STRING: &str = "__bridge_debug_string";
  pub const THROW: &str = "__bridge_throw";
  pub const EXN_TAKE: &str = "__bridge_exn_take";
  pub const ARRAY_NEW: &str = "__bridge_array_new";
  pub const ARRAY_PUSH: &str = "__bridge_array_push";
  pub const GET: &str = "__bridge_get";
  pub const SET: &str = "__bridge_set";
  pub const CALL_METHOD: &str = "__bridge_call_method";
  pub const CALL: &str = "__bridge_call";
  pub const INSTANCE_OF: &str = "__bridge_instance_of";

  /// Prefix of boundary functions created by
  /// [`Bridge::register_closure_wrapper`](crate::Bridge::register_closure_wrapper).
  pub const CLOSURE_WRAPPER_PREFIX: &str = "__bridge_closure_wrapper";
}

/// A registered boundary function.
#[derive(Clone)]
pub struct Boundary {
  pub name: Rc<str>,
  pub arity: usize,
  pub call: Rc<BoundaryFn>,
}

impl std::fmt::Debug for Boundary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Boundary")
      .field("name", &self.name)
      .field("arity", &self.arity)
      .finish_non_exhaustive()
  }
}

/// The boundary function registry.
#[derive(Debug, Default)]
pub struct Adapters {
  table: RefCell<Vec<Boundary>>,
  by_name: RefCell<AHashMap<Rc<str>, BoundaryId>>,
}

impl Adapters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `call` under `name`. Registering a name again rebinds the name to the new id; the
  /// old id stays callable.
  pub fn register(
    &self,
    name: &str,
    arity: usize,
    call: impl Fn(&Bridge, &[u32]) -> Result<u32, BridgeError> + 'static,
  ) -> BoundaryId {
    let name: Rc<str> = Rc::from(name);
    let mut table = self.table.borrow_mut();
    let id = BoundaryId(table.len() as u32);
    table.push(Boundary {
      name: name.clone(),
      arity,
      call: Rc::new(call),
    });
    self.by_name.borrow_mut().insert(name, id);
    id
  }

  pub fn lookup(&self, name: &str) -> Option<BoundaryId> {
    self.by_name.borrow().get(name).copied()
  }

  /// Returns a clone of the entry so the registry is not borrowed while the function runs.
  pub fn get(&self, id: BoundaryId) -> Result<Boundary, ProtocolViolation> {
    self
      .table
      .borrow()
      .get(id.0 as usize)
      .cloned()
      .ok_or(ProtocolViolation::UnknownBoundary(id.0))
  }

  pub fn len(&self) -> usize {
    self.table.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.borrow().is_empty()
  }
}

/// Destructures `args` into exactly `N` words.
pub(crate) fn unpack<const N: usize>(name: &str, args: &[u32]) -> Result<[u32; N], BridgeError> {
  <[u32; N]>::try_from(args).map_err(|_| {
    ProtocolViolation::ArityMismatch {
      name: name.to_string(),
      expected: N,
      got: args.len(),
    }
    .into()
  })
}

fn h(raw: u32) -> Handle {
  Handle::from_raw(raw)
}

fn flag(value: bool) -> u32 {
  u32::from(value)
}

pub(crate) fn register_builtins(adapters: &Adapters) {
  adapters.register(names::OBJECT_DROP_REF, 1, object_drop_ref);
  adapters.register(names::OBJECT_CLONE_REF, 1, object_clone_ref);
  adapters.register(names::STRING_NEW, 2, string_new);
  adapters.register(names::STRING_GET, 2, string_get);
  adapters.register(names::NUMBER_NEW, 1, number_new);
  adapters.register(names::IS_UNDEFINED, 1, |bridge, args| {
    let [v] = unpack(names::IS_UNDEFINED, args)?;
    Ok(flag(matches!(bridge.resolve(h(v))?, HostValue::Undefined)))
  });
  adapters.register(names::IS_NULL, 1, |bridge, args| {
    let [v] = unpack(names::IS_NULL, args)?;
    Ok(flag(matches!(bridge.resolve(h(v))?, HostValue::Null)))
  });
  adapters.register(names::IS_FUNCTION, 1, |bridge, args| {
    let [v] = unpack(names::IS_FUNCTION, args)?;
    Ok(flag(bridge.resolve(h(v))?.is_function()))
  });
  adapters.register(names::IS_STRING, 1, |bridge, args| {
    let [v] = unpack(names::IS_STRING, args)?;
    Ok(flag(matches!(bridge.resolve(h(v))?, HostValue::String(_))))
  });
  adapters.register(names::IS_OBJECT, 1, |bridge, args| {
    let [v] = unpack(names::IS_OBJECT, args)?;
    Ok(flag(matches!(
      bridge.resolve(h(v))?,
      HostValue::Object(_) | HostValue::Array(_) | HostValue::Error(_)
    )))
  });
  adapters.register(names::CB_DROP, 1, cb_drop);
  adapters.register(names::DEBUG_STRING, 2, |bridge, args| {
    let [ret, v] = unpack(names::DEBUG_STRING, args)?;
    let rendered = debug_string(&bridge.resolve(h(v))?);
    bridge.write_string_ret(ret, Some(&HostString::new(&rendered)))?;
    Ok(0)
  });
  adapters.register(names::THROW, 2, |bridge, args| {
    let [ptr, len] = unpack(names::THROW, args)?;
    let message = decode_str(bridge.guest(), ptr, len)?;
    Err(BridgeError::throw_error("Error", message))
  });
  adapters.register(names::EXN_TAKE, 0, |bridge, _| {
    Ok(bridge.take_exception().map_or(0, Handle::raw))
  });
  adapters.register(names::ARRAY_NEW, 0, |bridge, _| {
    Ok(bridge.allocate(HostValue::Array(HostArray::new())).raw())
  });
  adapters.register(names::ARRAY_PUSH, 2, array_push);
  adapters.register(names::GET, 3, get);
  adapters.register(names::SET, 4, set);
  adapters.register(names::CALL_METHOD, 4, call_method);
  adapters.register(names::CALL, 2, call);
  adapters.register(names::INSTANCE_OF, 3, instance_of);
}

fn object_drop_ref(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [v] = unpack(names::OBJECT_DROP_REF, args)?;
  bridge.release(h(v))?;
  Ok(0)
}

fn object_clone_ref(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [v] = unpack(names::OBJECT_CLONE_REF, args)?;
  let value = bridge.duplicate(h(v))?;
  Ok(bridge.allocate(value).raw())
}

fn string_new(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [ptr, len] = unpack(names::STRING_NEW, args)?;
  let s = decode_cached(bridge, ptr, len)?;
  Ok(bridge.allocate(HostValue::String(s)).raw())
}

/// Writes the string at `v` through `ret`, or `(0, 0)` if `v` is not a string.
fn string_get(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [ret, v] = unpack(names::STRING_GET, args)?;
  let value = bridge.resolve(h(v))?;
  bridge.write_string_ret(ret, value.as_string())?;
  Ok(0)
}

fn number_new(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [n] = unpack(names::NUMBER_NEW, args)?;
  Ok(bridge.allocate(HostValue::Number(f64::from(n as i32))).raw())
}

/// Drops the guest's reference to a closure; returns `1` if it was destroyed synchronously.
fn cb_drop(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [v] = unpack(names::CB_DROP, args)?;
  match bridge.resolve(h(v))? {
    HostValue::Function(HostFunction::Closure(closure)) => {
      bridge.release(h(v))?;
      Ok(flag(closure.drop_ref(bridge)?))
    }
    _ => Err(
      ProtocolViolation::TypeMismatch {
        handle: v,
        expected: "a closure",
      }
      .into(),
    ),
  }
}

fn array_push(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [arr, v] = unpack(names::ARRAY_PUSH, args)?;
  let array = match bridge.resolve(h(arr))? {
    HostValue::Array(array) => array,
    _ => {
      return Err(
        ProtocolViolation::TypeMismatch {
          handle: arr,
          expected: "an array",
        }
        .into(),
      )
    }
  };
  let value = bridge.duplicate(h(v))?;
  Ok(array.push(value) as u32)
}

fn get(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [obj, ptr, len] = unpack(names::GET, args)?;
  bridge.guarded(|| {
    let key = decode_cached(bridge, ptr, len)?.to_utf8_lossy();
    let target = bridge.resolve(h(obj))?;
    let value = bridge.get_property(&target, &key)?;
    Ok(bridge.allocate_optional(value).raw())
  })
}

fn set(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [obj, ptr, len, v] = unpack(names::SET, args)?;
  bridge.guarded(|| {
    let key = decode_cached(bridge, ptr, len)?.to_utf8_lossy();
    let target = bridge.resolve(h(obj))?;
    let value = bridge.resolve(h(v))?;
    bridge.set_property(&target, &key, value)?;
    Ok(0)
  })
}

/// `args` is an array handle whose elements are spread into the call, or `0` for no arguments.
fn call_method(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [obj, ptr, len, list] = unpack(names::CALL_METHOD, args)?;
  bridge.guarded(|| {
    let name = decode_cached(bridge, ptr, len)?.to_utf8_lossy();
    let target = bridge.resolve(h(obj))?;
    let call_args = match h(list) {
      Handle::ABSENT => Vec::new(),
      handle => match bridge.resolve(handle)? {
        HostValue::Array(array) => array.to_vec(),
        _ => {
          return Err(
            ProtocolViolation::TypeMismatch {
              handle: list,
              expected: "an argument array",
            }
            .into(),
          )
        }
      },
    };
    let result = bridge.call_method(&target, &name, &call_args)?;
    Ok(bridge.allocate(result).raw())
  })
}

fn call(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [f, this] = unpack(names::CALL, args)?;
  bridge.guarded(|| {
    let function = bridge.resolve(h(f))?;
    let this = bridge.resolve(h(this))?;
    let result = bridge.call_function(&function, this, &[])?;
    Ok(bridge.allocate(result).raw())
  })
}

fn instance_of(bridge: &Bridge, args: &[u32]) -> Result<u32, BridgeError> {
  let [v, ptr, len] = unpack(names::INSTANCE_OF, args)?;
  let class = decode_cached(bridge, ptr, len)?.to_utf8_lossy();
  let is_instance = match bridge.resolve(h(v))? {
    HostValue::Object(object) => object.instance_of(&class),
    HostValue::Array(_) => matches!(class.as_str(), "Array" | "Object"),
    HostValue::Function(_) => matches!(class.as_str(), "Function" | "Object"),
    HostValue::Error(err) => class == "Error" || class == "Object" || err.name == class,
    _ => false,
  };
  Ok(flag(is_instance))
}
