#![allow(dead_code)]

use bridge_js::{
  ArgPassing, Bridge, BridgeError, BridgeOptions, ClosureKind, ClosureReturn, ClosureSignature,
  Guest, Handle, HostObject, HostValue, MemoryGuest,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub fn setup() -> (Rc<MemoryGuest>, Bridge) {
  setup_with(BridgeOptions::default())
}

pub fn setup_with(options: BridgeOptions) -> (Rc<MemoryGuest>, Bridge) {
  let guest = Rc::new(MemoryGuest::new());
  let bridge = Bridge::new(guest.clone(), options);
  (guest, bridge)
}

/// Writes `s` into guest memory and returns `(ptr, len)`.
pub fn guest_str(guest: &MemoryGuest, s: &str) -> (u32, u32) {
  let ptr = guest.alloc_bytes(s.as_bytes()).unwrap();
  (ptr, s.len() as u32)
}

/// Allocates an 8-byte out-parameter area.
pub fn ret_area(guest: &MemoryGuest) -> u32 {
  guest.allocate(8).unwrap()
}

/// Records what a guest closure body and its destructor observed.
#[derive(Default)]
pub struct Recorder {
  pub calls: Cell<usize>,
  /// Invocations currently on the stack.
  pub active: Cell<usize>,
  pub destroyed: RefCell<Vec<(u32, u32)>>,
  /// Value of `active` when the destructor ran.
  pub active_at_destroy: Cell<Option<usize>>,
}

impl Recorder {
  pub fn destroy_count(&self) -> usize {
    self.destroyed.borrow().len()
  }
}

/// Registers a destructor that records into `recorder`, plus a closure body export.
pub fn closure_signature(
  guest: &MemoryGuest,
  recorder: &Rc<Recorder>,
  kind: ClosureKind,
  args: ArgPassing,
  returns: ClosureReturn,
  body: impl Fn(&Bridge, u32, u32, &[u32]) -> Result<u32, BridgeError> + 'static,
) -> ClosureSignature {
  let dtor_recorder = recorder.clone();
  let destructor = guest.register_destructor(move |a, b| {
    dtor_recorder.destroyed.borrow_mut().push((a, b));
    dtor_recorder
      .active_at_destroy
      .set(Some(dtor_recorder.active.get()));
  });
  let body_recorder = recorder.clone();
  let invoke = guest.register_export(move |bridge, a, b, args| {
    body_recorder.calls.set(body_recorder.calls.get() + 1);
    body_recorder.active.set(body_recorder.active.get() + 1);
    let result = body(bridge, a, b, args);
    body_recorder.active.set(body_recorder.active.get() - 1);
    result
  });
  ClosureSignature {
    kind,
    destructor,
    invoke,
    args,
    returns,
  }
}

/// Creates a closure over `(a, b)` through a closure-wrapper boundary function, as guest code
/// would, and returns the guest's handle.
pub fn make_closure(
  bridge: &Bridge,
  signature: ClosureSignature,
  a: u32,
  b: u32,
) -> Result<Handle, BridgeError> {
  let wrapper = bridge.register_closure_wrapper(signature);
  Ok(Handle::from_raw(bridge.invoke(wrapper, &[a, b])?))
}

/// A host object that keeps event listeners, like a DOM `EventTarget`.
#[derive(Debug, Default)]
pub struct EventTarget {
  listeners: RefCell<Vec<(String, HostValue)>>,
  pub title: RefCell<String>,
}

impl HostObject for EventTarget {
  fn class_name(&self) -> &str {
    "EventTarget"
  }

  fn get(&self, _bridge: &Bridge, key: &str) -> Result<HostValue, BridgeError> {
    Ok(match key {
      "title" => HostValue::string(&self.title.borrow()),
      "listenerCount" => HostValue::Number(self.listeners.borrow().len() as f64),
      _ => HostValue::Undefined,
    })
  }

  fn set(&self, _bridge: &Bridge, key: &str, value: HostValue) -> Result<(), BridgeError> {
    match (key, value) {
      ("title", HostValue::String(s)) => {
        *self.title.borrow_mut() = s.to_utf8_lossy();
        Ok(())
      }
      (key, _) => Err(BridgeError::type_error(format!("cannot assign to '{key}'"))),
    }
  }

  fn call_method(
    &self,
    bridge: &Bridge,
    name: &str,
    args: &[HostValue],
  ) -> Result<HostValue, BridgeError> {
    match (name, args) {
      ("addEventListener", [HostValue::String(event), listener]) if listener.is_function() => {
        self
          .listeners
          .borrow_mut()
          .push((event.to_utf8_lossy(), listener.clone()));
        Ok(HostValue::Undefined)
      }
      ("dispatch", [HostValue::String(event)]) => {
        let event = event.to_utf8_lossy();
        // Snapshot so listeners may register further listeners.
        let listeners: Vec<HostValue> = self
          .listeners
          .borrow()
          .iter()
          .filter(|(name, _)| *name == event)
          .map(|(_, listener)| listener.clone())
          .collect();
        for listener in &listeners {
          bridge.call_function(listener, HostValue::Undefined, &[HostValue::string(&event)])?;
        }
        Ok(HostValue::Number(listeners.len() as f64))
      }
      _ => Err(BridgeError::type_error(format!(
        "EventTarget.{name} is not a function"
      ))),
    }
  }
}
