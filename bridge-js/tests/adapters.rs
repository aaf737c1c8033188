mod common;

use bridge_js::string::{decode, read_ret};
use bridge_js::{
  names, ArgPassing, BoundaryId, BridgeError, ClosureError, ClosureKind, ClosureReturn, Handle,
  HostValue, ProtocolViolation,
};
use common::{closure_signature, guest_str, make_closure, ret_area, setup, EventTarget, Recorder};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn arity_mismatch_is_fatal() {
  let (_guest, bridge) = setup();
  let err = bridge
    .invoke_by_name(names::OBJECT_DROP_REF, &[4, 5])
    .unwrap_err();
  assert_eq!(
    err.protocol(),
    Some(&ProtocolViolation::ArityMismatch {
      name: names::OBJECT_DROP_REF.to_string(),
      expected: 1,
      got: 2,
    })
  );
  assert!(bridge.is_poisoned());
}

#[test]
fn unknown_boundary_functions_are_rejected() {
  let (_guest, bridge) = setup();
  assert!(matches!(
    bridge.invoke(BoundaryId(9999), &[]),
    Err(BridgeError::Protocol(ProtocolViolation::UnknownBoundary(9999)))
  ));

  let (_guest, bridge) = setup();
  assert!(matches!(
    bridge.invoke_by_name("__bridge_missing", &[]),
    Err(BridgeError::Protocol(ProtocolViolation::UnknownBoundaryName(_)))
  ));
}

#[test]
fn type_predicates() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let (ptr, len) = guest_str(&guest, "s");
  let s = bridge.invoke_by_name(names::STRING_NEW, &[ptr, len])?;
  let obj = bridge
    .allocate(HostValue::object(EventTarget::default()))
    .raw();
  let arr = bridge.invoke_by_name(names::ARRAY_NEW, &[])?;

  let check = |name: &str, handle: u32| bridge.invoke_by_name(name, &[handle]);
  assert_eq!(check(names::IS_UNDEFINED, Handle::UNDEFINED.raw())?, 1);
  assert_eq!(check(names::IS_UNDEFINED, Handle::NULL.raw())?, 0);
  assert_eq!(check(names::IS_NULL, Handle::NULL.raw())?, 1);
  assert_eq!(check(names::IS_STRING, s)?, 1);
  assert_eq!(check(names::IS_STRING, obj)?, 0);
  assert_eq!(check(names::IS_OBJECT, obj)?, 1);
  assert_eq!(check(names::IS_OBJECT, arr)?, 1);
  assert_eq!(check(names::IS_OBJECT, s)?, 0);
  assert_eq!(check(names::IS_FUNCTION, obj)?, 0);
  Ok(())
}

#[test]
fn number_new_is_signed() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  let h = bridge.invoke_by_name(names::NUMBER_NEW, &[(-5i32) as u32])?;
  assert!(matches!(bridge.resolve(Handle::from_raw(h))?, HostValue::Number(n) if n == -5.0));
  Ok(())
}

#[test]
fn properties_round_trip_through_host_objects() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let target = bridge
    .allocate(HostValue::object(EventTarget::default()))
    .raw();
  let (key_ptr, key_len) = guest_str(&guest, "title");
  let (val_ptr, val_len) = guest_str(&guest, "Editor");
  let value = bridge.invoke_by_name(names::STRING_NEW, &[val_ptr, val_len])?;

  bridge.invoke_by_name(names::SET, &[target, key_ptr, key_len, value])?;
  assert_eq!(bridge.pending_exception(), None);

  let got = bridge.invoke_by_name(names::GET, &[target, key_ptr, key_len])?;
  assert_ne!(got, value);
  assert_eq!(
    bridge.resolve(Handle::from_raw(got))?.as_string().unwrap(),
    "Editor"
  );

  // Missing properties come back as the absent handle.
  let (missing_ptr, missing_len) = guest_str(&guest, "missing");
  assert_eq!(
    bridge.invoke_by_name(names::GET, &[target, missing_ptr, missing_len])?,
    Handle::ABSENT.raw()
  );
  assert_eq!(bridge.pending_exception(), None);
  Ok(())
}

#[test]
fn listener_callbacks_reenter_the_bridge() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let target = bridge
    .allocate(HostValue::object(EventTarget::default()))
    .raw();
  let recorder = Rc::new(Recorder::default());
  let seen = Rc::new(RefCell::new(Vec::new()));
  let body_seen = seen.clone();
  let signature = closure_signature(
    &guest,
    &recorder,
    ClosureKind::Mut,
    ArgPassing::Borrowed,
    ClosureReturn::Void,
    move |bridge, _a, _b, args| {
      // Copy the borrowed event name out through the string codec.
      let ret = bridge.guest().allocate(8)?;
      bridge.invoke_by_name(names::STRING_GET, &[ret, args[0]])?;
      let out = read_ret(bridge.guest(), ret)?;
      let event = decode(bridge.guest(), out.ptr, out.len)?;
      body_seen.borrow_mut().push(event.to_utf8_lossy());
      Ok(0)
    },
  );
  let callback = make_closure(&bridge, signature, 40, 41)?;

  let args = bridge.invoke_by_name(names::ARRAY_NEW, &[])?;
  let (event_ptr, event_len) = guest_str(&guest, "change");
  let event = bridge.invoke_by_name(names::STRING_NEW, &[event_ptr, event_len])?;
  bridge.invoke_by_name(names::ARRAY_PUSH, &[args, event])?;
  assert_eq!(
    bridge.invoke_by_name(names::ARRAY_PUSH, &[args, callback.raw()])?,
    2
  );

  let (add_ptr, add_len) = guest_str(&guest, "addEventListener");
  bridge.invoke_by_name(names::CALL_METHOD, &[target, add_ptr, add_len, args])?;
  assert_eq!(bridge.pending_exception(), None);

  let dispatch_args = bridge.invoke_by_name(names::ARRAY_NEW, &[])?;
  bridge.invoke_by_name(names::ARRAY_PUSH, &[dispatch_args, event])?;
  let (dispatch_ptr, dispatch_len) = guest_str(&guest, "dispatch");
  let count =
    bridge.invoke_by_name(names::CALL_METHOD, &[target, dispatch_ptr, dispatch_len, dispatch_args])?;
  assert!(matches!(bridge.resolve(Handle::from_raw(count))?, HostValue::Number(n) if n == 1.0));
  assert_eq!(*seen.borrow(), vec!["change".to_string()]);

  // The host listener keeps the function value, but dropping the guest's handle destroys the
  // closure; dispatching again is closure misuse, not a protocol violation.
  assert_eq!(bridge.invoke_by_name(names::CB_DROP, &[callback.raw()])?, 1);
  let err = bridge
    .invoke_by_name(names::CALL_METHOD, &[target, dispatch_ptr, dispatch_len, dispatch_args])
    .unwrap_err();
  assert!(matches!(err, BridgeError::Closure(ClosureError::Destroyed)));
  assert!(!bridge.is_poisoned());
  assert_eq!(recorder.calls.get(), 1);
  Ok(())
}

#[test]
fn unknown_methods_are_captured() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let target = bridge
    .allocate(HostValue::object(EventTarget::default()))
    .raw();
  let (ptr, len) = guest_str(&guest, "focus");
  assert_eq!(
    bridge.invoke_by_name(names::CALL_METHOD, &[target, ptr, len, Handle::ABSENT.raw()])?,
    0
  );
  let exn = bridge.take_exception().expect("pending exception");
  match bridge.resolve(exn)? {
    HostValue::Error(err) => assert_eq!(err.message, "EventTarget.focus is not a function"),
    other => panic!("unexpected exception value {other:?}"),
  }
  Ok(())
}

#[test]
fn call_invokes_native_functions_with_this() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  let f = bridge.allocate(HostValue::Function(bridge_js::HostFunction::native(
    "describe",
    |_bridge, this, _args| Ok(HostValue::string(this.type_name())),
  )));
  let this = bridge.allocate(HostValue::Number(1.0));
  let result = bridge.invoke_by_name(names::CALL, &[f.raw(), this.raw()])?;
  assert_eq!(
    bridge.resolve(Handle::from_raw(result))?.as_string().unwrap(),
    "number"
  );

  // Calling a non-function is a host failure.
  assert_eq!(
    bridge.invoke_by_name(names::CALL, &[this.raw(), Handle::UNDEFINED.raw()])?,
    0
  );
  assert!(bridge.take_exception().is_some());
  Ok(())
}

#[test]
fn instance_of_and_debug_string() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let target = bridge
    .allocate(HostValue::object(EventTarget::default()))
    .raw();
  let (class_ptr, class_len) = guest_str(&guest, "EventTarget");
  let (other_ptr, other_len) = guest_str(&guest, "Window");
  assert_eq!(
    bridge.invoke_by_name(names::INSTANCE_OF, &[target, class_ptr, class_len])?,
    1
  );
  assert_eq!(
    bridge.invoke_by_name(names::INSTANCE_OF, &[target, other_ptr, other_len])?,
    0
  );

  let arr = bridge.invoke_by_name(names::ARRAY_NEW, &[])?;
  bridge.invoke_by_name(names::ARRAY_PUSH, &[arr, Handle::TRUE.raw()])?;
  bridge.invoke_by_name(names::ARRAY_PUSH, &[arr, target])?;
  let n = bridge.invoke_by_name(names::NUMBER_NEW, &[3])?;
  bridge.invoke_by_name(names::ARRAY_PUSH, &[arr, n])?;

  let ret = ret_area(&guest);
  bridge.invoke_by_name(names::DEBUG_STRING, &[ret, arr])?;
  let out = read_ret(&*guest, ret)?;
  assert_eq!(
    decode(&*guest, out.ptr, out.len)?,
    "[true, EventTarget, 3]"
  );
  Ok(())
}

#[test]
fn custom_boundary_functions_share_the_slot_table() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  let id = bridge.register("host_pair", 2, |bridge, args| {
    let array = bridge_js::HostArray::new();
    array.push(HostValue::Number(args[0] as f64));
    array.push(HostValue::Number(args[1] as f64));
    Ok(bridge.allocate(HostValue::Array(array)).raw())
  });
  assert_eq!(bridge.lookup("host_pair"), Some(id));
  let a = bridge.invoke(id, &[1, 2])?;
  let b = bridge.invoke(id, &[1, 2])?;
  assert_ne!(a, b);
  let first = bridge.resolve(Handle::from_raw(a))?;
  let second = bridge.resolve(Handle::from_raw(b))?;
  assert!(!first.same_identity(&second));
  Ok(())
}
