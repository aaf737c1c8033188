mod common;

use bridge_js::{names, BridgeError, Handle, HostException, HostValue, ProtocolViolation};
use common::{guest_str, setup, EventTarget};

fn expect_exception(value: HostValue) -> HostException {
  match value {
    HostValue::Error(err) => err,
    other => panic!("expected an error value, got {other:?}"),
  }
}

#[test]
fn host_failure_becomes_a_pending_exception() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let (ptr, len) = guest_str(&guest, "title");

  // Reading a property of `undefined` fails on the host side.
  let ret = bridge.invoke_by_name(names::GET, &[Handle::UNDEFINED.raw(), ptr, len])?;
  assert_eq!(ret, 0);
  let pending = bridge.pending_exception().expect("pending exception");
  assert_eq!(bridge.stats().pending_exception, Some(pending.raw()));

  let taken = bridge.invoke_by_name(names::EXN_TAKE, &[])?;
  assert_eq!(taken, pending.raw());
  assert_eq!(bridge.pending_exception(), None);

  let err = expect_exception(bridge.take(Handle::from_raw(taken))?);
  assert_eq!(err.name, "TypeError");
  assert!(err.message.contains("reading 'title'"), "{}", err.message);
  assert!(!bridge.is_poisoned());
  Ok(())
}

#[test]
fn clearing_the_register_allows_the_next_capture() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let target = bridge.allocate(HostValue::object(EventTarget::default()));
  let (ptr, len) = guest_str(&guest, "readonly");

  bridge.invoke_by_name(names::SET, &[target.raw(), ptr, len, Handle::TRUE.raw()])?;
  let first = bridge.take_exception().expect("first exception");

  assert_eq!(bridge.invoke_by_name(names::EXN_TAKE, &[])?, 0);

  bridge.invoke_by_name(names::SET, &[target.raw(), ptr, len, Handle::FALSE.raw()])?;
  let second = bridge.take_exception().expect("second exception");
  assert_ne!(first, second);
  assert!(bridge.slots().is_live(first));
  assert!(bridge.slots().is_live(second));
  Ok(())
}

#[test]
fn unread_exception_is_overwritten_but_stays_allocated() -> Result<(), BridgeError> {
  let (guest, bridge) = setup();
  let (ptr, len) = guest_str(&guest, "x");
  bridge.invoke_by_name(names::GET, &[Handle::NULL.raw(), ptr, len])?;
  let first = bridge.pending_exception().expect("first exception");
  bridge.invoke_by_name(names::GET, &[Handle::NULL.raw(), ptr, len])?;
  let second = bridge.pending_exception().expect("second exception");

  assert_ne!(first, second);
  assert!(bridge.slots().is_live(first));
  Ok(())
}

#[test]
fn protocol_violations_are_not_captured() {
  let (guest, bridge) = setup();
  let (ptr, len) = guest_str(&guest, "title");
  let err = bridge
    .invoke_by_name(names::GET, &[12345, ptr, len])
    .unwrap_err();
  assert_eq!(
    err.protocol(),
    Some(&ProtocolViolation::HandleOutOfRange(12345))
  );
  assert_eq!(bridge.pending_exception(), None);
  assert!(bridge.is_poisoned());
}

#[test]
fn guarded_passes_success_through() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  assert_eq!(bridge.guarded(|| Ok(42))?, 42);
  assert_eq!(bridge.pending_exception(), None);
  Ok(())
}

#[test]
fn throw_carries_the_guest_message() {
  let (guest, bridge) = setup();
  let (ptr, len) = guest_str(&guest, "unreachable executed");
  match bridge.invoke_by_name(names::THROW, &[ptr, len]) {
    Err(BridgeError::Throw(HostValue::Error(err))) => {
      assert_eq!(err.to_string(), "Error: unreachable executed");
    }
    other => panic!("expected a thrown error, got {other:?}"),
  }
  assert!(!bridge.is_poisoned());
}
