mod common;

use bridge_js::{
  names, BridgeError, Handle, HostValue, ProtocolViolation, SlotTable, RESERVED_SLOTS,
};
use common::setup;

#[test]
fn sentinels_occupy_reserved_indices() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  assert!(matches!(table.resolve(Handle::UNDEFINED)?, HostValue::Undefined));
  assert!(matches!(table.resolve(Handle::NULL)?, HostValue::Null));
  assert!(matches!(table.resolve(Handle::TRUE)?, HostValue::Bool(true)));
  assert!(matches!(table.resolve(Handle::FALSE)?, HostValue::Bool(false)));
  assert_eq!(table.len(), RESERVED_SLOTS as usize);
  assert_eq!(table.live_count(), 0);
  Ok(())
}

#[test]
fn sentinels_count_towards_len_but_not_liveness() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  assert_eq!(table.len(), RESERVED_SLOTS as usize);
  assert!(table.has_no_live());

  let h = table.allocate(HostValue::Number(1.0));
  assert!(!table.has_no_live());
  assert_eq!(table.len(), RESERVED_SLOTS as usize + 1);

  table.release(h)?;
  assert!(table.has_no_live());
  assert_eq!(table.len(), RESERVED_SLOTS as usize + 1);
  Ok(())
}

#[test]
fn released_index_is_reused_with_the_new_value() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  let a = table.allocate(HostValue::string("A"));
  let b = table.allocate(HostValue::string("B"));
  assert_eq!(a.raw(), 4);
  assert_eq!(b.raw(), 5);

  table.release(a)?;
  let c = table.allocate(HostValue::string("C"));
  assert_eq!(c, a);
  assert_eq!(table.resolve(c)?.as_string().unwrap(), "C");
  assert_eq!(table.resolve(b)?.as_string().unwrap(), "B");
  assert_eq!(table.len(), 6);
  Ok(())
}

#[test]
fn free_list_is_last_in_first_out() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  let handles: Vec<Handle> = (0..3)
    .map(|i| table.allocate(HostValue::Number(i as f64)))
    .collect();
  table.release(handles[0])?;
  table.release(handles[2])?;

  assert_eq!(table.allocate(HostValue::Null), handles[2]);
  assert_eq!(table.allocate(HostValue::Null), handles[0]);
  // Free list exhausted: append.
  assert_eq!(table.allocate(HostValue::Null).raw(), 7);
  assert_eq!(table.live_count(), 4);
  Ok(())
}

#[test]
fn releasing_sentinels_is_a_no_op() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  for raw in 0..RESERVED_SLOTS {
    table.release(Handle::from_raw(raw))?;
  }
  assert!(matches!(table.resolve(Handle::TRUE)?, HostValue::Bool(true)));
  assert_eq!(table.allocate(HostValue::Number(1.0)).raw(), RESERVED_SLOTS);
  Ok(())
}

#[test]
fn invalid_handles_are_protocol_violations() {
  let table = SlotTable::new();
  let h = table.allocate(HostValue::string("x"));

  assert_eq!(
    table.resolve(Handle::from_raw(99)).unwrap_err(),
    ProtocolViolation::HandleOutOfRange(99)
  );
  table.release(h).unwrap();
  assert_eq!(
    table.resolve(h).unwrap_err(),
    ProtocolViolation::StaleHandle(h.raw())
  );
  assert_eq!(
    table.release(h).unwrap_err(),
    ProtocolViolation::DoubleRelease(h.raw())
  );
  assert!(!table.is_live(h));
}

#[test]
fn take_resolves_and_releases() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  let h = table.allocate(HostValue::Number(3.0));
  assert!(matches!(table.take(h)?, HostValue::Number(n) if n == 3.0));
  assert!(!table.is_live(h));
  assert_eq!(table.live_count(), 0);
  Ok(())
}

#[test]
fn duplicate_keeps_the_guest_handle_live() -> Result<(), BridgeError> {
  let table = SlotTable::new();
  let h = table.allocate(HostValue::string("listener"));
  let kept = table.duplicate(h)?;
  assert!(table.is_live(h));
  table.release(h)?;
  assert_eq!(kept.as_string().unwrap(), "listener");
  Ok(())
}

#[test]
fn bridge_maps_primitives_onto_sentinels() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  assert_eq!(bridge.allocate(HostValue::Undefined), Handle::UNDEFINED);
  assert_eq!(bridge.allocate(HostValue::Null), Handle::NULL);
  assert_eq!(bridge.allocate(HostValue::Bool(true)), Handle::TRUE);
  assert_eq!(bridge.allocate(HostValue::Bool(false)), Handle::FALSE);
  assert_eq!(bridge.allocate_optional(HostValue::Null), Handle::ABSENT);
  assert_eq!(bridge.stats().live, 0);
  Ok(())
}

#[test]
fn clone_ref_yields_a_distinct_handle() -> Result<(), BridgeError> {
  let (_guest, bridge) = setup();
  let original = bridge.allocate(HostValue::string("shared"));
  let first = bridge.invoke_by_name(names::OBJECT_CLONE_REF, &[original.raw()])?;
  let second = bridge.invoke_by_name(names::OBJECT_CLONE_REF, &[original.raw()])?;
  assert_ne!(first, second);
  assert_ne!(first, original.raw());

  bridge.invoke_by_name(names::OBJECT_DROP_REF, &[original.raw()])?;
  assert_eq!(
    bridge
      .resolve(Handle::from_raw(first))?
      .as_string()
      .unwrap(),
    "shared"
  );
  assert_eq!(
    bridge
      .resolve(Handle::from_raw(second))?
      .as_string()
      .unwrap(),
    "shared"
  );
  Ok(())
}
