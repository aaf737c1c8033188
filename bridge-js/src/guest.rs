//! The guest module as seen from the host.

use crate::{Bridge, BridgeError, DestructorId, GuestExport, ProtocolViolation};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Exports of a loaded guest module that the bridge depends on.
///
/// Every method takes `&self`: a guest closure invoked through [`Guest::invoke`] may call back
/// into the bridge (and therefore into the guest's allocator) before returning.
pub trait Guest {
  /// Current size of linear memory, in bytes.
  fn memory_size(&self) -> usize;

  /// Copies `out.len()` bytes starting at `ptr` out of linear memory.
  fn read(&self, ptr: u32, out: &mut [u8]) -> Result<(), BridgeError>;

  /// Copies `bytes` into linear memory starting at `ptr`.
  fn write(&self, ptr: u32, bytes: &[u8]) -> Result<(), BridgeError>;

  /// The guest's `allocate(size)` export.
  fn allocate(&self, size: u32) -> Result<u32, BridgeError>;

  /// The guest's `reallocate(ptr, old_size, new_size)` export.
  fn reallocate(&self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError>;

  /// Runs entry `dtor` of the guest's destructor table on a closure environment.
  fn destroy(&self, dtor: DestructorId, a: u32, b: u32) -> Result<(), BridgeError>;

  /// Runs a closure body export with the closure environment `(a, b)` and boundary arguments.
  fn invoke(
    &self,
    bridge: &Bridge,
    export: GuestExport,
    a: u32,
    b: u32,
    args: &[u32],
  ) -> Result<u32, BridgeError>;

  fn read_vec(&self, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
    let mut out = vec![0; len as usize];
    self.read(ptr, &mut out)?;
    Ok(out)
  }

  fn read_i32(&self, ptr: u32) -> Result<i32, BridgeError> {
    let mut word = [0; 4];
    self.read(ptr, &mut word)?;
    Ok(i32::from_le_bytes(word))
  }

  fn write_i32(&self, ptr: u32, value: i32) -> Result<(), BridgeError> {
    self.write(ptr, &value.to_le_bytes())
  }
}

/// Body of a guest closure export: `(bridge, a, b, args) -> ret`.
pub type GuestFn = dyn Fn(&Bridge, u32, u32, &[u32]) -> Result<u32, BridgeError>;

/// Guest destructor: `(a, b)`.
pub type GuestDtor = dyn Fn(u32, u32);

/// Alignment of every [`MemoryGuest`] allocation.
const ALLOC_ALIGN: u32 = 8;

/// An in-memory guest: a growable byte vector with a bump allocator, plus registrable export and
/// destructor tables.
///
/// Address `0` is never handed out, so it can keep meaning "null" at the boundary.
pub struct MemoryGuest {
  memory: RefCell<Vec<u8>>,
  next: Cell<u32>,
  last: Cell<Option<(u32, u32)>>,
  exports: RefCell<Vec<Rc<GuestFn>>>,
  destructors: RefCell<Vec<Rc<GuestDtor>>>,
  allocations: Cell<usize>,
  reallocations: Cell<usize>,
}

impl MemoryGuest {
  pub fn new() -> Self {
    Self {
      memory: RefCell::new(vec![0; ALLOC_ALIGN as usize]),
      next: Cell::new(ALLOC_ALIGN),
      last: Cell::new(None),
      exports: RefCell::new(Vec::new()),
      destructors: RefCell::new(Vec::new()),
      allocations: Cell::new(0),
      reallocations: Cell::new(0),
    }
  }

  /// Adds a closure body to the export table.
  pub fn register_export(
    &self,
    f: impl Fn(&Bridge, u32, u32, &[u32]) -> Result<u32, BridgeError> + 'static,
  ) -> GuestExport {
    let mut exports = self.exports.borrow_mut();
    exports.push(Rc::new(f));
    GuestExport(exports.len() as u32 - 1)
  }

  pub fn register_destructor(&self, f: impl Fn(u32, u32) + 'static) -> DestructorId {
    let mut destructors = self.destructors.borrow_mut();
    destructors.push(Rc::new(f));
    DestructorId(destructors.len() as u32 - 1)
  }

  /// Allocates a buffer holding `bytes` and returns its address.
  pub fn alloc_bytes(&self, bytes: &[u8]) -> Result<u32, BridgeError> {
    let ptr = self.allocate(bytes.len() as u32)?;
    self.write(ptr, bytes)?;
    Ok(ptr)
  }

  /// Number of `allocate` calls served so far.
  pub fn allocation_count(&self) -> usize {
    self.allocations.get()
  }

  /// Number of `reallocate` calls served so far.
  pub fn reallocation_count(&self) -> usize {
    self.reallocations.get()
  }

  fn bump(&self, size: u32) -> Result<u32, BridgeError> {
    let ptr = self.next.get();
    let end = ptr
      .checked_add(size)
      .and_then(|end| end.checked_next_multiple_of(ALLOC_ALIGN))
      .ok_or(ProtocolViolation::MemoryOutOfBounds {
        ptr,
        len: size,
        size: self.memory_size(),
      })?;
    let mut memory = self.memory.borrow_mut();
    if memory.len() < end as usize {
      memory.resize(end as usize, 0);
    }
    self.next.set(end);
    self.last.set(Some((ptr, size)));
    Ok(ptr)
  }

  fn check_range(&self, ptr: u32, len: usize) -> Result<std::ops::Range<usize>, BridgeError> {
    let size = self.memory_size();
    let start = ptr as usize;
    match start.checked_add(len) {
      Some(end) if end <= size => Ok(start..end),
      _ => Err(
        ProtocolViolation::MemoryOutOfBounds {
          ptr,
          len: len as u32,
          size,
        }
        .into(),
      ),
    }
  }
}

impl Default for MemoryGuest {
  fn default() -> Self {
    Self::new()
  }
}

impl Guest for MemoryGuest {
  fn memory_size(&self) -> usize {
    self.memory.borrow().len()
  }

  fn read(&self, ptr: u32, out: &mut [u8]) -> Result<(), BridgeError> {
    let range = self.check_range(ptr, out.len())?;
    out.copy_from_slice(&self.memory.borrow()[range]);
    Ok(())
  }

  fn write(&self, ptr: u32, bytes: &[u8]) -> Result<(), BridgeError> {
    let range = self.check_range(ptr, bytes.len())?;
    self.memory.borrow_mut()[range].copy_from_slice(bytes);
    Ok(())
  }

  fn allocate(&self, size: u32) -> Result<u32, BridgeError> {
    self.allocations.set(self.allocations.get() + 1);
    self.bump(size)
  }

  fn reallocate(&self, ptr: u32, old_size: u32, new_size: u32) -> Result<u32, BridgeError> {
    self.reallocations.set(self.reallocations.get() + 1);
    if self.last.get() == Some((ptr, old_size)) {
      // Most recent allocation: resize in place.
      self.next.set(ptr);
      return self.bump(new_size);
    }
    let new_ptr = self.bump(new_size)?;
    let keep = old_size.min(new_size) as usize;
    let range = self.check_range(ptr, keep)?;
    self.memory.borrow_mut().copy_within(range, new_ptr as usize);
    Ok(new_ptr)
  }

  fn destroy(&self, dtor: DestructorId, a: u32, b: u32) -> Result<(), BridgeError> {
    let f = self
      .destructors
      .borrow()
      .get(dtor.0 as usize)
      .cloned()
      .ok_or(ProtocolViolation::UnknownDestructor(dtor.0))?;
    (*f)(a, b);
    Ok(())
  }

  fn invoke(
    &self,
    bridge: &Bridge,
    export: GuestExport,
    a: u32,
    b: u32,
    args: &[u32],
  ) -> Result<u32, BridgeError> {
    let f = self
      .exports
      .borrow()
      .get(export.0 as usize)
      .cloned()
      .ok_or(ProtocolViolation::UnknownExport(export.0))?;
    (*f)(bridge, a, b, args)
  }
}
