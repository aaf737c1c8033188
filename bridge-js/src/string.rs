//! UTF-8 transcoding between guest linear memory and host strings.

use crate::{Bridge, BridgeError, Guest, Handle, HostString, HostValue, ProtocolViolation};
use serde::{Deserialize, Serialize};

/// A `(pointer, length)` pair into guest memory.
///
/// Only valid for the duration of the call that produced it; the guest owns the bytes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedString {
  pub ptr: u32,
  pub len: u32,
}

impl EncodedString {
  /// Written for an absent string.
  pub const NONE: EncodedString = EncodedString { ptr: 0, len: 0 };
}

/// How host strings are written into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
  /// Transcode fully, then allocate an exactly-sized buffer.
  Fresh,
  /// Copy the ASCII prefix into a buffer sized by code-unit count, growing it only when the
  /// first non-ASCII unit is reached.
  #[default]
  AsciiFastPath,
}

/// Decodes `len` bytes at `ptr` as strict UTF-8.
pub fn decode_str(guest: &dyn Guest, ptr: u32, len: u32) -> Result<String, BridgeError> {
  let bytes = guest.read_vec(ptr, len)?;
  String::from_utf8(bytes).map_err(|_| ProtocolViolation::InvalidUtf8 { ptr, len }.into())
}

pub fn decode(guest: &dyn Guest, ptr: u32, len: u32) -> Result<HostString, BridgeError> {
  Ok(HostString::new(&decode_str(guest, ptr, len)?))
}

/// Decodes a string argument that may have been interned on the host side.
///
/// A null `ptr` means `len` is a slot handle holding the string, except that `(0, 0)` is the empty
/// string.
pub fn decode_cached(bridge: &Bridge, ptr: u32, len: u32) -> Result<HostString, BridgeError> {
  if ptr != 0 {
    return decode(bridge.guest(), ptr, len);
  }
  if len == 0 {
    return Ok(HostString::new(""));
  }
  match bridge.resolve(Handle::from_raw(len))? {
    HostValue::String(s) => Ok(s),
    _ => Err(
      ProtocolViolation::TypeMismatch {
        handle: len,
        expected: "a string",
      }
      .into(),
    ),
  }
}

/// Transcodes UTF-16 code units to UTF-8, replacing unpaired surrogates with U+FFFD.
fn utf16_to_utf8(units: &[u16]) -> Vec<u8> {
  char::decode_utf16(units.iter().copied())
    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
    .collect::<String>()
    .into_bytes()
}

fn size_u32(bytes: usize, code_units: usize) -> Result<u32, BridgeError> {
  u32::try_from(bytes).map_err(|_| ProtocolViolation::StringTooLarge { code_units }.into())
}

/// Encodes `s` into a freshly allocated, exactly-sized guest buffer.
pub fn encode_fresh(guest: &dyn Guest, s: &HostString) -> Result<EncodedString, BridgeError> {
  let bytes = utf16_to_utf8(s.as_code_units());
  let len = size_u32(bytes.len(), s.len_code_units())?;
  let ptr = guest.allocate(len)?;
  guest.write(ptr, &bytes)?;
  Ok(EncodedString { ptr, len })
}

/// Encodes `s` using the ASCII fast path.
///
/// The buffer starts at one byte per code unit. On the first non-ASCII unit it is grown to
/// `offset + remaining * 3` bytes (the UTF-8 worst case for the rest) and the remainder is
/// transcoded in one go. An over-allocated buffer is shrunk to the written length before
/// returning, so the guest sees an allocation of exactly `len` bytes.
pub fn encode(guest: &dyn Guest, s: &HostString) -> Result<EncodedString, BridgeError> {
  let units = s.as_code_units();
  let mut capacity = size_u32(units.len(), units.len())?;
  let mut ptr = guest.allocate(capacity)?;

  let ascii = units.iter().take_while(|&&unit| unit < 0x80).count();
  let prefix: Vec<u8> = units[..ascii].iter().map(|&unit| unit as u8).collect();
  guest.write(ptr, &prefix)?;
  let mut offset = ascii as u32;

  if ascii != units.len() {
    let rest = &units[ascii..];
    let grown = rest
      .len()
      .checked_mul(3)
      .and_then(|n| n.checked_add(ascii))
      .ok_or(ProtocolViolation::StringTooLarge {
        code_units: units.len(),
      })?;
    let grown = size_u32(grown, units.len())?;
    ptr = guest.reallocate(ptr, capacity, grown)?;
    capacity = grown;

    let tail = utf16_to_utf8(rest);
    guest.write(ptr.wrapping_add(offset), &tail)?;
    offset += tail.len() as u32;
  }

  if offset != capacity {
    ptr = guest.reallocate(ptr, capacity, offset)?;
  }
  Ok(EncodedString { ptr, len: offset })
}

pub fn encode_with(
  guest: &dyn Guest,
  s: &HostString,
  strategy: EncodingStrategy,
) -> Result<EncodedString, BridgeError> {
  match strategy {
    EncodingStrategy::Fresh => encode_fresh(guest, s),
    EncodingStrategy::AsciiFastPath => encode(guest, s),
  }
}

/// Writes `encoded` through the out-parameter area at `ret_ptr`: the pointer word at `ret_ptr`
/// and the length word at `ret_ptr + 4`, both little-endian `i32`.
pub fn write_ret(guest: &dyn Guest, ret_ptr: u32, encoded: EncodedString) -> Result<(), BridgeError> {
  guest.write_i32(ret_ptr, encoded.ptr as i32)?;
  guest.write_i32(ret_ptr.wrapping_add(4), encoded.len as i32)?;
  Ok(())
}

/// Reads back a pair written by [`write_ret`].
pub fn read_ret(guest: &dyn Guest, ret_ptr: u32) -> Result<EncodedString, BridgeError> {
  Ok(EncodedString {
    ptr: guest.read_i32(ret_ptr)? as u32,
    len: guest.read_i32(ret_ptr.wrapping_add(4))? as u32,
  })
}
