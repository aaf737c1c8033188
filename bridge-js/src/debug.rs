use crate::{HostFunction, HostValue};
use std::fmt::Write;

/// Nesting depth after which arrays render as `[...]`; arrays may contain themselves.
const MAX_DEPTH: usize = 16;

/// Renders `value` for diagnostics (e.g. panic messages produced inside the guest).
pub fn debug_string(value: &HostValue) -> String {
  let mut out = String::new();
  write_value(&mut out, value, 0);
  out
}

fn write_value(out: &mut String, value: &HostValue, depth: usize) {
  match value {
    HostValue::Undefined => out.push_str("undefined"),
    HostValue::Null => out.push_str("null"),
    HostValue::Bool(b) => {
      let _ = write!(out, "{b}");
    }
    HostValue::Number(n) => write_number(out, *n),
    HostValue::String(s) => {
      let _ = write!(out, "\"{s}\"");
    }
    HostValue::Function(f) => match f {
      HostFunction::Native { .. } => match f.name() {
        Some(name) => {
          let _ = write!(out, "Function({name})");
        }
        None => out.push_str("Function"),
      },
      HostFunction::Closure(_) => out.push_str("Function"),
    },
    HostValue::Array(array) => {
      if depth >= MAX_DEPTH {
        out.push_str("[...]");
        return;
      }
      out.push('[');
      for (i, element) in array.to_vec().iter().enumerate() {
        if i > 0 {
          out.push_str(", ");
        }
        write_value(out, element, depth + 1);
      }
      out.push(']');
    }
    HostValue::Object(object) => out.push_str(object.class_name()),
    HostValue::Error(err) => {
      let _ = write!(out, "{err}");
    }
  }
}

fn write_number(out: &mut String, n: f64) {
  if n.is_nan() {
    out.push_str("NaN");
  } else if n.is_infinite() {
    out.push_str(if n > 0.0 { "Infinity" } else { "-Infinity" });
  } else if n.fract() == 0.0 && n.abs() < 1e15 {
    let _ = write!(out, "{}", n as i64);
  } else {
    let _ = write!(out, "{n}");
  }
}
