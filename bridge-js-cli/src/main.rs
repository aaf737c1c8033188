use ahash::AHashMap;
use anyhow::{anyhow, bail, Context};
use bridge_js::string::{decode, read_ret};
use bridge_js::{Bridge, BridgeError, BridgeOptions, Guest, HostString, MemoryGuest};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about = "Replay boundary calls against an in-memory bridge guest")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a JSON script of boundary calls and print one JSON record per step.
  Replay(ReplayArgs),
}

#[derive(Args)]
struct ReplayArgs {
  /// Script file.
  script: PathBuf,

  /// Emit logs as JSON on stderr.
  #[arg(long)]
  json_logs: bool,

  /// Increase log verbosity (-v debug, -vv trace).
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Script {
  #[serde(default)]
  options: BridgeOptions,
  steps: Vec<Step>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
  /// Encodes `value` into guest memory and binds `<name>.ptr` and `<name>.len`.
  WriteString { name: String, value: String },
  /// Allocates `size` bytes of guest memory and binds `<name>`.
  Alloc { name: String, size: u32 },
  Call {
    #[serde(rename = "fn")]
    function: String,
    #[serde(default)]
    args: Vec<Arg>,
    #[serde(default)]
    bind: Option<String>,
  },
  /// Reads a `(ptr, len)` out-parameter pair and decodes the string it points to.
  ReadString { ret: Arg },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Arg {
  Int(i64),
  /// `"$name"`, a value bound by an earlier step.
  Ref(String),
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ErrorKind {
  Protocol,
  Closure,
  Throw,
}

#[derive(Serialize)]
struct ErrorRecord {
  kind: ErrorKind,
  message: String,
  fatal: bool,
}

impl From<&BridgeError> for ErrorRecord {
  fn from(err: &BridgeError) -> Self {
    let (kind, message) = match err {
      BridgeError::Protocol(violation) => (ErrorKind::Protocol, violation.to_string()),
      BridgeError::Closure(misuse) => (ErrorKind::Closure, misuse.to_string()),
      BridgeError::Throw(value) => (ErrorKind::Throw, bridge_js::debug_string(value)),
    };
    Self {
      kind,
      message,
      fatal: err.is_fatal(),
    }
  }
}

struct Replay {
  guest: Rc<MemoryGuest>,
  bridge: Bridge,
  bindings: AHashMap<String, u32>,
}

impl Replay {
  fn new(options: BridgeOptions) -> Self {
    let guest = Rc::new(MemoryGuest::new());
    let bridge = Bridge::new(guest.clone(), options);
    Self {
      guest,
      bridge,
      bindings: AHashMap::new(),
    }
  }

  fn arg(&self, arg: &Arg) -> anyhow::Result<u32> {
    match arg {
      // Negative integers cross the boundary as their two's complement.
      Arg::Int(n) => {
        let n = i32::try_from(*n)
          .map(|n| n as u32)
          .or_else(|_| u32::try_from(*n))
          .map_err(|_| anyhow!("argument {n} does not fit in 32 bits"))?;
        Ok(n)
      }
      Arg::Ref(name) => {
        let key = name
          .strip_prefix('$')
          .ok_or_else(|| anyhow!("string argument {name:?} must start with `$`"))?;
        self
          .bindings
          .get(key)
          .copied()
          .ok_or_else(|| anyhow!("unbound name {name:?}"))
      }
    }
  }

  fn bind(&mut self, name: &str, value: u32) {
    self.bindings.insert(name.to_string(), value);
  }

  /// Runs one step, returning its output record and whether the failure (if any) was fatal.
  fn step(&mut self, index: usize, step: &Step) -> anyhow::Result<(serde_json::Value, bool)> {
    let record = match step {
      Step::WriteString { name, value } => {
        let encoded = self
          .bridge
          .encode_string(&HostString::new(value))
          .map_err(|err| anyhow!("cannot write string: {err}"))?;
        self.bind(&format!("{name}.ptr"), encoded.ptr);
        self.bind(&format!("{name}.len"), encoded.len);
        json!({ "step": index, "op": "write_string", "ptr": encoded.ptr, "len": encoded.len })
      }
      Step::Alloc { name, size } => {
        let ptr = self
          .guest
          .allocate(*size)
          .map_err(|err| anyhow!("cannot allocate: {err}"))?;
        self.bind(name, ptr);
        json!({ "step": index, "op": "alloc", "ptr": ptr })
      }
      Step::Call {
        function,
        args,
        bind,
      } => {
        let raw: Vec<u32> = args
          .iter()
          .map(|arg| self.arg(arg))
          .collect::<anyhow::Result<_>>()?;
        match self.bridge.invoke_by_name(function, &raw) {
          Ok(result) => {
            if let Some(name) = bind {
              self.bind(name, result);
            }
            json!({
              "step": index,
              "op": "call",
              "fn": function,
              "result": result,
              "pending_exception": self.bridge.pending_exception().map(|h| h.raw()),
            })
          }
          Err(err) => {
            let fatal = err.is_fatal();
            let record = json!({
              "step": index,
              "op": "call",
              "fn": function,
              "error": ErrorRecord::from(&err),
            });
            return Ok((record, fatal));
          }
        }
      }
      Step::ReadString { ret } => {
        let ret = self.arg(ret)?;
        let guest: &dyn Guest = &*self.guest;
        let decoded = read_ret(guest, ret).and_then(|encoded| {
          if encoded.ptr == 0 {
            Ok(None)
          } else {
            decode(guest, encoded.ptr, encoded.len).map(Some)
          }
        });
        match decoded {
          Ok(value) => json!({
            "step": index,
            "op": "read_string",
            "value": value.map(|s| s.to_utf8_lossy()),
          }),
          Err(err) => {
            let fatal = err.is_fatal();
            let record = json!({
              "step": index,
              "op": "read_string",
              "error": ErrorRecord::from(&err),
            });
            return Ok((record, fatal));
          }
        }
      }
    };
    Ok((record, false))
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  match cli.command {
    Commands::Replay(args) => match run_replay(args) {
      Ok(code) => code,
      Err(err) => {
        eprintln!("error: {err:#}");
        ExitCode::from(2)
      }
    },
  }
}

fn run_replay(args: ReplayArgs) -> anyhow::Result<ExitCode> {
  init_tracing(args.json_logs, args.verbose);

  let source = fs::read_to_string(&args.script)
    .with_context(|| format!("failed to read {}", args.script.display()))?;
  let script: Script = serde_json::from_str(&source)
    .with_context(|| format!("failed to parse {}", args.script.display()))?;
  if script.options.borrow_stack_capacity == 0 {
    bail!("borrow_stack_capacity must be at least 1");
  }

  let mut replay = Replay::new(script.options);
  let stdout = std::io::stdout();
  let mut out = stdout.lock();
  for (index, step) in script.steps.iter().enumerate() {
    let (record, fatal) = replay
      .step(index, step)
      .with_context(|| format!("step {index}"))?;
    writeln!(out, "{record}")?;
    if fatal {
      tracing::error!(step = index, "replay aborted by a protocol violation");
      return Ok(ExitCode::FAILURE);
    }
  }
  writeln!(
    out,
    "{}",
    json!({ "op": "stats", "stats": replay.bridge.stats() })
  )?;
  Ok(ExitCode::SUCCESS)
}

fn init_tracing(json: bool, verbose: u8) {
  let level = match verbose {
    0 => Level::WARN,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  };
  let builder = tracing_subscriber::fmt()
    .with_max_level(level)
    .with_writer(std::io::stderr)
    .with_ansi(false);
  let _ = if json {
    builder.json().try_init()
  } else {
    builder.try_init()
  };
}
