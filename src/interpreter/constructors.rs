//! Construction and configuration of [`Vm`] instances.

use super::{NativeEntry, Vm};
use crate::chunk::Chunk;
use crate::consts::*;
use crate::error::{RuntimeError, TrapKind};
use crate::heap::Heap;
use crate::profiler::Profiler;
use crate::registers::RegisterFile;
use crate::value::Value;

use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Dispatch strategy, selected at construction.
///
/// Both strategies execute identical semantics; the table variant
/// avoids the centralized branch of the `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Function-pointer table indexed by opcode.
    #[default]
    Goto,
    /// `loop` around a `match` on the opcode.
    Switch,
}

impl DispatchMode {
    /// Strategy forced by `ORUS_DISPATCH=goto|switch`, if set.
    pub fn from_env() -> Self {
        match std::env::var("ORUS_DISPATCH").as_deref() {
            Ok("switch") => Self::Switch,
            Ok("goto") => Self::Goto,
            _ => Self::default(),
        }
    }
}

/// Where `print` instructions write.
#[derive(Debug, Clone)]
pub enum Output {
    /// Process stdout.
    Stdout,
    /// In-memory buffer, drained with [`Vm::take_output`].
    Capture(Vec<u8>),
}

impl Output {
    pub(crate) fn write_str(&mut self, text: &str) {
        match self {
            Self::Stdout => {
                use std::io::Write;
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(text.as_bytes());
                let _ = lock.flush();
            }
            Self::Capture(buffer) => buffer.extend_from_slice(text.as_bytes()),
        }
    }
}

/// Runtime parameters of one VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmParams {
    /// Starting heap-growth trigger in bytes.
    pub gc_initial_threshold: usize,
    /// Hard heap ceiling in bytes.
    pub heap_limit: usize,
    /// Call-frame depth limit.
    pub frame_depth_limit: usize,
    /// Try-frame depth limit.
    pub try_depth_limit: usize,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            gc_initial_threshold: GC_INITIAL_THRESHOLD,
            heap_limit: HEAP_LIMIT,
            frame_depth_limit: FRAME_DEPTH_LIMIT,
            try_depth_limit: TRY_DEPTH_LIMIT,
        }
    }
}

impl VmParams {
    /// Defaults with `ORUS_GC_INITIAL_THRESHOLD` applied when set.
    pub fn from_env() -> Self {
        let mut params = Self::default();

        if let Some(threshold) = std::env::var("ORUS_GC_INITIAL_THRESHOLD")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            params.gc_initial_threshold = threshold;
        }

        params
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// VM with environment-derived parameters and dispatch strategy.
    pub fn new() -> Self {
        Self::with_params(VmParams::from_env(), DispatchMode::from_env())
    }

    /// VM with explicit parameters.
    pub fn with_params(params: VmParams, dispatch: DispatchMode) -> Self {
        let mut vm = Self {
            registers: RegisterFile::new(),
            heap: Heap::new(params.gc_initial_threshold, params.heap_limit),
            frames: Vec::new(),
            try_frames: Vec::new(),
            chunk: Rc::new(Chunk::default()),
            ip: 0,
            op_ip: 0,
            closure: None,
            natives: Vec::new(),
            last_error: Value::Nil,
            pending_raise: None,
            output: Output::Stdout,
            cancel: Arc::new(AtomicBool::new(false)),
            dispatch,
            profiler: Profiler::new(),
            params,
            last_execution_time: None,
        };

        vm.register_default_natives();
        vm
    }

    /// Redirects `print` output into an in-memory buffer.
    pub fn capture_output(&mut self) -> &mut Self {
        self.output = Output::Capture(Vec::new());
        self
    }

    /// Drains the captured output buffer.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Capture(buffer) => {
                String::from_utf8_lossy(&std::mem::take(buffer)).into_owned()
            }
            Output::Stdout => String::new(),
        }
    }

    /// Ids the compiler assumes: `read_line` is native 0, `timestamp`
    /// is native 1.
    fn register_default_natives(&mut self) {
        self.register_native("read_line", 0, native_read_line);
        self.register_native("timestamp", 0, native_timestamp);
    }

    pub(crate) fn native_entry(&self, id: u8) -> Option<NativeEntry> {
        self.natives.get(id as usize).cloned()
    }
}

fn native_read_line(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    use std::io::BufRead;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|error| crate::error::Trap::new(TrapKind::IoError, error.to_string()))?;

    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }

    let id = vm.heap.alloc_string(line).map_err(RuntimeError::Halt)?;
    Ok(Value::Obj(id))
}

fn native_timestamp(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();

    Ok(Value::F64(seconds))
}
