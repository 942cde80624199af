//! [`Vm`] implementation.

use crate::call::{CallFrame, TryFrame};
use crate::chunk::Chunk;
use crate::consts::*;
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::profiler::Profiler;
use crate::registers::RegisterFile;
use crate::value::{ObjId, Value};

use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

mod alu;
mod constructors;
mod data;
mod flow;
mod internal;
mod string;

mod executors;

pub use constructors::{DispatchMode, Output, VmParams};

/// Signature of a registered native function.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

/// One entry of the native registry; `CallNative` indexes it.
#[derive(Clone)]
pub struct NativeEntry {
    /// Name the frontend resolves.
    pub name: Rc<str>,
    /// Declared parameter count.
    pub arity: u8,
    /// Implementation.
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The Orus virtual machine.
///
/// Owns the whole runtime state: register file, heap, frame and try
/// stacks, and the executing chunk. The internal state is not exposed;
/// embedders run programs through [`Vm::execute`] and inspect results,
/// captured output or the profiler.
#[derive(Debug)]
pub struct Vm {
    pub(crate) registers: RegisterFile,
    pub(crate) heap: Heap,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) try_frames: Vec<TryFrame>,
    pub(crate) chunk: Rc<Chunk>,
    pub(crate) ip: usize,
    /// Start offset of the instruction being executed, for location
    /// recovery.
    pub(crate) op_ip: usize,
    pub(crate) closure: Option<ObjId>,
    pub(crate) natives: Vec<NativeEntry>,
    pub(crate) last_error: Value,
    pub(crate) pending_raise: Option<ObjId>,
    pub(crate) output: Output,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) dispatch: DispatchMode,
    pub(crate) profiler: Profiler,
    pub(crate) params: VmParams,
    // TODO decide who stamps this: the `timestamp` native or the end
    // of `execute`. Nothing writes it yet.
    pub(crate) last_execution_time: Option<Duration>,
}

impl Vm {
    /// The current state of the registers, boxed view.
    pub fn registers(&self) -> Vec<Value> {
        (0..REGISTER_COUNT as u16)
            .map(|id| self.registers.peek(id as u8))
            .collect()
    }

    /// Read one register's boxed view.
    pub fn register(&self, id: u8) -> Value {
        self.registers.peek(id)
    }

    /// The object heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Call-frame depth.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Execution counters of the most recent run.
    pub const fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Runtime parameters the VM was built with.
    pub const fn params(&self) -> &VmParams {
        &self.params
    }

    /// Dispatch strategy in effect.
    pub const fn dispatch(&self) -> DispatchMode {
        self.dispatch
    }

    /// Handle that requests cooperative cancellation; checked between
    /// instructions. Safe to set from a signal handler thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The last error object routed through a try frame, or `nil`.
    pub const fn last_error(&self) -> Value {
        self.last_error
    }

    /// Registers a native function; returns the id `CallNative`
    /// addresses it by.
    pub fn register_native(&mut self, name: &str, arity: u8, func: NativeFn) -> u8 {
        self.natives.push(NativeEntry {
            name: Rc::from(name),
            arity,
            func,
        });

        (self.natives.len() - 1) as u8
    }

    /// Resolves a native id back to its name, for disassembly.
    pub fn native_name(&self, id: u8) -> Option<&str> {
        self.natives.get(id as usize).map(|entry| &*entry.name)
    }
}
