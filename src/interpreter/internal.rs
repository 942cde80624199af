use super::Vm;
use crate::chunk::Constant;
use crate::diagnostic::SourceLoc;
use crate::error::{Fatal, RuntimeError, Trap, TrapKind};
use crate::state::ExecuteState;
use crate::value::{ObjId, ObjectBody, Value};

use orus_asm::DecodeError;

use std::sync::atomic::Ordering;

impl Vm {
    /* FETCH */

    pub(crate) fn fetch_u8(&mut self) -> Result<u8, RuntimeError> {
        let byte = self
            .chunk
            .code()
            .get(self.ip)
            .copied()
            .ok_or(Fatal::MalformedBytecode(DecodeError::UnexpectedEnd {
                offset: self.op_ip,
            }))?;

        self.ip += 1;
        Ok(byte)
    }

    pub(crate) fn fetch_u16(&mut self) -> Result<u16, RuntimeError> {
        let hi = self.fetch_u8()?;
        let lo = self.fetch_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub(crate) fn fetch_rr(&mut self) -> Result<(u8, u8), RuntimeError> {
        Ok((self.fetch_u8()?, self.fetch_u8()?))
    }

    pub(crate) fn fetch_rrr(&mut self) -> Result<(u8, u8, u8), RuntimeError> {
        Ok((self.fetch_u8()?, self.fetch_u8()?, self.fetch_u8()?))
    }

    pub(crate) fn fetch_rrrr(&mut self) -> Result<(u8, u8, u8, u8), RuntimeError> {
        Ok((
            self.fetch_u8()?,
            self.fetch_u8()?,
            self.fetch_u8()?,
            self.fetch_u8()?,
        ))
    }

    /* LOCATION */

    /// Source location of the executing instruction, recovered from
    /// the chunk's line table.
    pub(crate) fn current_loc(&self) -> SourceLoc {
        self.chunk.loc_at(self.op_ip)
    }

    pub(crate) fn constant(&self, index: u16) -> Result<Constant, RuntimeError> {
        self.chunk
            .constant(index)
            .cloned()
            .ok_or_else(|| RuntimeError::Halt(Fatal::ConstantOutOfRange(index)))
    }

    /* SAFE POINT */

    /// Runs between any two instructions: observes the cancellation
    /// flag and serves a pending collection request.
    pub(crate) fn safepoint(&mut self) -> Result<(), RuntimeError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(TrapKind::Cancelled.into());
        }

        if self.heap.should_collect() {
            self.collect_garbage()?;
        }

        Ok(())
    }

    pub(crate) fn collect_garbage(&mut self) -> Result<(), RuntimeError> {
        let Vm {
            heap,
            registers,
            frames,
            last_error,
            pending_raise,
            closure,
            profiler,
            ..
        } = self;

        let roots = registers
            .roots()
            .chain(frames.iter().flat_map(|frame| frame.saved_roots()))
            .chain(std::iter::once(*last_error))
            .chain(pending_raise.iter().map(|id| Value::Obj(*id)))
            .chain(closure.iter().map(|id| Value::Obj(*id)));

        heap.collect(roots).map_err(RuntimeError::Halt)?;
        profiler.gc_cycles += 1;

        Ok(())
    }

    /* ERROR ROUTING */

    /// Materializes a trap as a heap error object.
    pub(crate) fn error_object(&mut self, trap: &Trap) -> Result<ObjId, RuntimeError> {
        let location = Some(self.current_loc());

        self.heap
            .alloc(ObjectBody::Error {
                kind: trap.kind,
                message: trap.message.clone(),
                location,
            })
            .map_err(RuntimeError::Halt)
    }

    /// Routes a failed instruction through the try stack. With no
    /// handler installed the error escapes to the caller of `run`.
    pub(crate) fn recover(&mut self, error: RuntimeError) -> Result<ExecuteState, RuntimeError> {
        let trap = match error {
            RuntimeError::Trap(trap) => trap,
            halt @ RuntimeError::Halt(_) => return Err(halt),
        };

        let Some(frame) = self.try_frames.pop() else {
            self.pending_raise = None;
            return Err(RuntimeError::Trap(trap));
        };

        let error_object = match self.pending_raise.take() {
            Some(id) => id,
            None => self.error_object(&trap)?,
        };

        // Pop call frames down to the depth the handler was installed
        // at, restoring each caller's window on the way out.
        while self.frames.len() > frame.frame_depth {
            let call = self
                .frames
                .pop()
                .ok_or(RuntimeError::Halt(Fatal::FrameUnderflow))?;
            let (_, chunk, window, _, closure) = call.into_restore();
            self.registers.restore_call_window(window);
            self.chunk = chunk;
            self.closure = closure;
        }

        tracing::debug!(
            kind = %trap.kind,
            handler_ip = frame.handler_ip,
            "trap caught by try frame"
        );

        self.registers.write(frame.catch_reg, Value::Obj(error_object));
        self.last_error = Value::Obj(error_object);
        self.ip = frame.handler_ip;

        Ok(ExecuteState::Proceed)
    }
}
