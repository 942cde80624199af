//! Control flow: jumps, calls, returns, closures, try frames,
//! iteration.

use super::Vm;
use crate::call::{CallFrame, TryFrame};
use crate::chunk::Constant;
use crate::consts::FRAME_BASE;
use crate::error::{Fatal, RuntimeError, Trap, TrapKind};
use crate::state::ExecuteState;
use crate::value::{ObjectBody, Value};

use orus_asm::DecodeError;

use std::rc::Rc;

type OpResult = Result<ExecuteState, RuntimeError>;

impl Vm {
    /* JUMPS */

    fn jump_forward(&mut self, distance: usize) -> Result<(), RuntimeError> {
        let target = self.ip + distance;

        if target > self.chunk.len() {
            return Err(RuntimeError::Halt(Fatal::MalformedBytecode(
                DecodeError::UnexpectedEnd { offset: self.op_ip },
            )));
        }

        self.ip = target;
        Ok(())
    }

    fn jump_back(&mut self, distance: usize) -> Result<(), RuntimeError> {
        self.ip = self.ip.checked_sub(distance).ok_or(RuntimeError::Halt(
            Fatal::MalformedBytecode(DecodeError::UnexpectedEnd { offset: self.op_ip }),
        ))?;
        Ok(())
    }

    pub(crate) fn op_jump(&mut self) -> OpResult {
        let distance = self.fetch_u16()? as usize;
        self.jump_forward(distance)?;
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_jump_short(&mut self) -> OpResult {
        let distance = self.fetch_u8()? as usize;
        self.jump_forward(distance)?;
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_jump_if(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let distance = self.fetch_u16()? as usize;

        if self.registers.read(reg).as_bool()? {
            self.jump_forward(distance)?;
        }

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_jump_if_short(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let distance = self.fetch_u8()? as usize;

        if self.registers.read(reg).as_bool()? {
            self.jump_forward(distance)?;
        }

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_jump_if_not(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let distance = self.fetch_u16()? as usize;

        if !self.registers.read(reg).as_bool()? {
            self.jump_forward(distance)?;
        }

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_jump_if_not_short(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let distance = self.fetch_u8()? as usize;

        if !self.registers.read(reg).as_bool()? {
            self.jump_forward(distance)?;
        }

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_loop(&mut self) -> OpResult {
        let distance = self.fetch_u16()? as usize;
        self.jump_back(distance)?;
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_loop_short(&mut self) -> OpResult {
        let distance = self.fetch_u8()? as usize;
        self.jump_back(distance)?;
        Ok(ExecuteState::Proceed)
    }

    /// Fused induction step: increment, compare against the limit,
    /// loop backward while below it.
    pub(crate) fn op_inc_cmp_jump(&mut self) -> OpResult {
        let (reg, limit) = self.fetch_rr()?;
        let distance = self.fetch_u16()? as usize;

        let stepped = match self.registers.read(reg) {
            Value::I32(v) => Value::I32(v.checked_add(1).ok_or(TrapKind::ArithmeticOverflow)?),
            Value::I64(v) => Value::I64(v.checked_add(1).ok_or(TrapKind::ArithmeticOverflow)?),
            Value::U32(v) => Value::U32(v.wrapping_add(1)),
            Value::U64(v) => Value::U64(v.wrapping_add(1)),
            Value::Nil => return Err(TrapKind::NilDereference.into()),
            _ => return Err(TrapKind::TypeMismatch.into()),
        };
        self.registers.write(reg, stepped);

        let below = match (stepped, self.registers.read(limit)) {
            (Value::I32(x), Value::I32(y)) => x < y,
            (Value::I64(x), Value::I64(y)) => x < y,
            (Value::U32(x), Value::U32(y)) => x < y,
            (Value::U64(x), Value::U64(y)) => x < y,
            _ => return Err(TrapKind::TypeMismatch.into()),
        };

        if below {
            self.jump_back(distance)?;
        }

        Ok(ExecuteState::Proceed)
    }

    /* CALLS */

    pub(crate) fn op_call(&mut self) -> OpResult {
        let (func, first, argc, result) = self.fetch_rrrr()?;

        let callee = self.registers.read(func).as_obj()?;
        let ObjectBody::Closure { proto, .. } = self.heap.body(callee) else {
            return Err(TrapKind::TypeMismatch.into());
        };
        let proto = Rc::clone(proto);

        if argc != proto.arity {
            return Err(Trap::new(
                TrapKind::ArityMismatch,
                format!("{} expects {} argument(s), got {argc}", proto.name, proto.arity),
            )
            .into());
        }

        if self.frames.len() >= self.params.frame_depth_limit {
            return Err(TrapKind::RecursionError.into());
        }

        let args: Vec<Value> = (0..argc)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        let window = self.registers.save_call_window(self.chunk.frame_used);
        self.frames.push(CallFrame::new(
            self.ip,
            Rc::clone(&self.chunk),
            window,
            result,
            self.closure,
        ));
        self.profiler.on_frame_push(self.frames.len());

        for (offset, argument) in args.into_iter().enumerate() {
            self.registers.write((FRAME_BASE + offset) as u8, argument);
        }

        self.chunk = Rc::clone(&proto.chunk);
        self.ip = 0;
        self.closure = Some(callee);

        Ok(ExecuteState::Proceed)
    }

    /// Tail call: the current frame is reused, so recursion in tail
    /// position runs in constant frame depth.
    pub(crate) fn op_tail_call(&mut self) -> OpResult {
        let (func, first, argc) = self.fetch_rrr()?;

        let callee = self.registers.read(func).as_obj()?;
        let ObjectBody::Closure { proto, .. } = self.heap.body(callee) else {
            return Err(TrapKind::TypeMismatch.into());
        };
        let proto = Rc::clone(proto);

        if argc != proto.arity {
            return Err(Trap::new(
                TrapKind::ArityMismatch,
                format!("{} expects {} argument(s), got {argc}", proto.name, proto.arity),
            )
            .into());
        }

        let args: Vec<Value> = (0..argc)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        for (offset, argument) in args.into_iter().enumerate() {
            self.registers.write((FRAME_BASE + offset) as u8, argument);
        }

        self.chunk = Rc::clone(&proto.chunk);
        self.ip = 0;
        self.closure = Some(callee);

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_call_native(&mut self) -> OpResult {
        let (id, first, argc, result) = self.fetch_rrrr()?;

        let entry = self
            .native_entry(id)
            .ok_or(RuntimeError::Halt(Fatal::UnknownNative(id)))?;

        if argc != entry.arity {
            return Err(Trap::new(
                TrapKind::ArityMismatch,
                format!("{} expects {} argument(s), got {argc}", entry.name, entry.arity),
            )
            .into());
        }

        let args: Vec<Value> = (0..argc)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        let value = (entry.func)(self, &args)?;
        self.registers.write(result, value);

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_return(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let value = self.registers.read(reg);
        self.return_value(value)
    }

    pub(crate) fn op_return_void(&mut self) -> OpResult {
        self.return_value(Value::Nil)
    }

    fn return_value(&mut self, value: Value) -> OpResult {
        let Some(frame) = self.frames.pop() else {
            return Ok(ExecuteState::Return(value));
        };

        let (return_ip, chunk, window, result_reg, closure) = frame.into_restore();

        self.registers.restore_call_window(window);
        self.registers.write(result_reg, value);
        self.ip = return_ip;
        self.chunk = chunk;
        self.closure = closure;

        // A `return` out of a try body skips its `pop_try`; handlers
        // installed by the finished frame must not catch for it.
        let depth = self.frames.len();
        while self
            .try_frames
            .last()
            .is_some_and(|frame| frame.frame_depth > depth)
        {
            self.try_frames.pop();
        }

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_halt(&mut self) -> OpResult {
        Ok(ExecuteState::Halt)
    }

    /* CLOSURES */

    pub(crate) fn op_closure(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        let index = self.fetch_u16()?;

        let Constant::Function(proto) = self.constant(index)? else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for descriptor in &proto.upvalues {
            let captured = match *descriptor {
                crate::chunk::UpvalueDesc::FromFrame(slot) => {
                    self.registers.read((FRAME_BASE + slot as usize) as u8)
                }
                crate::chunk::UpvalueDesc::FromEnclosing(slot) => self.read_upvalue(slot)?,
            };
            upvalues.push(captured);
        }

        let id = self
            .heap
            .alloc(ObjectBody::Closure { proto, upvalues })
            .map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    fn read_upvalue(&self, slot: u8) -> Result<Value, RuntimeError> {
        let closure = self
            .closure
            .ok_or_else(|| Trap::new(TrapKind::TypeMismatch, "no executing closure"))?;

        let ObjectBody::Closure { upvalues, .. } = self.heap.body(closure) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        upvalues
            .get(slot as usize)
            .copied()
            .ok_or_else(|| TrapKind::IndexOutOfBounds.into())
    }

    pub(crate) fn op_get_upvalue(&mut self) -> OpResult {
        let (dst, slot) = self.fetch_rr()?;
        let value = self.read_upvalue(slot)?;
        self.registers.write(dst, value);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_set_upvalue(&mut self) -> OpResult {
        let (slot, src) = self.fetch_rr()?;

        let value = self.registers.read(src);
        let closure = self
            .closure
            .ok_or_else(|| Trap::new(TrapKind::TypeMismatch, "no executing closure"))?;

        let ObjectBody::Closure { upvalues, .. } = self.heap.body_mut(closure) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let cell = upvalues
            .get_mut(slot as usize)
            .ok_or(TrapKind::IndexOutOfBounds)?;
        *cell = value;

        Ok(ExecuteState::Proceed)
    }

    /* ITERATION */

    pub(crate) fn op_get_iter(&mut self) -> OpResult {
        let (dst, src) = self.fetch_rr()?;

        let source = self.registers.read(src).as_obj()?;
        let body = match self.heap.body(source) {
            // Iterating a range must not consume the source value.
            ObjectBody::Range { current, end } => ObjectBody::Range {
                current: *current,
                end: *end,
            },
            ObjectBody::Array(_) => ObjectBody::ArrayIter {
                array: source,
                index: 0,
            },
            _ => return Err(TrapKind::TypeMismatch.into()),
        };

        let id = self.heap.alloc(body).map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_iter_next(&mut self) -> OpResult {
        let (dst, iter, has) = self.fetch_rrr()?;

        let id = self.registers.read(iter).as_obj()?;

        // First advance the iterator state, then resolve the element;
        // the array lookup needs the mutable borrow released.
        enum Step {
            Range(Option<i64>),
            Array { array: crate::value::ObjId, at: usize },
        }

        let step = match self.heap.body_mut(id) {
            ObjectBody::Range { current, end } => {
                if *current < *end {
                    let value = *current;
                    *current += 1;
                    Step::Range(Some(value))
                } else {
                    Step::Range(None)
                }
            }
            ObjectBody::ArrayIter { array, index } => {
                let at = *index;
                *index += 1;
                Step::Array { array: *array, at }
            }
            _ => return Err(TrapKind::TypeMismatch.into()),
        };

        let next = match step {
            Step::Range(value) => value.map(Value::I64),
            Step::Array { array, at } => {
                let ObjectBody::Array(items) = self.heap.body(array) else {
                    return Err(TrapKind::TypeMismatch.into());
                };
                items.get(at).copied()
            }
        };

        match next {
            Some(value) => {
                self.registers.write(dst, value);
                self.registers.write(has, Value::Bool(true));
            }
            None => {
                self.registers.write(dst, Value::Nil);
                self.registers.write(has, Value::Bool(false));
            }
        }

        Ok(ExecuteState::Proceed)
    }

    /* TRY / RAISE */

    pub(crate) fn op_push_try(&mut self) -> OpResult {
        let catch_reg = self.fetch_u8()?;
        let distance = self.fetch_u16()? as usize;

        if self.try_frames.len() >= self.params.try_depth_limit {
            return Err(TrapKind::TryDepthExceeded.into());
        }

        self.try_frames.push(TryFrame {
            handler_ip: self.ip + distance,
            frame_depth: self.frames.len(),
            catch_reg,
        });

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_pop_try(&mut self) -> OpResult {
        self.try_frames
            .pop()
            .ok_or(RuntimeError::Halt(Fatal::FrameUnderflow))?;
        Ok(ExecuteState::Proceed)
    }

    /// Raises a value as an error. Error objects pass through intact;
    /// anything else is wrapped as a user-raised error with its
    /// canonical string form as the message.
    pub(crate) fn op_raise(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let value = self.registers.read(reg);

        let trap = match value {
            Value::Obj(id) => match self.heap.body(id) {
                ObjectBody::Error { kind, message, .. } => {
                    let trap = Trap::new(*kind, message.clone());
                    self.pending_raise = Some(id);
                    trap
                }
                _ => {
                    let message = self.heap.format_value(value);
                    let trap = Trap::new(TrapKind::UserRaised, message);
                    let object = self.error_object(&trap)?;
                    self.pending_raise = Some(object);
                    trap
                }
            },
            _ => {
                let message = self.heap.format_value(value);
                let trap = Trap::new(TrapKind::UserRaised, message);
                let object = self.error_object(&trap)?;
                self.pending_raise = Some(object);
                trap
            }
        };

        Err(trap.into())
    }
}
