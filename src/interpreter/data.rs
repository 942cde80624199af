//! Load/store, register-view transitions, and aggregate handlers.

use super::Vm;
use crate::chunk::Constant;
use crate::consts::{GLOBAL_BASE, GLOBAL_COUNT, MODULE_BASE, MODULE_COUNT};
use crate::error::{RuntimeError, TrapKind};
use crate::state::ExecuteState;
use crate::value::{ObjectBody, TypedCell, Value};

type OpResult = Result<ExecuteState, RuntimeError>;

impl Vm {
    /* CONSTANTS AND SIMPLE LOADS */

    pub(crate) fn op_load_const(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        let index = self.fetch_u16()?;
        let value = self.materialize_constant(index)?;
        self.registers.write(dst, value);
        Ok(ExecuteState::Proceed)
    }

    /// Loads a numeric or boolean constant straight into the typed
    /// shadow, leaving the boxed view stale.
    pub(crate) fn op_load_const_typed(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        let index = self.fetch_u16()?;

        let cell = match self.constant(index)? {
            Constant::Bool(v) => TypedCell::Bool(v),
            Constant::I32(v) => TypedCell::I32(v),
            Constant::I64(v) => TypedCell::I64(v),
            Constant::U32(v) => TypedCell::U32(v),
            Constant::U64(v) => TypedCell::U64(v),
            Constant::F64(v) => TypedCell::F64(v),
            _ => return Err(TrapKind::TypeMismatch.into()),
        };

        self.registers.write_typed(dst, cell);
        self.profiler.typed_hits += 1;
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn materialize_constant(&mut self, index: u16) -> Result<Value, RuntimeError> {
        Ok(match self.constant(index)? {
            Constant::Nil => Value::Nil,
            Constant::Bool(v) => Value::Bool(v),
            Constant::I32(v) => Value::I32(v),
            Constant::I64(v) => Value::I64(v),
            Constant::U32(v) => Value::U32(v),
            Constant::U64(v) => Value::U64(v),
            Constant::F64(v) => Value::F64(v),
            Constant::Str(text) => {
                let id = self.heap.intern(&text).map_err(RuntimeError::Halt)?;
                Value::Obj(id)
            }
            Constant::Function(proto) => {
                let id = self
                    .heap
                    .alloc(ObjectBody::Closure {
                        proto,
                        upvalues: Vec::new(),
                    })
                    .map_err(RuntimeError::Halt)?;
                Value::Obj(id)
            }
        })
    }

    pub(crate) fn op_load_nil(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        self.registers.write(dst, Value::Nil);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_load_true(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        self.registers.write(dst, Value::Bool(true));
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_load_false(&mut self) -> OpResult {
        let dst = self.fetch_u8()?;
        self.registers.write(dst, Value::Bool(false));
        Ok(ExecuteState::Proceed)
    }

    /* MOVES AND VIEW TRANSITIONS */

    pub(crate) fn op_move(&mut self) -> OpResult {
        let (dst, src) = self.fetch_rr()?;
        let value = self.registers.read(src);
        self.registers.write(dst, value);
        Ok(ExecuteState::Proceed)
    }

    /// Copies the shadow cell; both registers end up shadow-
    /// authoritative with the same kind.
    pub(crate) fn op_move_typed(&mut self) -> OpResult {
        let (dst, src) = self.fetch_rr()?;

        let value = self.registers.read(src);
        let cell = TypedCell::from_value(value).ok_or(TrapKind::RegisterKindMismatch)?;
        self.registers.write_typed(dst, cell);
        self.profiler.typed_hits += 1;

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_sync(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        self.registers.sync(reg);
        self.profiler.syncs += 1;
        Ok(ExecuteState::Proceed)
    }

    /* GLOBAL AND MODULE BANDS */

    pub(crate) fn op_load_global(&mut self) -> OpResult {
        let (dst, index) = self.fetch_rr()?;
        let slot = band_slot(GLOBAL_BASE, GLOBAL_COUNT, index)?;
        let value = self.registers.read(slot);
        self.registers.write(dst, value);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_store_global(&mut self) -> OpResult {
        let (index, src) = self.fetch_rr()?;
        let slot = band_slot(GLOBAL_BASE, GLOBAL_COUNT, index)?;
        let value = self.registers.read(src);
        self.registers.write(slot, value);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_load_module(&mut self) -> OpResult {
        let (dst, index) = self.fetch_rr()?;
        let slot = band_slot(MODULE_BASE, MODULE_COUNT, index)?;
        let value = self.registers.read(slot);
        self.registers.write(dst, value);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_store_module(&mut self) -> OpResult {
        let (index, src) = self.fetch_rr()?;
        let slot = band_slot(MODULE_BASE, MODULE_COUNT, index)?;
        let value = self.registers.read(src);
        self.registers.write(slot, value);
        Ok(ExecuteState::Proceed)
    }

    /* ARRAYS */

    pub(crate) fn op_make_array(&mut self) -> OpResult {
        let (dst, first, count) = self.fetch_rrr()?;

        let items: Vec<Value> = (0..count)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        let id = self
            .heap
            .alloc(ObjectBody::Array(items))
            .map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_array_get(&mut self) -> OpResult {
        let (dst, array, index) = self.fetch_rrr()?;

        let id = self.registers.read(array).as_obj()?;
        let at = as_index(self.registers.read(index))?;

        let ObjectBody::Array(items) = self.heap.body(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let value = *items.get(at).ok_or(TrapKind::IndexOutOfBounds)?;
        self.registers.write(dst, value);

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_array_set(&mut self) -> OpResult {
        let (array, index, src) = self.fetch_rrr()?;

        let id = self.registers.read(array).as_obj()?;
        let at = as_index(self.registers.read(index))?;
        let value = self.registers.read(src);

        let ObjectBody::Array(items) = self.heap.body_mut(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let slot = items.get_mut(at).ok_or(TrapKind::IndexOutOfBounds)?;
        *slot = value;

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_array_len(&mut self) -> OpResult {
        let (dst, array) = self.fetch_rr()?;

        let id = self.registers.read(array).as_obj()?;
        let ObjectBody::Array(items) = self.heap.body(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let len = items.len() as i32;
        self.registers.write(dst, Value::I32(len));

        Ok(ExecuteState::Proceed)
    }

    /* STRUCTS AND ENUMS */

    pub(crate) fn op_make_struct(&mut self) -> OpResult {
        let (dst, first, count) = self.fetch_rrr()?;

        let fields: Vec<Value> = (0..count)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        let id = self
            .heap
            .alloc(ObjectBody::Struct(fields))
            .map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_struct_get(&mut self) -> OpResult {
        let (dst, object, field) = self.fetch_rrr()?;

        let id = self.registers.read(object).as_obj()?;
        let ObjectBody::Struct(fields) = self.heap.body(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let value = *fields
            .get(field as usize)
            .ok_or(TrapKind::IndexOutOfBounds)?;
        self.registers.write(dst, value);

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_struct_set(&mut self) -> OpResult {
        let (object, field, src) = self.fetch_rrr()?;

        let id = self.registers.read(object).as_obj()?;
        let value = self.registers.read(src);

        let ObjectBody::Struct(fields) = self.heap.body_mut(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let slot = fields
            .get_mut(field as usize)
            .ok_or(TrapKind::IndexOutOfBounds)?;
        *slot = value;

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_make_enum(&mut self) -> OpResult {
        let (dst, variant, first, count) = self.fetch_rrrr()?;

        let payload: Vec<Value> = (0..count)
            .map(|offset| self.registers.read(first.wrapping_add(offset)))
            .collect();

        let id = self
            .heap
            .alloc(ObjectBody::Enum {
                variant: variant as u32,
                payload,
            })
            .map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_enum_tag(&mut self) -> OpResult {
        let (dst, object) = self.fetch_rr()?;

        let id = self.registers.read(object).as_obj()?;
        let ObjectBody::Enum { variant, .. } = self.heap.body(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let tag = *variant as i32;
        self.registers.write(dst, Value::I32(tag));

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_enum_payload(&mut self) -> OpResult {
        let (dst, object, index) = self.fetch_rrr()?;

        let id = self.registers.read(object).as_obj()?;
        let ObjectBody::Enum { payload, .. } = self.heap.body(id) else {
            return Err(TrapKind::TypeMismatch.into());
        };

        let value = *payload
            .get(index as usize)
            .ok_or(TrapKind::IndexOutOfBounds)?;
        self.registers.write(dst, value);

        Ok(ExecuteState::Proceed)
    }

    /* RANGES */

    pub(crate) fn op_make_range(&mut self) -> OpResult {
        let (dst, start, end) = self.fetch_rrr()?;

        let current = as_range_bound(self.registers.read(start))?;
        let end = as_range_bound(self.registers.read(end))?;

        let id = self
            .heap
            .alloc(ObjectBody::Range { current, end })
            .map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    /* COLLECTOR CONTROL */

    pub(crate) fn op_gc_pause(&mut self) -> OpResult {
        self.heap.pause();
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_gc_resume(&mut self) -> OpResult {
        self.heap.resume();
        Ok(ExecuteState::Proceed)
    }
}

fn band_slot(base: usize, count: usize, index: u8) -> Result<u8, RuntimeError> {
    if (index as usize) < count {
        Ok((base + index as usize) as u8)
    } else {
        Err(TrapKind::IndexOutOfBounds.into())
    }
}

fn as_index(value: Value) -> Result<usize, TrapKind> {
    let raw = match value {
        Value::I32(v) => v as i64,
        Value::I64(v) => v,
        Value::Nil => return Err(TrapKind::NilDereference),
        _ => return Err(TrapKind::TypeMismatch),
    };

    usize::try_from(raw).map_err(|_| TrapKind::IndexOutOfBounds)
}

fn as_range_bound(value: Value) -> Result<i64, TrapKind> {
    match value {
        Value::I32(v) => Ok(v as i64),
        Value::I64(v) => Ok(v),
        Value::Nil => Err(TrapKind::NilDereference),
        _ => Err(TrapKind::TypeMismatch),
    }
}
