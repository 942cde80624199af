//! Arithmetic, comparison, bitwise, logical and coercion handlers.
//!
//! Boxed helpers validate operand kinds through the accessors and trap
//! on mismatch; typed helpers go straight to the shadow banks. Checked
//! behavior follows the kind: signed arithmetic traps on overflow,
//! unsigned wraps, floats follow IEEE-754.

use super::Vm;
use crate::error::{RuntimeError, TrapKind};
use crate::state::ExecuteState;
use crate::value::{TypedCell, TypedKind, Value};

type OpResult = Result<ExecuteState, RuntimeError>;

macro_rules! boxed_binary {
    ($name:ident, $as:ident, $wrap:expr, $ty:ty) => {
        pub(crate) fn $name<F>(&mut self, f: F) -> OpResult
        where
            F: FnOnce($ty, $ty) -> Result<$ty, TrapKind>,
        {
            let (dst, a, b) = self.fetch_rrr()?;
            let x = self.registers.read(a).$as()?;
            let y = self.registers.read(b).$as()?;
            self.registers.write(dst, $wrap(f(x, y)?));
            Ok(ExecuteState::Proceed)
        }
    };
}

macro_rules! boxed_compare {
    ($name:ident, $as:ident, $ty:ty) => {
        pub(crate) fn $name<F>(&mut self, f: F) -> OpResult
        where
            F: FnOnce($ty, $ty) -> bool,
        {
            let (dst, a, b) = self.fetch_rrr()?;
            let x = self.registers.read(a).$as()?;
            let y = self.registers.read(b).$as()?;
            self.registers.write(dst, Value::Bool(f(x, y)));
            Ok(ExecuteState::Proceed)
        }
    };
}

macro_rules! typed_binary {
    ($name:ident, $kind:expr, $cell:ident, $ty:ty) => {
        pub(crate) fn $name<F>(&mut self, f: F) -> OpResult
        where
            F: FnOnce($ty, $ty) -> Result<$ty, TrapKind>,
        {
            let (dst, a, b) = self.fetch_rrr()?;

            let TypedCell::$cell(x) = self.registers.read_typed(a, $kind)? else {
                return Err(TrapKind::RegisterKindMismatch.into());
            };
            let TypedCell::$cell(y) = self.registers.read_typed(b, $kind)? else {
                return Err(TrapKind::RegisterKindMismatch.into());
            };

            self.registers.write_typed(dst, TypedCell::$cell(f(x, y)?));
            self.profiler.typed_hits += 1;

            Ok(ExecuteState::Proceed)
        }
    };
}

impl Vm {
    boxed_binary!(bin_i32, as_i32, Value::I32, i32);
    boxed_binary!(bin_i64, as_i64, Value::I64, i64);
    boxed_binary!(bin_u32, as_u32, Value::U32, u32);
    boxed_binary!(bin_u64, as_u64, Value::U64, u64);
    boxed_binary!(bin_f64, as_f64, Value::F64, f64);

    boxed_compare!(cmp_i32, as_i32, i32);
    boxed_compare!(cmp_i64, as_i64, i64);
    boxed_compare!(cmp_u32, as_u32, u32);
    boxed_compare!(cmp_u64, as_u64, u64);
    boxed_compare!(cmp_f64, as_f64, f64);

    typed_binary!(typed_i32, TypedKind::I32, I32, i32);
    typed_binary!(typed_i64, TypedKind::I64, I64, i64);
    typed_binary!(typed_u32, TypedKind::U32, U32, u32);
    typed_binary!(typed_u64, TypedKind::U64, U64, u64);
    typed_binary!(typed_f64, TypedKind::F64, F64, f64);

    fn unary<F>(&mut self, f: F) -> OpResult
    where
        F: FnOnce(Value) -> Result<Value, TrapKind>,
    {
        let (dst, src) = self.fetch_rr()?;
        let value = self.registers.read(src);
        self.registers.write(dst, f(value)?);
        Ok(ExecuteState::Proceed)
    }

    /* BOXED ARITHMETIC */

    pub(crate) fn op_add_i32(&mut self) -> OpResult {
        self.bin_i32(|x, y| x.checked_add(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_sub_i32(&mut self) -> OpResult {
        self.bin_i32(|x, y| x.checked_sub(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_mul_i32(&mut self) -> OpResult {
        self.bin_i32(|x, y| x.checked_mul(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_div_i32(&mut self) -> OpResult {
        self.bin_i32(div_i32)
    }

    pub(crate) fn op_mod_i32(&mut self) -> OpResult {
        self.bin_i32(rem_i32)
    }

    pub(crate) fn op_add_i64(&mut self) -> OpResult {
        self.bin_i64(|x, y| x.checked_add(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_sub_i64(&mut self) -> OpResult {
        self.bin_i64(|x, y| x.checked_sub(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_mul_i64(&mut self) -> OpResult {
        self.bin_i64(|x, y| x.checked_mul(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_div_i64(&mut self) -> OpResult {
        self.bin_i64(div_i64)
    }

    pub(crate) fn op_mod_i64(&mut self) -> OpResult {
        self.bin_i64(rem_i64)
    }

    pub(crate) fn op_add_u32(&mut self) -> OpResult {
        self.bin_u32(|x, y| Ok(x.wrapping_add(y)))
    }

    pub(crate) fn op_sub_u32(&mut self) -> OpResult {
        self.bin_u32(|x, y| Ok(x.wrapping_sub(y)))
    }

    pub(crate) fn op_mul_u32(&mut self) -> OpResult {
        self.bin_u32(|x, y| Ok(x.wrapping_mul(y)))
    }

    pub(crate) fn op_div_u32(&mut self) -> OpResult {
        self.bin_u32(div_u32)
    }

    pub(crate) fn op_mod_u32(&mut self) -> OpResult {
        self.bin_u32(rem_u32)
    }

    pub(crate) fn op_add_u64(&mut self) -> OpResult {
        self.bin_u64(|x, y| Ok(x.wrapping_add(y)))
    }

    pub(crate) fn op_sub_u64(&mut self) -> OpResult {
        self.bin_u64(|x, y| Ok(x.wrapping_sub(y)))
    }

    pub(crate) fn op_mul_u64(&mut self) -> OpResult {
        self.bin_u64(|x, y| Ok(x.wrapping_mul(y)))
    }

    pub(crate) fn op_div_u64(&mut self) -> OpResult {
        self.bin_u64(div_u64)
    }

    pub(crate) fn op_mod_u64(&mut self) -> OpResult {
        self.bin_u64(rem_u64)
    }

    pub(crate) fn op_add_f64(&mut self) -> OpResult {
        self.bin_f64(|x, y| Ok(x + y))
    }

    pub(crate) fn op_sub_f64(&mut self) -> OpResult {
        self.bin_f64(|x, y| Ok(x - y))
    }

    pub(crate) fn op_mul_f64(&mut self) -> OpResult {
        self.bin_f64(|x, y| Ok(x * y))
    }

    pub(crate) fn op_div_f64(&mut self) -> OpResult {
        self.bin_f64(|x, y| Ok(x / y))
    }

    pub(crate) fn op_mod_f64(&mut self) -> OpResult {
        self.bin_f64(|x, y| Ok(x % y))
    }

    pub(crate) fn op_neg(&mut self) -> OpResult {
        self.unary(|value| match value {
            Value::I32(v) => v.checked_neg().map(Value::I32).ok_or(TrapKind::ArithmeticOverflow),
            Value::I64(v) => v.checked_neg().map(Value::I64).ok_or(TrapKind::ArithmeticOverflow),
            Value::F64(v) => Ok(Value::F64(-v)),
            Value::Nil => Err(TrapKind::NilDereference),
            _ => Err(TrapKind::TypeMismatch),
        })
    }

    pub(crate) fn op_inc(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let value = self.registers.read(reg);
        self.registers.write(reg, step_by(value, 1)?);
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_dec(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let value = self.registers.read(reg);
        self.registers.write(reg, step_by(value, -1)?);
        Ok(ExecuteState::Proceed)
    }

    /// Fused add-immediate; checked like the register kind's add.
    pub(crate) fn op_add_imm(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;
        let imm = self.fetch_u8()? as i64;
        let value = self.registers.read(reg);
        self.registers.write(reg, step_by(value, imm)?);
        Ok(ExecuteState::Proceed)
    }

    /* TYPED ARITHMETIC */

    pub(crate) fn op_add_i32_typed(&mut self) -> OpResult {
        self.typed_i32(|x, y| x.checked_add(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_sub_i32_typed(&mut self) -> OpResult {
        self.typed_i32(|x, y| x.checked_sub(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_mul_i32_typed(&mut self) -> OpResult {
        self.typed_i32(|x, y| x.checked_mul(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_div_i32_typed(&mut self) -> OpResult {
        self.typed_i32(div_i32)
    }

    pub(crate) fn op_mod_i32_typed(&mut self) -> OpResult {
        self.typed_i32(rem_i32)
    }

    pub(crate) fn op_add_i64_typed(&mut self) -> OpResult {
        self.typed_i64(|x, y| x.checked_add(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_sub_i64_typed(&mut self) -> OpResult {
        self.typed_i64(|x, y| x.checked_sub(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_mul_i64_typed(&mut self) -> OpResult {
        self.typed_i64(|x, y| x.checked_mul(y).ok_or(TrapKind::ArithmeticOverflow))
    }

    pub(crate) fn op_div_i64_typed(&mut self) -> OpResult {
        self.typed_i64(div_i64)
    }

    pub(crate) fn op_mod_i64_typed(&mut self) -> OpResult {
        self.typed_i64(rem_i64)
    }

    pub(crate) fn op_add_u32_typed(&mut self) -> OpResult {
        self.typed_u32(|x, y| Ok(x.wrapping_add(y)))
    }

    pub(crate) fn op_sub_u32_typed(&mut self) -> OpResult {
        self.typed_u32(|x, y| Ok(x.wrapping_sub(y)))
    }

    pub(crate) fn op_mul_u32_typed(&mut self) -> OpResult {
        self.typed_u32(|x, y| Ok(x.wrapping_mul(y)))
    }

    pub(crate) fn op_div_u32_typed(&mut self) -> OpResult {
        self.typed_u32(div_u32)
    }

    pub(crate) fn op_mod_u32_typed(&mut self) -> OpResult {
        self.typed_u32(rem_u32)
    }

    pub(crate) fn op_add_u64_typed(&mut self) -> OpResult {
        self.typed_u64(|x, y| Ok(x.wrapping_add(y)))
    }

    pub(crate) fn op_sub_u64_typed(&mut self) -> OpResult {
        self.typed_u64(|x, y| Ok(x.wrapping_sub(y)))
    }

    pub(crate) fn op_mul_u64_typed(&mut self) -> OpResult {
        self.typed_u64(|x, y| Ok(x.wrapping_mul(y)))
    }

    pub(crate) fn op_div_u64_typed(&mut self) -> OpResult {
        self.typed_u64(div_u64)
    }

    pub(crate) fn op_mod_u64_typed(&mut self) -> OpResult {
        self.typed_u64(rem_u64)
    }

    pub(crate) fn op_add_f64_typed(&mut self) -> OpResult {
        self.typed_f64(|x, y| Ok(x + y))
    }

    pub(crate) fn op_sub_f64_typed(&mut self) -> OpResult {
        self.typed_f64(|x, y| Ok(x - y))
    }

    pub(crate) fn op_mul_f64_typed(&mut self) -> OpResult {
        self.typed_f64(|x, y| Ok(x * y))
    }

    pub(crate) fn op_div_f64_typed(&mut self) -> OpResult {
        self.typed_f64(|x, y| Ok(x / y))
    }

    pub(crate) fn op_mod_f64_typed(&mut self) -> OpResult {
        self.typed_f64(|x, y| Ok(x % y))
    }

    /* BITWISE (i32) */

    pub(crate) fn op_and_32(&mut self) -> OpResult {
        self.bin_i32(|x, y| Ok(x & y))
    }

    pub(crate) fn op_or_32(&mut self) -> OpResult {
        self.bin_i32(|x, y| Ok(x | y))
    }

    pub(crate) fn op_xor_32(&mut self) -> OpResult {
        self.bin_i32(|x, y| Ok(x ^ y))
    }

    pub(crate) fn op_not_32(&mut self) -> OpResult {
        self.unary(|value| Ok(Value::I32(!value.as_i32()?)))
    }

    pub(crate) fn op_shl_32(&mut self) -> OpResult {
        self.bin_i32(|x, y| {
            let amount = shift_amount(y)?;
            Ok(x.wrapping_shl(amount))
        })
    }

    pub(crate) fn op_shr_32(&mut self) -> OpResult {
        self.bin_i32(|x, y| {
            let amount = shift_amount(y)?;
            Ok(((x as u32) >> amount) as i32)
        })
    }

    /* COMPARISON */

    pub(crate) fn op_eq(&mut self) -> OpResult {
        let (dst, a, b) = self.fetch_rrr()?;
        let x = self.registers.read(a);
        let y = self.registers.read(b);
        let equal = Value::deep_eq(x, y, &self.heap);
        self.registers.write(dst, Value::Bool(equal));
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_ne(&mut self) -> OpResult {
        let (dst, a, b) = self.fetch_rrr()?;
        let x = self.registers.read(a);
        let y = self.registers.read(b);
        let equal = Value::deep_eq(x, y, &self.heap);
        self.registers.write(dst, Value::Bool(!equal));
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_lt_i32(&mut self) -> OpResult {
        self.cmp_i32(|x, y| x < y)
    }

    pub(crate) fn op_le_i32(&mut self) -> OpResult {
        self.cmp_i32(|x, y| x <= y)
    }

    pub(crate) fn op_gt_i32(&mut self) -> OpResult {
        self.cmp_i32(|x, y| x > y)
    }

    pub(crate) fn op_ge_i32(&mut self) -> OpResult {
        self.cmp_i32(|x, y| x >= y)
    }

    pub(crate) fn op_lt_i64(&mut self) -> OpResult {
        self.cmp_i64(|x, y| x < y)
    }

    pub(crate) fn op_le_i64(&mut self) -> OpResult {
        self.cmp_i64(|x, y| x <= y)
    }

    pub(crate) fn op_gt_i64(&mut self) -> OpResult {
        self.cmp_i64(|x, y| x > y)
    }

    pub(crate) fn op_ge_i64(&mut self) -> OpResult {
        self.cmp_i64(|x, y| x >= y)
    }

    pub(crate) fn op_lt_u32(&mut self) -> OpResult {
        self.cmp_u32(|x, y| x < y)
    }

    pub(crate) fn op_le_u32(&mut self) -> OpResult {
        self.cmp_u32(|x, y| x <= y)
    }

    pub(crate) fn op_gt_u32(&mut self) -> OpResult {
        self.cmp_u32(|x, y| x > y)
    }

    pub(crate) fn op_ge_u32(&mut self) -> OpResult {
        self.cmp_u32(|x, y| x >= y)
    }

    pub(crate) fn op_lt_u64(&mut self) -> OpResult {
        self.cmp_u64(|x, y| x < y)
    }

    pub(crate) fn op_le_u64(&mut self) -> OpResult {
        self.cmp_u64(|x, y| x <= y)
    }

    pub(crate) fn op_gt_u64(&mut self) -> OpResult {
        self.cmp_u64(|x, y| x > y)
    }

    pub(crate) fn op_ge_u64(&mut self) -> OpResult {
        self.cmp_u64(|x, y| x >= y)
    }

    pub(crate) fn op_lt_f64(&mut self) -> OpResult {
        self.cmp_f64(|x, y| x < y)
    }

    pub(crate) fn op_le_f64(&mut self) -> OpResult {
        self.cmp_f64(|x, y| x <= y)
    }

    pub(crate) fn op_gt_f64(&mut self) -> OpResult {
        self.cmp_f64(|x, y| x > y)
    }

    pub(crate) fn op_ge_f64(&mut self) -> OpResult {
        self.cmp_f64(|x, y| x >= y)
    }

    /* LOGICAL */

    pub(crate) fn op_and_bool(&mut self) -> OpResult {
        let (dst, a, b) = self.fetch_rrr()?;
        let x = self.registers.read(a).as_bool()?;
        let y = self.registers.read(b).as_bool()?;
        self.registers.write(dst, Value::Bool(x && y));
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_or_bool(&mut self) -> OpResult {
        let (dst, a, b) = self.fetch_rrr()?;
        let x = self.registers.read(a).as_bool()?;
        let y = self.registers.read(b).as_bool()?;
        self.registers.write(dst, Value::Bool(x || y));
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_not_bool(&mut self) -> OpResult {
        self.unary(|value| Ok(Value::Bool(!value.as_bool()?)))
    }

    /* COERCIONS */

    pub(crate) fn op_i32_to_i64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::I64(v.as_i32()? as i64)))
    }

    pub(crate) fn op_i64_to_i32(&mut self) -> OpResult {
        self.unary(|v| {
            i32::try_from(v.as_i64()?)
                .map(Value::I32)
                .map_err(|_| TrapKind::ConversionError)
        })
    }

    pub(crate) fn op_i32_to_u32(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::U32(v.as_i32()? as u32)))
    }

    pub(crate) fn op_u32_to_i32(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::I32(v.as_u32()? as i32)))
    }

    pub(crate) fn op_i32_to_f64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::F64(v.as_i32()? as f64)))
    }

    pub(crate) fn op_f64_to_i32(&mut self) -> OpResult {
        self.unary(|v| {
            let x = v.as_f64()?;
            if !x.is_finite() {
                return Err(TrapKind::ConversionError);
            }
            let truncated = x.trunc();
            if truncated < i32::MIN as f64 || truncated > i32::MAX as f64 {
                return Err(TrapKind::ConversionError);
            }
            Ok(Value::I32(truncated as i32))
        })
    }

    pub(crate) fn op_i64_to_f64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::F64(v.as_i64()? as f64)))
    }

    pub(crate) fn op_f64_to_i64(&mut self) -> OpResult {
        self.unary(|v| {
            let x = v.as_f64()?;
            if !x.is_finite() {
                return Err(TrapKind::ConversionError);
            }
            let truncated = x.trunc();
            // 2^63 is exactly representable; anything at or above it
            // does not fit.
            if truncated < -9_223_372_036_854_775_808.0 || truncated >= 9_223_372_036_854_775_808.0
            {
                return Err(TrapKind::ConversionError);
            }
            Ok(Value::I64(truncated as i64))
        })
    }

    pub(crate) fn op_i64_to_u64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::U64(v.as_i64()? as u64)))
    }

    pub(crate) fn op_u64_to_i64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::I64(v.as_u64()? as i64)))
    }

    pub(crate) fn op_u32_to_u64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::U64(v.as_u32()? as u64)))
    }

    pub(crate) fn op_u64_to_u32(&mut self) -> OpResult {
        self.unary(|v| {
            u32::try_from(v.as_u64()?)
                .map(Value::U32)
                .map_err(|_| TrapKind::ConversionError)
        })
    }

    pub(crate) fn op_u32_to_f64(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::F64(v.as_u32()? as f64)))
    }

    pub(crate) fn op_f64_to_u32(&mut self) -> OpResult {
        self.unary(|v| {
            let x = v.as_f64()?;
            if !x.is_finite() {
                return Err(TrapKind::ConversionError);
            }
            let truncated = x.trunc();
            if truncated < 0.0 || truncated > u32::MAX as f64 {
                return Err(TrapKind::ConversionError);
            }
            Ok(Value::U32(truncated as u32))
        })
    }

    pub(crate) fn op_bool_to_i32(&mut self) -> OpResult {
        self.unary(|v| Ok(Value::I32(v.as_bool()? as i32)))
    }

    pub(crate) fn op_i32_to_bool(&mut self) -> OpResult {
        self.unary(|v| match v.as_i32()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            _ => Err(TrapKind::ConversionError),
        })
    }
}

fn div_i32(x: i32, y: i32) -> Result<i32, TrapKind> {
    if y == 0 {
        return Err(TrapKind::DivisionByZero);
    }
    x.checked_div(y).ok_or(TrapKind::ArithmeticOverflow)
}

fn rem_i32(x: i32, y: i32) -> Result<i32, TrapKind> {
    if y == 0 {
        return Err(TrapKind::DivisionByZero);
    }
    x.checked_rem(y).ok_or(TrapKind::ArithmeticOverflow)
}

fn div_i64(x: i64, y: i64) -> Result<i64, TrapKind> {
    if y == 0 {
        return Err(TrapKind::DivisionByZero);
    }
    x.checked_div(y).ok_or(TrapKind::ArithmeticOverflow)
}

fn rem_i64(x: i64, y: i64) -> Result<i64, TrapKind> {
    if y == 0 {
        return Err(TrapKind::DivisionByZero);
    }
    x.checked_rem(y).ok_or(TrapKind::ArithmeticOverflow)
}

fn div_u32(x: u32, y: u32) -> Result<u32, TrapKind> {
    x.checked_div(y).ok_or(TrapKind::DivisionByZero)
}

fn rem_u32(x: u32, y: u32) -> Result<u32, TrapKind> {
    x.checked_rem(y).ok_or(TrapKind::DivisionByZero)
}

fn div_u64(x: u64, y: u64) -> Result<u64, TrapKind> {
    x.checked_div(y).ok_or(TrapKind::DivisionByZero)
}

fn rem_u64(x: u64, y: u64) -> Result<u64, TrapKind> {
    x.checked_rem(y).ok_or(TrapKind::DivisionByZero)
}

fn shift_amount(amount: i32) -> Result<u32, TrapKind> {
    if (0..32).contains(&amount) {
        Ok(amount as u32)
    } else {
        Err(TrapKind::ShiftOutOfRange)
    }
}

/// Kind-dispatching step used by `inc`, `dec` and `add_imm`.
fn step_by(value: Value, delta: i64) -> Result<Value, RuntimeError> {
    let stepped = match value {
        Value::I32(v) => Value::I32(
            v.checked_add(delta as i32)
                .ok_or(TrapKind::ArithmeticOverflow)?,
        ),
        Value::I64(v) => Value::I64(v.checked_add(delta).ok_or(TrapKind::ArithmeticOverflow)?),
        Value::U32(v) => Value::U32(v.wrapping_add_signed(delta as i32)),
        Value::U64(v) => Value::U64(v.wrapping_add_signed(delta)),
        Value::F64(v) => Value::F64(v + delta as f64),
        Value::Nil => return Err(TrapKind::NilDereference.into()),
        _ => return Err(TrapKind::TypeMismatch.into()),
    };

    Ok(stepped)
}
