//! Opcode decode and dispatch.
//!
//! One list maps every opcode to its handler method; the macro expands
//! it into both dispatch strategies so they cannot drift apart: the
//! `match` the switch loop executes, and the 256-entry function-pointer
//! table the computed-dispatch loop indexes.

use crate::error::{Fatal, RuntimeError};
use crate::interpreter::Vm;
use crate::state::ExecuteState;

use orus_asm::{DecodeError, Opcode};

/// Uniform handler signature; each handler fetches its own operands.
pub(super) type Handler = fn(&mut Vm) -> Result<ExecuteState, RuntimeError>;

macro_rules! opcode_handlers {
    ($(($op:ident, $handler:ident)),* $(,)?) => {
        impl Vm {
            /// Switch dispatch: a direct match on the decoded opcode.
            #[inline]
            pub(super) fn execute_opcode(
                &mut self,
                op: Opcode,
            ) -> Result<ExecuteState, RuntimeError> {
                match op {
                    $(Opcode::$op => self.$handler(),)*
                }
            }

            /// Table dispatch: handler pointers indexed by the raw
            /// opcode byte; invalid bytes land on [`Vm::op_invalid`].
            pub(super) fn handler_table() -> [Handler; 256] {
                let mut table: [Handler; 256] = [Vm::op_invalid as Handler; 256];
                $(table[Opcode::$op as usize] = Vm::$handler as Handler;)*
                table
            }
        }
    };
}

opcode_handlers! {
    (Halt, op_halt),
    (LoadConst, op_load_const),
    (LoadConstTyped, op_load_const_typed),
    (LoadNil, op_load_nil),
    (LoadTrue, op_load_true),
    (LoadFalse, op_load_false),
    (Move, op_move),
    (MoveTyped, op_move_typed),
    (Sync, op_sync),
    (LoadGlobal, op_load_global),
    (StoreGlobal, op_store_global),
    (LoadModule, op_load_module),
    (StoreModule, op_store_module),
    (AddI32, op_add_i32),
    (SubI32, op_sub_i32),
    (MulI32, op_mul_i32),
    (DivI32, op_div_i32),
    (ModI32, op_mod_i32),
    (AddI64, op_add_i64),
    (SubI64, op_sub_i64),
    (MulI64, op_mul_i64),
    (DivI64, op_div_i64),
    (ModI64, op_mod_i64),
    (AddU32, op_add_u32),
    (SubU32, op_sub_u32),
    (MulU32, op_mul_u32),
    (DivU32, op_div_u32),
    (ModU32, op_mod_u32),
    (AddU64, op_add_u64),
    (SubU64, op_sub_u64),
    (MulU64, op_mul_u64),
    (DivU64, op_div_u64),
    (ModU64, op_mod_u64),
    (AddF64, op_add_f64),
    (SubF64, op_sub_f64),
    (MulF64, op_mul_f64),
    (DivF64, op_div_f64),
    (ModF64, op_mod_f64),
    (Neg, op_neg),
    (Inc, op_inc),
    (Dec, op_dec),
    (AddI32Typed, op_add_i32_typed),
    (SubI32Typed, op_sub_i32_typed),
    (MulI32Typed, op_mul_i32_typed),
    (DivI32Typed, op_div_i32_typed),
    (ModI32Typed, op_mod_i32_typed),
    (AddI64Typed, op_add_i64_typed),
    (SubI64Typed, op_sub_i64_typed),
    (MulI64Typed, op_mul_i64_typed),
    (DivI64Typed, op_div_i64_typed),
    (ModI64Typed, op_mod_i64_typed),
    (AddU32Typed, op_add_u32_typed),
    (SubU32Typed, op_sub_u32_typed),
    (MulU32Typed, op_mul_u32_typed),
    (DivU32Typed, op_div_u32_typed),
    (ModU32Typed, op_mod_u32_typed),
    (AddU64Typed, op_add_u64_typed),
    (SubU64Typed, op_sub_u64_typed),
    (MulU64Typed, op_mul_u64_typed),
    (DivU64Typed, op_div_u64_typed),
    (ModU64Typed, op_mod_u64_typed),
    (AddF64Typed, op_add_f64_typed),
    (SubF64Typed, op_sub_f64_typed),
    (MulF64Typed, op_mul_f64_typed),
    (DivF64Typed, op_div_f64_typed),
    (ModF64Typed, op_mod_f64_typed),
    (And32, op_and_32),
    (Or32, op_or_32),
    (Xor32, op_xor_32),
    (Not32, op_not_32),
    (Shl32, op_shl_32),
    (Shr32, op_shr_32),
    (Eq, op_eq),
    (Ne, op_ne),
    (LtI32, op_lt_i32),
    (LeI32, op_le_i32),
    (GtI32, op_gt_i32),
    (GeI32, op_ge_i32),
    (LtI64, op_lt_i64),
    (LeI64, op_le_i64),
    (GtI64, op_gt_i64),
    (GeI64, op_ge_i64),
    (LtU32, op_lt_u32),
    (LeU32, op_le_u32),
    (GtU32, op_gt_u32),
    (GeU32, op_ge_u32),
    (LtU64, op_lt_u64),
    (LeU64, op_le_u64),
    (GtU64, op_gt_u64),
    (GeU64, op_ge_u64),
    (LtF64, op_lt_f64),
    (LeF64, op_le_f64),
    (GtF64, op_gt_f64),
    (GeF64, op_ge_f64),
    (AndBool, op_and_bool),
    (OrBool, op_or_bool),
    (NotBool, op_not_bool),
    (I32ToI64, op_i32_to_i64),
    (I64ToI32, op_i64_to_i32),
    (I32ToU32, op_i32_to_u32),
    (U32ToI32, op_u32_to_i32),
    (I32ToF64, op_i32_to_f64),
    (F64ToI32, op_f64_to_i32),
    (I64ToF64, op_i64_to_f64),
    (F64ToI64, op_f64_to_i64),
    (I64ToU64, op_i64_to_u64),
    (U64ToI64, op_u64_to_i64),
    (U32ToU64, op_u32_to_u64),
    (U64ToU32, op_u64_to_u32),
    (U32ToF64, op_u32_to_f64),
    (F64ToU32, op_f64_to_u32),
    (BoolToI32, op_bool_to_i32),
    (I32ToBool, op_i32_to_bool),
    (Concat, op_concat),
    (ToString, op_to_string),
    (MakeArray, op_make_array),
    (ArrayGet, op_array_get),
    (ArraySet, op_array_set),
    (ArrayLen, op_array_len),
    (MakeStruct, op_make_struct),
    (StructGet, op_struct_get),
    (StructSet, op_struct_set),
    (MakeEnum, op_make_enum),
    (EnumTag, op_enum_tag),
    (EnumPayload, op_enum_payload),
    (MakeRange, op_make_range),
    (Jump, op_jump),
    (JumpShort, op_jump_short),
    (JumpIf, op_jump_if),
    (JumpIfShort, op_jump_if_short),
    (JumpIfNot, op_jump_if_not),
    (JumpIfNotShort, op_jump_if_not_short),
    (Loop, op_loop),
    (LoopShort, op_loop_short),
    (Call, op_call),
    (CallNative, op_call_native),
    (TailCall, op_tail_call),
    (Return, op_return),
    (ReturnVoid, op_return_void),
    (Closure, op_closure),
    (GetUpvalue, op_get_upvalue),
    (SetUpvalue, op_set_upvalue),
    (GetIter, op_get_iter),
    (IterNext, op_iter_next),
    (IncCmpJump, op_inc_cmp_jump),
    (AddImm, op_add_imm),
    (PushTry, op_push_try),
    (PopTry, op_pop_try),
    (Raise, op_raise),
    (Print, op_print),
    (PrintMulti, op_print_multi),
    (GcPause, op_gc_pause),
    (GcResume, op_gc_resume),
}

impl Vm {
    /// Fetches, decodes and executes one instruction (switch
    /// strategy).
    pub(super) fn step(&mut self) -> Result<ExecuteState, RuntimeError> {
        self.op_ip = self.ip;
        let byte = self.fetch_u8()?;
        self.profiler.on_instruction();

        let op = Opcode::from_repr(byte).ok_or(RuntimeError::Halt(Fatal::MalformedBytecode(
            DecodeError::UnknownOpcode {
                byte,
                offset: self.op_ip,
            },
        )))?;

        self.execute_opcode(op)
    }

    /// Fetches and executes one instruction through the handler table
    /// (computed dispatch strategy).
    pub(super) fn step_table(&mut self, table: &[Handler; 256]) -> Result<ExecuteState, RuntimeError> {
        self.op_ip = self.ip;
        let byte = self.fetch_u8()?;
        self.profiler.on_instruction();

        table[byte as usize](self)
    }

    /// Table entry for bytes that name no instruction.
    pub(super) fn op_invalid(&mut self) -> Result<ExecuteState, RuntimeError> {
        let byte = self.chunk.code().get(self.op_ip).copied().unwrap_or_default();

        Err(RuntimeError::Halt(Fatal::MalformedBytecode(
            DecodeError::UnknownOpcode {
                byte,
                offset: self.op_ip,
            },
        )))
    }
}
