//! Bytecode instruction set of the Orus register VM.
//!
//! One-byte opcodes followed by zero to four operand bytes. The operand
//! layout table ([`Opcode::operands`]) is shared by the interpreter
//! fetch step, the jump patcher and the disassembler, so the encoded
//! and decoded views of a program always agree.

#![warn(missing_docs)]

mod instruction;
mod opcode;

#[cfg(test)]
mod encoding_tests;

pub use instruction::{DecodeError, Instruction};
pub use opcode::{Opcode, OperandKind};

/// A logical register id, addressing the 256-slot register space.
pub type RegisterId = u8;

/// A constant-pool index.
pub type ConstIndex = u16;

/// A jump distance in bytes.
pub type JumpOffset = u16;
