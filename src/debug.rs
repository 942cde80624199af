//! Chunk disassembler.
//!
//! Driven by the same operand-layout table the interpreter fetch step
//! reads, so the printed form always matches what the dispatch loop
//! will execute.

use crate::chunk::{Chunk, Constant};

use orus_asm::{Instruction, Opcode, OperandKind};

use std::fmt::Write as _;

/// Renders a whole chunk: header, instructions, nested functions.
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ({}) ==", chunk.name, chunk.file);

    let mut offset = 0;
    while offset < chunk.len() {
        match disassemble_instruction(chunk, offset) {
            Some((line, size)) => {
                out.push_str(&line);
                out.push('\n');
                offset += size;
            }
            None => {
                let _ = writeln!(out, "{offset:04}  <bad opcode 0x{:02x}>", chunk.get(offset));
                break;
            }
        }
    }

    for constant in chunk.constants() {
        if let Constant::Function(proto) = constant {
            out.push('\n');
            out.push_str(&disassemble_chunk(&proto.chunk));
        }
    }

    out
}

/// Renders one instruction; returns the text and its encoded size.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> Option<(String, usize)> {
    let instruction = Instruction::decode(chunk.code(), offset).ok()?;
    let op = instruction.opcode();
    let loc = chunk.loc_at(offset);

    let mut line = format!("{offset:04}  {:>4}:{:<3} {:12}", loc.line, loc.column, op.mnemonic());

    let mut regs = [instruction.a, instruction.b, instruction.c, instruction.d].into_iter();
    let mut first = true;

    for kind in op.operands() {
        if !first {
            line.push_str(", ");
        } else {
            first = false;
        }

        match kind {
            OperandKind::Reg => {
                let _ = write!(line, "r{}", regs.next().unwrap_or_default());
            }
            OperandKind::Imm8 | OperandKind::Imm16 => {
                let _ = write!(line, "{}", instruction.imm);
            }
        }
    }

    annotate(&mut line, chunk, offset, &instruction, op);

    Some((line, instruction.size()))
}

/// Trailing comment: constant values, jump targets.
fn annotate(line: &mut String, chunk: &Chunk, offset: usize, instruction: &Instruction, op: Opcode) {
    match op {
        Opcode::LoadConst | Opcode::LoadConstTyped | Opcode::Closure => {
            if let Some(constant) = chunk.constant(instruction.imm) {
                let _ = write!(line, "  ; {}", format_constant(constant));
            }
        }
        Opcode::Jump | Opcode::JumpShort | Opcode::JumpIf | Opcode::JumpIfShort
        | Opcode::JumpIfNot | Opcode::JumpIfNotShort | Opcode::PushTry => {
            let target = offset + instruction.size() + instruction.imm as usize;
            let _ = write!(line, "  ; -> {target:04}");
        }
        Opcode::Loop | Opcode::LoopShort | Opcode::IncCmpJump => {
            let end = offset + instruction.size();
            if let Some(target) = end.checked_sub(instruction.imm as usize) {
                let _ = write!(line, "  ; -> {target:04}");
            }
        }
        _ => {}
    }
}

fn format_constant(constant: &Constant) -> String {
    match constant {
        Constant::Nil => "nil".to_string(),
        Constant::Bool(v) => v.to_string(),
        Constant::I32(v) => format!("{v}i32"),
        Constant::I64(v) => format!("{v}i64"),
        Constant::U32(v) => format!("{v}u32"),
        Constant::U64(v) => format!("{v}u64"),
        Constant::F64(v) => format!("{v}f64"),
        Constant::Str(s) => format!("{s:?}"),
        Constant::Function(proto) => format!("<fn {}/{}>", proto.name, proto.arity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::SourceLoc;

    use std::rc::Rc;

    #[test]
    fn round_trips_every_encoded_instruction() {
        let mut chunk = Chunk::new(Rc::from("disasm"), Rc::from("test.orus"));
        let index = chunk.add_constant(Constant::I32(7)).unwrap();

        let program = [
            Instruction::a_imm(Opcode::LoadConst, 192, index),
            Instruction::abc(Opcode::AddI32, 193, 192, 192),
            Instruction::a(Opcode::Print, 193),
            Instruction::new(Opcode::Halt),
        ];

        for instruction in &program {
            for byte in instruction.to_bytes() {
                chunk.push(byte, SourceLoc::new(1, 1));
            }
        }

        let mut offset = 0;
        for instruction in &program {
            let (line, size) = disassemble_instruction(&chunk, offset).expect("decodable");
            assert!(line.contains(instruction.opcode().mnemonic()));
            assert_eq!(size, instruction.size());
            offset += size;
        }

        let listing = disassemble_chunk(&chunk);
        assert!(listing.contains("add.i32"));
        assert!(listing.contains("; 7i32"));
    }
}
