//! Peephole pass over the emitted stream.
//!
//! Fuses the induction-loop tail `inc r; loop back` into
//! `inc_cmp_jump r, limit, back` when the loop header is the strict
//! comparison `lt c, r, limit; jump_if_not c, exit`. The fused form
//! occupies exactly the bytes of the pair it replaces, so no offsets
//! move; patterns that would require motion are left alone.

use crate::chunk::Chunk;

use orus_asm::{Instruction, Opcode};

pub(super) fn fuse(mut chunk: Chunk) -> Chunk {
    let decoded = decode_with_offsets(&chunk);
    let Some(decoded) = decoded else {
        // Undecodable streams are the interpreter's problem to report;
        // the peephole simply declines.
        return chunk;
    };

    let mut rewrites = Vec::new();

    for window in decoded.windows(2) {
        let (inc_at, inc) = window[0];
        let (loop_at, back) = window[1];

        if inc.opcode() != Opcode::Inc || back.opcode() != Opcode::Loop {
            continue;
        }

        let after_loop = loop_at + 3;
        let Some(header) = after_loop.checked_sub(back.imm as usize) else {
            continue;
        };

        let Some((compare, guard)) = decode_header(&chunk, header) else {
            continue;
        };

        // The header must test the fused register strictly against a
        // limit register and branch out on failure.
        let strict = matches!(
            compare.opcode(),
            Opcode::LtI32 | Opcode::LtI64 | Opcode::LtU32 | Opcode::LtU64
        );
        let guards_compare = matches!(
            guard.opcode(),
            Opcode::JumpIfNot | Opcode::JumpIfNotShort
        ) && guard.a == compare.a;

        if !strict || compare.b != inc.a || !guards_compare {
            continue;
        }

        let body_start = header + compare.size() + guard.size();
        let fused_end = inc_at + 5;
        let distance = fused_end - body_start;
        if distance > u16::MAX as usize {
            continue;
        }

        rewrites.push((inc_at, inc.a, compare.c, distance as u16));
    }

    for (at, reg, limit, distance) in rewrites {
        tracing::debug!(at, "induction step fused");

        chunk.set(at, Opcode::IncCmpJump as u8);
        chunk.set(at + 1, reg);
        chunk.set(at + 2, limit);
        let [hi, lo] = distance.to_be_bytes();
        chunk.set(at + 3, hi);
        chunk.set(at + 4, lo);
    }

    chunk
}

fn decode_with_offsets(chunk: &Chunk) -> Option<Vec<(usize, Instruction)>> {
    let code = chunk.code();
    let mut out = Vec::new();
    let mut at = 0;

    while at < code.len() {
        let instruction = Instruction::decode(code, at).ok()?;
        out.push((at, instruction));
        at += instruction.size();
    }

    Some(out)
}

fn decode_header(chunk: &Chunk, header: usize) -> Option<(Instruction, Instruction)> {
    let code = chunk.code();
    let compare = Instruction::decode(code, header).ok()?;
    let guard = Instruction::decode(code, header + compare.size()).ok()?;
    Some((compare, guard))
}
