//! Encoding properties: instruction round-trips and the on-disk chunk
//! format.

use orus_vm::chunk::{Chunk, ChunkCodecError, Constant};
use orus_vm::diagnostic::SourceLoc;

use orus_asm::{Instruction, Opcode, OperandKind};

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

use std::rc::Rc;

/// A well-formed instruction: a real opcode with operand fields masked
/// to what its layout encodes.
#[derive(Debug, Clone)]
struct AnyInstruction(Instruction);

impl Arbitrary for AnyInstruction {
    fn arbitrary(g: &mut Gen) -> Self {
        let op = loop {
            if let Some(op) = Opcode::from_repr(u8::arbitrary(g)) {
                break op;
            }
        };

        let mut instruction = Instruction::new(op);
        let mut reg_slots = [0u8; 4];
        let mut regs = 0;

        for kind in op.operands() {
            match kind {
                OperandKind::Reg => {
                    reg_slots[regs] = u8::arbitrary(g);
                    regs += 1;
                }
                OperandKind::Imm8 => instruction.imm = u8::arbitrary(g) as u16,
                OperandKind::Imm16 => instruction.imm = u16::arbitrary(g),
            }
        }

        instruction.a = reg_slots[0];
        instruction.b = reg_slots[1];
        instruction.c = reg_slots[2];
        instruction.d = reg_slots[3];

        Self(instruction)
    }
}

#[quickcheck]
fn every_instruction_round_trips(instruction: AnyInstruction) -> bool {
    let bytes = instruction.0.to_bytes();

    bytes.len() == instruction.0.size()
        && Instruction::decode(&bytes, 0) == Ok(instruction.0)
}

#[quickcheck]
fn instruction_streams_round_trip(instructions: Vec<AnyInstruction>) -> bool {
    let program: Vec<Instruction> = instructions.into_iter().map(|i| i.0).collect();
    let bytes: Vec<u8> = program.iter().copied().collect();

    Instruction::decode_all(&bytes).as_deref() == Ok(program.as_slice())
}

fn sample_chunk(ints: &[i32], floats: &[f64], strings: &[String], code: &[u8]) -> Chunk {
    let mut chunk = Chunk::new(Rc::from("prop"), Rc::from("prop.orus"));

    for value in ints {
        let _ = chunk.add_constant(Constant::I32(*value));
    }
    for value in floats {
        let _ = chunk.add_constant(Constant::F64(*value));
    }
    for value in strings {
        let _ = chunk.add_constant(Constant::Str(Rc::from(value.as_str())));
    }

    for (offset, byte) in code.iter().enumerate() {
        chunk.push(*byte, SourceLoc::new(offset as u32 + 1, 1));
    }

    chunk
}

#[quickcheck]
fn chunk_codec_round_trips(
    ints: Vec<i32>,
    floats: Vec<f64>,
    strings: Vec<String>,
    code: Vec<u8>,
) -> bool {
    let chunk = sample_chunk(&ints, &floats, &strings, &code);
    let bytes = chunk.to_bytes();

    let Ok(decoded) = Chunk::from_bytes(&bytes) else {
        return false;
    };

    decoded.code() == chunk.code()
        && decoded.constants() == chunk.constants()
        && (0..chunk.len()).all(|offset| decoded.loc_at(offset) == chunk.loc_at(offset))
}

#[quickcheck]
fn chunk_codec_rejects_single_byte_corruption(seed: u8, position: usize) -> bool {
    let chunk = sample_chunk(&[seed as i32, -7], &[1.5], &[String::from("payload")], &[seed, 0x00]);
    let mut bytes = chunk.to_bytes();

    // The minor version is informational and not validated, so a flip
    // there is legitimately accepted.
    let mut position = position % bytes.len();
    if position == 6 || position == 7 {
        position = 0;
    }

    bytes[position] ^= 0x5a;
    Chunk::from_bytes(&bytes).is_err()
}

#[test]
fn version_mismatch_is_reported_as_such() {
    let chunk = sample_chunk(&[1], &[], &[], &[0x00]);
    let mut bytes = chunk.to_bytes();
    bytes[4] ^= 0xff;

    assert!(matches!(
        Chunk::from_bytes(&bytes),
        Err(ChunkCodecError::UnsupportedVersion { .. })
    ));
}
