use crate::{DecodeError, Instruction, Opcode, OperandKind};

use strum::IntoEnumIterator;

fn sample(op: Opcode) -> Instruction {
    // Exercise every operand slot the layout names, with values that
    // detect operand-order mixups.
    let mut instruction = Instruction::new(op);
    let mut regs = [0x11u8, 0x22, 0x33, 0x44].into_iter();

    for kind in op.operands() {
        match kind {
            OperandKind::Reg => {
                let value = regs.next().unwrap();
                if instruction.a == 0 {
                    instruction.a = value;
                } else if instruction.b == 0 {
                    instruction.b = value;
                } else if instruction.c == 0 {
                    instruction.c = value;
                } else {
                    instruction.d = value;
                }
            }
            OperandKind::Imm8 => instruction.imm = 0xab,
            OperandKind::Imm16 => instruction.imm = 0xbeef,
        }
    }

    instruction
}

#[test]
fn opcode_round_trips_through_repr() {
    for op in Opcode::iter() {
        assert_eq!(Some(op), Opcode::from_repr(op as u8));
    }
}

#[test]
fn instruction_round_trips_through_bytes() {
    for op in Opcode::iter() {
        let instruction = sample(op);
        let bytes = instruction.to_bytes();

        assert_eq!(bytes.len(), op.size());

        let decoded = Instruction::decode(&bytes, 0).expect("decode of encoded instruction");
        assert_eq!(instruction, decoded, "{op}");
    }
}

#[test]
fn stream_round_trips() {
    let program: Vec<Instruction> = Opcode::iter().map(sample).collect();
    let bytes: Vec<u8> = program.iter().copied().collect();

    let decoded = Instruction::decode_all(&bytes).expect("decode of encoded stream");
    assert_eq!(program, decoded);
}

#[test]
fn unknown_opcode_is_rejected() {
    let err = Instruction::decode(&[0xfe], 0).unwrap_err();
    assert_eq!(
        err,
        DecodeError::UnknownOpcode {
            byte: 0xfe,
            offset: 0
        }
    );
}

#[test]
fn truncated_operands_are_rejected() {
    let mut bytes = Instruction::a_imm(Opcode::LoadConst, 7, 0x0102).to_bytes();
    bytes.pop();

    let err = Instruction::decode(&bytes, 0).unwrap_err();
    assert_eq!(err, DecodeError::UnexpectedEnd { offset: 0 });
}

#[test]
fn short_jumps_name_their_promotion() {
    assert_eq!(Opcode::JumpShort.promoted(), Some(Opcode::Jump));
    assert_eq!(Opcode::JumpIfShort.promoted(), Some(Opcode::JumpIf));
    assert_eq!(Opcode::JumpIfNotShort.promoted(), Some(Opcode::JumpIfNot));
    assert_eq!(Opcode::LoopShort.promoted(), Some(Opcode::Loop));
    assert_eq!(Opcode::Jump.promoted(), None);
}
