use thiserror::Error;

use crate::opcodes::{Opcode, get_opcode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    #[error("Unexpected end of bytecode after {0} instruction at position {1}")]
    UnexpectedEndOfBytecode(String, usize),
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub offset: usize,
    pub argument: Option<Vec<u8>>,
}

/// Decoded bytecode: the instruction stream, the raw bytes (CODESIZE and
/// CODECOPY read them) and the table of valid jump destinations.
#[derive(Debug, Default)]
pub struct Bytecode {
    pub bytecode: Vec<u8>,
    pub instructions: Vec<Instruction>,
    pub jumptable: Vec<(usize, usize)>,
}

impl Bytecode {
    /// Map a byte offset to an instruction index, but only when the offset
    /// is a designated jump destination (never PUSH payload).
    pub fn resolve_jump(&self, offset: usize) -> Option<usize> {
        let index = self
            .jumptable
            .binary_search_by_key(&offset, |(key, _)| *key)
            .ok()?;
        Some(self.jumptable[index].1)
    }
}

pub struct Decoder;

impl Decoder {
    pub fn decode(code: impl Into<Vec<u8>>) -> Result<Bytecode, DecoderError> {
        let code = code.into();
        let mut instructions = Vec::new();
        let mut jumptable = Vec::new();

        let mut pos = 0;
        while pos < code.len() {
            let opcode = get_opcode(code[pos]);
            let mut instruction = Instruction {
                opcode,
                offset: pos,
                argument: None,
            };

            // JUMPDEST opcode
            if opcode.code == 0x5b {
                jumptable.push((pos, instructions.len()));
            }

            pos += 1; // Move past the opcode byte

            let push_bytes = opcode.push_width();
            if push_bytes > 0 {
                let start = pos;
                let end = pos + push_bytes;

                if end > code.len() {
                    return Err(DecoderError::UnexpectedEndOfBytecode(
                        opcode.name.to_string(),
                        pos,
                    ));
                }

                instruction.argument = Some(code[start..end].to_vec());
                pos = end;
            }

            instructions.push(instruction);
        }

        Ok(Bytecode {
            bytecode: code,
            instructions,
            jumptable,
        })
    }
}
