use thiserror::Error;

use crate::{common::Word, decoder::DecoderError};

/// Interpreter fault kinds. Each aborts the current call frame only: the
/// frame forfeits its remaining gas, pending refunds are discarded and the
/// fault propagates to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow: required {required}, found {found}")]
    StackUnderflow { required: usize, found: usize },
    #[error("Call run out of gas")]
    OutOfGas,
    #[error("Gas amount beyond the 63-bit range")]
    GasOverflow,
    #[error("Memory size overflow: {0} bytes requested")]
    MemoryOverflow(u64),
    #[error("Invalid jump destination")]
    InvalidJump,
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    #[error("Opcode not allowed by chain configuration: {0:#04x}")]
    DisallowedOpcode(u8),
    #[error("State modification from a static call: {0:#04x}")]
    StaticCallViolation(u8),
    #[error("Return data access out of bounds")]
    ReturnDataOutOfBounds,
    #[error("Missing push data")]
    MissingData,
    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: Word, need: Word },
    #[error("Bytecode decoding error: {0}")]
    Decoder(#[from] DecoderError),
}

pub type VmResult<T> = Result<T, VmError>;
