use i256::I256;

use crate::{
    common::{Word, address::Address, call::Call, hash},
    config::{ChainConfig, NewAccountPolicy},
    decoder::{Bytecode, Decoder},
    error::{VmError, VmResult},
    gas::{self, GasMeter},
    memory::Memory,
    opcodes::Opcode,
    precompiles,
    repository::Repository,
    stack::Stack,
    summary::{InternalTransaction, InternalTransferData, LogEntry, TouchedStorageEntry},
    tracer::VmObserver,
};

pub const CALL_DEPTH_LIMIT: usize = 1024;

/// Undo record for one repository write. A failing frame restores its
/// writes in reverse order; a succeeding frame hands them to its caller.
#[derive(Debug)]
enum WriteRecord {
    Storage {
        address: Address,
        key: Word,
        prior: Word,
    },
    Balance {
        address: Address,
        prior: Word,
    },
    Nonce {
        address: Address,
        prior: Word,
    },
    Code {
        address: Address,
    },
    Created {
        address: Address,
    },
}

/// Everything a frame did besides stack/memory churn: emitted logs,
/// balance movements, nested call records, the touched-storage set,
/// accounts scheduled for deletion and the repository undo log.
#[derive(Debug, Default)]
pub struct Effects {
    pub logs: Vec<LogEntry>,
    pub transfers: Vec<InternalTransferData>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub touched: Vec<TouchedStorageEntry>,
    pub deleted: Vec<Address>,
    writes: Vec<WriteRecord>,
}

impl Effects {
    pub fn record_storage(&mut self, repo: &dyn Repository, address: &Address, key: Word) {
        self.writes.push(WriteRecord::Storage {
            address: *address,
            key,
            prior: repo.storage(address, &key),
        });
    }

    pub fn record_balance(&mut self, repo: &dyn Repository, address: &Address) {
        self.writes.push(WriteRecord::Balance {
            address: *address,
            prior: repo.balance(address),
        });
    }

    pub fn record_nonce(&mut self, repo: &dyn Repository, address: &Address) {
        self.writes.push(WriteRecord::Nonce {
            address: *address,
            prior: repo.nonce(address),
        });
    }

    pub fn record_code(&mut self, address: &Address) {
        self.writes.push(WriteRecord::Code { address: *address });
    }

    pub fn record_created(&mut self, address: &Address) {
        self.writes.push(WriteRecord::Created { address: *address });
    }

    /// Merge a successful child frame's effects into this frame.
    pub fn absorb(&mut self, mut child: Effects) {
        self.logs.append(&mut child.logs);
        self.transfers.append(&mut child.transfers);
        self.internal_transactions
            .append(&mut child.internal_transactions);
        self.touched.append(&mut child.touched);
        self.deleted.append(&mut child.deleted);
        self.writes.append(&mut child.writes);
    }

    /// Undo every repository write this frame performed and drop its
    /// recorded side effects.
    pub fn unwind(&mut self, repo: &mut dyn Repository) {
        for write in self.writes.drain(..).rev() {
            match write {
                WriteRecord::Storage {
                    address,
                    key,
                    prior,
                } => repo.set_storage(&address, key, prior),
                WriteRecord::Balance { address, prior } => repo.set_balance(&address, prior),
                WriteRecord::Nonce { address, prior } => repo.set_nonce(&address, prior),
                WriteRecord::Code { address } => repo.clear_code(&address),
                WriteRecord::Created { address } => repo.delete_account(&address),
            }
        }
        self.logs.clear();
        self.transfers.clear();
        self.internal_transactions.clear();
        self.touched.clear();
        self.deleted.clear();
    }
}

/// One call frame: program counter, stack, memory, its own gas meter,
/// the addresses and value of the message, and the side effects it has
/// accumulated so far.
pub struct Frame {
    pub pc: usize,
    pub stack: Stack,
    pub memory: Memory,
    pub gas: GasMeter,
    pub depth: usize,
    pub origin: Address,
    pub caller: Address,
    pub owner: Address,
    pub value: Word,
    pub input: Vec<u8>,
    pub gas_price: Word,
    pub is_static: bool,
    pub stopped: bool,
    pub reverted: bool,
    pub output: Vec<u8>,
    pub ret_buf: Vec<u8>,
    pub effects: Effects,
}

impl Frame {
    pub fn new(call: &Call, depth: usize) -> Self {
        Self {
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            gas: GasMeter::new(call.gas),
            depth,
            origin: call.origin,
            caller: call.from,
            owner: call.to,
            value: call.value,
            input: call.data.clone(),
            gas_price: call.gas_price,
            is_static: false,
            stopped: false,
            reverted: false,
            output: vec![],
            ret_buf: vec![],
            effects: Effects::default(),
        }
    }

    pub fn with_owner(mut self, owner: Address) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }
}

fn word_to_usize(word: &Word) -> VmResult<usize> {
    word.as_usize_checked().ok_or(VmError::GasOverflow)
}

/// Zero-padded read used by the copy opcodes: bytes past the end of the
/// source read as zero, as does an offset beyond any addressable range.
fn padded_slice(source: &[u8], offset: &Word, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if let Some(offset) = offset.as_usize_checked() {
        if offset < source.len() {
            let end = (offset + len).min(source.len());
            out[..end - offset].copy_from_slice(&source[offset..end]);
        }
    }
    out
}

fn signed(word: &Word) -> I256 {
    I256::from_be_bytes(word.to_be_bytes())
}

fn unsigned(value: &I256) -> Word {
    Word::from_bytes(&value.to_be_bytes())
}

/// The fetch-validate-charge-execute machine. One instance drives a whole
/// transaction: nested calls run through the same interpreter with fresh
/// frames.
pub struct Interpreter {
    config: ChainConfig,
    observers: Vec<Box<dyn VmObserver>>,
}

impl Interpreter {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            observers: vec![],
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn VmObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Run the frame to completion. A fault forfeits the frame's
    /// remaining gas, discards its pending refunds, stops the frame and
    /// is handed back to the caller.
    pub fn play(
        &mut self,
        code: &Bytecode,
        frame: &mut Frame,
        repo: &mut dyn Repository,
    ) -> VmResult<()> {
        for observer in &mut self.observers {
            observer.frame_start(frame);
        }

        let result = self.run(code, frame, repo);
        if let Err(fault) = &result {
            tracing::warn!(fault = %fault, depth = frame.depth, "frame halted");
            frame.gas.consume_all();
            frame.gas.reset_refund();
            frame.stopped = true;
            frame.reverted = true;
        }

        for observer in &mut self.observers {
            observer.frame_end(frame);
        }
        result
    }

    fn run(&mut self, code: &Bytecode, frame: &mut Frame, repo: &mut dyn Repository) -> VmResult<()> {
        while !frame.stopped {
            if frame.pc >= code.instructions.len() {
                frame.stopped = true;
                break;
            }
            self.step(code, frame, repo)?;
        }
        Ok(())
    }

    /// One instruction: decode, gate by configuration, validate the stack
    /// against the opcode table, charge the full cost, then apply the
    /// effect. Nothing is mutated before the charge succeeds.
    pub fn step(
        &mut self,
        code: &Bytecode,
        frame: &mut Frame,
        repo: &mut dyn Repository,
    ) -> VmResult<()> {
        let instruction = &code.instructions[frame.pc];
        let op = instruction.opcode;

        if op.is_undefined() {
            return Err(VmError::InvalidOpcode(op.code));
        }
        if !self.config.allows(&op) {
            return Err(VmError::DisallowedOpcode(op.code));
        }
        frame.stack.require(op.require as usize)?;
        frame.stack.verify_room(op.require as usize, op.ret as usize)?;
        self.check_static(&op, frame)?;

        for observer in &mut self.observers {
            observer.before_step(frame, &op);
        }

        let (cost, forwarded) = self.instruction_cost(&op, frame, repo)?;
        frame.gas.charge(cost)?;

        self.execute(code, frame, repo, &op, instruction.argument.as_deref(), instruction.offset, forwarded)
    }

    fn check_static(&self, op: &Opcode, frame: &Frame) -> VmResult<()> {
        if !frame.is_static {
            return Ok(());
        }
        match op.code {
            0x55 | 0xa0..=0xa4 | 0xf0 | 0xf5 | 0xff => Err(VmError::StaticCallViolation(op.code)),
            0xf1 => {
                if !frame.stack.peek(2)?.is_zero() {
                    Err(VmError::StaticCallViolation(op.code))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Full cost of the instruction about to run: static tier plus the
    /// dynamic parts computed from stack peeks, current memory size and
    /// repository state. For the call family this also resolves how much
    /// gas is forwarded to the callee.
    fn instruction_cost(
        &self,
        op: &Opcode,
        frame: &mut Frame,
        repo: &mut dyn Repository,
    ) -> VmResult<(u64, Option<u64>)> {
        let schedule = &self.config.schedule;
        let old_size = frame.memory.size();
        let mut cost = schedule.tier_cost(op.tier);
        let mut forwarded = None;

        match op.code {
            // EXP
            0x0a => {
                cost = gas::exp_cost(schedule, &frame.stack.peek(1)?);
            }
            // SHA3
            0x20 => {
                let size = frame.stack.peek(1)?;
                let needed = gas::mem_needed(frame.stack.peek(0)?, size)?;
                let size = size.as_u64_checked().unwrap_or(0);
                cost = gas::sha3_cost(schedule, size)
                    + gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // BALANCE
            0x31 => {
                cost = schedule.balance;
            }
            // CALLDATACOPY | CODECOPY | RETURNDATACOPY
            0x37 | 0x39 | 0x3e => {
                let size = frame.stack.peek(2)?;
                let needed = gas::mem_needed(frame.stack.peek(0)?, size)?;
                let copy = size.as_u64_checked().unwrap_or(0);
                cost += gas::memory_expansion(schedule, old_size, needed, copy)?;
            }
            // EXTCODESIZE
            0x3b => {
                cost = schedule.ext_code_size;
            }
            // EXTCODECOPY
            0x3c => {
                let size = frame.stack.peek(3)?;
                let needed = gas::mem_needed(frame.stack.peek(1)?, size)?;
                let copy = size.as_u64_checked().unwrap_or(0);
                cost = schedule.ext_code_copy
                    + gas::memory_expansion(schedule, old_size, needed, copy)?;
            }
            // EXTCODEHASH
            0x3f => {
                cost = schedule.ext_code_hash;
            }
            // MLOAD | MSTORE
            0x51 | 0x52 => {
                let needed = gas::mem_needed(frame.stack.peek(0)?, Word::from(32u64))?;
                cost += gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // MSTORE8
            0x53 => {
                let needed = gas::mem_needed(frame.stack.peek(0)?, Word::one())?;
                cost += gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // SLOAD
            0x54 => {
                cost = schedule.sload;
            }
            // SSTORE: policy-dependent cost, refunds scheduled here
            0x55 => {
                let key = frame.stack.peek(0)?;
                let new = frame.stack.peek(1)?;
                let current = repo.storage(&frame.owner, &key);
                let original = repo.original_storage(&frame.owner, &key);
                let (write_cost, refund) = gas::storage_write_cost(
                    schedule,
                    self.config.storage_policy,
                    current,
                    original,
                    new,
                );
                cost = write_cost;
                frame.gas.add_refund(refund);
            }
            // JUMPDEST
            0x5b => {
                cost = schedule.jumpdest;
            }
            // LOG0..LOG4
            0xa0..=0xa4 => {
                let size = frame.stack.peek(1)?;
                let needed = gas::mem_needed(frame.stack.peek(0)?, size)?;
                let size = size.as_u64_checked().unwrap_or(0);
                cost = gas::log_cost(schedule, op.n as usize, size)
                    + gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // CREATE
            0xf0 => {
                let needed = gas::mem_needed(frame.stack.peek(1)?, frame.stack.peek(2)?)?;
                cost = schedule.create + gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // CREATE2 pays for hashing the initialization code
            0xf5 => {
                let size = frame.stack.peek(2)?;
                let needed = gas::mem_needed(frame.stack.peek(1)?, size)?;
                let size = size.as_u64_checked().unwrap_or(0);
                cost = schedule.create
                    + gas::memory_expansion(schedule, old_size, needed, 0)?
                    + schedule.sha3_word * size.div_ceil(32);
            }
            // CALL | CALLCODE | DELEGATECALL | STATICCALL
            0xf1 | 0xf2 | 0xf4 | 0xfa => {
                cost = schedule.call;
                let requested = frame.stack.peek(0)?;
                let target = Address::from(&frame.stack.peek(1)?);
                let value = if op.call_has_value() {
                    frame.stack.peek(2)?
                } else {
                    Word::zero()
                };

                if op.code == 0xf1 {
                    let surcharge = match self.config.new_account_policy {
                        NewAccountPolicy::Existence => !repo.exists(&target),
                        NewAccountPolicy::DeadOnValue => {
                            repo.is_empty_account(&target) && !value.is_zero()
                        }
                    };
                    if surcharge {
                        cost += schedule.new_account;
                    }
                }
                if !value.is_zero() {
                    cost += schedule.call_value;
                }

                let off = if op.call_has_value() { 3 } else { 2 };
                let in_needed =
                    gas::mem_needed(frame.stack.peek(off)?, frame.stack.peek(off + 1)?)?;
                let out_needed =
                    gas::mem_needed(frame.stack.peek(off + 2)?, frame.stack.peek(off + 3)?)?;
                cost += gas::memory_expansion(schedule, old_size, in_needed.max(out_needed), 0)?;

                if cost > frame.gas.remaining() {
                    return Err(VmError::OutOfGas);
                }
                let adjusted = gas::call_gas(requested, frame.gas.remaining() - cost);
                cost += adjusted;
                forwarded = Some(adjusted);
            }
            // RETURN | REVERT
            0xf3 | 0xfd => {
                let needed = gas::mem_needed(frame.stack.peek(0)?, frame.stack.peek(1)?)?;
                cost += gas::memory_expansion(schedule, old_size, needed, 0)?;
            }
            // SUICIDE
            0xff => {
                cost = schedule.suicide;
                let beneficiary = Address::from(&frame.stack.peek(0)?);
                let surcharge = match self.config.new_account_policy {
                    NewAccountPolicy::Existence => !repo.exists(&beneficiary),
                    NewAccountPolicy::DeadOnValue => {
                        repo.is_empty_account(&beneficiary)
                            && !repo.balance(&frame.owner).is_zero()
                    }
                };
                if surcharge {
                    cost += schedule.new_account_suicide;
                }
            }
            _ => {}
        }

        Ok((cost, forwarded))
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        code: &Bytecode,
        frame: &mut Frame,
        repo: &mut dyn Repository,
        op: &Opcode,
        argument: Option<&[u8]>,
        instruction_offset: usize,
        forwarded: Option<u64>,
    ) -> VmResult<()> {
        let mut pc_increment = true;

        match op.code {
            // STOP
            0x00 => {
                frame.stopped = true;
                frame.reverted = false;
                frame.output.clear();
            }
            // ADD
            0x01 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a + b)?;
            }
            // MUL
            0x02 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a * b)?;
            }
            // SUB
            0x03 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a - b)?;
            }
            // DIV
            0x04 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let ret = if b.is_zero() { Word::zero() } else { a / b };
                frame.stack.push(ret)?;
            }
            // SDIV
            0x05 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let a_signed = signed(&a);
                let b_signed = signed(&b);
                let ret = if b.is_zero() {
                    I256::from(0)
                } else if a_signed == I256::MIN && b_signed == I256::from(-1) {
                    I256::MIN
                } else {
                    a_signed / b_signed
                };
                frame.stack.push(unsigned(&ret))?;
            }
            // MOD
            0x06 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let ret = if b.is_zero() { Word::zero() } else { a % b };
                frame.stack.push(ret)?;
            }
            // SMOD
            0x07 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let ret = if b.is_zero() {
                    I256::from(0)
                } else {
                    signed(&a) % signed(&b)
                };
                frame.stack.push(unsigned(&ret))?;
            }
            // ADDMOD
            0x08 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let m = frame.stack.pop()?;
                frame.stack.push(a.add_modulo(&b, &m))?;
            }
            // MULMOD
            0x09 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let m = frame.stack.pop()?;
                frame.stack.push(a.mul_modulo(&b, &m))?;
            }
            // EXP
            0x0a => {
                let base = frame.stack.pop()?;
                let exponent = frame.stack.pop()?;
                frame.stack.push(base.pow(exponent))?;
            }
            // SIGNEXTEND
            0x0b => {
                let k = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let ret = if k < Word::from(32u64) {
                    value.sign_extend(k.as_usize())
                } else {
                    value
                };
                frame.stack.push(ret)?;
            }
            // LT
            0x10 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame
                    .stack
                    .push(if a < b { Word::one() } else { Word::zero() })?;
            }
            // GT
            0x11 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame
                    .stack
                    .push(if a > b { Word::one() } else { Word::zero() })?;
            }
            // SLT
            0x12 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(if signed(&a) < signed(&b) {
                    Word::one()
                } else {
                    Word::zero()
                })?;
            }
            // SGT
            0x13 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(if signed(&a) > signed(&b) {
                    Word::one()
                } else {
                    Word::zero()
                })?;
            }
            // EQ
            0x14 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame
                    .stack
                    .push(if a == b { Word::one() } else { Word::zero() })?;
            }
            // ISZERO
            0x15 => {
                let a = frame.stack.pop()?;
                frame.stack.push(if a.is_zero() {
                    Word::one()
                } else {
                    Word::zero()
                })?;
            }
            // AND
            0x16 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a & b)?;
            }
            // OR
            0x17 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a | b)?;
            }
            // XOR
            0x18 => {
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a ^ b)?;
            }
            // NOT
            0x19 => {
                let a = frame.stack.pop()?;
                frame.stack.push(!a)?;
            }
            // BYTE
            0x1a => {
                let index = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let ret = if index < Word::from(32u64) {
                    Word::from(value.byte(index.as_usize()))
                } else {
                    Word::zero()
                };
                frame.stack.push(ret)?;
            }
            // SHL
            0x1b => {
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let ret = if shift > Word::from(255u64) {
                    Word::zero()
                } else {
                    value << shift.as_usize()
                };
                frame.stack.push(ret)?;
            }
            // SHR
            0x1c => {
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let ret = if shift > Word::from(255u64) {
                    Word::zero()
                } else {
                    value >> shift.as_usize()
                };
                frame.stack.push(ret)?;
            }
            // SAR
            0x1d => {
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let value_signed = signed(&value);
                let negative = value_signed < I256::from(0);
                let ret = if shift > Word::from(255u64) {
                    if negative { Word::max() } else { Word::zero() }
                } else {
                    unsigned(&(value_signed >> shift.as_usize()))
                };
                frame.stack.push(ret)?;
            }
            // SHA3
            0x20 => {
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                let data = if size.is_zero() {
                    vec![]
                } else {
                    let offset = word_to_usize(&offset)?;
                    let size = word_to_usize(&size)?;
                    frame.memory.expand(offset, size);
                    frame.memory.load_slice(offset, size)
                };
                frame.stack.push(Word::from_bytes(&hash::keccak256(&data)))?;
            }
            // ADDRESS
            0x30 => {
                frame.stack.push((&frame.owner).into())?;
            }
            // BALANCE
            0x31 => {
                let address = Address::from(&frame.stack.pop()?);
                frame.stack.push(repo.balance(&address))?;
            }
            // ORIGIN
            0x32 => {
                frame.stack.push((&frame.origin).into())?;
            }
            // CALLER
            0x33 => {
                frame.stack.push((&frame.caller).into())?;
            }
            // CALLVALUE
            0x34 => {
                frame.stack.push(frame.value)?;
            }
            // CALLDATALOAD
            0x35 => {
                let offset = frame.stack.pop()?;
                let chunk = padded_slice(&frame.input, &offset, 32);
                frame.stack.push(Word::from_bytes(&chunk))?;
            }
            // CALLDATASIZE
            0x36 => {
                frame.stack.push(Word::from(frame.input.len()))?;
            }
            // CALLDATACOPY
            0x37 => {
                let dest = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                if !size.is_zero() {
                    let dest = word_to_usize(&dest)?;
                    let size = word_to_usize(&size)?;
                    let data = padded_slice(&frame.input, &offset, size);
                    frame.memory.store_slice(dest, &data);
                }
            }
            // CODESIZE
            0x38 => {
                frame.stack.push(Word::from(code.bytecode.len()))?;
            }
            // CODECOPY
            0x39 => {
                let dest = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                if !size.is_zero() {
                    let dest = word_to_usize(&dest)?;
                    let size = word_to_usize(&size)?;
                    let data = padded_slice(&code.bytecode, &offset, size);
                    frame.memory.store_slice(dest, &data);
                }
            }
            // GASPRICE
            0x3a => {
                frame.stack.push(frame.gas_price)?;
            }
            // EXTCODESIZE
            0x3b => {
                let address = Address::from(&frame.stack.pop()?);
                frame.stack.push(Word::from(repo.code(&address).len()))?;
            }
            // EXTCODECOPY
            0x3c => {
                let address = Address::from(&frame.stack.pop()?);
                let dest = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                if !size.is_zero() {
                    let dest = word_to_usize(&dest)?;
                    let size = word_to_usize(&size)?;
                    let data = padded_slice(&repo.code(&address), &offset, size);
                    frame.memory.store_slice(dest, &data);
                }
            }
            // RETURNDATASIZE
            0x3d => {
                frame.stack.push(Word::from(frame.ret_buf.len()))?;
            }
            // RETURNDATACOPY
            0x3e => {
                let dest = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                let offset = offset
                    .as_usize_checked()
                    .ok_or(VmError::ReturnDataOutOfBounds)?;
                let size_usize = word_to_usize(&size)?;
                if offset + size_usize > frame.ret_buf.len() {
                    return Err(VmError::ReturnDataOutOfBounds);
                }
                if size_usize > 0 {
                    let dest = word_to_usize(&dest)?;
                    let data = frame.ret_buf[offset..offset + size_usize].to_vec();
                    frame.memory.store_slice(dest, &data);
                }
            }
            // EXTCODEHASH
            0x3f => {
                let address = Address::from(&frame.stack.pop()?);
                let ret = if !repo.exists(&address) {
                    Word::zero()
                } else if repo.code(&address).is_empty() {
                    Word::from_bytes(&hash::empty())
                } else {
                    repo.code_hash(&address)
                };
                frame.stack.push(ret)?;
            }
            // POP
            0x50 => {
                frame.stack.pop()?;
            }
            // MLOAD
            0x51 => {
                let offset = word_to_usize(&frame.stack.pop()?)?;
                frame.memory.expand(offset, 32);
                let value = frame.memory.load_word(offset);
                frame.stack.push(value)?;
            }
            // MSTORE
            0x52 => {
                let offset = word_to_usize(&frame.stack.pop()?)?;
                let value = frame.stack.pop()?;
                frame.memory.store_word(offset, &value);
            }
            // MSTORE8
            0x53 => {
                let offset = word_to_usize(&frame.stack.pop()?)?;
                let value = frame.stack.pop()?;
                frame.memory.store_byte(offset, value.byte(31));
            }
            // SLOAD
            0x54 => {
                let key = frame.stack.pop()?;
                let value = repo.storage(&frame.owner, &key);
                frame.stack.push(value)?;
                frame.effects.touched.push(TouchedStorageEntry {
                    key,
                    value,
                    changed: false,
                });
            }
            // SSTORE
            0x55 => {
                let key = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                frame.effects.record_storage(repo, &frame.owner, key);
                repo.set_storage(&frame.owner, key, value);
                frame.effects.touched.push(TouchedStorageEntry {
                    key,
                    value,
                    changed: true,
                });
            }
            // JUMP
            0x56 => {
                let dest = frame.stack.pop()?;
                frame.pc = self.jump_target(code, &dest)?;
                pc_increment = false;
            }
            // JUMPI
            0x57 => {
                let dest = frame.stack.pop()?;
                let cond = frame.stack.pop()?;
                if !cond.is_zero() {
                    frame.pc = self.jump_target(code, &dest)?;
                    pc_increment = false;
                }
            }
            // PC
            0x58 => {
                frame.stack.push(Word::from(instruction_offset))?;
            }
            // MSIZE
            0x59 => {
                frame.stack.push(Word::from(frame.memory.size()))?;
            }
            // GAS
            0x5a => {
                frame.stack.push(Word::from(frame.gas.remaining()))?;
            }
            // JUMPDEST: noop, a valid destination for JUMP/JUMPI
            0x5b => {}
            // PUSH0
            0x5f => {
                frame.stack.push(Word::zero())?;
            }
            // PUSH1..PUSH32
            0x60..=0x7f => {
                let arg = argument.ok_or(VmError::MissingData)?;
                frame.stack.push(Word::from_bytes(arg))?;
            }
            // DUP1..DUP16
            0x80..=0x8f => {
                frame.stack.dup(op.n as usize)?;
            }
            // SWAP1..SWAP16
            0x90..=0x9f => {
                frame.stack.swap(op.n as usize)?;
            }
            // LOG0..LOG4
            0xa0..=0xa4 => {
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                let mut topics = Vec::with_capacity(op.n as usize);
                for _ in 0..op.n {
                    topics.push(frame.stack.pop()?);
                }
                let data = if size.is_zero() {
                    vec![]
                } else {
                    let offset = word_to_usize(&offset)?;
                    let size = word_to_usize(&size)?;
                    frame.memory.expand(offset, size);
                    frame.memory.load_slice(offset, size)
                };
                frame.effects.logs.push(LogEntry {
                    address: frame.owner,
                    topics,
                    data,
                });
            }
            // CREATE | CREATE2
            0xf0 | 0xf5 => {
                self.do_create(frame, repo, op)?;
            }
            // CALL | CALLCODE | DELEGATECALL | STATICCALL
            0xf1 | 0xf2 | 0xf4 | 0xfa => {
                self.do_call(frame, repo, op, forwarded.unwrap_or(0))?;
            }
            // RETURN | REVERT
            0xf3 | 0xfd => {
                let offset = frame.stack.pop()?;
                let size = frame.stack.pop()?;
                if size.is_zero() {
                    frame.output.clear();
                } else {
                    let offset = word_to_usize(&offset)?;
                    let size = word_to_usize(&size)?;
                    frame.memory.expand(offset, size);
                    frame.output = frame.memory.load_slice(offset, size);
                }
                frame.stopped = true;
                frame.reverted = op.code == 0xfd;
            }
            // INVALID
            0xfe => {
                return Err(VmError::InvalidOpcode(op.code));
            }
            // SUICIDE
            0xff => {
                let beneficiary = Address::from(&frame.stack.pop()?);
                let balance = repo.balance(&frame.owner);
                frame.effects.record_balance(repo, &frame.owner);
                frame.effects.record_balance(repo, &beneficiary);
                repo.sub_balance(&frame.owner, balance);
                repo.add_balance(&beneficiary, balance);
                frame.effects.transfers.push(InternalTransferData {
                    from: frame.owner,
                    to: beneficiary,
                    value: balance,
                });
                frame.effects.deleted.push(frame.owner);
                frame.stopped = true;
                frame.reverted = false;
            }
            _ => {
                return Err(VmError::InvalidOpcode(op.code));
            }
        }

        if pc_increment {
            frame.pc += 1;
        }
        Ok(())
    }

    fn jump_target(&self, code: &Bytecode, dest: &Word) -> VmResult<usize> {
        let dest = dest.as_usize_checked().ok_or(VmError::InvalidJump)?;
        code.resolve_jump(dest).ok_or(VmError::InvalidJump)
    }

    pub(crate) fn transfer_value(
        effects: &mut Effects,
        repo: &mut dyn Repository,
        from: &Address,
        to: &Address,
        value: Word,
    ) -> VmResult<()> {
        let have = repo.balance(from);
        if have < value {
            return Err(VmError::InsufficientBalance { have, need: value });
        }
        effects.record_balance(repo, from);
        effects.record_balance(repo, to);
        repo.sub_balance(from, value);
        repo.add_balance(to, value);
        effects.transfers.push(InternalTransferData {
            from: *from,
            to: *to,
            value,
        });
        Ok(())
    }

    fn record_internal(
        frame: &mut Frame,
        op: &Opcode,
        to: &Address,
        value: Word,
        data: Vec<u8>,
        rejected: bool,
    ) {
        let index = frame.effects.internal_transactions.len();
        frame.effects.internal_transactions.push(InternalTransaction {
            depth: frame.depth + 1,
            index,
            note: op.name(),
            from: frame.owner,
            to: *to,
            value,
            data,
            rejected,
        });
    }

    /// CALL/CALLCODE/DELEGATECALL/STATICCALL. A failing callee never
    /// faults the caller: it signals failure as a zero on the caller's
    /// stack and its writes are undone, while the gas it burned stays
    /// burned.
    fn do_call(
        &mut self,
        frame: &mut Frame,
        repo: &mut dyn Repository,
        op: &Opcode,
        forwarded: u64,
    ) -> VmResult<()> {
        let _requested = frame.stack.pop()?;
        let target = Address::from(&frame.stack.pop()?);
        let value = if op.call_has_value() {
            frame.stack.pop()?
        } else {
            Word::zero()
        };
        let in_offset = frame.stack.pop()?;
        let in_size = frame.stack.pop()?;
        let out_offset = frame.stack.pop()?;
        let out_size = frame.stack.pop()?;

        let input = if in_size.is_zero() {
            vec![]
        } else {
            let offset = word_to_usize(&in_offset)?;
            let size = word_to_usize(&in_size)?;
            frame.memory.expand(offset, size);
            frame.memory.load_slice(offset, size)
        };
        let out_offset = if out_size.is_zero() {
            0
        } else {
            let offset = word_to_usize(&out_offset)?;
            let size = word_to_usize(&out_size)?;
            frame.memory.expand(offset, size);
            offset
        };
        let out_size = out_size.as_usize_checked().unwrap_or(0);

        // a nonzero value tops the callee budget up with the stipend
        let mut callee_gas = forwarded;
        if !value.is_zero() {
            callee_gas += self.config.schedule.call_stipend;
        }

        // depth overflow aborts only this sub-call
        if frame.depth + 1 > CALL_DEPTH_LIMIT {
            frame.gas.credit(callee_gas);
            Self::record_internal(frame, op, &target, value, input, true);
            frame.stack.push(Word::zero())?;
            return Ok(());
        }

        // the owner must hold the transferred value
        if op.call_has_value() && !value.is_zero() && repo.balance(&frame.owner) < value {
            frame.gas.credit(callee_gas);
            Self::record_internal(frame, op, &target, value, input, true);
            frame.stack.push(Word::zero())?;
            return Ok(());
        }

        // precompiled contracts short-circuit without a new frame
        if precompiles::is_precompile(&target) {
            let cost = precompiles::gas_cost(&target, &input);
            if cost > callee_gas {
                Self::record_internal(frame, op, &target, value, input, true);
                frame.stack.push(Word::zero())?;
                return Ok(());
            }
            if op.code == 0xf1 && !value.is_zero() {
                Self::transfer_value(&mut frame.effects, repo, &frame.owner, &target, value)?;
            }
            let output = precompiles::execute(&target, &input);
            frame.gas.credit(callee_gas - cost);
            let n = output.len().min(out_size);
            if n > 0 {
                frame.memory.store_slice(out_offset, &output[..n]);
            }
            Self::record_internal(frame, op, &target, value, input, false);
            frame.ret_buf = output;
            frame.stack.push(Word::one())?;
            return Ok(());
        }

        // resolve execution context per call kind
        let owner = match op.code {
            0xf2 | 0xf4 => frame.owner, // run foreign code in our own storage
            _ => target,
        };
        let caller = if op.code == 0xf4 {
            frame.caller
        } else {
            frame.owner
        };
        let child_value = if op.code == 0xf4 { frame.value } else { value };

        let child_code = match Decoder::decode(repo.code(&target)) {
            Ok(code) => code,
            Err(fault) => {
                tracing::warn!(fault = %fault, target = %target, "callee code undecodable");
                Self::record_internal(frame, op, &target, value, input, true);
                frame.stack.push(Word::zero())?;
                return Ok(());
            }
        };

        let call = Call {
            data: input.clone(),
            value: child_value,
            origin: frame.origin,
            from: caller,
            to: owner,
            gas: callee_gas,
            gas_price: frame.gas_price,
        };
        let mut child = Frame::new(&call, frame.depth + 1)
            .with_static(frame.is_static || op.code == 0xfa);

        // the value moves inside the child effects so a failing callee
        // takes the transfer down with it
        if op.code == 0xf1 && !value.is_zero() {
            Self::transfer_value(&mut child.effects, repo, &frame.owner, &target, value)?;
        }

        let result = self.play(&child_code, &mut child, repo);
        let failed = result.is_err() || child.reverted;
        Self::record_internal(frame, op, &target, value, input, failed);

        match result {
            Ok(()) if !child.reverted => {
                frame.gas.credit(child.gas.remaining());
                frame.gas.add_refund(child.gas.refund());
                let n = child.output.len().min(out_size);
                if n > 0 {
                    frame.memory.store_slice(out_offset, &child.output[..n]);
                }
                frame.ret_buf = child.output;
                frame.effects.absorb(std::mem::take(&mut child.effects));
                frame.stack.push(Word::one())?;
            }
            Ok(()) => {
                // explicit revert: unspent gas comes back, writes do not
                frame.gas.credit(child.gas.remaining());
                child.effects.unwind(repo);
                let n = child.output.len().min(out_size);
                if n > 0 {
                    frame.memory.store_slice(out_offset, &child.output[..n]);
                }
                frame.ret_buf = child.output;
                frame.stack.push(Word::zero())?;
            }
            Err(_) => {
                // fault: the callee burned everything it was given
                child.effects.unwind(repo);
                frame.ret_buf.clear();
                frame.stack.push(Word::zero())?;
            }
        }
        Ok(())
    }

    /// CREATE/CREATE2: run the initialization code in a fresh frame and
    /// install its return bytes as the new account's code. Failure
    /// surfaces as a zero address on the creator's stack.
    fn do_create(
        &mut self,
        frame: &mut Frame,
        repo: &mut dyn Repository,
        op: &Opcode,
    ) -> VmResult<()> {
        let value = frame.stack.pop()?;
        let offset = frame.stack.pop()?;
        let size = frame.stack.pop()?;
        let salt = if op.code == 0xf5 {
            frame.stack.pop()?
        } else {
            Word::zero()
        };

        let init_code = if size.is_zero() {
            vec![]
        } else {
            let offset = word_to_usize(&offset)?;
            let size = word_to_usize(&size)?;
            frame.memory.expand(offset, size);
            frame.memory.load_slice(offset, size)
        };

        if frame.depth + 1 > CALL_DEPTH_LIMIT
            || (!value.is_zero() && repo.balance(&frame.owner) < value)
        {
            frame.stack.push(Word::zero())?;
            return Ok(());
        }

        let nonce = repo.nonce(&frame.owner);
        let created = if op.code == 0xf5 {
            frame.owner.create2(&salt, &init_code)
        } else {
            frame.owner.create(nonce)
        };

        // the creator's nonce moves even when initialization fails
        frame.effects.record_nonce(repo, &frame.owner);
        repo.set_nonce(&frame.owner, nonce + Word::one());

        let forwarded = gas::all_but_one_64th(frame.gas.remaining());
        frame.gas.charge(forwarded)?;

        let child_code = match Decoder::decode(init_code.clone()) {
            Ok(code) => code,
            Err(fault) => {
                tracing::warn!(fault = %fault, "initialization code undecodable");
                Self::record_internal(frame, op, &created, value, init_code, true);
                frame.stack.push(Word::zero())?;
                return Ok(());
            }
        };

        let call = Call {
            data: vec![],
            value,
            origin: frame.origin,
            from: frame.owner,
            to: created,
            gas: forwarded,
            gas_price: frame.gas_price,
        };
        let mut child = Frame::new(&call, frame.depth + 1);

        child.effects.record_created(&created);
        repo.create_account(&created);
        if !value.is_zero() {
            Self::transfer_value(&mut child.effects, repo, &frame.owner, &created, value)?;
        }

        let result = self.play(&child_code, &mut child, repo);
        let mut failed = result.is_err() || child.reverted;

        if !failed {
            // storing the new code costs per byte, payable from what the
            // initialization run left over
            let code_gas = self.config.schedule.create_data * child.output.len() as u64;
            if child.gas.charge(code_gas).is_err() {
                failed = true;
            }
        }

        Self::record_internal(frame, op, &created, value, init_code, failed);

        if !failed {
            frame.effects.record_code(&created);
            repo.set_code(&created, child.output.clone());
            frame.gas.credit(child.gas.remaining());
            frame.gas.add_refund(child.gas.refund());
            frame.effects.absorb(std::mem::take(&mut child.effects));
            frame.ret_buf.clear();
            frame.stack.push((&created).into())?;
        } else {
            if child.reverted && result.is_ok() {
                frame.gas.credit(child.gas.remaining());
                frame.ret_buf = child.output;
            } else {
                frame.ret_buf.clear();
            }
            child.effects.unwind(repo);
            frame.stack.push(Word::zero())?;
        }
        Ok(())
    }
}
