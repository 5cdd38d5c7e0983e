use crate::{
    common::address::{Address, addr},
    opcodes::{Opcode, Tier},
};

/// Storage-write cost policy. `Legacy` is the flat set/clear/reset split,
/// `NetMetered` compares current, original and new values and adjusts
/// refunds both ways.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoragePolicy {
    Legacy,
    NetMetered,
}

/// When a CALL (or SUICIDE) pays the new-account surcharge: on a bare
/// existence miss, or only when the target is dead and value is moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NewAccountPolicy {
    Existence,
    DeadOnValue,
}

/// Named gas costs. A plain value object: the engine never derives costs
/// from chain height, the caller picks the schedule up front.
#[derive(Clone, Debug)]
pub struct GasSchedule {
    pub base: u64,
    pub very_low: u64,
    pub low: u64,
    pub mid: u64,
    pub high: u64,

    pub balance: u64,
    pub sload: u64,
    pub sha3: u64,
    pub sha3_word: u64,
    pub sstore_set: u64,
    pub sstore_clear: u64,
    pub sstore_reset: u64,
    pub sstore_refund: u64,
    pub sstore_reuse: u64,
    pub memory: u64,
    pub quad_coeff_div: u64,
    pub copy: u64,
    pub exp: u64,
    pub exp_byte: u64,
    pub log: u64,
    pub log_topic: u64,
    pub log_data: u64,
    pub jumpdest: u64,
    pub call: u64,
    pub call_value: u64,
    pub call_stipend: u64,
    pub new_account: u64,
    pub create: u64,
    pub create_data: u64,
    pub suicide: u64,
    pub new_account_suicide: u64,
    pub ext_code_size: u64,
    pub ext_code_copy: u64,
    pub ext_code_hash: u64,
    pub tx: u64,
    pub tx_zero_data: u64,
    pub tx_nonzero_data: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            base: 2,
            very_low: 3,
            low: 5,
            mid: 8,
            high: 10,

            balance: 400,
            sload: 200,
            sha3: 30,
            sha3_word: 6,
            sstore_set: 20_000,
            sstore_clear: 5_000,
            sstore_reset: 5_000,
            sstore_refund: 15_000,
            sstore_reuse: 200,
            memory: 3,
            quad_coeff_div: 512,
            copy: 3,
            exp: 10,
            exp_byte: 50,
            log: 375,
            log_topic: 375,
            log_data: 8,
            jumpdest: 1,
            call: 700,
            call_value: 9_000,
            call_stipend: 2_300,
            new_account: 25_000,
            create: 32_000,
            create_data: 200,
            suicide: 5_000,
            new_account_suicide: 25_000,
            ext_code_size: 700,
            ext_code_copy: 700,
            ext_code_hash: 400,
            tx: 21_000,
            tx_zero_data: 4,
            tx_nonzero_data: 68,
        }
    }
}

impl GasSchedule {
    pub fn tier_cost(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Zero => 0,
            Tier::Base => self.base,
            Tier::VeryLow => self.very_low,
            Tier::Low => self.low,
            Tier::Mid => self.mid,
            Tier::High => self.high,
            Tier::Special => 0,
        }
    }
}

/// Explicit chain configuration handed to the interpreter and the
/// orchestrator. Feature flags gate the configuration-dependent opcodes,
/// the two cost policies pick the storage and new-account formulas, and
/// the privileged addresses drive the transfer bypass.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub schedule: GasSchedule,
    pub storage_policy: StoragePolicy,
    pub new_account_policy: NewAccountPolicy,

    pub has_delegate_call: bool,
    pub has_revert: bool,
    pub has_return_data: bool,
    pub has_static_call: bool,
    pub has_ext_code_hash: bool,
    pub has_shifts: bool,
    pub has_create2: bool,

    pub god_address: Address,
    pub foundation_address: Address,
    pub creation_addresses: Vec<Address>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            schedule: GasSchedule::default(),
            storage_policy: StoragePolicy::NetMetered,
            new_account_policy: NewAccountPolicy::DeadOnValue,
            has_delegate_call: true,
            has_revert: true,
            has_return_data: true,
            has_static_call: true,
            has_ext_code_hash: true,
            has_shifts: true,
            has_create2: true,
            god_address: addr("0x0000000000000000000000000000000000000100"),
            foundation_address: addr("0x0000000000000000000000000000000000000200"),
            creation_addresses: vec![],
        }
    }
}

impl ChainConfig {
    /// Legacy profile: flat storage costs, bare existence surcharge, the
    /// later opcode families disabled.
    pub fn legacy() -> Self {
        Self {
            storage_policy: StoragePolicy::Legacy,
            new_account_policy: NewAccountPolicy::Existence,
            has_delegate_call: true,
            has_revert: true,
            has_return_data: true,
            has_static_call: true,
            has_ext_code_hash: false,
            has_shifts: false,
            has_create2: false,
            ..Self::default()
        }
    }

    /// Per-opcode allow table for the configuration-gated opcodes.
    pub fn allows(&self, op: &Opcode) -> bool {
        match op.code {
            0xf4 => self.has_delegate_call,
            0xfd => self.has_revert,
            0x3d | 0x3e => self.has_return_data,
            0xfa => self.has_static_call,
            0x3f => self.has_ext_code_hash,
            0x1b | 0x1c | 0x1d => self.has_shifts,
            0xf5 => self.has_create2,
            _ => true,
        }
    }

    pub fn is_privileged_transfer(&self, from: &Address, to: &Address) -> bool {
        from == &self.god_address
            && (to == &self.foundation_address || self.creation_addresses.contains(to))
    }
}
