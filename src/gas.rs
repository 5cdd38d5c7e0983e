use crate::{
    common::Word,
    config::{GasSchedule, StoragePolicy},
    error::{VmError, VmResult},
};

/// Memory beyond this can never be paid for; asking for more is a fault
/// rather than a huge charge.
pub const MAX_MEM_SIZE: u64 = i32::MAX as u64;

/// Per-frame gas accounting. Costs are charged before the opcode effect;
/// refunds accumulate in a signed counter and only materialize at
/// transaction end (net metering legally drives it negative in between).
#[derive(Clone, Debug, Default)]
pub struct GasMeter {
    limit: u64,
    used: u64,
    refund: i64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            refund: 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn charge(&mut self, cost: u64) -> VmResult<()> {
        if cost > self.remaining() {
            return Err(VmError::OutOfGas);
        }
        self.used += cost;
        Ok(())
    }

    /// Return unspent gas from a completed sub-call.
    pub fn credit(&mut self, gas: u64) {
        self.used = self.used.saturating_sub(gas);
    }

    /// A fault forfeits everything left in the frame.
    pub fn consume_all(&mut self) {
        self.used = self.limit;
    }

    pub fn add_refund(&mut self, delta: i64) {
        self.refund += delta;
    }

    pub fn refund(&self) -> i64 {
        self.refund
    }

    pub fn reset_refund(&mut self) {
        self.refund = 0;
    }
}

/// New total memory size needed by an access: offset + size, or zero when
/// size is zero. Values outside the 63-bit range are a fault.
pub fn mem_needed(offset: Word, size: Word) -> VmResult<u64> {
    if size.is_zero() {
        return Ok(0);
    }
    let offset = offset.as_u64_checked().ok_or(VmError::GasOverflow)?;
    let size = size.as_u64_checked().ok_or(VmError::GasOverflow)?;
    offset.checked_add(size).ok_or(VmError::GasOverflow)
}

fn mem_words_cost(schedule: &GasSchedule, words: u64) -> u64 {
    schedule.memory * words + words * words / schedule.quad_coeff_div
}

/// Expansion cost from `old_size` bytes to `new_size` bytes (whole new
/// size at once, not incremental), plus the per-word copy charge.
pub fn memory_expansion(
    schedule: &GasSchedule,
    old_size: usize,
    new_size: u64,
    copy_size: u64,
) -> VmResult<u64> {
    if new_size > MAX_MEM_SIZE {
        return Err(VmError::MemoryOverflow(new_size));
    }

    let mut cost = 0;

    let aligned = new_size.div_ceil(32) * 32;
    if aligned > old_size as u64 {
        cost += mem_words_cost(schedule, aligned / 32)
            - mem_words_cost(schedule, old_size as u64 / 32);
    }

    if copy_size > 0 {
        cost += schedule.copy * copy_size.div_ceil(32);
    }
    Ok(cost)
}

/// Storage write cost and scheduled refund for one SSTORE.
///
/// Net metering compares current, original (transaction start) and new
/// values: same-value writes pay the reuse cost, the first dirtying of a
/// slot follows the set/clear split against the original value, and
/// returning a slot to its original value reclaims or cancels refunds
/// scheduled earlier.
pub fn storage_write_cost(
    schedule: &GasSchedule,
    policy: StoragePolicy,
    current: Word,
    original: Word,
    new: Word,
) -> (u64, i64) {
    match policy {
        StoragePolicy::Legacy => {
            if current.is_zero() && !new.is_zero() {
                (schedule.sstore_set, 0)
            } else if !current.is_zero() && new.is_zero() {
                (schedule.sstore_clear, schedule.sstore_refund as i64)
            } else {
                (schedule.sstore_reset, 0)
            }
        }
        StoragePolicy::NetMetered => {
            if new == current {
                return (schedule.sstore_reuse, 0);
            }
            if current == original {
                return if original.is_zero() {
                    (schedule.sstore_set, 0)
                } else if new.is_zero() {
                    (schedule.sstore_clear, schedule.sstore_refund as i64)
                } else {
                    (schedule.sstore_clear, 0)
                };
            }
            // the slot is already dirty in this transaction
            let mut refund = 0i64;
            if !original.is_zero() {
                if current.is_zero() {
                    refund -= schedule.sstore_refund as i64;
                } else if new.is_zero() {
                    refund += schedule.sstore_refund as i64;
                }
            }
            if new == original {
                if original.is_zero() {
                    refund += (schedule.sstore_set - schedule.sstore_reuse) as i64;
                } else {
                    refund += (schedule.sstore_clear - schedule.sstore_reuse) as i64;
                }
            }
            (schedule.sstore_reuse, refund)
        }
    }
}

pub fn sha3_cost(schedule: &GasSchedule, size: u64) -> u64 {
    schedule.sha3 + schedule.sha3_word * size.div_ceil(32)
}

pub fn exp_cost(schedule: &GasSchedule, exponent: &Word) -> u64 {
    schedule.exp + schedule.exp_byte * exponent.byte_len() as u64
}

pub fn log_cost(schedule: &GasSchedule, topics: usize, size: u64) -> u64 {
    schedule.log + schedule.log_topic * topics as u64 + schedule.log_data * size
}

/// The caller always keeps one 64th of what remains after the static
/// portion of the call cost.
pub fn all_but_one_64th(gas: u64) -> u64 {
    gas - gas / 64
}

/// Gas actually forwarded to a callee: the requested amount, capped by the
/// all-but-one-64th rule over what the caller has left.
pub fn call_gas(requested: Word, available: u64) -> u64 {
    let cap = all_but_one_64th(available);
    match requested.as_u64_checked() {
        Some(requested) => requested.min(cap),
        None => cap,
    }
}
