use once_cell::sync::Lazy;

/// Static gas tier of an opcode. `Special` means the cost is fully
/// computed by the gas meter before the opcode executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Zero,
    Base,
    VeryLow,
    Low,
    Mid,
    High,
    Special,
}

/// One row of the instruction table: byte, mnemonic, width parameter
/// (PUSH width, DUP/SWAP depth, LOG topic count), declared stack arity and
/// produced count, and the static gas tier. Validation is table-driven:
/// the interpreter checks `require`/`ret` against the stack before any
/// gas is charged or any effect is applied.
#[derive(Debug, Clone, Copy)]
pub struct Opcode {
    pub code: u8,
    pub name: &'static str,
    pub n: u8,
    pub require: u8,
    pub ret: u8,
    pub tier: Tier,
}

impl Opcode {
    pub fn new(code: u8, name: &'static str, n: u8, require: u8, ret: u8, tier: Tier) -> Self {
        Self {
            code,
            name,
            n,
            require,
            ret,
            tier,
        }
    }

    fn undefined(code: u8) -> Self {
        Self::new(code, "undefined", 0, 0, 0, Tier::Zero)
    }

    pub fn is_undefined(&self) -> bool {
        self.name == "undefined"
    }

    pub fn name(&self) -> String {
        self.name.replace('_', &self.n.to_string())
    }

    pub fn push_width(&self) -> usize {
        if self.name != "PUSH_" {
            0
        } else {
            self.n as usize
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.code, 0xf1 | 0xf2 | 0xf4 | 0xfa)
    }

    pub fn call_has_value(&self) -> bool {
        matches!(self.code, 0xf1 | 0xf2)
    }
}

static OPCODES: Lazy<[Opcode; 256]> = Lazy::new(|| {
    use Tier::*;

    let mut table: [Opcode; 256] = std::array::from_fn(|i| Opcode::undefined(i as u8));

    // 0s: Stop and Arithmetic Operations
    table[0x00] = Opcode::new(0x00, "STOP", 0, 0, 0, Zero);
    table[0x01] = Opcode::new(0x01, "ADD", 0, 2, 1, VeryLow);
    table[0x02] = Opcode::new(0x02, "MUL", 0, 2, 1, Low);
    table[0x03] = Opcode::new(0x03, "SUB", 0, 2, 1, VeryLow);
    table[0x04] = Opcode::new(0x04, "DIV", 0, 2, 1, Low);
    table[0x05] = Opcode::new(0x05, "SDIV", 0, 2, 1, Low);
    table[0x06] = Opcode::new(0x06, "MOD", 0, 2, 1, Low);
    table[0x07] = Opcode::new(0x07, "SMOD", 0, 2, 1, Low);
    table[0x08] = Opcode::new(0x08, "ADDMOD", 0, 3, 1, Mid);
    table[0x09] = Opcode::new(0x09, "MULMOD", 0, 3, 1, Mid);
    table[0x0a] = Opcode::new(0x0a, "EXP", 0, 2, 1, Special);
    table[0x0b] = Opcode::new(0x0b, "SIGNEXTEND", 0, 2, 1, Low);

    // 10s: Comparison & Bitwise Logic Operations
    table[0x10] = Opcode::new(0x10, "LT", 0, 2, 1, VeryLow);
    table[0x11] = Opcode::new(0x11, "GT", 0, 2, 1, VeryLow);
    table[0x12] = Opcode::new(0x12, "SLT", 0, 2, 1, VeryLow);
    table[0x13] = Opcode::new(0x13, "SGT", 0, 2, 1, VeryLow);
    table[0x14] = Opcode::new(0x14, "EQ", 0, 2, 1, VeryLow);
    table[0x15] = Opcode::new(0x15, "ISZERO", 0, 1, 1, VeryLow);
    table[0x16] = Opcode::new(0x16, "AND", 0, 2, 1, VeryLow);
    table[0x17] = Opcode::new(0x17, "OR", 0, 2, 1, VeryLow);
    table[0x18] = Opcode::new(0x18, "XOR", 0, 2, 1, VeryLow);
    table[0x19] = Opcode::new(0x19, "NOT", 0, 1, 1, VeryLow);
    table[0x1a] = Opcode::new(0x1a, "BYTE", 0, 2, 1, VeryLow);
    table[0x1b] = Opcode::new(0x1b, "SHL", 0, 2, 1, VeryLow);
    table[0x1c] = Opcode::new(0x1c, "SHR", 0, 2, 1, VeryLow);
    table[0x1d] = Opcode::new(0x1d, "SAR", 0, 2, 1, VeryLow);

    // 20s: SHA3
    table[0x20] = Opcode::new(0x20, "SHA3", 0, 2, 1, Special);

    // 30s: Environmental Information
    table[0x30] = Opcode::new(0x30, "ADDRESS", 0, 0, 1, Base);
    table[0x31] = Opcode::new(0x31, "BALANCE", 0, 1, 1, Special);
    table[0x32] = Opcode::new(0x32, "ORIGIN", 0, 0, 1, Base);
    table[0x33] = Opcode::new(0x33, "CALLER", 0, 0, 1, Base);
    table[0x34] = Opcode::new(0x34, "CALLVALUE", 0, 0, 1, Base);
    table[0x35] = Opcode::new(0x35, "CALLDATALOAD", 0, 1, 1, VeryLow);
    table[0x36] = Opcode::new(0x36, "CALLDATASIZE", 0, 0, 1, Base);
    table[0x37] = Opcode::new(0x37, "CALLDATACOPY", 0, 3, 0, VeryLow);
    table[0x38] = Opcode::new(0x38, "CODESIZE", 0, 0, 1, Base);
    table[0x39] = Opcode::new(0x39, "CODECOPY", 0, 3, 0, VeryLow);
    table[0x3a] = Opcode::new(0x3a, "GASPRICE", 0, 0, 1, Base);
    table[0x3b] = Opcode::new(0x3b, "EXTCODESIZE", 0, 1, 1, Special);
    table[0x3c] = Opcode::new(0x3c, "EXTCODECOPY", 0, 4, 0, Special);
    table[0x3d] = Opcode::new(0x3d, "RETURNDATASIZE", 0, 0, 1, Base);
    table[0x3e] = Opcode::new(0x3e, "RETURNDATACOPY", 0, 3, 0, VeryLow);
    table[0x3f] = Opcode::new(0x3f, "EXTCODEHASH", 0, 1, 1, Special);

    // 50s: Stack, Memory, Storage and Flow Operations
    table[0x50] = Opcode::new(0x50, "POP", 0, 1, 0, Base);
    table[0x51] = Opcode::new(0x51, "MLOAD", 0, 1, 1, VeryLow);
    table[0x52] = Opcode::new(0x52, "MSTORE", 0, 2, 0, VeryLow);
    table[0x53] = Opcode::new(0x53, "MSTORE8", 0, 2, 0, VeryLow);
    table[0x54] = Opcode::new(0x54, "SLOAD", 0, 1, 1, Special);
    table[0x55] = Opcode::new(0x55, "SSTORE", 0, 2, 0, Special);
    table[0x56] = Opcode::new(0x56, "JUMP", 0, 1, 0, Mid);
    table[0x57] = Opcode::new(0x57, "JUMPI", 0, 2, 0, High);
    table[0x58] = Opcode::new(0x58, "PC", 0, 0, 1, Base);
    table[0x59] = Opcode::new(0x59, "MSIZE", 0, 0, 1, Base);
    table[0x5a] = Opcode::new(0x5a, "GAS", 0, 0, 1, Base);
    table[0x5b] = Opcode::new(0x5b, "JUMPDEST", 0, 0, 0, Special);
    table[0x5f] = Opcode::new(0x5f, "PUSH0", 0, 0, 1, Base);

    // PUSH{1..32} Operations
    for i in 0..32u8 {
        table[0x60 + i as usize] = Opcode::new(0x60 + i, "PUSH_", i + 1, 0, 1, VeryLow);
    }

    // DUP{1..16}
    for i in 0..16u8 {
        table[0x80 + i as usize] = Opcode::new(0x80 + i, "DUP_", i + 1, i + 1, i + 2, VeryLow);
    }

    // SWAP{1..16}
    for i in 0..16u8 {
        table[0x90 + i as usize] = Opcode::new(0x90 + i, "SWAP_", i + 1, i + 2, i + 2, VeryLow);
    }

    // LOG{0..4}
    for i in 0..5u8 {
        table[0xa0 + i as usize] = Opcode::new(0xa0 + i, "LOG_", i, i + 2, 0, Special);
    }

    // System operations
    table[0xf0] = Opcode::new(0xf0, "CREATE", 0, 3, 1, Special);
    table[0xf1] = Opcode::new(0xf1, "CALL", 0, 7, 1, Special);
    table[0xf2] = Opcode::new(0xf2, "CALLCODE", 0, 7, 1, Special);
    table[0xf3] = Opcode::new(0xf3, "RETURN", 0, 2, 0, Zero);
    table[0xf4] = Opcode::new(0xf4, "DELEGATECALL", 0, 6, 1, Special);
    table[0xf5] = Opcode::new(0xf5, "CREATE2", 0, 4, 1, Special);
    table[0xfa] = Opcode::new(0xfa, "STATICCALL", 0, 6, 1, Special);
    table[0xfd] = Opcode::new(0xfd, "REVERT", 0, 2, 0, Zero);
    table[0xfe] = Opcode::new(0xfe, "INVALID", 0, 0, 0, Zero);
    table[0xff] = Opcode::new(0xff, "SUICIDE", 0, 1, 0, Special);

    table
});

pub fn get_opcode(value: u8) -> Opcode {
    OPCODES[value as usize]
}
