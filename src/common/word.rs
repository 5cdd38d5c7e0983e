use std::ops::{BitAnd, BitOr, BitXor, Shl, Shr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::decode;

type U256 = primitive_types::U256;

/// Fixed-width 256-bit value: the universal unit for stack entries, gas
/// amounts, addresses (right-aligned) and storage keys/values. All
/// arithmetic wraps modulo 2^256.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Word(U256);

impl Word {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn one() -> Self {
        Self(U256::one())
    }

    pub fn max() -> Self {
        Self(U256::max_value())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn bit(&self, index: usize) -> bool {
        self.0.bit(index)
    }

    /// Number of bytes needed to represent the value without leading zeros.
    pub fn byte_len(&self) -> usize {
        self.0.bits().div_ceil(8)
    }

    /// Big-endian byte at `index` (0 is the most significant byte).
    pub fn byte(&self, index: usize) -> u8 {
        self.to_be_bytes()[index]
    }

    pub fn as_u64(&self) -> u64 {
        self.0.as_u64()
    }

    pub fn as_usize(&self) -> usize {
        self.0.as_usize()
    }

    /// Checked narrowing for values used as gas amounts or lengths: the
    /// result must fit the 63-bit non-negative range.
    pub fn as_u64_checked(&self) -> Option<u64> {
        if self.0 > U256::from(i64::MAX as u64) {
            None
        } else {
            Some(self.0.as_u64())
        }
    }

    pub fn as_usize_checked(&self) -> Option<usize> {
        self.as_u64_checked().map(|v| v as usize)
    }

    pub fn overflowing_add(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_add(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_sub(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_sub(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_mul(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_mul(rhs.0);
        (Self(word), flag)
    }

    pub fn saturating_sub(&self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn pow(&self, exp: Self) -> Self {
        let (ret, _) = self.0.overflowing_pow(exp.0);
        Self(ret)
    }

    pub fn add_modulo(&self, that: &Word, modulo: &Word) -> Word {
        use k256::elliptic_curve::bigint::Encoding;

        if modulo.is_zero() {
            return Word::zero();
        }
        let a = k256::U256::from_be_slice(&self.to_be_bytes());
        let b = k256::U256::from_be_slice(&that.to_be_bytes());
        let m = k256::U256::from_be_slice(&modulo.to_be_bytes());
        let r = (&a).add_mod(&b, &m);
        Self::from_bytes(&r.to_be_bytes())
    }

    pub fn mul_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = self.0.full_mul(that.0) % modulo.0;
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    /// Sign-extend from the byte at index `k` counted from the least
    /// significant end: bytes above `k` are filled with the sign bit.
    pub fn sign_extend(&self, k: usize) -> Word {
        if k >= 31 {
            return *self;
        }
        let bit = 8 * k + 7;
        let mask = (U256::one() << (bit + 1)) - U256::one();
        if self.0.bit(bit) {
            Word(self.0 | !mask)
        } else {
            Word(self.0 & mask)
        }
    }

    pub fn from_hex(hex: &str) -> Result<Self, crate::common::error::Error> {
        let hex = hex.trim_start_matches("0x");
        U256::from_str_radix(hex, 16)
            .map(Self)
            .map_err(|_| crate::common::error::Error::InvalidHex)
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::LowerHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::UpperHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::UpperHex::fmt(&self.0, f)
    }
}

impl From<u8> for Word {
    fn from(value: u8) -> Self {
        Self(U256::from(value))
    }
}

impl From<i32> for Word {
    fn from(value: i32) -> Self {
        Self(U256::from(value))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl std::ops::Add<Word> for Word {
    type Output = Word;

    fn add(self, rhs: Word) -> Self::Output {
        let (word, _) = self.overflowing_add(rhs);
        word
    }
}

impl std::ops::AddAssign<Word> for Word {
    fn add_assign(&mut self, rhs: Word) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<Word> for Word {
    type Output = Word;

    fn sub(self, rhs: Word) -> Self::Output {
        let (word, _) = self.overflowing_sub(rhs);
        word
    }
}

impl std::ops::SubAssign<Word> for Word {
    fn sub_assign(&mut self, rhs: Word) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<Word> for Word {
    type Output = Word;

    fn mul(self, rhs: Word) -> Self::Output {
        let (word, _) = self.overflowing_mul(rhs);
        word
    }
}

impl std::ops::MulAssign<Word> for Word {
    fn mul_assign(&mut self, rhs: Word) {
        *self = *self * rhs;
    }
}

impl std::ops::Div<Word> for Word {
    type Output = Word;

    fn div(self, rhs: Word) -> Self::Output {
        Word(self.0 / rhs.0)
    }
}

impl std::ops::Rem<Word> for Word {
    type Output = Word;

    fn rem(self, rhs: Word) -> Self::Output {
        Word(self.0 % rhs.0)
    }
}

impl BitAnd for Word {
    type Output = Word;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl std::ops::Not for Word {
    type Output = Word;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl Shl<usize> for Word {
    type Output = Word;

    fn shl(self, rhs: usize) -> Self::Output {
        if rhs >= 256 {
            return Word::zero();
        }
        Self(self.0 << rhs)
    }
}

impl Shr<usize> for Word {
    type Output = Word;

    fn shr(self, rhs: usize) -> Self::Output {
        if rhs >= 256 {
            return Word::zero();
        }
        Self(self.0 >> rhs)
    }
}

impl Serialize for Word {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex: String = hex::encode(self.0.to_big_endian())
            .chars()
            .skip_while(|c| c == &'0')
            .collect();
        let hex = format!("0x{hex}");
        serializer.serialize_str(&hex)
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Word, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex: String = Deserialize::deserialize(deserializer)?;
        Ok(word(hex.trim_start_matches("0x")))
    }
}

pub fn word(s: &str) -> Word {
    let b = decode::<32>(s);
    Word::from_bytes(&b)
}

/// Decode a solidity-style `Error(string)` revert payload, if that is what
/// the returned bytes look like.
pub fn decode_error_string(ret: &[u8]) -> Option<String> {
    if ret.len() < 4 + 32 + 32 {
        return None;
    }
    let offset = Word::from_bytes(&ret[4..4 + 32]).as_usize_checked()?;
    let offset = 4 + 32 + offset;
    let size = Word::from_bytes(&ret[4 + 32..4 + 32 + 32]).as_usize_checked()?;
    if ret.len() < offset + size {
        return None;
    }
    String::from_utf8(ret[offset..offset + size].to_vec()).ok()
}
