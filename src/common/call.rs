use crate::common::{Word, address::Address};

/// One message call as the interpreter sees it.
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub data: Vec<u8>,
    pub value: Word,
    pub origin: Address,
    pub from: Address,
    pub to: Address,
    pub gas: u64,
    pub gas_price: Word,
}
