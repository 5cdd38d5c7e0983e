use serde::{Deserialize, Serialize};

use crate::{
    common::{Hex, Word, address::Address},
    rlp::{self, Item, RlpError},
};

/// One settlement transaction. `to == None` creates a contract from
/// `data`, otherwise `data` is the call input for `to`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: Word,
    pub gas_price: Word,
    pub gas_limit: Word,
    pub to: Option<Address>,
    pub value: Word,
    pub data: Vec<u8>,
    pub sender: Address,
}

impl Transaction {
    pub fn new(
        nonce: Word,
        gas_price: Word,
        gas_limit: Word,
        to: Option<Address>,
        value: Word,
        data: Vec<u8>,
    ) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
            sender: Address::zero(),
        }
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn encoded(&self) -> Vec<u8> {
        let to = match &self.to {
            Some(address) => rlp::encode_bytes(&address.0),
            None => rlp::encode_bytes(&[]),
        };
        rlp::encode_list(&[
            rlp::encode_word(&self.nonce),
            rlp::encode_word(&self.gas_price),
            rlp::encode_word(&self.gas_limit),
            to,
            rlp::encode_word(&self.value),
            rlp::encode_bytes(&self.data),
            rlp::encode_bytes(&self.sender.0),
        ])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        Self::from_item(&Item::decode(bytes)?)
    }

    pub fn from_item(item: &Item) -> Result<Self, RlpError> {
        let to = item.at(3)?.bytes()?;
        let to = if to.is_empty() {
            None
        } else {
            Some(Address::try_from(to).map_err(|_| RlpError::Malformed)?)
        };
        let sender = Address::try_from(item.at(6)?.bytes()?).map_err(|_| RlpError::Malformed)?;
        Ok(Self {
            nonce: item.at(0)?.word()?,
            gas_price: item.at(1)?.word()?,
            gas_limit: item.at(2)?.word()?,
            to,
            value: item.at(4)?.word()?,
            data: item.at(5)?.bytes()?.to_vec(),
            sender,
        })
    }
}

/// Inbound envelope the orchestrator receives from the node: who sent it,
/// the signature bytes (the receipt key) and the encoded transaction
/// parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractMessage {
    #[serde(rename = "fromAddress")]
    pub from_address: String,
    pub signature: Hex,
    pub data: Hex,
}

/// Transaction parameters carried inside a [`ContractMessage`] payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractTransactionData {
    pub nonce: Word,
    pub gas_price: Word,
    pub gas_limit: Word,
    pub to_address: Option<Address>,
    pub value: Word,
    pub calldata: Vec<u8>,
}

impl ContractTransactionData {
    pub fn encoded(&self) -> Vec<u8> {
        let to = match &self.to_address {
            Some(address) => rlp::encode_bytes(&address.0),
            None => rlp::encode_bytes(&[]),
        };
        rlp::encode_list(&[
            rlp::encode_word(&self.nonce),
            rlp::encode_word(&self.gas_price),
            rlp::encode_word(&self.gas_limit),
            to,
            rlp::encode_word(&self.value),
            rlp::encode_bytes(&self.calldata),
        ])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let item = Item::decode(bytes)?;
        let to = item.at(3)?.bytes()?;
        let to_address = if to.is_empty() {
            None
        } else {
            Some(Address::try_from(to).map_err(|_| RlpError::Malformed)?)
        };
        Ok(Self {
            nonce: item.at(0)?.word()?,
            gas_price: item.at(1)?.word()?,
            gas_limit: item.at(2)?.word()?,
            to_address,
            value: item.at(4)?.word()?,
            calldata: item.at(5)?.bytes()?.to_vec(),
        })
    }

    pub fn into_transaction(self, sender: Address) -> Transaction {
        Transaction {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to_address,
            value: self.value,
            data: self.calldata,
            sender,
        }
    }
}
