use std::collections::BTreeMap;

use once_cell::unsync::OnceCell;

use crate::{
    common::{Word, address::Address},
    rlp::{self, Item, RlpError},
    transaction::Transaction,
};

/// One log record emitted by the executed code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn encoded(&self) -> Vec<u8> {
        let topics = self
            .topics
            .iter()
            .map(|topic| rlp::encode_bytes(&topic.to_be_bytes()))
            .collect::<Vec<_>>();
        rlp::encode_list(&[
            rlp::encode_bytes(&self.address.0),
            rlp::encode_list(&topics),
            rlp::encode_bytes(&self.data),
        ])
    }

    pub fn from_item(item: &Item) -> Result<Self, RlpError> {
        let address =
            Address::try_from(item.at(0)?.bytes()?).map_err(|_| RlpError::Malformed)?;
        let topics = item
            .at(1)?
            .list()?
            .iter()
            .map(|topic| topic.word())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            address,
            topics,
            data: item.at(2)?.bytes()?.to_vec(),
        })
    }
}

/// One completed balance movement, in chronological order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalTransferData {
    pub from: Address,
    pub to: Address,
    pub value: Word,
}

/// Record of one nested call or create, rejected when the whole
/// transaction fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InternalTransaction {
    pub depth: usize,
    pub index: usize,
    pub note: String,
    pub from: Address,
    pub to: Address,
    pub value: Word,
    pub data: Vec<u8>,
    pub rejected: bool,
}

impl InternalTransaction {
    pub fn reject(&mut self) {
        self.rejected = true;
    }

    pub fn encoded(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.depth as u64),
            rlp::encode_u64(self.index as u64),
            rlp::encode_bytes(self.note.as_bytes()),
            rlp::encode_bytes(&self.from.0),
            rlp::encode_bytes(&self.to.0),
            rlp::encode_word(&self.value),
            rlp::encode_bytes(&self.data),
            rlp::encode_flag(self.rejected),
        ])
    }

    pub fn from_item(item: &Item) -> Result<Self, RlpError> {
        let note = String::from_utf8(item.at(2)?.bytes()?.to_vec())
            .map_err(|_| RlpError::Malformed)?;
        let from = Address::try_from(item.at(3)?.bytes()?).map_err(|_| RlpError::Malformed)?;
        let to = Address::try_from(item.at(4)?.bytes()?).map_err(|_| RlpError::Malformed)?;
        let depth = item.at(0)?.word()?.as_usize_checked().ok_or(RlpError::Malformed)?;
        let index = item.at(1)?.word()?.as_usize_checked().ok_or(RlpError::Malformed)?;
        Ok(Self {
            depth,
            index,
            note,
            from,
            to,
            value: item.at(5)?.word()?,
            data: item.at(6)?.bytes()?.to_vec(),
            rejected: item.at(7)?.flag(),
        })
    }
}

/// One storage slot touched during the transaction; `changed`
/// distinguishes read-only touches from writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TouchedStorageEntry {
    pub key: Word,
    pub value: Word,
    pub changed: bool,
}

/// The read/write set of storage slots accessed during a transaction.
/// A write over an earlier read upgrades the entry, a later read never
/// downgrades a write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TouchedStorage {
    entries: BTreeMap<Word, TouchedStorageEntry>,
}

impl TouchedStorage {
    pub fn add_reading(&mut self, key: Word, value: Word) {
        self.entries.entry(key).or_insert(TouchedStorageEntry {
            key,
            value,
            changed: false,
        });
    }

    pub fn add_writing(&mut self, key: Word, value: Word) {
        self.entries.insert(
            key,
            TouchedStorageEntry {
                key,
                value,
                changed: true,
            },
        );
    }

    pub fn add(&mut self, entry: TouchedStorageEntry) {
        if entry.changed {
            self.add_writing(entry.key, entry.value);
        } else {
            self.add_reading(entry.key, entry.value);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TouchedStorageEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encoded(&self) -> Vec<u8> {
        let entries = self
            .entries
            .values()
            .map(|entry| {
                rlp::encode_list(&[
                    rlp::encode_bytes(&entry.key.to_be_bytes()),
                    rlp::encode_bytes(&entry.value.to_be_bytes()),
                    rlp::encode_flag(entry.changed),
                ])
            })
            .collect::<Vec<_>>();
        rlp::encode_list(&entries)
    }

    pub fn from_item(item: &Item) -> Result<Self, RlpError> {
        let mut result = Self::default();
        for entry in item.list()? {
            result.add(TouchedStorageEntry {
                key: entry.at(0)?.word()?,
                value: entry.at(1)?.word()?,
                changed: entry.at(2)?.flag(),
            });
        }
        Ok(result)
    }
}

/// Persisted outcome of one transaction: status, gas and result bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub status_ok: bool,
    pub gas_used: Word,
    pub result: Vec<u8>,
}

impl TransactionReceipt {
    pub fn encoded(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_flag(self.status_ok),
            rlp::encode_word(&self.gas_used),
            rlp::encode_bytes(&self.result),
        ])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let item = Item::decode(bytes)?;
        Ok(Self {
            status_ok: item.at(0)?.flag(),
            gas_used: item.at(1)?.word()?,
            result: item.at(2)?.bytes()?.to_vec(),
        })
    }
}

/// Everything a transaction changed, immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryData {
    pub tx: Transaction,
    pub value: Word,
    pub gas_price: Word,
    pub gas_limit: Word,
    pub gas_used: Word,
    pub gas_leftover: Word,
    pub gas_refund: Word,
    pub deleted_accounts: Vec<Word>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub balance_changes: Vec<InternalTransferData>,
    pub touched_storage: TouchedStorage,
    pub result: Vec<u8>,
    pub logs: Vec<LogEntry>,
    pub failed: bool,
}

impl SummaryData {
    fn encoded(&self) -> Vec<u8> {
        let internal = self
            .internal_transactions
            .iter()
            .map(InternalTransaction::encoded)
            .collect::<Vec<_>>();
        let deleted = self
            .deleted_accounts
            .iter()
            .map(|account| rlp::encode_bytes(&account.to_be_bytes()))
            .collect::<Vec<_>>();
        let logs = self.logs.iter().map(LogEntry::encoded).collect::<Vec<_>>();

        rlp::encode_list(&[
            self.tx.encoded(),
            rlp::encode_word(&self.value),
            rlp::encode_word(&self.gas_price),
            rlp::encode_word(&self.gas_limit),
            rlp::encode_word(&self.gas_used),
            rlp::encode_word(&self.gas_leftover),
            rlp::encode_word(&self.gas_refund),
            rlp::encode_list(&deleted),
            rlp::encode_list(&internal),
            self.touched_storage.encoded(),
            rlp::encode_bytes(&self.result),
            rlp::encode_list(&logs),
            rlp::encode_flag(self.failed),
        ])
    }

    fn decode(bytes: &[u8]) -> Result<Self, RlpError> {
        let item = Item::decode(bytes)?;
        let deleted_accounts = item
            .at(7)?
            .list()?
            .iter()
            .map(|account| account.word())
            .collect::<Result<Vec<_>, _>>()?;
        let internal_transactions = item
            .at(8)?
            .list()?
            .iter()
            .map(InternalTransaction::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        let logs = item
            .at(11)?
            .list()?
            .iter()
            .map(LogEntry::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        // balance changes are runtime-only and never persisted; the failed
        // flag may be absent entirely and then reads as false
        let failed = item.list()?.get(12).map(Item::flag).unwrap_or(false);

        Ok(Self {
            tx: Transaction::from_item(item.at(0)?)?,
            value: item.at(1)?.word()?,
            gas_price: item.at(2)?.word()?,
            gas_limit: item.at(3)?.word()?,
            gas_used: item.at(4)?.word()?,
            gas_leftover: item.at(5)?.word()?,
            gas_refund: item.at(6)?.word()?,
            deleted_accounts,
            internal_transactions,
            balance_changes: vec![],
            touched_storage: TouchedStorage::from_item(item.at(9)?)?,
            result: item.at(10)?.bytes()?.to_vec(),
            logs,
            failed,
        })
    }
}

enum Inner {
    Built(Box<SummaryData>),
    Raw {
        bytes: Vec<u8>,
        cache: OnceCell<SummaryData>,
    },
}

/// Finalized record of a transaction's effects, gas accounting and
/// outcome. Built from execution through [`SummaryBuilder`], or wrapped
/// around persisted bytes, in which case field extraction is deferred
/// until first access and then cached.
pub struct TransactionExecutionSummary {
    inner: Inner,
}

impl TransactionExecutionSummary {
    pub fn builder_for(tx: Transaction) -> SummaryBuilder {
        SummaryBuilder::new(tx)
    }

    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self {
            inner: Inner::Raw {
                bytes,
                cache: OnceCell::new(),
            },
        }
    }

    pub fn fields(&self) -> Result<&SummaryData, RlpError> {
        match &self.inner {
            Inner::Built(data) => Ok(data.as_ref()),
            Inner::Raw { bytes, cache } => cache.get_or_try_init(|| SummaryData::decode(bytes)),
        }
    }

    pub fn encoded(&self) -> Vec<u8> {
        match &self.inner {
            Inner::Built(data) => data.encoded(),
            Inner::Raw { bytes, .. } => bytes.clone(),
        }
    }

    pub fn is_failed(&self) -> Result<bool, RlpError> {
        Ok(self.fields()?.failed)
    }

    /// Gas actually paid for, in fee units: limit minus leftover and
    /// refund.
    pub fn fee(&self) -> Result<Word, RlpError> {
        let data = self.fields()?;
        let paid = data.gas_limit - (data.gas_leftover + data.gas_refund);
        Ok(paid * data.gas_price)
    }

    pub fn balance_changes(&self) -> Result<&[InternalTransferData], RlpError> {
        Ok(&self.fields()?.balance_changes)
    }
}

/// Accumulating builder the executor fills in while the transaction runs.
pub struct SummaryBuilder {
    data: SummaryData,
}

impl SummaryBuilder {
    fn new(tx: Transaction) -> Self {
        let mut data = SummaryData {
            value: tx.value,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            ..SummaryData::default()
        };
        data.tx = tx;
        Self { data }
    }

    pub fn gas_used(mut self, gas_used: Word) -> Self {
        self.data.gas_used = gas_used;
        self
    }

    pub fn gas_leftover(mut self, gas_leftover: Word) -> Self {
        self.data.gas_leftover = gas_leftover;
        self
    }

    pub fn gas_refund(mut self, gas_refund: Word) -> Self {
        self.data.gas_refund = gas_refund;
        self
    }

    pub fn deleted_accounts(mut self, deleted: Vec<Word>) -> Self {
        self.data.deleted_accounts = deleted;
        self
    }

    pub fn internal_transactions(mut self, transactions: Vec<InternalTransaction>) -> Self {
        self.data.internal_transactions = transactions;
        self
    }

    pub fn balance_changes(mut self, changes: Vec<InternalTransferData>) -> Self {
        self.data.balance_changes = changes;
        self
    }

    pub fn touched_storage(mut self, touched: TouchedStorage) -> Self {
        self.data.touched_storage = touched;
        self
    }

    pub fn logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.data.logs = logs;
        self
    }

    pub fn result(mut self, result: Vec<u8>) -> Self {
        self.data.result = result;
        self
    }

    pub fn mark_as_failed(mut self) -> Self {
        self.data.failed = true;
        self
    }

    /// Finalize: a failed transaction rejects every internal transaction
    /// it recorded.
    pub fn build(mut self) -> TransactionExecutionSummary {
        if self.data.failed {
            for transaction in &mut self.data.internal_transactions {
                transaction.reject();
            }
        }
        TransactionExecutionSummary {
            inner: Inner::Built(Box::new(self.data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::addr;
    use pretty_assertions::assert_eq;

    fn sample_tx() -> Transaction {
        Transaction::new(
            Word::from(1u64),
            Word::from(10u64),
            Word::from(2_000_000u64),
            Some(addr("0xc80a141ce8a5b73371043cba5cee40437975bb37")),
            Word::from(555u64),
            vec![0xb0, 0x81],
        )
        .with_sender(addr("0x5bc1c1942f2333acb9ce156525bc079fad983f13"))
    }

    fn sample_summary() -> TransactionExecutionSummary {
        let mut touched = TouchedStorage::default();
        touched.add_reading(Word::from(1u64), Word::from(41u64));
        touched.add_writing(Word::from(1u64), Word::from(42u64));
        touched.add_reading(Word::from(2u64), Word::from(7u64));

        TransactionExecutionSummary::builder_for(sample_tx())
            .gas_used(Word::from(30_000u64))
            .gas_leftover(Word::from(1_970_000u64))
            .gas_refund(Word::from(15_000u64))
            .deleted_accounts(vec![Word::from(0xdeadu64)])
            .internal_transactions(vec![InternalTransaction {
                depth: 1,
                index: 0,
                note: "CALL".into(),
                from: addr("0xc80a141ce8a5b73371043cba5cee40437975bb37"),
                to: addr("0xe77afefd5b7beb79d1843e65a0fd54963abc742f"),
                value: Word::from(5u64),
                data: vec![0x01],
                rejected: false,
            }])
            .touched_storage(touched)
            .logs(vec![LogEntry {
                address: addr("0xc80a141ce8a5b73371043cba5cee40437975bb37"),
                topics: vec![Word::from(0xaau64), Word::from(0xbbu64)],
                data: vec![1, 2, 3],
            }])
            .result(vec![0x2a])
            .build()
    }

    #[test]
    fn test_roundtrip_law() {
        let summary = sample_summary();
        let decoded = TransactionExecutionSummary::from_encoded(summary.encoded());

        let before = summary.fields().unwrap();
        let after = decoded.fields().unwrap();

        assert_eq!(after.tx, before.tx);
        assert_eq!(after.value, before.value);
        assert_eq!(after.gas_price, before.gas_price);
        assert_eq!(after.gas_limit, before.gas_limit);
        assert_eq!(after.gas_used, before.gas_used);
        assert_eq!(after.gas_leftover, before.gas_leftover);
        assert_eq!(after.gas_refund, before.gas_refund);
        assert_eq!(after.deleted_accounts, before.deleted_accounts);
        assert_eq!(after.internal_transactions, before.internal_transactions);
        assert_eq!(after.touched_storage, before.touched_storage);
        assert_eq!(after.result, before.result);
        assert_eq!(after.logs, before.logs);
        assert_eq!(after.failed, before.failed);
    }

    #[test]
    fn test_reencode_is_stable() {
        let summary = sample_summary();
        let decoded = TransactionExecutionSummary::from_encoded(summary.encoded());
        assert_eq!(decoded.encoded(), summary.encoded());
    }

    #[test]
    fn test_missing_failed_flag_reads_false() {
        // re-encode the summary without the trailing failed flag
        let summary = sample_summary();
        let data = summary.fields().unwrap();
        let internal = data
            .internal_transactions
            .iter()
            .map(InternalTransaction::encoded)
            .collect::<Vec<_>>();
        let deleted = data
            .deleted_accounts
            .iter()
            .map(|account| rlp::encode_bytes(&account.to_be_bytes()))
            .collect::<Vec<_>>();
        let logs = data.logs.iter().map(LogEntry::encoded).collect::<Vec<_>>();
        let truncated = rlp::encode_list(&[
            data.tx.encoded(),
            rlp::encode_word(&data.value),
            rlp::encode_word(&data.gas_price),
            rlp::encode_word(&data.gas_limit),
            rlp::encode_word(&data.gas_used),
            rlp::encode_word(&data.gas_leftover),
            rlp::encode_word(&data.gas_refund),
            rlp::encode_list(&deleted),
            rlp::encode_list(&internal),
            data.touched_storage.encoded(),
            rlp::encode_bytes(&data.result),
            rlp::encode_list(&logs),
        ]);

        let decoded = TransactionExecutionSummary::from_encoded(truncated);
        assert!(!decoded.is_failed().unwrap());
    }

    #[test]
    fn test_failed_build_rejects_internal_transactions() {
        let summary = TransactionExecutionSummary::builder_for(sample_tx())
            .internal_transactions(vec![InternalTransaction::default()])
            .mark_as_failed()
            .build();
        let data = summary.fields().unwrap();
        assert!(data.failed);
        assert!(data.internal_transactions.iter().all(|tx| tx.rejected));
    }

    #[test]
    fn test_decode_is_lazy() {
        let garbage = TransactionExecutionSummary::from_encoded(vec![0xff, 0xff]);
        // wrapping malformed bytes is fine until a field is read
        assert!(garbage.fields().is_err());
    }

    #[test]
    fn test_touched_storage_merge() {
        let mut touched = TouchedStorage::default();
        touched.add_reading(Word::one(), Word::from(5u64));
        touched.add_writing(Word::one(), Word::from(6u64));
        // a later read never downgrades the write
        touched.add_reading(Word::one(), Word::from(6u64));
        assert_eq!(touched.len(), 1);
        let entry = touched.entries().next().unwrap();
        assert!(entry.changed);
        assert_eq!(entry.value, Word::from(6u64));
    }
}
