use std::collections::{BTreeMap, HashMap};

use crate::common::{Word, account::Account, address::Address, hash::keccak256};

/// Commit support, discovered by capability rather than concrete type.
pub trait Committable {
    fn commit(&mut self, db_id: &str);
}

/// Receipt persistence, keyed by the transaction signature bytes.
pub trait ReceiptStore {
    fn put_receipt(&mut self, key: &[u8], receipt: Vec<u8>);
    fn receipt(&self, key: &[u8]) -> Option<&[u8]>;
}

/// The narrow capability surface the engine needs from the external
/// account/storage store. The trie mechanics behind it are not modeled
/// here; an in-memory implementation stands in for them.
pub trait Repository {
    fn exists(&self, address: &Address) -> bool;
    fn create_account(&mut self, address: &Address);
    fn delete_account(&mut self, address: &Address);

    fn account(&self, address: &Address) -> Account;
    fn balance(&self, address: &Address) -> Word;
    fn set_balance(&mut self, address: &Address, value: Word);
    fn add_balance(&mut self, address: &Address, value: Word);
    fn sub_balance(&mut self, address: &Address, value: Word);
    fn nonce(&self, address: &Address) -> Word;
    fn set_nonce(&mut self, address: &Address, value: Word);

    fn code(&self, address: &Address) -> Vec<u8>;
    fn set_code(&mut self, address: &Address, code: Vec<u8>);
    fn clear_code(&mut self, address: &Address);
    fn code_hash(&self, address: &Address) -> Word;

    fn storage(&self, address: &Address, key: &Word) -> Word;
    fn set_storage(&mut self, address: &Address, key: Word, value: Word);
    /// Value the slot held when the current transaction started.
    fn original_storage(&self, address: &Address, key: &Word) -> Word;

    /// Seal the original-value snapshot for the next transaction.
    fn begin_transaction(&mut self);

    /// Dead account: missing, or existing with no balance, nonce or code.
    fn is_empty_account(&self, address: &Address) -> bool {
        !self.exists(address) || self.account(address).is_empty()
    }

    fn as_committable(&mut self) -> Option<&mut dyn Committable> {
        None
    }

    fn as_receipt_store(&mut self) -> Option<&mut dyn ReceiptStore> {
        None
    }
}

#[derive(Clone, Debug, Default)]
struct AccountState {
    account: Account,
    storage: BTreeMap<Word, Word>,
    code: Vec<u8>,
}

/// Hash-map backed repository with commit and receipt capabilities.
#[derive(Default)]
pub struct InMemoryRepository {
    state: HashMap<Address, AccountState>,
    original: HashMap<(Address, Word), Word>,
    receipts: HashMap<Vec<u8>, Vec<u8>>,
    commits: u64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    fn entry(&mut self, address: &Address) -> &mut AccountState {
        self.state.entry(*address).or_default()
    }
}

impl Repository for InMemoryRepository {
    fn exists(&self, address: &Address) -> bool {
        self.state.contains_key(address)
    }

    fn create_account(&mut self, address: &Address) {
        self.state.entry(*address).or_default();
    }

    fn delete_account(&mut self, address: &Address) {
        self.state.remove(address);
    }

    fn account(&self, address: &Address) -> Account {
        self.state
            .get(address)
            .map(|s| s.account.clone())
            .unwrap_or_default()
    }

    fn balance(&self, address: &Address) -> Word {
        self.account(address).balance
    }

    fn set_balance(&mut self, address: &Address, value: Word) {
        self.entry(address).account.balance = value;
    }

    fn add_balance(&mut self, address: &Address, value: Word) {
        let account = &mut self.entry(address).account;
        account.balance += value;
    }

    fn sub_balance(&mut self, address: &Address, value: Word) {
        let account = &mut self.entry(address).account;
        account.balance -= value;
    }

    fn nonce(&self, address: &Address) -> Word {
        self.account(address).nonce
    }

    fn set_nonce(&mut self, address: &Address, value: Word) {
        self.entry(address).account.nonce = value;
    }

    fn code(&self, address: &Address) -> Vec<u8> {
        self.state
            .get(address)
            .map(|s| s.code.clone())
            .unwrap_or_default()
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        let state = self.entry(address);
        state.account.code_hash = Word::from_bytes(&keccak256(&code));
        state.code = code;
    }

    fn clear_code(&mut self, address: &Address) {
        let state = self.entry(address);
        state.account.code_hash = Word::zero();
        state.code.clear();
    }

    fn code_hash(&self, address: &Address) -> Word {
        self.account(address).code_hash
    }

    fn storage(&self, address: &Address, key: &Word) -> Word {
        self.state
            .get(address)
            .and_then(|s| s.storage.get(key).copied())
            .unwrap_or_default()
    }

    fn set_storage(&mut self, address: &Address, key: Word, value: Word) {
        let current = self.storage(address, &key);
        self.original.entry((*address, key)).or_insert(current);
        self.entry(address).storage.insert(key, value);
    }

    fn original_storage(&self, address: &Address, key: &Word) -> Word {
        self.original
            .get(&(*address, *key))
            .copied()
            .unwrap_or_else(|| self.storage(address, key))
    }

    fn begin_transaction(&mut self) {
        self.original.clear();
    }

    fn as_committable(&mut self) -> Option<&mut dyn Committable> {
        Some(self)
    }

    fn as_receipt_store(&mut self) -> Option<&mut dyn ReceiptStore> {
        Some(self)
    }
}

impl Committable for InMemoryRepository {
    fn commit(&mut self, db_id: &str) {
        self.original.clear();
        self.commits += 1;
        tracing::debug!(db_id, commits = self.commits, "repository committed");
    }
}

impl ReceiptStore for InMemoryRepository {
    fn put_receipt(&mut self, key: &[u8], receipt: Vec<u8>) {
        self.receipts.insert(key.to_vec(), receipt);
    }

    fn receipt(&self, key: &[u8]) -> Option<&[u8]> {
        self.receipts.get(key).map(Vec::as_slice)
    }
}
