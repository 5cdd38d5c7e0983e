use armature::{
    common::{Hex, Word, address::Address, address::addr},
    config::ChainConfig,
    provider::TrackRegistry,
    repository::Repository,
    transaction::{ContractMessage, ContractTransactionData, Transaction},
    worldstate::{WorldState, WorldStateError},
};

const SENDER: Address = addr("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
const OTHER: Address = addr("0x00000000000000000000000000000000000000bb");

const DB: &str = "0_6";

fn fund(registry: &TrackRegistry, db_id: &str, address: &Address, amount: u64) {
    let track = registry.track(db_id);
    let mut repo = track.lock().unwrap();
    repo.create_account(address);
    repo.set_balance(address, Word::from(amount));
}

fn balance(registry: &TrackRegistry, db_id: &str, address: &Address) -> Word {
    registry.track(db_id).lock().unwrap().balance(address)
}

fn message(to: Option<Address>, value: u64, calldata: Vec<u8>) -> ContractMessage {
    let data = ContractTransactionData {
        nonce: Word::zero(),
        gas_price: Word::one(),
        gas_limit: Word::from(1_000_000u64),
        to_address: to,
        value: Word::from(value),
        calldata,
    };
    ContractMessage {
        from_address: format!("{SENDER}"),
        signature: Hex(vec![0x01, 0x02, 0x03]),
        data: Hex(data.encoded()),
    }
}

#[test]
fn test_transfer_requires_arguments() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());

    assert!(matches!(
        ws.transfer(DB, "", &format!("{OTHER}"), Some(Word::one())),
        Err(WorldStateError::MissingArgument("from"))
    ));
    assert!(matches!(
        ws.transfer(DB, &format!("{SENDER}"), "", Some(Word::one())),
        Err(WorldStateError::MissingArgument("to"))
    ));
    assert!(matches!(
        ws.transfer(DB, &format!("{SENDER}"), &format!("{OTHER}"), None),
        Err(WorldStateError::MissingArgument("value"))
    ));
}

#[test]
fn test_transfer_atomicity() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10);

    // debit failure never credits the destination
    let ok = ws
        .transfer(DB, &format!("{SENDER}"), &format!("{OTHER}"), Some(Word::from(100u64)))
        .unwrap();
    assert!(!ok);
    assert_eq!(balance(&registry, DB, &SENDER), Word::from(10u64));
    assert_eq!(balance(&registry, DB, &OTHER), Word::zero());

    // a missing sender account fails the same way
    let ok = ws
        .transfer(DB, &format!("{OTHER}"), &format!("{SENDER}"), Some(Word::one()))
        .unwrap();
    assert!(!ok);
}

#[test]
fn test_transfer_moves_value() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 100);

    let ok = ws
        .transfer(DB, &format!("{SENDER}"), &format!("{OTHER}"), Some(Word::from(40u64)))
        .unwrap();
    assert!(ok);
    assert_eq!(balance(&registry, DB, &SENDER), Word::from(60u64));
    assert_eq!(balance(&registry, DB, &OTHER), Word::from(40u64));
}

#[test]
fn test_privileged_transfer_skips_debit() {
    let registry = TrackRegistry::new();
    let config = ChainConfig::default();
    let god = config.god_address;
    let foundation = config.foundation_address;
    let ws = WorldState::new(&registry, config);

    // the genesis address holds nothing, the credit still goes through
    let ok = ws
        .transfer(DB, &format!("{god}"), &format!("{foundation}"), Some(Word::from(1_000u64)))
        .unwrap();
    assert!(ok);
    assert_eq!(balance(&registry, DB, &foundation), Word::from(1_000u64));
    assert_eq!(balance(&registry, DB, &god), Word::zero());
}

// initialization code that installs `mem[0..10]` of itself, i.e. the
// runtime code PUSH1 42, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
const RUNTIME: [u8; 10] = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

fn deploy_code() -> Vec<u8> {
    let mut init = vec![
        0x60, 0x0a, // length of the runtime code
        0x60, 0x0c, // offset of the runtime code in this blob
        0x60, 0x00, // destination
        0x39, // CODECOPY
        0x60, 0x0a, 0x60, 0x00, 0xf3, // RETURN mem[0..10]
    ];
    init.extend_from_slice(&RUNTIME);
    init
}

#[test]
fn test_deploy_and_view() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10_000_000);

    let changes = ws
        .execute_contract_message(DB, &message(None, 0, deploy_code()))
        .unwrap();
    assert!(changes.is_empty());

    let created = SENDER.create(Word::zero());
    {
        let track = registry.track(DB);
        let mut repo = track.lock().unwrap();
        assert_eq!(repo.code(&created), RUNTIME.to_vec());
        assert_eq!(repo.nonce(&SENDER), Word::one());
        // the receipt is stored under the message signature
        let receipts = repo.as_receipt_store().unwrap();
        assert!(receipts.receipt(&[0x01, 0x02, 0x03]).is_some());
    }

    // sender paid for the gas that was used
    assert!(balance(&registry, DB, &SENDER) < Word::from(10_000_000u64));

    // the gas-free view goes through the same pipeline without commits
    let before = balance(&registry, DB, &SENDER);
    let ret = ws
        .execute_view_transaction(DB, &format!("{created}"), "00000000")
        .unwrap();
    assert_eq!(ret.len(), 32);
    assert_eq!(ret[31], 42);
    assert_eq!(balance(&registry, DB, &SENDER), before);
}

#[test]
fn test_decode_failure_is_reported() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());

    let message = ContractMessage {
        from_address: format!("{SENDER}"),
        signature: Hex(vec![0x01]),
        data: Hex(vec![0xde, 0xad, 0xbe, 0xef]),
    };
    assert!(matches!(
        ws.execute_contract_message(DB, &message),
        Err(WorldStateError::Decode(_))
    ));
}

#[test]
fn test_view_transaction_is_metered() {
    // an infinite loop terminates by gas exhaustion, not by hanging
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    {
        let track = registry.track(DB);
        let mut repo = track.lock().unwrap();
        repo.set_code(&OTHER, vec![0x5b, 0x60, 0x00, 0x56]); // JUMPDEST, PUSH1 0, JUMP
    }
    let ret = ws
        .execute_view_transaction(DB, &format!("{OTHER}"), "")
        .unwrap();
    assert!(ret.is_empty());
}

#[test]
fn test_message_transfer_to_plain_account() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10_000_000);

    let changes = ws
        .execute_contract_message(DB, &message(Some(OTHER), 25, vec![]))
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].from, SENDER);
    assert_eq!(changes[0].to, OTHER);
    assert_eq!(changes[0].value, Word::from(25u64));
    assert_eq!(balance(&registry, DB, &OTHER), Word::from(25u64));
}

#[test]
fn test_storage_write_transaction() {
    // runtime that stores 42 at key 0
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10_000_000);
    {
        let track = registry.track(DB);
        let mut repo = track.lock().unwrap();
        repo.set_code(&OTHER, vec![0x60, 0x2a, 0x60, 0x00, 0x55, 0x00]);
    }

    let tx = Transaction::new(
        Word::zero(),
        Word::one(),
        Word::from(1_000_000u64),
        Some(OTHER),
        Word::zero(),
        vec![],
    )
    .with_sender(SENDER);
    let summary = ws.execute_transaction(DB, tx, false, None).unwrap();

    let fields = summary.fields().unwrap();
    assert!(!fields.failed);
    // intrinsic plus two pushes plus the fresh-slot set cost
    assert_eq!(fields.gas_used, Word::from(21_000 + 6 + 20_000u64));
    assert_eq!(fields.gas_refund, Word::zero());
    assert_eq!(fields.touched_storage.len(), 1);
    assert!(fields.touched_storage.entries().next().unwrap().changed);

    let track = registry.track(DB);
    let repo = track.lock().unwrap();
    assert_eq!(repo.storage(&OTHER, &Word::zero()), Word::from(42u64));
}

#[test]
fn test_failed_transaction_burns_gas_and_rolls_back() {
    // store then hit INVALID: the write is rolled back, the gas is gone,
    // the transaction still produces a failed summary
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10_000_000);
    {
        let track = registry.track(DB);
        let mut repo = track.lock().unwrap();
        repo.set_code(&OTHER, vec![0x60, 0x01, 0x60, 0x00, 0x55, 0xfe]);
    }

    let gas_limit = 100_000u64;
    let tx = Transaction::new(
        Word::zero(),
        Word::one(),
        Word::from(gas_limit),
        Some(OTHER),
        Word::zero(),
        vec![],
    )
    .with_sender(SENDER);
    let summary = ws.execute_transaction(DB, tx, false, None).unwrap();

    let fields = summary.fields().unwrap();
    assert!(fields.failed);
    assert_eq!(fields.gas_used, Word::from(gas_limit));
    assert_eq!(fields.gas_leftover, Word::zero());

    let track = registry.track(DB);
    let repo = track.lock().unwrap();
    assert_eq!(repo.storage(&OTHER, &Word::zero()), Word::zero());
    assert_eq!(
        repo.balance(&SENDER),
        Word::from(10_000_000 - gas_limit)
    );
    // the sender's nonce still moved: the transaction was processed
    assert_eq!(repo.nonce(&SENDER), Word::one());
}

#[test]
fn test_summary_roundtrip_from_execution() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());
    fund(&registry, DB, &SENDER, 10_000_000);
    {
        let track = registry.track(DB);
        let mut repo = track.lock().unwrap();
        repo.set_code(&OTHER, vec![0x60, 0x2a, 0x60, 0x00, 0x55, 0x00]);
    }

    let tx = Transaction::new(
        Word::zero(),
        Word::one(),
        Word::from(1_000_000u64),
        Some(OTHER),
        Word::zero(),
        vec![0x01, 0x00, 0x02],
    )
    .with_sender(SENDER);
    let summary = ws.execute_transaction(DB, tx, false, None).unwrap();

    let decoded =
        armature::summary::TransactionExecutionSummary::from_encoded(summary.encoded());
    let before = summary.fields().unwrap();
    let after = decoded.fields().unwrap();
    assert_eq!(after.tx, before.tx);
    assert_eq!(after.gas_used, before.gas_used);
    assert_eq!(after.touched_storage, before.touched_storage);
    assert_eq!(after.failed, before.failed);
}

#[test]
fn test_out_of_band_balance_repair() {
    let registry = TrackRegistry::new();
    let ws = WorldState::new(&registry, ChainConfig::default());

    let address = format!("{OTHER}");
    ws.set_balance("/etc/root.cfg", "/var/db", "0_6", &address, Word::from(777u64))
        .unwrap();
    assert_eq!(
        ws.get_balance("/etc/root.cfg", "/var/db", "0_6", &address).unwrap(),
        Word::from(777u64)
    );
    assert!(
        ws.is_address_exist("/etc/root.cfg", "/var/db", "0_6", &address)
            .unwrap()
    );
    assert!(
        !ws.is_address_exist("/etc/root.cfg", "/var/db", "0_6", &format!("{SENDER}"))
            .unwrap()
    );

    // the path-addressed repository is not the default registry entry
    assert_eq!(
        ws.get_balance_by_addr("0_6", &address).unwrap(),
        Word::zero()
    );
}
