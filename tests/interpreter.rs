use armature::{
    common::{Word, address::Address, address::addr, call::Call},
    config::ChainConfig,
    decoder::Decoder,
    error::VmError,
    interpreter::{Frame, Interpreter},
    repository::{InMemoryRepository, Repository},
    tracer::CountingObserver,
};

const SENDER: Address = addr("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
const OWNER: Address = addr("0x00000000000000000000000000000000000000aa");
const OTHER: Address = addr("0x00000000000000000000000000000000000000bb");

fn frame_for(gas: u64) -> Frame {
    let call = Call {
        data: vec![],
        value: Word::zero(),
        origin: SENDER,
        from: SENDER,
        to: OWNER,
        gas,
        gas_price: Word::one(),
    };
    Frame::new(&call, 0)
}

fn run_in(
    config: ChainConfig,
    repo: &mut InMemoryRepository,
    code: &[u8],
    gas: u64,
) -> (Frame, Result<(), VmError>) {
    repo.begin_transaction();
    let code = Decoder::decode(code.to_vec()).expect("decode");
    let mut frame = frame_for(gas);
    let mut interpreter = Interpreter::new(config);
    let result = interpreter.play(&code, &mut frame, repo);
    (frame, result)
}

fn run(code: &[u8], gas: u64) -> (Frame, Result<(), VmError>) {
    let mut repo = InMemoryRepository::new();
    run_in(ChainConfig::default(), &mut repo, code, gas)
}

#[test]
fn test_add() {
    // PUSH1 3, PUSH1 2, ADD, STOP
    let (frame, result) = run(&[0x60, 0x03, 0x60, 0x02, 0x01, 0x00], 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::from(5u64));
    assert_eq!(frame.gas.used(), 9);
}

#[test]
fn test_arithmetic_wraps() {
    // PUSH32 max, PUSH1 1, ADD -> 0
    let mut code = vec![0x7f];
    code.extend([0xff; 32]);
    code.extend([0x60, 0x01, 0x01, 0x00]);
    let (frame, result) = run(&code, 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::zero());
}

#[test]
fn test_division_by_zero_yields_zero() {
    // PUSH1 0, PUSH1 10, DIV -> 0, no fault
    let (frame, result) = run(&[0x60, 0x00, 0x60, 0x0a, 0x04, 0x00], 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::zero());
}

#[test]
fn test_exp_gas_scales_with_exponent() {
    // PUSH1 3 (exponent), PUSH1 2 (base), EXP -> 8
    let (frame, result) = run(&[0x60, 0x03, 0x60, 0x02, 0x0a, 0x00], 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::from(8u64));
    // two pushes plus 10 + 50 * one exponent byte
    assert_eq!(frame.gas.used(), 3 + 3 + 60);
}

#[test]
fn test_mstore_mload_roundtrip() {
    // PUSH1 0x42, PUSH1 0, MSTORE, PUSH1 0, MLOAD, STOP
    let (frame, result) = run(&[0x60, 0x42, 0x60, 0x00, 0x52, 0x60, 0x00, 0x51, 0x00], 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::from(0x42u64));
    assert_eq!(frame.memory.size(), 32);
}

#[test]
fn test_memory_expansion_charged_once() {
    // PUSH1 1, PUSH1 0, MSTORE: 3 + 3 + (3 base + 3 expansion)
    let (frame, result) = run(&[0x60, 0x01, 0x60, 0x00, 0x52, 0x00], 1000);
    result.unwrap();
    assert_eq!(frame.gas.used(), 12);
}

#[test]
fn test_out_of_gas_leaves_no_mutation() {
    // PUSH1 1, PUSH1 0, SSTORE with far too little gas
    let mut repo = InMemoryRepository::new();
    let (frame, result) = run_in(
        ChainConfig::default(),
        &mut repo,
        &[0x60, 0x01, 0x60, 0x00, 0x55],
        100,
    );
    assert_eq!(result, Err(VmError::OutOfGas));
    assert_eq!(repo.storage(&OWNER, &Word::zero()), Word::zero());
    assert_eq!(frame.gas.remaining(), 0);
    assert_eq!(frame.gas.refund(), 0);
}

#[test]
fn test_stack_underflow() {
    let (frame, result) = run(&[0x01], 1000);
    assert!(matches!(result, Err(VmError::StackUnderflow { .. })));
    assert_eq!(frame.gas.remaining(), 0);
}

#[test]
fn test_stack_overflow() {
    let mut code = Vec::new();
    for _ in 0..1025 {
        code.extend([0x60, 0x01]);
    }
    let (_, result) = run(&code, 100_000);
    assert_eq!(result, Err(VmError::StackOverflow));
}

#[test]
fn test_invalid_jump_destination() {
    // PUSH1 3, JUMP: offset 3 is not a JUMPDEST
    let (_, result) = run(&[0x60, 0x03, 0x56, 0x00], 1000);
    assert_eq!(result, Err(VmError::InvalidJump));

    // jump into PUSH payload is rejected even if the byte matches 0x5b
    let (_, result) = run(&[0x60, 0x5b, 0x56], 1000);
    assert_eq!(result, Err(VmError::InvalidJump));
}

#[test]
fn test_jump_and_jumpi() {
    // PUSH1 4, JUMP, INVALID, JUMPDEST, STOP
    let (_, result) = run(&[0x60, 0x04, 0x56, 0xfe, 0x5b, 0x00], 1000);
    result.unwrap();

    // PUSH1 0 (cond), PUSH1 6 (dest), JUMPI not taken, STOP, JUMPDEST
    let (_, result) = run(&[0x60, 0x00, 0x60, 0x06, 0x57, 0x00, 0x5b], 1000);
    result.unwrap();

    // PUSH1 1 (cond), PUSH1 6 (dest), JUMPI taken over the INVALID
    let (_, result) = run(&[0x60, 0x01, 0x60, 0x06, 0x57, 0xfe, 0x5b, 0x00], 1000);
    result.unwrap();
}

#[test]
fn test_invalid_opcode_consumes_all_gas() {
    let (frame, result) = run(&[0xfe], 1000);
    assert_eq!(result, Err(VmError::InvalidOpcode(0xfe)));
    assert_eq!(frame.gas.remaining(), 0);

    // unknown byte is an invalid-opcode fault as well
    let (_, result) = run(&[0x4b], 1000);
    assert_eq!(result, Err(VmError::InvalidOpcode(0x4b)));
}

#[test]
fn test_disallowed_opcode_under_legacy_config() {
    let mut repo = InMemoryRepository::new();
    // PUSH1 1, PUSH1 1, SHL
    let (_, result) = run_in(
        ChainConfig::legacy(),
        &mut repo,
        &[0x60, 0x01, 0x60, 0x01, 0x1b],
        1000,
    );
    assert_eq!(result, Err(VmError::DisallowedOpcode(0x1b)));
}

#[test]
fn test_sstore_legacy_set_and_clear() {
    let legacy = ChainConfig::legacy();

    // zero -> nonzero charges the set cost, schedules nothing
    let mut repo = InMemoryRepository::new();
    let (frame, result) = run_in(
        legacy.clone(),
        &mut repo,
        &[0x60, 0x05, 0x60, 0x01, 0x55, 0x00],
        30_000,
    );
    result.unwrap();
    assert_eq!(frame.gas.used(), 3 + 3 + 20_000);
    assert_eq!(frame.gas.refund(), 0);
    assert_eq!(repo.storage(&OWNER, &Word::one()), Word::from(5u64));

    // nonzero -> zero charges the clear cost and schedules the refund
    let mut repo = InMemoryRepository::new();
    repo.set_storage(&OWNER, Word::one(), Word::from(5u64));
    let (frame, result) = run_in(
        legacy,
        &mut repo,
        &[0x60, 0x00, 0x60, 0x01, 0x55, 0x00],
        30_000,
    );
    result.unwrap();
    assert_eq!(frame.gas.used(), 3 + 3 + 5_000);
    assert_eq!(frame.gas.refund(), 15_000);
}

#[test]
fn test_sstore_net_metered_dirty_restore() {
    // slot originally 5: write 0 (clear + refund), then write 5 back
    // (reuse cost, the refund is cancelled and the restore bonus applies)
    let mut repo = InMemoryRepository::new();
    repo.set_storage(&OWNER, Word::one(), Word::from(5u64));
    let code = [
        0x60, 0x00, 0x60, 0x01, 0x55, // SSTORE key 1 <- 0
        0x60, 0x05, 0x60, 0x01, 0x55, // SSTORE key 1 <- 5
        0x00,
    ];
    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 30_000);
    result.unwrap();
    assert_eq!(frame.gas.used(), 4 * 3 + 5_000 + 200);
    assert_eq!(frame.gas.refund(), 15_000 - 15_000 + (5_000 - 200));
    assert_eq!(repo.storage(&OWNER, &Word::one()), Word::from(5u64));
}

#[test]
fn test_static_frame_rejects_sstore() {
    let mut repo = InMemoryRepository::new();
    repo.begin_transaction();
    let code = Decoder::decode(vec![0x60, 0x01, 0x60, 0x00, 0x55]).unwrap();
    let mut frame = frame_for(30_000).with_static(true);
    let mut interpreter = Interpreter::new(ChainConfig::default());
    let result = interpreter.play(&code, &mut frame, &mut repo);
    assert_eq!(result, Err(VmError::StaticCallViolation(0x55)));
    assert_eq!(repo.storage(&OWNER, &Word::zero()), Word::zero());
}

#[test]
fn test_revert_is_not_a_fault() {
    // PUSH1 0, PUSH1 0, REVERT
    let (frame, result) = run(&[0x60, 0x00, 0x60, 0x00, 0xfd], 1000);
    result.unwrap();
    assert!(frame.reverted);
    assert!(frame.output.is_empty());
    // gas charged so far stays spent, the rest is still there
    assert_eq!(frame.gas.used(), 6);
}

#[test]
fn test_return_payload() {
    // PUSH1 4, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
    let (frame, result) = run(
        &[0x60, 0x04, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3],
        10_000,
    );
    result.unwrap();
    assert!(!frame.reverted);
    assert_eq!(frame.output.len(), 32);
    assert_eq!(frame.output[31], 4);
}

fn call_code(target: &Address, gas: u16) -> Vec<u8> {
    // out_size, out_offset, in_size, in_offset, value, target, gas, CALL
    let mut code = vec![
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00,
    ];
    code.push(0x73); // PUSH20
    code.extend_from_slice(&target.0);
    code.push(0x61); // PUSH2
    code.extend_from_slice(&gas.to_be_bytes());
    code.push(0xf1);
    code
}

#[test]
fn test_nested_call_failure_is_contained() {
    // the caller stores 1 at key 0, then calls a contract that runs out
    // of gas trying to store: the caller's write survives, the callee's
    // does not, and the failure lands as a zero on the caller's stack
    let mut repo = InMemoryRepository::new();
    repo.set_code(&OTHER, vec![0x60, 0x07, 0x60, 0x00, 0x55, 0x00]);

    let mut code = vec![0x60, 0x01, 0x60, 0x00, 0x55];
    code.extend(call_code(&OTHER, 100));
    code.push(0x00);

    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 100_000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::zero());
    assert_eq!(repo.storage(&OWNER, &Word::zero()), Word::one());
    assert_eq!(repo.storage(&OTHER, &Word::zero()), Word::zero());
}

#[test]
fn test_call_copies_return_data() {
    // callee returns one word holding 0x2a
    let mut repo = InMemoryRepository::new();
    repo.set_code(
        &OTHER,
        vec![0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3],
    );

    // out region (0, 32), then load it back
    let mut code = vec![
        0x60, 0x20, // out_size
        0x60, 0x00, // out_offset
        0x60, 0x00, // in_size
        0x60, 0x00, // in_offset
        0x60, 0x00, // value
    ];
    code.push(0x73);
    code.extend_from_slice(&OTHER.0);
    code.extend([0x61, 0xff, 0xff, 0xf1]); // PUSH2 0xffff, CALL
    code.extend([0x60, 0x00, 0x51, 0x00]); // PUSH1 0, MLOAD, STOP

    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 100_000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::from(0x2au64));
    assert_eq!(frame.stack.peek(1).unwrap(), Word::one());
    assert_eq!(frame.ret_buf.len(), 32);
}

#[test]
fn test_call_value_transfer_and_surcharges() {
    // calling a fresh account with value pays the transfer and
    // new-account surcharges on top of the base call cost
    let mut repo = InMemoryRepository::new();
    repo.create_account(&OWNER);
    repo.set_balance(&OWNER, Word::from(100u64));

    let mut code = vec![
        0x60, 0x00, // out_size
        0x60, 0x00, // out_offset
        0x60, 0x00, // in_size
        0x60, 0x00, // in_offset
        0x60, 0x19, // value 25
    ];
    code.push(0x73);
    code.extend_from_slice(&OTHER.0);
    code.extend([0x61, 0x00, 0x00, 0xf1, 0x00]); // PUSH2 0, CALL, STOP

    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 100_000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::one());
    assert_eq!(repo.balance(&OTHER), Word::from(25u64));
    assert_eq!(repo.balance(&OWNER), Word::from(75u64));
    assert_eq!(frame.effects.transfers.len(), 1);
    // 7 pushes, call base, value transfer and new-account surcharges; the
    // callee is empty so the whole stipend comes back unspent
    assert_eq!(frame.gas.used(), 7 * 3 + 700 + 9_000 + 25_000 - 2_300);
}

#[test]
fn test_precompile_identity_short_circuits() {
    // mem[0] = 0xaa, call identity with in (0,1) -> out (32,1)
    let mut repo = InMemoryRepository::new();
    let identity = Address::from(&Word::from(4u64));

    let mut code = vec![0x60, 0xaa, 0x60, 0x00, 0x53]; // MSTORE8
    code.extend([
        0x60, 0x01, // out_size
        0x60, 0x20, // out_offset
        0x60, 0x01, // in_size
        0x60, 0x00, // in_offset
        0x60, 0x00, // value
    ]);
    code.push(0x73);
    code.extend_from_slice(&identity.0);
    code.extend([0x61, 0x20, 0x00, 0xf1, 0x00]); // PUSH2 8192, CALL, STOP

    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 100_000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::one());
    assert_eq!(frame.memory.load_slice(0x20, 1), vec![0xaa]);
    assert_eq!(frame.ret_buf, vec![0xaa]);
}

#[test]
fn test_create_installs_returned_code() {
    // init code: mem[0] = 0x2a, return 1 byte -> runtime code [0x2a]
    let init: [u8; 10] = [0x60, 0x2a, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];

    // PUSH10 init, MSTORE at 0 (right-aligned: init starts at 22)
    let mut code = vec![0x69];
    code.extend_from_slice(&init);
    code.extend([0x60, 0x00, 0x52]);
    code.extend([0x60, 0x0a, 0x60, 0x16, 0x60, 0x00, 0xf0, 0x00]); // size, offset, value, CREATE

    let mut repo = InMemoryRepository::new();
    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 200_000);
    result.unwrap();

    let created = OWNER.create(Word::zero());
    assert_eq!(frame.stack.peek(0).unwrap(), created.as_word());
    assert_eq!(repo.code(&created), vec![0x2a]);
    assert_eq!(repo.nonce(&OWNER), Word::one());
}

#[test]
fn test_suicide_moves_balance_and_marks_deletion() {
    let mut repo = InMemoryRepository::new();
    repo.create_account(&OWNER);
    repo.set_balance(&OWNER, Word::from(100u64));
    repo.create_account(&OTHER);

    let mut code = vec![0x73];
    code.extend_from_slice(&OTHER.0);
    code.push(0xff);

    let (frame, result) = run_in(ChainConfig::default(), &mut repo, &code, 100_000);
    result.unwrap();
    assert_eq!(repo.balance(&OTHER), Word::from(100u64));
    assert_eq!(repo.balance(&OWNER), Word::zero());
    assert_eq!(frame.effects.deleted, vec![OWNER]);
}

#[test]
fn test_observer_hook_points() {
    use std::{cell::RefCell, rc::Rc};

    let counter = Rc::new(RefCell::new(CountingObserver::default()));
    let code = Decoder::decode(vec![0x60, 0x01, 0x00]).unwrap();
    let mut repo = InMemoryRepository::new();
    let mut frame = frame_for(1000);
    let mut interpreter =
        Interpreter::new(ChainConfig::default()).with_observer(Box::new(counter.clone()));
    interpreter.play(&code, &mut frame, &mut repo).unwrap();

    let counter = counter.borrow();
    assert_eq!(counter.steps, 2);
    assert_eq!(counter.frames_started, 1);
    assert_eq!(counter.frames_ended, 1);
}

#[test]
fn test_returndatacopy_bounds() {
    // no call happened, the buffer is empty: copying one byte faults
    let (_, result) = run(&[0x60, 0x01, 0x60, 0x00, 0x60, 0x00, 0x3e], 10_000);
    assert_eq!(result, Err(VmError::ReturnDataOutOfBounds));
}

#[test]
fn test_signed_comparisons() {
    // -1 < 1 signed: PUSH 1, PUSH32 -1, SLT -> 1
    let mut code = vec![0x60, 0x01, 0x7f];
    code.extend([0xff; 32]);
    code.extend([0x12, 0x00]);
    let (frame, result) = run(&code, 1000);
    result.unwrap();
    assert_eq!(frame.stack.peek(0).unwrap(), Word::one());
}
