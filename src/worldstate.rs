use thiserror::Error;

use crate::{
    common::{
        Word,
        address::{Address, addr},
        call::Call,
        word::decode_error_string,
    },
    config::ChainConfig,
    decoder::Decoder,
    error::{VmError, VmResult},
    interpreter::{Frame, Interpreter},
    provider::TrackRegistry,
    repository::Repository,
    rlp::RlpError,
    summary::{
        InternalTransferData, TouchedStorage, TransactionExecutionSummary, TransactionReceipt,
    },
    tracer::LoggingObserver,
    transaction::{ContractMessage, ContractTransactionData, Transaction},
};

/// Sender used for gas-free local queries.
const VIEW_SENDER: Address = addr("0x00000000000000000000000000000000000000fe");
const VIEW_GAS_PRICE: u64 = 10;
const VIEW_GAS_LIMIT: u64 = 2_000_000;

#[derive(Error, Debug)]
pub enum WorldStateError {
    #[error("Required argument is missing: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid address: '{0}'")]
    InvalidAddress(String),
    #[error("Invalid call data hex")]
    InvalidCallData,
    #[error("Malformed contract message: {0}")]
    Decode(#[from] RlpError),
    #[error("Execution fault: {0}")]
    Vm(#[from] VmError),
}

fn parse_address(value: &str) -> Result<Address, WorldStateError> {
    Address::try_from(value).map_err(|_| WorldStateError::InvalidAddress(value.to_string()))
}

/// World-state orchestrator: validates and applies top-level transfers,
/// turns contract messages into transactions, drives the interpreter and
/// commits the repository partition they ran against.
pub struct WorldState<'a> {
    registry: &'a TrackRegistry,
    config: ChainConfig,
}

impl<'a> WorldState<'a> {
    pub fn new(registry: &'a TrackRegistry, config: ChainConfig) -> Self {
        Self { registry, config }
    }

    /// Move `value` from `from` to `to`. The genesis address may fund the
    /// foundation/creation addresses without holding a balance; everyone
    /// else is debited first, and the credit never runs when the debit
    /// failed.
    pub fn transfer(
        &self,
        db_id: &str,
        from: &str,
        to: &str,
        value: Option<Word>,
    ) -> Result<bool, WorldStateError> {
        if from.is_empty() {
            tracing::error!("transfer failed, from address is empty");
            return Err(WorldStateError::MissingArgument("from"));
        }
        if to.is_empty() {
            tracing::error!("transfer failed, to address is empty");
            return Err(WorldStateError::MissingArgument("to"));
        }
        let Some(value) = value else {
            tracing::error!("transfer failed, value is missing");
            return Err(WorldStateError::MissingArgument("value"));
        };

        let from = parse_address(from)?;
        let to = parse_address(to)?;
        let special_permission = self.config.is_privileged_transfer(&from, &to);

        let track = self.registry.track(db_id);
        let mut repo = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let repo: &mut dyn Repository = &mut *repo;

        let mut result = false;
        if !special_permission {
            result = Self::decrease_balance(repo, &from, value);
        }
        if result || special_permission {
            result = Self::increase_balance(db_id, repo, &to, value);
        }
        Ok(result)
    }

    fn decrease_balance(repo: &mut dyn Repository, address: &Address, value: Word) -> bool {
        if repo.exists(address) && repo.balance(address) >= value {
            repo.sub_balance(address, value);
            return true;
        }
        tracing::error!(%address, %value, "not enough balance to debit");
        false
    }

    fn increase_balance(
        db_id: &str,
        repo: &mut dyn Repository,
        address: &Address,
        value: Word,
    ) -> bool {
        if !repo.exists(address) {
            repo.create_account(address);
        }
        if repo.balance(address) >= Word::zero() {
            repo.add_balance(address, value);
            if let Some(committable) = repo.as_committable() {
                committable.commit(db_id);
            }
            return true;
        }
        tracing::error!(%address, "credit refused, destination balance is negative");
        false
    }

    /// Decode the message payload, execute the transaction it carries and
    /// return the balance changes it caused.
    pub fn execute_contract_message(
        &self,
        db_id: &str,
        message: &ContractMessage,
    ) -> Result<Vec<InternalTransferData>, WorldStateError> {
        let data = ContractTransactionData::decode(&message.data.0)?;
        let sender = parse_address(&message.from_address)?;
        let tx = data.into_transaction(sender);

        let summary = self.execute_transaction(db_id, tx, false, Some(&message.signature.0))?;
        Ok(summary.balance_changes()?.to_vec())
    }

    /// Gas-free local read: the same pipeline, still metered internally,
    /// but nothing it does is ever committed.
    pub fn execute_view_transaction(
        &self,
        db_id: &str,
        address: &str,
        call_data: &str,
    ) -> Result<Vec<u8>, WorldStateError> {
        let to = parse_address(address)?;
        let calldata = hex::decode(call_data.trim_start_matches("0x"))
            .map_err(|_| WorldStateError::InvalidCallData)?;

        let tx = Transaction::new(
            Word::zero(),
            Word::from(VIEW_GAS_PRICE),
            Word::from(VIEW_GAS_LIMIT),
            Some(to),
            Word::zero(),
            calldata,
        )
        .with_sender(VIEW_SENDER);

        let summary = self.execute_transaction(db_id, tx, true, None)?;
        Ok(summary.fields()?.result.clone())
    }

    pub fn get_balance_by_addr(
        &self,
        db_id: &str,
        address: &str,
    ) -> Result<Word, WorldStateError> {
        if address.is_empty() {
            tracing::error!("get balance failed, address is empty");
            return Err(WorldStateError::MissingArgument("address"));
        }
        let address = parse_address(address)?;
        let track = self.registry.track(db_id);
        let repo = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(repo.balance(&address))
    }

    /// Balance lookup against a repository opened by explicit paths.
    pub fn get_balance(
        &self,
        cfg_dir: &str,
        db_path: &str,
        db_id: &str,
        address: &str,
    ) -> Result<Word, WorldStateError> {
        let address = parse_address(address)?;
        let track = self.registry.track_by_path(cfg_dir, db_path, db_id);
        let repo = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let balance = repo.balance(&address);
        tracing::info!(%address, %balance, "balance read");
        Ok(balance)
    }

    /// Out-of-band balance repair: zero the balance, credit the new value
    /// and force a commit.
    pub fn set_balance(
        &self,
        cfg_dir: &str,
        db_path: &str,
        db_id: &str,
        address: &str,
        value: Word,
    ) -> Result<(), WorldStateError> {
        let address = parse_address(address)?;
        let track = self.registry.track_by_path(cfg_dir, db_path, db_id);
        let mut repo = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let balance = repo.balance(&address);
        repo.sub_balance(&address, balance);
        repo.add_balance(&address, value);
        if let Some(committable) = repo.as_committable() {
            committable.commit(db_id);
        }
        tracing::info!(%address, %value, "balance updated");
        Ok(())
    }

    pub fn is_address_exist(
        &self,
        cfg_dir: &str,
        db_path: &str,
        db_id: &str,
        address: &str,
    ) -> Result<bool, WorldStateError> {
        let address = parse_address(address)?;
        let track = self.registry.track_by_path(cfg_dir, db_path, db_id);
        let repo = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(repo.exists(&address))
    }

    /// Full transaction pipeline: intrinsic gas, sender accounting, code
    /// execution, rollback on failure, refund capping, summary, receipt
    /// and commit. Local runs skip sender accounting and leave no trace
    /// in the repository.
    pub fn execute_transaction(
        &self,
        db_id: &str,
        tx: Transaction,
        local: bool,
        signature: Option<&[u8]>,
    ) -> Result<TransactionExecutionSummary, WorldStateError> {
        let track = self.registry.track(db_id);
        let mut guard = track.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let repo: &mut dyn Repository = &mut *guard;
        repo.begin_transaction();

        let schedule = self.config.schedule.clone();
        let gas_limit = tx
            .gas_limit
            .as_u64_checked()
            .ok_or(VmError::GasOverflow)?;

        let zero_bytes = tx.data.iter().filter(|byte| **byte == 0).count() as u64;
        let nonzero_bytes = tx.data.len() as u64 - zero_bytes;
        let intrinsic = schedule.tx
            + zero_bytes * schedule.tx_zero_data
            + nonzero_bytes * schedule.tx_nonzero_data;

        if gas_limit < intrinsic {
            tracing::warn!(gas_limit, intrinsic, "gas limit below intrinsic cost");
            return Ok(Self::rejected_summary(tx));
        }

        let fee_limit = tx.gas_limit * tx.gas_price;
        let sender_nonce = repo.nonce(&tx.sender);
        if !local {
            if repo.balance(&tx.sender) < tx.value + fee_limit {
                tracing::warn!(sender = %tx.sender, "sender cannot cover value and fee");
                return Ok(Self::rejected_summary(tx));
            }
            repo.set_nonce(&tx.sender, sender_nonce + Word::one());
            repo.sub_balance(&tx.sender, fee_limit);
        }

        let is_create = tx.is_create();
        let created = tx.sender.create(sender_nonce);
        let target = match tx.to {
            Some(to) => to,
            None => created,
        };

        let exec_gas = gas_limit - intrinsic;
        let call = Call {
            data: if is_create { vec![] } else { tx.data.clone() },
            value: tx.value,
            origin: tx.sender,
            from: tx.sender,
            to: target,
            gas: exec_gas,
            gas_price: tx.gas_price,
        };
        let mut frame = Frame::new(&call, 0);

        if is_create {
            frame.effects.record_created(&created);
            repo.create_account(&created);
        }
        if !tx.value.is_zero()
            && Interpreter::transfer_value(
                &mut frame.effects,
                repo,
                &tx.sender,
                &target,
                tx.value,
            )
            .is_err()
        {
            tracing::warn!(sender = %tx.sender, "value transfer refused");
            frame.effects.unwind(repo);
            if !local {
                repo.add_balance(&tx.sender, fee_limit);
                repo.set_nonce(&tx.sender, sender_nonce);
            }
            return Ok(Self::rejected_summary(tx));
        }

        let code_bytes = if is_create {
            tx.data.clone()
        } else {
            repo.code(&target)
        };

        let mut interpreter =
            Interpreter::new(self.config.clone()).with_observer(Box::new(LoggingObserver));
        let play_result: VmResult<()> = match Decoder::decode(code_bytes) {
            Ok(code) => interpreter.play(&code, &mut frame, repo),
            Err(fault) => {
                frame.gas.consume_all();
                frame.gas.reset_refund();
                Err(VmError::from(fault))
            }
        };

        let mut failed = play_result.is_err();
        let reverted = frame.reverted && !failed;

        if failed || reverted {
            frame.effects.unwind(repo);
        } else if is_create {
            let code_gas = schedule.create_data * frame.output.len() as u64;
            if frame.gas.charge(code_gas).is_ok() {
                frame.effects.record_code(&created);
                repo.set_code(&created, frame.output.clone());
            } else {
                failed = true;
                frame.gas.consume_all();
                frame.gas.reset_refund();
                frame.effects.unwind(repo);
            }
        }

        let gas_leftover = frame.gas.remaining();
        // refunds only materialize for transactions whose writes survived
        let refund_counter = if failed || reverted {
            0
        } else {
            frame.gas.refund().max(0) as u64
        };
        let refund = refund_counter.min((gas_limit - gas_leftover) / 2);
        let gas_used = gas_limit - gas_leftover - refund;

        if !local {
            let returned = Word::from(gas_leftover + refund) * tx.gas_price;
            repo.add_balance(&tx.sender, returned);
        }

        if reverted {
            if let Some(reason) = decode_error_string(&frame.output) {
                tracing::info!(reason = %reason, "execution reverted");
            }
        }

        let mut touched = TouchedStorage::default();
        for entry in &frame.effects.touched {
            touched.add(entry.clone());
        }

        let status_ok = !failed && !reverted;
        let mut builder = TransactionExecutionSummary::builder_for(tx.clone())
            .gas_used(Word::from(gas_used))
            .gas_leftover(Word::from(gas_leftover))
            .gas_refund(Word::from(refund))
            .internal_transactions(frame.effects.internal_transactions.clone())
            .balance_changes(frame.effects.transfers.clone())
            .deleted_accounts(frame.effects.deleted.iter().map(Address::as_word).collect())
            .touched_storage(touched)
            .logs(frame.effects.logs.clone())
            .result(frame.output.clone());
        if failed || reverted {
            builder = builder.mark_as_failed();
        }
        let summary = builder.build();

        if local {
            // nothing a view transaction did may survive
            frame.effects.unwind(repo);
        } else {
            if status_ok {
                for address in &frame.effects.deleted {
                    repo.delete_account(address);
                }
            }
            let receipt = TransactionReceipt {
                status_ok,
                gas_used: Word::from(gas_used),
                result: frame.output.clone(),
            };
            tracing::info!(
                sender = %tx.sender,
                gas_used,
                status_ok,
                "transaction executed",
            );
            if let Some(signature) = signature {
                if let Some(store) = repo.as_receipt_store() {
                    store.put_receipt(signature, receipt.encoded());
                }
            }
            if let Some(committable) = repo.as_committable() {
                committable.commit(db_id);
            }
        }

        Ok(summary)
    }

    /// Summary for a transaction rejected before any code ran: nothing
    /// charged, nothing changed, marked failed.
    fn rejected_summary(tx: Transaction) -> TransactionExecutionSummary {
        let gas_limit = tx.gas_limit;
        TransactionExecutionSummary::builder_for(tx)
            .gas_used(Word::zero())
            .gas_leftover(gas_limit)
            .gas_refund(Word::zero())
            .mark_as_failed()
            .build()
    }
}
