//! The mempool: pending transactions awaiting inclusion, with gas-price
//! priority ordering and per-account nonce discipline.
//!
//! Every candidate passes the embedded [`TxValidator`] before it is stored:
//! structural checks, gas and balance coverage, and a bounded nonce
//! look-ahead window. The account states the validator reads are fed in by
//! the RPC layer through [`Mempool::update_account_state`]; nothing in the
//! core writes balances (execution is an external collaborator).

use std::collections::HashMap;

use serde::Serialize;

use crate::constants::NONCE_LOOKAHEAD;
use crate::transaction::Transaction;

/// Gas-related rejection reasons.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GasFault {
    #[error("gas price cannot be zero")]
    ZeroPrice,
    #[error("gas price {got} below minimum {min}")]
    BelowMinimum { got: u128, min: u128 },
    #[error("gas limit {got} outside [1, {max}]")]
    LimitOutOfRange { got: u64, max: u64 },
    #[error("account {0} not known for gas validation")]
    UnknownAccount(String),
}

/// Nonce-window rejection reasons.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NonceFault {
    #[error("nonce {got} is below the account nonce {current}")]
    TooLow { got: u64, current: u64 },
    #[error("nonce {got} is too far ahead of the account nonce {current}")]
    TooFarAhead { got: u64, current: u64 },
}

/// Per-transaction validation faults, surfaced to the submitter.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TxValidationError {
    #[error("malformed transaction: {0}")]
    Structure(&'static str),
    #[error("gas validation failed: {0}")]
    Gas(#[from] GasFault),
    #[error("nonce validation failed: {0}")]
    Nonce(#[from] NonceFault),
    #[error("insufficient balance: have {balance}, need {required}")]
    Balance { balance: u128, required: u128 },
}

/// Mempool-level faults.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("mempool is full (max size: {max})")]
    Full { max: usize },
    #[error("transaction validation failed: {0}")]
    Validation(#[from] TxValidationError),
}

/// Known balance and nonce of an account, as reported by the state layer.
#[derive(Clone, Debug, Default)]
pub struct AccountState {
    pub balance: u128,
    pub nonce: u64,
}

/// Validates candidate transactions against account state and gas policy.
pub struct TxValidator {
    accounts: HashMap<String, AccountState>,
    min_gas_price: u128,
    max_gas_limit: u64,
}

impl TxValidator {
    pub fn new(min_gas_price: u128, max_gas_limit: u64) -> Self {
        TxValidator {
            accounts: HashMap::new(),
            min_gas_price,
            max_gas_limit,
        }
    }

    /// Record the balance and nonce of an account.
    pub fn set_account_state(&mut self, address: &str, balance: u128, nonce: u64) {
        self.accounts
            .insert(address.to_string(), AccountState { balance, nonce });
    }

    /// A copy of the tracked state for an account.
    pub fn account_state(&self, address: &str) -> Option<AccountState> {
        self.accounts.get(address).cloned()
    }

    /// Run all checks in order: structure, gas, account state, signature hook.
    pub fn validate(&self, tx: &Transaction) -> Result<(), TxValidationError> {
        self.check_structure(tx)?;
        self.check_gas(tx)?;
        self.check_account_state(tx)?;
        self.check_signature(tx)?;
        Ok(())
    }

    fn check_structure(&self, tx: &Transaction) -> Result<(), TxValidationError> {
        if tx.from.is_empty() {
            return Err(TxValidationError::Structure("from address is empty"));
        }
        if tx.to.is_empty() {
            return Err(TxValidationError::Structure("to address is empty"));
        }
        if tx.from == tx.to {
            return Err(TxValidationError::Structure("cannot send to self"));
        }
        if tx.value == 0 {
            return Err(TxValidationError::Structure("value cannot be zero"));
        }
        if tx.hash.is_empty() {
            return Err(TxValidationError::Structure("hash is empty"));
        }
        Ok(())
    }

    fn check_gas(&self, tx: &Transaction) -> Result<(), TxValidationError> {
        if tx.gas_price == 0 {
            return Err(GasFault::ZeroPrice.into());
        }
        if tx.gas_price < self.min_gas_price {
            return Err(GasFault::BelowMinimum {
                got: tx.gas_price,
                min: self.min_gas_price,
            }
            .into());
        }
        if tx.gas_limit == 0 || tx.gas_limit > self.max_gas_limit {
            return Err(GasFault::LimitOutOfRange {
                got: tx.gas_limit,
                max: self.max_gas_limit,
            }
            .into());
        }

        let account = self
            .accounts
            .get(&tx.from)
            .ok_or_else(|| GasFault::UnknownAccount(tx.from.clone()))?;
        let required = tx
            .max_cost()
            .ok_or(TxValidationError::Structure("cost overflows"))?;
        if account.balance < required {
            return Err(TxValidationError::Balance {
                balance: account.balance,
                required,
            });
        }
        Ok(())
    }

    fn check_account_state(&self, tx: &Transaction) -> Result<(), TxValidationError> {
        let account = self
            .accounts
            .get(&tx.from)
            .ok_or_else(|| GasFault::UnknownAccount(tx.from.clone()))?;
        if tx.nonce < account.nonce {
            return Err(NonceFault::TooLow {
                got: tx.nonce,
                current: account.nonce,
            }
            .into());
        }
        if tx.nonce > account.nonce + NONCE_LOOKAHEAD {
            return Err(NonceFault::TooFarAhead {
                got: tx.nonce,
                current: account.nonce,
            }
            .into());
        }
        Ok(())
    }

    fn check_signature(&self, _tx: &Transaction) -> Result<(), TxValidationError> {
        // TODO: validate the sender's PQ signature once transactions carry
        // a signature field (requires the TX-domain verification path).
        Ok(())
    }
}

/// Summary statistics for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct MempoolStats {
    pub pending: usize,
    pub max_size: usize,
    pub unique_accounts: usize,
    pub average_gas_price: Option<u128>,
}

/// The pending-transaction store.
pub struct Mempool {
    txs: HashMap<String, Transaction>,
    validator: TxValidator,
    max_size: usize,
}

impl Mempool {
    pub fn new(max_size: usize, min_gas_price: u128, max_gas_limit: u64) -> Self {
        Mempool {
            txs: HashMap::new(),
            validator: TxValidator::new(min_gas_price, max_gas_limit),
            max_size,
        }
    }

    /// Mempool with the default gas policy and capacity.
    pub fn with_defaults() -> Self {
        Self::new(
            crate::constants::DEFAULT_MEMPOOL_SIZE,
            crate::constants::DEFAULT_MIN_GAS_PRICE,
            crate::constants::DEFAULT_MAX_TX_GAS_LIMIT,
        )
    }

    /// Insert a transaction.
    ///
    /// Rejects when the pool is full; silently succeeds on a duplicate hash;
    /// otherwise validates and stores.
    pub fn add(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if self.txs.len() >= self.max_size {
            return Err(MempoolError::Full { max: self.max_size });
        }
        if self.txs.contains_key(&tx.hash) {
            return Ok(());
        }
        self.validator.validate(&tx)?;
        self.txs.insert(tx.hash.clone(), tx);
        Ok(())
    }

    /// Atomically remove and return up to `max` transactions, highest gas
    /// price first (nonce ascending, then hash, as tiebreaks).
    pub fn pop(&mut self, max: usize) -> Vec<Transaction> {
        if max == 0 || self.txs.is_empty() {
            return Vec::new();
        }
        let mut candidates: Vec<&Transaction> = self.txs.values().collect();
        candidates.sort_by(|a, b| {
            b.gas_price
                .cmp(&a.gas_price)
                .then(a.nonce.cmp(&b.nonce))
                .then_with(|| a.hash.cmp(&b.hash))
        });
        let hashes: Vec<String> = candidates
            .into_iter()
            .take(max)
            .map(|tx| tx.hash.clone())
            .collect();
        hashes
            .into_iter()
            .filter_map(|h| self.txs.remove(&h))
            .collect()
    }

    /// Atomically remove and return up to `max` transactions from one
    /// account, nonce ascending.
    pub fn pop_by_nonce(&mut self, from: &str, max: usize) -> Vec<Transaction> {
        let mut account_txs: Vec<&Transaction> =
            self.txs.values().filter(|tx| tx.from == from).collect();
        account_txs.sort_by_key(|tx| tx.nonce);
        let hashes: Vec<String> = account_txs
            .into_iter()
            .take(max)
            .map(|tx| tx.hash.clone())
            .collect();
        hashes
            .into_iter()
            .filter_map(|h| self.txs.remove(&h))
            .collect()
    }

    /// Read-only view of an account's pending transactions, nonce ascending.
    pub fn transactions_by_nonce(&self, from: &str) -> Vec<&Transaction> {
        let mut txs: Vec<&Transaction> = self.txs.values().filter(|tx| tx.from == from).collect();
        txs.sort_by_key(|tx| tx.nonce);
        txs
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&Transaction> {
        self.txs.get(hash)
    }

    pub fn size(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn clear(&mut self) {
        self.txs.clear();
    }

    /// Remove specific transactions (e.g. after a gossiped block carried them).
    pub fn remove(&mut self, hashes: &[String]) {
        for hash in hashes {
            self.txs.remove(hash);
        }
    }

    /// Feed fresh account state into the validator.
    pub fn update_account_state(&mut self, address: &str, balance: u128, nonce: u64) {
        self.validator.set_account_state(address, balance, nonce);
    }

    /// Re-run validation for a transaction (defense in depth for the
    /// producer's inclusion pass).
    pub fn validate(&self, tx: &Transaction) -> Result<(), TxValidationError> {
        self.validator.validate(tx)
    }

    pub fn stats(&self) -> MempoolStats {
        let unique_accounts = self
            .txs
            .values()
            .map(|tx| tx.from.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let average_gas_price = if self.txs.is_empty() {
            None
        } else {
            Some(
                self.txs.values().map(|tx| tx.gas_price).sum::<u128>() / self.txs.len() as u128,
            )
        };
        MempoolStats {
            pending: self.txs.len(),
            max_size: self.max_size,
            unique_accounts,
            average_gas_price,
        }
    }
}
