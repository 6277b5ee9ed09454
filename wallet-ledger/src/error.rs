//! Error types for the wallet ledger

use crate::types::{OwnerId, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced wallet does not exist (or was soft-deleted)
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// Owner has no active wallet
    #[error("No wallet for owner: {0}")]
    NoWalletForOwner(OwnerId),

    /// Non-positive, over-precise, overflowing or malformed amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transfer source and destination are the same wallet
    #[error("Cannot transfer from wallet {0} to itself")]
    SameWallet(WalletId),

    /// Source balance does not cover the debit
    #[error("Insufficient balance in wallet {wallet}: required {required}, available {available}")]
    InsufficientBalance {
        /// Debited wallet
        wallet: WalletId,
        /// Requested amount
        required: Decimal,
        /// Balance at the time of the check
        available: Decimal,
    },

    /// Wallet still holds funds and cannot be deleted
    #[error("Wallet {0} has a non-zero balance")]
    WalletNotEmpty(WalletId),

    /// Optimistic check failed: a concurrent writer changed the row
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lock acquisition exceeded its deadline, nothing was written
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Aggregate over stored amounts left the decimal range
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Storage error (RocksDB or backend unavailability)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether repeating the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::DeadlineExceeded(_) | Error::Storage(_) | Error::Io(_)
        )
    }

    /// Whether the error signals a missing wallet
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::WalletNotFound(_) | Error::NoWalletForOwner(_))
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::WalletNotFound(_) | Error::NoWalletForOwner(_) => "not_found",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::SameWallet(_) => "same_wallet",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::WalletNotEmpty(_) => "wallet_not_empty",
            Error::Conflict(_) => "conflict",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::Overflow(_) => "overflow",
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => "storage_failure",
            Error::Config(_) => "config",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
