//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Stable wire shape for the routing layer (serde)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Wallet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub u64);

impl WalletId {
    /// Big-endian key bytes (preserves numeric order in RocksDB)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier, allocated in commit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Big-endian key bytes
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning user identifier (issued by the identity subsystem)
pub type OwnerId = u64;

/// A wallet and its current balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: WalletId,

    /// Owning user
    pub owner_id: OwnerId,

    /// Current balance, never negative once committed
    pub balance: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Wallet {
    /// New empty wallet
    pub fn new(id: WalletId, owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the wallet is still active
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Mutable wallet attributes
///
/// Balances are deliberately absent: they move only through top-ups and
/// transfers so every change is backed by a transaction row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPatch {
    /// New owner
    pub owner_id: Option<OwnerId>,
}

/// Immutable record of one completed balance movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: TransactionId,

    /// Source wallet, `None` for system-originated credits (top-ups)
    pub from_wallet_id: Option<WalletId>,

    /// Destination wallet
    pub to_wallet_id: WalletId,

    /// Amount moved (always positive)
    pub amount: Decimal,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether this is a top-up
    pub fn is_top_up(&self) -> bool {
        self.from_wallet_id.is_none()
    }

    /// Signed effect of this transaction on `wallet`
    pub fn net_effect(&self, wallet: WalletId) -> Decimal {
        let mut net = Decimal::ZERO;
        if self.to_wallet_id == wallet {
            net += self.amount;
        }
        if self.from_wallet_id == Some(wallet) {
            net -= self.amount;
        }
        net
    }

    /// Whether `wallet` is the source or destination
    pub fn involves(&self, wallet: WalletId) -> bool {
        self.to_wallet_id == wallet || self.from_wallet_id == Some(wallet)
    }
}

/// Transaction awaiting an ID and timestamp from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Source wallet (`None` for top-ups)
    pub from_wallet_id: Option<WalletId>,
    /// Destination wallet
    pub to_wallet_id: WalletId,
    /// Amount
    pub amount: Decimal,
}

impl NewTransaction {
    /// System credit into `to`
    pub fn top_up(to: WalletId, amount: Decimal) -> Self {
        Self {
            from_wallet_id: None,
            to_wallet_id: to,
            amount,
        }
    }

    /// Wallet-to-wallet movement
    pub fn transfer(from: WalletId, to: WalletId, amount: Decimal) -> Self {
        Self {
            from_wallet_id: Some(from),
            to_wallet_id: to,
            amount,
        }
    }

    /// Stamp with the allocated ID and commit time
    pub fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            from_wallet_id: self.from_wallet_id,
            to_wallet_id: self.to_wallet_id,
            amount: self.amount,
            created_at,
        }
    }
}

/// Validate a caller-supplied amount
///
/// Must be strictly positive with at most `scale` fractional digits.
pub fn validate_amount(amount: Decimal, scale: u32) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    if amount.normalize().scale() > scale {
        return Err(Error::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, scale
        )));
    }

    Ok(amount)
}

/// Parse and validate an amount from its decimal string form
pub fn parse_amount(input: &str, scale: u32) -> Result<Decimal> {
    let amount = Decimal::from_str(input.trim())
        .map_err(|e| Error::InvalidAmount(format!("malformed amount {:?}: {}", input, e)))?;
    validate_amount(amount, scale)
}

/// Result of an audit pass over the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Balance(s) as stored
    pub stored: Decimal,
    /// Balance(s) recomputed from the transaction log
    pub derived: Decimal,
    /// Number of transactions inspected
    pub transactions: usize,
}

impl AuditReport {
    /// Stored and derived figures agree
    pub fn is_consistent(&self) -> bool {
        self.stored == self.derived
    }
}
