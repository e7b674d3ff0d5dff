//! Wallet-facing data types and the trait the sync engine uses to read and
//! update the wallet's transaction book.

pub mod traits;

/// A wallet address in one concrete encoding.
///
/// Hashes and equates by its canonical bytes, never by identity: the same
/// underlying key rendered in two encodings (native and legacy) counts as
/// two distinct entries for the indexer to watch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    /// Wrap an already-encoded address string.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(encoded: &str) -> Self {
        Self(encoded.to_owned())
    }
}

/// Transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Construct from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Byte-reversed hex, matching the conventional display order.
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A serialized transaction paired with its id.
///
/// The sync engine never inspects the payload; decoding is the wallet's
/// concern. Transactions handed to `submit` stay caller-owned and are cloned
/// before crossing into a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    txid: TxId,
    raw: Vec<u8>,
}

impl Transaction {
    /// Pair a transaction id with its serialized bytes.
    #[must_use]
    pub fn new(txid: TxId, raw: Vec<u8>) -> Self {
        Self { txid, raw }
    }

    /// The transaction id.
    #[must_use]
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// The serialized bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Child index for the address-chain path level (a.k.a. scope).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressScope {
    /// Externally visible receive addresses.
    External,
    /// Internal (change) addresses.
    Internal,
}

impl std::fmt::Display for AddressScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressScope::External => write!(f, "external"),
            AddressScope::Internal => write!(f, "internal"),
        }
    }
}

/// A wallet's view of one of its transactions, as exposed to the sync
/// engine for rescan-depth decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction id.
    pub txid: TxId,
    /// Confirmation height; `None` while unconfirmed.
    pub block_height: Option<u64>,
    /// Block or announcement timestamp.
    pub timestamp: u64,
    /// Total amount this transaction sends out of the wallet; zero for pure
    /// receives.
    pub amount_sent: u64,
    /// False when a conflicting spend or invalid input makes the
    /// transaction unreliable.
    pub is_valid: bool,
}
