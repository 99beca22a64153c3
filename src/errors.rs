use bulletproofs::ProofError as BPProofError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of every failure the crate reports.
///
/// Rejections surfaced to users carry exactly one class, which is enough to tell input
/// malformation, cryptographic failure and state conflicts apart in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Wrong sizes, non-rectangular matrices, invalid versions. Caught before cryptography.
    Malformed,
    /// A signature or proof did not verify, a point failed to decompress, a tag mismatched.
    Cryptographic,
    /// Serial number, key image or one-time address already present (or a referenced
    /// commitment/token is absent).
    DoubleSpend,
    /// A bounded retry loop ran out (decoy draws, OTA collisions) or a queue is full.
    ResourceExhausted,
    /// A coin indexer job failed.
    IndexerJob,
    /// The state store collaborator returned an error.
    State,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum CoinError {
    #[error("Invalid coin encoding: {0}")]
    Encoding(String),
    #[error("Invalid curve point in {0}")]
    InvalidPoint(&'static str),
    #[error("Coin is already concealed")]
    AlreadyConcealed,
    #[error("Coin has no ephemeral randomness, only its creator can conceal it")]
    MissingSharedRandom,
    #[error("Error while trying to decrypt coin: {0}")]
    Decryption(String),
    #[error("A private spending key is required")]
    MissingSpendKey,
    #[error("Coin message of {given} bytes exceeds the maximum of {max}")]
    MessageTooLong { given: usize, max: usize },
    #[error("No fresh one-time address after {0} attempts")]
    OtaCollision(usize),
    #[error("Asset tag does not match the token")]
    AssetTagMismatch,
    #[error("Coin value does not fit in 64 bits")]
    ValueOverflow,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoinError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoinError::Encoding(_) | CoinError::MessageTooLong { .. } => ErrorClass::Malformed,
            CoinError::OtaCollision(_) => ErrorClass::ResourceExhausted,
            CoinError::Store(_) => ErrorClass::State,
            _ => ErrorClass::Cryptographic,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecoyError {
    #[error("No usable coin at height {height} after {attempts} draws")]
    NoCoinAtHeight { height: u64, attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Coin(#[from] CoinError),
}

#[derive(Error, Debug)]
pub enum RingError {
    #[error(transparent)]
    Decoy(#[from] DecoyError),
    #[error(transparent)]
    Coin(#[from] CoinError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid ring index encoding: {0}")]
    IndexEncoding(String),
    #[error("Malformed ring: {0}")]
    Malformed(String),
}

impl RingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RingError::Decoy(DecoyError::NoCoinAtHeight { .. }) => ErrorClass::ResourceExhausted,
            RingError::Decoy(DecoyError::Coin(e)) | RingError::Coin(e) => e.class(),
            RingError::Decoy(DecoyError::Store(_)) | RingError::Store(_) => ErrorClass::State,
            RingError::IndexEncoding(_) | RingError::Malformed(_) => ErrorClass::Malformed,
        }
    }
}

#[derive(Error, Debug)]
pub enum MlsagError {
    #[error("Malformed ring: {0}")]
    MalformedRing(String),
    #[error("Expected {expected} private keys, given {given}")]
    KeyCountMismatch { expected: usize, given: usize },
    #[error("Real row {pi} out of range for a ring of {rows} rows")]
    RealIndexOutOfRange { pi: usize, rows: usize },
    #[error("Private key does not open ring column {column} of the real row")]
    BalanceMismatch { column: usize },
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

impl MlsagError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MlsagError::BalanceMismatch { .. } => ErrorClass::Cryptographic,
            _ => ErrorClass::Malformed,
        }
    }
}

#[derive(Error, Debug)]
pub enum RangeProofError {
    #[error("Bulletproofs ProofError: {0}")]
    BulletProofs(#[from] BPProofError),
    #[error("No outputs to prove")]
    Empty,
    #[error("Too many outputs: given {given}, max {max}")]
    TooManyOutputs { given: usize, max: usize },
    #[error("Proof shape does not match the outputs")]
    ShapeMismatch,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Unsupported transaction version {0}")]
    InvalidVersion(u8),
    #[error("Transaction type does not match its proof: {0}")]
    InvalidType(&'static str),
    #[error("Invalid lock time {0}")]
    InvalidLockTime(i64),
    #[error("Transaction of {size_kb} KB exceeds the maximum of {max_kb} KB")]
    TxTooLarge { size_kb: u64, max_kb: u64 },
    #[error("Info of {given} bytes exceeds the maximum of {max}")]
    InfoTooLong { given: usize, max: usize },
    #[error("No input coins")]
    EmptyInputs,
    #[error("No output coins")]
    EmptyOutputs,
    #[error("Too many inputs: given {given}, max {max}")]
    TooManyInputs { given: usize, max: usize },
    #[error("Too many outputs: given {given}, max {max}")]
    TooManyOutputs { given: usize, max: usize },
    #[error("Inputs of {inputs} do not equal outputs of {outputs} plus fee {fee}")]
    Unbalanced { inputs: u64, outputs: u64, fee: u64 },
    #[error("Overflow while doing arithmetic operations")]
    Overflow,
    #[error("Builder is at stage {actual:?}, expected {expected:?}")]
    InvalidStage {
        expected: crate::confidential::TxStage,
        actual: crate::confidential::TxStage,
    },
    #[error("Malformed transaction: {0}")]
    Malformed(String),
    #[error("Cannot encode transaction: {0}")]
    Serialization(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Ring signature does not verify")]
    RingSignatureRejected,
    #[error("Token policy violation: {0}")]
    PolicyViolation(String),
    #[error("Output commitment does not open to its declared value")]
    CommitmentMismatch,
    #[error("Key image {0} already spent")]
    DoubleSpend(String),
    #[error("One-time address {0} already used")]
    DuplicateOta(String),
    #[error("Commitment {0} not found on chain")]
    CommitmentNotFound(String),
    #[error("Token {0} does not exist")]
    UnknownToken(String),
    #[error("Block signatures rejected by consensus")]
    BlockSignaturesRejected,
    #[error(transparent)]
    Coin(#[from] CoinError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Mlsag(#[from] MlsagError),
    #[error(transparent)]
    RangeProof(#[from] RangeProofError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<bincode::Error> for TransactionError {
    fn from(e: bincode::Error) -> Self {
        TransactionError::Serialization(e.to_string())
    }
}

/// The single structured reason attached to a rejected transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectReason {
    pub class: ErrorClass,
    pub message: String,
}

impl TransactionError {
    pub fn class(&self) -> ErrorClass {
        use TransactionError::*;
        match self {
            InvalidVersion(_) | InvalidType(_) | InvalidLockTime(_) | TxTooLarge { .. }
            | InfoTooLong { .. } | EmptyInputs | EmptyOutputs | TooManyInputs { .. }
            | TooManyOutputs { .. } | Unbalanced { .. } | Overflow | InvalidStage { .. }
            | Malformed(_) | Serialization(_) | PolicyViolation(_) => ErrorClass::Malformed,
            InvalidSignature(_) | RingSignatureRejected | CommitmentMismatch
            | BlockSignaturesRejected | RangeProof(_) => ErrorClass::Cryptographic,
            DoubleSpend(_) | DuplicateOta(_) | CommitmentNotFound(_) | UnknownToken(_) => {
                ErrorClass::DoubleSpend
            }
            Coin(e) => e.class(),
            Ring(e) => e.class(),
            Mlsag(e) => e.class(),
            Store(_) => ErrorClass::State,
        }
    }

    pub fn reason(&self) -> RejectReason {
        RejectReason {
            class: self.class(),
            message: self.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("OTA key is not synced")]
    NotSynced,
    #[error("Sync still in progress")]
    InProgress,
    #[error("OTA key is already being indexed")]
    AlreadyIndexing,
    #[error("OTA key has been indexed, request a reset to index it again")]
    AlreadyIndexed,
    #[error("Indexing queue for shard {0} is full")]
    QueueFull(u8),
    #[error("Coin indexer is not running")]
    NotRunning,
    #[error("Invalid access token")]
    InvalidAccessToken,
    #[error("Enhanced indexing is disabled")]
    EnhancedModeDisabled,
    #[error("Invalid key record of {0} bytes")]
    InvalidKeyRecord(usize),
    #[error("Unknown shard {0}")]
    UnknownShard(u8),
    #[error("Indexing job failed: {0}")]
    JobFailed(String),
    #[error(transparent)]
    Coin(#[from] CoinError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IndexerError::QueueFull(_) => ErrorClass::ResourceExhausted,
            IndexerError::JobFailed(_) | IndexerError::Store(_) => ErrorClass::IndexerJob,
            IndexerError::Coin(e) => e.class(),
            _ => ErrorClass::Malformed,
        }
    }
}
