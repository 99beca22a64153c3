#[macro_use]
extern crate lazy_static;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[macro_use]
mod macros;
mod amount;
pub mod coin;
pub mod confidential;
pub mod config;
pub mod constants;
pub mod crypto;
mod errors;
pub use errors::{
    CoinError, ConfigError, DecoyError, ErrorClass, IndexerError, MlsagError, RangeProofError,
    RejectReason, RingError, StoreError, TransactionError,
};
pub mod indexer;
pub mod keys;
pub mod ledger;
pub mod mlsag;
pub mod rangeproof;
pub mod ring;
pub mod state;
mod testing;
pub(crate) mod utils;

pub use coin::{Coin, CoinV2, TokenId};
pub use config::{PrivacyConfig, PrivacyContext};
pub use confidential::{Transaction, TxStage, TxType};
pub use indexer::CoinIndexer;
pub use keys::{KeySet, OtaKey, PaymentAddress, PaymentInfo};
pub use state::{MemoryStateStore, StateStore};
