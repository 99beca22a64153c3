//! Mint a small chain, pay a receiver privately, then find the payment with the coin indexer.
//!
//! Run with `RUST_LOG=debug` to watch rings being built and batches scanned.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand_core::OsRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ringct_ledger::confidential::{build_reward, TransferBuilder, TransferParams};
use ringct_ledger::constants::PRV_TOKEN_ID;
use ringct_ledger::indexer::{KeyStatus, MemoryIndexerDb};
use ringct_ledger::ledger::{commit_block, Block};
use ringct_ledger::state::{ConsensusOracle, StateStore};
use ringct_ledger::{
    Coin, CoinIndexer, CoinV2, KeySet, MemoryStateStore, PaymentAddress, PaymentInfo, PrivacyConfig,
    PrivacyContext,
};

const ACCESS_TOKEN: &str = "0707070707070707070707070707070707070707070707070707070707070707";

const CONFIG: &str = r#"
ring_size = 4
num_shards = 1

[decoy]
block_time_secs = 1
native = { shape = 1.0, scale = 2.0 }
token = { shape = 1.0, scale = 2.0 }

[indexer]
num_workers = 1
batch_wait_ms = 0
idle_sleep_ms = 10
access_tokens = ["0707070707070707070707070707070707070707070707070707070707070707"]
"#;

struct TrustingOracle;

impl ConsensusOracle for TrustingOracle {
    fn validate_block_signatures(&self, _: &Block, _: &[PaymentAddress]) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let ctx = Arc::new(PrivacyContext::new(PrivacyConfig::from_toml_str(CONFIG)?)?);
    let store = Arc::new(MemoryStateStore::new());
    let mut csprng = OsRng;
    let minter = KeySet::random(&mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng);

    // Strangers' rewards give the sender's ring something to hide among.
    const TIP: u64 = 11;
    for height in 0..=TIP {
        let mut transactions = Vec::new();
        for _ in 0..3 {
            let stranger = KeySet::random(&mut csprng).payment_address();
            let payment = PaymentInfo::new(stranger, 1_000);
            transactions.push(build_reward(
                &ctx,
                store.as_ref(),
                minter.private_key()?,
                &payment,
                &PRV_TOKEN_ID,
                &mut csprng,
            )?);
        }
        if height == TIP {
            let payment = PaymentInfo::new(sender.payment_address(), 500);
            transactions.push(build_reward(
                &ctx,
                store.as_ref(),
                minter.private_key()?,
                &payment,
                &PRV_TOKEN_ID,
                &mut csprng,
            )?);
        }
        let block = Block {
            shard_id: 0,
            height,
            timestamp: height as i64,
            transactions,
            producer_signature: vec![],
        };
        commit_block(&ctx, store.as_ref(), &TrustingOracle, &block, &[])?;
    }

    let sender_coin = match spendable_coin(&store, &sender, TIP)? {
        Some(coin) => coin,
        None => bail!("sender reward not found"),
    };
    let payment =
        PaymentInfo::new(receiver.payment_address(), 320).with_message(b"invoice 7".to_vec());
    let tx = TransferBuilder::new(
        &ctx,
        store.as_ref(),
        &sender,
        TransferParams::native(vec![sender_coin], vec![payment], 20),
    )
    .build(TIP, &mut csprng)?;
    info!(bytes = tx.to_bytes()?.len(), "transfer built");

    let height = TIP + 1;
    let block = Block {
        shard_id: 0,
        height,
        timestamp: height as i64,
        transactions: vec![tx],
        producer_signature: vec![],
    };
    let report = commit_block(&ctx, store.as_ref(), &TrustingOracle, &block, &[])?;
    if report.accepted.len() != 1 {
        bail!("transfer rejected: {:?}", report.rejected);
    }

    let indexer = CoinIndexer::new(ctx.clone(), store.clone(), Arc::new(MemoryIndexerDb::new()))?;
    indexer.start(vec![height])?;
    let key = receiver.ota_key();
    indexer.submit_ota_key(key.clone(), 0, false, ACCESS_TOKEN)?;
    while indexer.has_ota_key(&key) == KeyStatus::Indexing {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for coin in indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID)? {
        let opened = coin.decrypt(&receiver)?;
        info!(
            value = opened.value().context("decrypted coin has a value")?,
            message = %String::from_utf8_lossy(opened.message()),
            "receiver found a coin"
        );
    }
    indexer.stop().await;
    Ok(())
}

// First coin stored at `height` that `owner` can open.
fn spendable_coin(
    store: &MemoryStateStore,
    owner: &KeySet,
    height: u64,
) -> Result<Option<CoinV2>> {
    for bytes in store.get_ota_coins_by_height(&PRV_TOKEN_ID, 0, height)? {
        let coin = Coin::from_bytes(&bytes)?.into_v2()?;
        if coin.is_owned_by(&owner.ota_key()).is_some() {
            return Ok(Some(coin.decrypt(owner)?));
        }
    }
    Ok(None)
}
