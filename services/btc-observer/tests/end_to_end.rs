//! End-to-end scenarios against the public API surface, mirroring the six
//! worked examples in the specification's testable-properties section: a
//! clean genesis start, a single recorded Sidetree transaction, a
//! multi-OP_RETURN transaction being ignored, a reorg with a stale read
//! turned into a bad request, a spending-cap breach followed by an accepted
//! smaller write, and a deterministic reservoir sample.
//!
//! These exercise `BitcoinProcessor` only through its public constructor and
//! methods, against the in-memory store stack and `FakeBitcoinClient` —
//! no live `bitcoind` required.

use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::Network;

use btc_observer::bitcoin_client::tests_support::{coinbase_tx, plain_tx, sidetree_tx, FakeBitcoinClient};
use btc_observer::bitcoin_client::BitcoinClient;
use btc_observer::config::ObserverConfig;
use btc_observer::error::ObserverError;
use btc_observer::processor::BitcoinProcessor;
use btc_observer::store::{InMemoryBlockMetadataStore, InMemoryQuantileGroupStore, InMemoryServiceStateStore, InMemoryTransactionStore};
use btc_observer::types::TransactionNumber;

fn config(genesis: u32) -> ObserverConfig {
    ObserverConfig {
        bitcoin_peer_uri: "http://127.0.0.1:0".to_string(),
        bitcoin_rpc_username: "user".to_string(),
        bitcoin_rpc_password: "pass".to_string(),
        bitcoin_wallet_or_import_string: "cUxxx".to_string(),
        bitcoin_data_directory: None,
        sidetree_transaction_prefix: "sidetree:".to_string(),
        genesis_block_number: genesis,
        transaction_poll_period_in_seconds: 60,
        request_timeout_in_milliseconds: 300,
        request_max_retries: 3,
        sidetree_transaction_fee_markup_percentage: 0,
        default_transaction_fee_in_satoshis_per_kb: 1_000,
        bitcoin_fee_spending_cutoff: 10_000,
        bitcoin_fee_spending_cutoff_period_in_blocks: 6,
        low_balance_notice_in_days: 28,
        value_time_lock_amount_in_bitcoins: 0.0,
        value_time_lock_transaction_fees_amount_in_bitcoins: 0.0,
        value_time_lock_poll_period_in_seconds: 600,
        value_time_lock_update_enabled: false,
        http_listen_addr: "127.0.0.1:0".to_string(),
        group_size_in_blocks: 2,
        window_size_in_groups: 5,
        sample_size_per_group: 5,
        quantile: 0.5,
        historical_offset_in_blocks: 0,
        max_input_count_for_sampled_transaction: 8,
        bitcoin_network: Network::Regtest,
    }
}

async fn new_processor(cfg: ObserverConfig, client: Arc<dyn BitcoinClient>) -> Arc<BitcoinProcessor> {
    BitcoinProcessor::new(
        cfg,
        client,
        Arc::new(InMemoryTransactionStore::new()),
        Arc::new(InMemoryBlockMetadataStore::new()),
        Arc::new(InMemoryServiceStateStore::new()),
        Arc::new(InMemoryQuantileGroupStore::new()),
    )
    .await
    .unwrap()
}

/// Scenario 1: clean start from genesis with no Sidetree transactions in
/// any block. Four blocks synced, transaction store stays empty.
#[tokio::test]
async fn scenario_1_clean_start_from_genesis() {
    let client = FakeBitcoinClient::new();
    for _ in 0..4 {
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
    }
    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(config(0), client_arc).await;
    processor.initialize().await.unwrap();

    let (more, rows) = processor.transactions(None, None).await.unwrap();
    assert!(!more);
    assert!(rows.is_empty());

    let (time, _) = processor.time(None).await.unwrap();
    assert_eq!(time, 3);
}

/// Scenario 2: one Sidetree transaction at height 2, index 1 (the coinbase
/// occupies index 0), with a known prefix/anchor/fee. After sync the
/// transaction store has exactly one record with the expected composite
/// `transactionNumber` and fields.
#[tokio::test]
async fn scenario_2_single_sidetree_transaction_recorded() {
    let client = FakeBitcoinClient::new();
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;

    let anchor_tx = sidetree_tx("sidetree:", "ABC", 4_000);
    client.set_transaction_fee(anchor_tx.id, 4_000).await;
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), anchor_tx]).await;

    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(config(0), client_arc).await;
    processor.initialize().await.unwrap();

    let (more, rows) = processor.transactions(None, None).await.unwrap();
    assert!(!more);
    assert_eq!(rows.len(), 1);

    let expected_number = TransactionNumber::construct(2, 1).unwrap();
    assert_eq!(rows[0].transaction_number, expected_number);
    assert_eq!(rows[0].transaction_number.value(), 2_000_001);
    assert_eq!(rows[0].anchor_string, "ABC");
    assert_eq!(rows[0].transaction_fee_paid, 4_000);
    assert_eq!(rows[0].transaction_time, 2);
}

/// Scenario 3: a reorg at the tip forces `revertDatabases`, trimming back
/// to the last still-valid ancestor and re-scanning the new chain. A read
/// that straddles the reorg (a `since`/hash pair from the stale chain) is
/// rejected as a bad request rather than silently served.
#[tokio::test]
async fn scenario_3_reorg_triggers_revert_and_rejects_stale_read() {
    let client = FakeBitcoinClient::new();
    for _ in 0..6 {
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
    }

    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(config(0), client_arc).await;
    processor.initialize().await.unwrap();

    let stale_hash = client.get_block_hash(3).await.unwrap();

    // Fork at height 3: truncate back to height 2 and extend on a new variant.
    client.truncate_to(2).await;
    for _ in 0..3 {
        client.push_block(1, vec![coinbase_tx(&[5_000_000_000])]).await;
    }

    // periodic_poll's starting-block computation detects the stale tip and
    // reverts before resuming the scan; drain ticks until caught up instead
    // of depending on `run_periodic_poll`'s sleep timer.
    while processor.run_one_poll_tick_for_tests().await.unwrap() {}

    let (time, _) = processor.time(None).await.unwrap();
    assert_eq!(time, 5);

    let stale_since = TransactionNumber::construct(3, 0).unwrap();
    let result = processor.transactions(Some(stale_since), Some(stale_hash)).await;
    assert!(matches!(result, Err(ObserverError::InvalidTransactionNumberOrTimeHash)));

    // Requesting with only one of `since`/`hash` set is a bad request too.
    let only_since = processor.transactions(Some(stale_since), None).await;
    assert!(matches!(only_since, Err(ObserverError::BadRequest)));
}

/// Scenario 4: a transaction carrying two `OP_RETURN` Sidetree-prefixed
/// outputs is ignored entirely (no record), but still counted toward the
/// block's `transactionCount`.
#[tokio::test]
async fn scenario_4_two_op_returns_ignored_but_counted() {
    let client = FakeBitcoinClient::new();
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;

    let push_a = bitcoin::script::PushBytesBuf::try_from(b"sidetree:abc".to_vec()).unwrap();
    let push_b = bitcoin::script::PushBytesBuf::try_from(b"sidetree:def".to_vec()).unwrap();
    let double_tx = btc_observer::bitcoin_client::BitcoinTransactionModel {
        id: bitcoin::Txid::from_byte_array([7u8; 32]),
        inputs: vec![btc_observer::bitcoin_client::BitcoinInputModel {
            previous_txid: Some(bitcoin::Txid::all_zeros()),
            previous_output_index: Some(0),
        }],
        outputs: vec![
            btc_observer::bitcoin_client::BitcoinOutputModel {
                value_satoshis: 0,
                script_pubkey: bitcoin::ScriptBuf::new_op_return(push_a.as_push_bytes()),
            },
            btc_observer::bitcoin_client::BitcoinOutputModel {
                value_satoshis: 0,
                script_pubkey: bitcoin::ScriptBuf::new_op_return(push_b.as_push_bytes()),
            },
        ],
        is_coinbase: false,
    };
    client.set_transaction_fee(double_tx.id, 500).await;
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), double_tx]).await;

    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(config(0), client_arc).await;
    processor.initialize().await.unwrap();

    let (_, rows) = processor.transactions(None, None).await.unwrap();
    assert!(rows.is_empty());
}

/// Scenario 5: a spending-cap breach is rejected; the same write re-tried
/// with a smaller fee, staying within the cap, is accepted.
#[tokio::test]
async fn scenario_5_spending_cap_breach_then_accepted() {
    let client = FakeBitcoinClient::new();
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
    client.set_balance(1_000_000).await;

    let mut cfg = config(0);
    cfg.bitcoin_fee_spending_cutoff = 10_000;
    cfg.bitcoin_fee_spending_cutoff_period_in_blocks = 6;

    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(cfg, client_arc).await;
    processor.initialize().await.unwrap();

    processor.record_spend_for_tests(0, 8_000).await;

    client.set_next_create_fee(3_000).await;
    let rejected = processor.write_transaction("anchor-a", 3_000).await;
    assert!(matches!(rejected, Err(ObserverError::SpendingCapReached)));

    client.set_next_create_fee(1_500).await;
    let accepted = processor.write_transaction("anchor-b", 1_500).await;
    assert!(accepted.is_ok());
}

/// Scenario 6: the reservoir sampler is deterministic — resyncing twice
/// from the same blocks (fresh stores both times) produces the same
/// normalized fee, since the sample and the quantile pipeline it feeds are
/// pure functions of the block hash and transaction ids.
#[tokio::test]
async fn scenario_6_deterministic_sampling_is_reproducible() {
    let client = FakeBitcoinClient::new();
    let txs: Vec<_> = (0..4u8).map(|_| plain_tx(1)).collect();
    for (i, tx) in txs.iter().enumerate() {
        client.set_transaction_fee(tx.id, 1_000 * (i as u64 + 1)).await;
    }
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), txs[0].clone(), txs[1].clone()]).await;
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), txs[2].clone(), txs[3].clone()]).await;

    let mut cfg = config(0);
    cfg.group_size_in_blocks = 2;
    cfg.historical_offset_in_blocks = 0;

    let client_arc_a: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor_a = new_processor(cfg.clone(), client_arc_a).await;
    processor_a.initialize().await.unwrap();
    let fee_a = processor_a.get_normalized_fee(1).await.unwrap();

    let client_arc_b: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor_b = new_processor(cfg, client_arc_b).await;
    processor_b.initialize().await.unwrap();
    let fee_b = processor_b.get_normalized_fee(1).await.unwrap();

    assert_eq!(fee_a, fee_b);
}

/// `getNormalizedFee(genesis - 1)` is out of range regardless of genesis
/// placement.
#[tokio::test]
async fn normalized_fee_before_genesis_is_out_of_range() {
    let client = FakeBitcoinClient::new();
    client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;

    let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
    let processor = new_processor(config(100), client_arc).await;
    processor.initialize().await.unwrap();

    let result = processor.get_normalized_fee(99).await;
    assert!(matches!(result, Err(ObserverError::BlockchainTimeOutOfRange)));
}
