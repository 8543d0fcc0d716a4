//! `BitcoinProcessor`: orchestrates initialization, fast-sync, steady-state
//! polling, fork recovery, anchor writes, and the read-API contract
//! (§4.9-§4.14).
//!
//! Mutable cross-cutting state (`last_processed_block`, the fee
//! calculator's sampler, the spending-monitor ring, the writer-address
//! cache) lives behind `tokio::sync::RwLock`s rather than a single
//! serializing worker task — the "mutex protecting shared state" option
//! from §5's concurrency note, chosen because the read API needs
//! low-latency concurrent access while only one task (the poll loop) ever
//! writes block-by-block state.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::{Address, BlockHash, Txid};
use tokio::sync::{watch, RwLock};

use crate::bitcoin_client::{block_model_from_consensus, BitcoinBlockModel, BitcoinClient, BitcoinInputModel, BitcoinTransactionModel};
use crate::config::ObserverConfig;
use crate::error::{ObserverError, ObserverResult};
use crate::normalized_fee::NormalizedFeeCalculator;
use crate::raw_block_file;
use crate::sidetree_tx_parser::parse_sidetree_transaction;
use crate::spending_monitor::SpendingMonitor;
use crate::store::{BlockMetadataStore, QuantileGroupStore, ServiceStateStore, TransactionStore};
use crate::types::{BlockMetadata, ServiceState, SidetreeTransaction, TransactionNumber, CURRENT_DATABASE_VERSION};

const HALVING_INTERVAL: u32 = 210_000;
const INITIAL_BLOCK_REWARD_SATOSHIS: u64 = 5_000_000_000;
const MAX_HALVINGS: u32 = 64;
/// Page size for `transactions()`; not a number the spec pins down, chosen
/// generously enough that most callers never hit it in one round trip.
const TRANSACTIONS_PAGE_SIZE: usize = 1_000;

/// `blockReward = floor(5e9 / 2^floor(height/210000))`, zero after 64
/// halvings (§3).
pub fn block_reward_satoshis(height: u32) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= MAX_HALVINGS {
        return 0;
    }
    INITIAL_BLOCK_REWARD_SATOSHIS >> halvings
}

fn parse_database_version(v: &str) -> (u32, u32, u32) {
    let mut parts = v.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

/// Where the next `processTransactions`/`fastProcessTransactions` run
/// should begin, per `getStartingBlockForPeriodicPoll` (§4.9).
#[derive(Debug, Clone, Copy)]
struct StartingBlock {
    height: u32,
    previous_hash: BlockHash,
}

pub struct BitcoinProcessor {
    config: ObserverConfig,
    client: Arc<dyn BitcoinClient>,
    transaction_store: Arc<dyn TransactionStore>,
    block_metadata_store: Arc<dyn BlockMetadataStore>,
    service_state_store: Arc<dyn ServiceStateStore>,
    quantile_group_store: Arc<dyn QuantileGroupStore>,
    fee_calculator: RwLock<NormalizedFeeCalculator>,
    spending_monitor: RwLock<SpendingMonitor>,
    last_processed_block: RwLock<Option<BlockMetadata>>,
    /// Maps a previously-seen `(txid, vout)` to the address its script pays,
    /// so a later transaction spending it can resolve its writer without a
    /// wallet RPC round trip. The parser has no chain-state access of its
    /// own (see `sidetree_tx_parser`'s doc comment); this cache is what it
    /// means by "the processor looks this up via its own store".
    output_address_cache: RwLock<HashMap<(Txid, u32), String>>,
}

impl BitcoinProcessor {
    /// Builds a processor, restoring the fee calculator's quantile window
    /// from persisted groups. The spending monitor starts empty on restart:
    /// the transaction store records every writer's anchors, not just this
    /// node's own broadcasts, so there's no reliable way to reconstruct
    /// "fees this node spent" from it alone; starting empty under-counts
    /// rather than risks over-counting against the cap.
    pub async fn new(
        config: ObserverConfig,
        client: Arc<dyn BitcoinClient>,
        transaction_store: Arc<dyn TransactionStore>,
        block_metadata_store: Arc<dyn BlockMetadataStore>,
        service_state_store: Arc<dyn ServiceStateStore>,
        quantile_group_store: Arc<dyn QuantileGroupStore>,
    ) -> ObserverResult<Arc<Self>> {
        let persisted_groups = quantile_group_store.all_ascending().await?;
        let current_group_id = persisted_groups.last().map(|g| g.group_id + 1).unwrap_or(0);
        let fee_calculator = NormalizedFeeCalculator::restore(
            config.group_size_in_blocks,
            config.window_size_in_groups,
            config.sample_size_per_group,
            config.quantile,
            config.genesis_block_number,
            config.historical_offset_in_blocks,
            persisted_groups,
            current_group_id,
        );

        let last_processed_block = block_metadata_store.last().await?;
        let spending_monitor = SpendingMonitor::new(
            config.bitcoin_fee_spending_cutoff,
            config.bitcoin_fee_spending_cutoff_period_in_blocks,
        );

        Ok(Arc::new(BitcoinProcessor {
            config,
            client,
            transaction_store,
            block_metadata_store,
            service_state_store,
            quantile_group_store,
            fee_calculator: RwLock::new(fee_calculator),
            spending_monitor: RwLock::new(spending_monitor),
            last_processed_block: RwLock::new(last_processed_block),
            output_address_cache: RwLock::new(HashMap::new()),
        }))
    }

    // ---- §4.9 initialization -------------------------------------------

    /// Order per §4.9: client reachability, database-version check, then
    /// (iff polling enabled — always true for this crate, since serving the
    /// read API without ever syncing isn't a supported mode) either a
    /// fast-sync from raw block files or a direct RPC catch-up. The caller
    /// is responsible for scheduling `run_periodic_poll` and starting the
    /// lock monitor afterward, in that order (step 5: "must be last").
    pub async fn initialize(self: &Arc<Self>) -> ObserverResult<()> {
        self.client.initialize().await?;
        self.reconcile_database_version().await?;

        if let Some(starting) = self.starting_block_for_periodic_poll().await? {
            if self.config.bitcoin_data_directory.is_some() {
                self.fast_process_transactions(starting).await?;
            } else {
                self.process_transactions(starting).await?;
            }
        }

        Ok(())
    }

    async fn reconcile_database_version(&self) -> ObserverResult<()> {
        match self.service_state_store.get().await? {
            None => {
                self.service_state_store
                    .put(ServiceState {
                        database_version: CURRENT_DATABASE_VERSION.to_string(),
                        approximate_time: None,
                    })
                    .await
            }
            Some(state) if state.database_version == CURRENT_DATABASE_VERSION => Ok(()),
            Some(state) if parse_database_version(&state.database_version) < parse_database_version(CURRENT_DATABASE_VERSION) => {
                tracing::warn!(
                    found = %state.database_version,
                    expected = CURRENT_DATABASE_VERSION,
                    "upgrading persisted schema: wiping block metadata and transactions, resyncing from genesis"
                );
                self.trim_databases_to_block(None).await?;
                self.service_state_store
                    .put(ServiceState {
                        database_version: CURRENT_DATABASE_VERSION.to_string(),
                        approximate_time: None,
                    })
                    .await
            }
            Some(state) => Err(ObserverError::DatabaseDowngradeNotAllowed {
                found: state.database_version,
                expected: CURRENT_DATABASE_VERSION.to_string(),
            }),
        }
    }

    async fn starting_block_for_periodic_poll(&self) -> ObserverResult<Option<StartingBlock>> {
        let last = self.block_metadata_store.last().await?;

        let candidate_height = match last {
            None => {
                self.trim_databases_to_block(None).await?;
                self.config.genesis_block_number
            }
            Some(meta) => {
                if self.verify_block(meta.height, meta.hash).await? {
                    // Recovers from a crash after transactions were added
                    // for `meta.height` but before its metadata row landed.
                    self.trim_databases_to_block(Some(meta.height)).await?;
                    meta.height + 1
                } else {
                    let last_valid = self.revert_databases().await?;
                    last_valid.map(|m| m.height + 1).unwrap_or(self.config.genesis_block_number)
                }
            }
        };

        let tip_height = self.client.get_current_block_height().await?;
        if candidate_height > tip_height {
            return Ok(None);
        }

        let previous_hash = if candidate_height == self.config.genesis_block_number {
            self.client.get_block_info_from_height(candidate_height).await?.previous_hash
        } else {
            self.client.get_block_info_from_height(candidate_height - 1).await?.hash
        };

        Ok(Some(StartingBlock {
            height: candidate_height,
            previous_hash,
        }))
    }

    /// Whether the locally stored hash at `height` still matches the live
    /// chain.
    async fn verify_block(&self, height: u32, hash: BlockHash) -> ObserverResult<bool> {
        Ok(self.client.get_block_hash(height).await? == hash)
    }

    // ---- §4.10 steady-state loop ----------------------------------------

    /// Runs forever until `shutdown` fires. Never lets an `ObserverError`
    /// escape the tick — logs an `observer_loop_failure` event and
    /// reschedules, per §7's propagation policy.
    pub async fn run_periodic_poll(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.starting_block_for_periodic_poll().await {
                Ok(Some(starting)) => {
                    if let Err(err) = self.process_transactions(starting).await {
                        tracing::error!(event = "observer_loop_failure", error = %err, "poll tick failed");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(event = "observer_loop_failure", error = %err, "failed to compute starting block");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.transaction_poll_period_in_seconds)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn process_transactions(&self, starting: StartingBlock) -> ObserverResult<()> {
        let end_height = self.client.get_current_block_height().await?;
        if starting.height < self.config.genesis_block_number {
            return Err(ObserverError::Unexpected(anyhow::anyhow!(
                "starting block {} is before genesis {}",
                starting.height,
                self.config.genesis_block_number
            )));
        }

        let mut height = starting.height;
        let mut previous_hash = starting.previous_hash;

        while height <= end_height {
            let metadata = self.process_block(height, previous_hash).await?;
            previous_hash = metadata.hash;
            *self.last_processed_block.write().await = Some(metadata);
            height += 1;
        }

        Ok(())
    }

    /// Fetches and fork-checks one block, then ingests it. Fatal on a
    /// previous-hash mismatch — the caller sees the error on this tick and
    /// the next `starting_block_for_periodic_poll` call enters revert
    /// (§4.10 step 2).
    async fn process_block(&self, height: u32, expected_previous_hash: BlockHash) -> ObserverResult<BlockMetadata> {
        let hash = self.client.get_block_hash(height).await?;
        let block = self.client.get_block(&hash).await?;

        if block.previous_hash != expected_previous_hash {
            return Err(ObserverError::InvalidPreviousBlockHash { height });
        }

        self.ingest_block(height, &block).await
    }

    /// Parses, persists, and accounts for one already fork-verified block.
    /// Shared by the steady-state path (which fork-checks before calling
    /// this) and fast-sync (which has already linearized the chain by the
    /// time it gets here), so both paths produce identical transaction and
    /// metadata rows from the same raw block.
    async fn ingest_block(&self, height: u32, block: &BitcoinBlockModel) -> ObserverResult<BlockMetadata> {
        let max_inputs = self.config.max_input_count_for_sampled_transaction as usize;
        let mut candidate_txids = Vec::new();

        for (index, tx) in block.transactions.iter().enumerate() {
            let parsed = {
                let cache = self.output_address_cache.read().await;
                let resolve = |input: &BitcoinInputModel| -> Option<String> {
                    let txid = input.previous_txid?;
                    let vout = input.previous_output_index?;
                    cache.get(&(txid, vout)).cloned()
                };
                parse_sidetree_transaction(tx, &self.config.sidetree_transaction_prefix, resolve)
            };

            if let Some(parsed) = parsed {
                let fee_paid = self.client.get_transaction_fee_in_satoshis(&tx.id).await?;
                let transaction_number = TransactionNumber::construct(height as u64, index as u64)?;
                self.transaction_store
                    .add(SidetreeTransaction {
                        transaction_number,
                        transaction_time: height,
                        transaction_time_hash: block.hash,
                        anchor_string: parsed.anchor_string,
                        transaction_fee_paid: fee_paid,
                        normalized_transaction_fee: None,
                        writer: parsed.writer,
                    })
                    .await?;
            } else if !tx.is_coinbase && tx.inputs.len() <= max_inputs {
                candidate_txids.push(tx.id);
            }

            self.cache_output_addresses(tx).await;
        }

        let boundary_reached = {
            let mut calculator = self.fee_calculator.write().await;
            calculator.process_block(height, &block.hash, &candidate_txids)
        };
        if boundary_reached {
            let sealed = {
                let mut calculator = self.fee_calculator.write().await;
                calculator.seal_boundary_group(self.client.as_ref()).await?
            };
            self.quantile_group_store.add(sealed).await?;
        }

        let coinbase_total: u64 = block
            .transactions
            .first()
            .map(|coinbase| coinbase.outputs.iter().map(|o| o.value_satoshis).sum())
            .unwrap_or(0);
        let total_fee = coinbase_total.saturating_sub(block_reward_satoshis(height));
        let transaction_count = block.transactions.len() as u32;

        let normalized_fee = self.fee_calculator.read().await.get_normalized_fee(height).ok();
        if let Some(fee) = normalized_fee {
            self.transaction_store.set_normalized_fee_for_block(height as u64, fee).await?;
        }

        let metadata = BlockMetadata {
            height,
            hash: block.hash,
            previous_hash: block.previous_hash,
            total_fee,
            transaction_count,
            normalized_fee,
        };
        self.block_metadata_store.add(metadata.clone()).await?;

        Ok(metadata)
    }

    /// Records the address each of `tx`'s outputs pays, for a later
    /// transaction's input to resolve against. Scripts that don't resolve
    /// to a standard address (e.g. `OP_RETURN`) are simply not cached.
    async fn cache_output_addresses(&self, tx: &BitcoinTransactionModel) {
        let mut cache = self.output_address_cache.write().await;
        for (index, output) in tx.outputs.iter().enumerate() {
            if let Ok(address) = Address::from_script(&output.script_pubkey, self.config.bitcoin_network) {
                cache.insert((tx.id, index as u32), address.to_string());
            }
        }
    }

    // ---- §4.11 fast-sync --------------------------------------------------

    /// Cold-starts from `blk*.dat` files instead of one-RPC-per-block. Reads
    /// every file's blocks into a hash-keyed pool, walks the previous-hash
    /// chain backward from the live tip to linearize the subset that's
    /// actually on the main chain, drops the rest as orphans, then replays
    /// the linearized prefix forward through the same `ingest_block` path
    /// steady-state uses (so normalized fees, which depend on processing
    /// order, come out identical either way).
    async fn fast_process_transactions(&self, starting: StartingBlock) -> ObserverResult<()> {
        let data_directory = self
            .config
            .bitcoin_data_directory
            .clone()
            .expect("fast_process_transactions requires bitcoin_data_directory");

        let mut paths: Vec<std::path::PathBuf> = std::fs::read_dir(&data_directory)
            .map_err(|e| ObserverError::Unexpected(anyhow::anyhow!("reading {data_directory}: {e}")))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("blk") && name.ends_with(".dat"))
                    .unwrap_or(false)
            })
            .collect();
        // Sorted descending so later (higher) block files are parsed first,
        // matching "iterate blk*.dat files sorted descending (tip backward)".
        paths.sort();
        paths.reverse();

        struct Candidate {
            height: u32,
            hash: BlockHash,
            previous_hash: BlockHash,
            model: BitcoinBlockModel,
        }

        let mut by_hash: HashMap<BlockHash, Candidate> = HashMap::new();
        for path in paths {
            let file = std::fs::File::open(&path)
                .map_err(|e| ObserverError::Unexpected(anyhow::anyhow!("opening {}: {e}", path.display())))?;
            let entries = raw_block_file::parse_block_file(file)
                .map_err(|e| ObserverError::Unexpected(anyhow::anyhow!("parsing {}: {e}", path.display())))?;

            for entry in entries {
                let hash = entry.block.block_hash();
                let previous_hash = entry.block.header.prev_blockhash;
                let model = block_model_from_consensus(entry.height, hash, previous_hash, entry.block);
                by_hash.insert(hash, Candidate { height: entry.height, hash, previous_hash, model });
            }
        }

        let tip_height = self.client.get_current_block_height().await?;
        let tip_hash = self.client.get_block_hash(tip_height).await?;

        let mut cursor = tip_hash;
        let mut validated_descending = Vec::new();
        while let Some(candidate) = by_hash.remove(&cursor) {
            let height = candidate.height;
            cursor = candidate.previous_hash;
            validated_descending.push(candidate);
            if height <= starting.height {
                break;
            }
        }

        // Whatever's left in the pool never chained up to the live tip:
        // orphaned blocks from a stale file set. Their anchors never
        // happened as far as the main chain is concerned.
        for (_, orphan) in by_hash.drain() {
            self.transaction_store.remove_by_transaction_time_hash(&orphan.hash).await?;
        }

        validated_descending.reverse();
        for candidate in validated_descending {
            if candidate.height < starting.height {
                continue;
            }
            let metadata = self.ingest_block(candidate.height, &candidate.model).await?;
            *self.last_processed_block.write().await = Some(metadata);
        }

        Ok(())
    }

    // ---- §4.12 fork recovery ----------------------------------------------

    /// Exponential lookback to find the highest still-valid ancestor, trims
    /// both stores back to it, and returns it (`None` ⇒ revert all the way
    /// to genesis).
    async fn revert_databases(&self) -> ObserverResult<Option<BlockMetadata>> {
        let tip_height = self
            .block_metadata_store
            .last()
            .await?
            .map(|m| m.height)
            .unwrap_or(self.config.genesis_block_number);
        let candidates = self
            .block_metadata_store
            .look_back_exponentially(tip_height, self.config.genesis_block_number)
            .await?;

        let mut last_valid = None;
        for height in candidates {
            if let Some(meta) = self.block_metadata_store.get(height).await? {
                if self.verify_block(height, meta.hash).await? {
                    last_valid = Some(meta);
                    break;
                }
            }
        }

        self.trim_databases_to_block(last_valid.as_ref().map(|m| m.height)).await?;
        tracing::warn!(
            last_valid_height = ?last_valid.as_ref().map(|m| m.height),
            "reverted databases after fork detection"
        );
        Ok(last_valid)
    }

    /// Removes metadata with height > `h` and transactions with number >
    /// `lastTransactionOfBlock(h)`; `None` trims everything (used both for a
    /// from-scratch start and a revert all the way past genesis). Metadata
    /// is trimmed first, transactions and quantile groups after — if the
    /// process dies mid-trim, the next restart re-trims using whatever
    /// metadata remains as the timestamp authority (§4.12).
    async fn trim_databases_to_block(&self, height: Option<u32>) -> ObserverResult<()> {
        match height {
            None => {
                self.block_metadata_store.remove_later_than_or_equal(0).await?;
                self.transaction_store
                    .remove_transactions_later_than_or_equal(TransactionNumber::from_raw(0))
                    .await?;
                let cutoff_group = {
                    let mut calculator = self.fee_calculator.write().await;
                    calculator.trim_databases_to_group_boundary(self.config.genesis_block_number);
                    calculator.group_id_for_height(self.config.genesis_block_number)
                };
                self.quantile_group_store.remove_greater_than_or_equal(cutoff_group).await?;
                self.spending_monitor.write().await.remove_writes_later_than_or_equal(0);
            }
            Some(h) => {
                self.block_metadata_store.remove_later_than_or_equal(h + 1).await?;
                let cutoff = TransactionNumber::from_raw(TransactionNumber::last_of_block(h as u64).value() + 1);
                self.transaction_store.remove_transactions_later_than_or_equal(cutoff).await?;
                let cutoff_group = {
                    let mut calculator = self.fee_calculator.write().await;
                    calculator.trim_databases_to_group_boundary(h + 1);
                    calculator.group_id_for_height(h + 1)
                };
                self.quantile_group_store.remove_greater_than_or_equal(cutoff_group).await?;
                self.spending_monitor.write().await.remove_writes_later_than_or_equal(h + 1);
            }
        }
        Ok(())
    }

    // ---- §4.13 write path --------------------------------------------------

    pub async fn write_transaction(&self, anchor_string: &str, min_fee_satoshis: u64) -> ObserverResult<Txid> {
        let payload = format!("{}{anchor_string}", self.config.sidetree_transaction_prefix);
        let created = self
            .client
            .create_sidetree_transaction(payload.as_bytes(), min_fee_satoshis)
            .await?;

        let current_height = self
            .last_processed_block
            .read()
            .await
            .as_ref()
            .map(|m| m.height)
            .unwrap_or(self.config.genesis_block_number);

        {
            let mut monitor = self.spending_monitor.write().await;
            if !monitor.is_current_fee_within_spending_limit(current_height, created.fee_paid_satoshis) {
                return Err(ObserverError::SpendingCapReached);
            }
        }

        let balance = self.client.get_balance_in_satoshis().await?;
        if balance < created.fee_paid_satoshis {
            return Err(ObserverError::NotEnoughBalanceForWrite);
        }

        let txid = self.client.broadcast_sidetree_transaction(&created).await?;

        // Anchor-write failures never undo a prior successful broadcast
        // (§7); this bookkeeping only runs once the broadcast has
        // succeeded.
        self.spending_monitor
            .write()
            .await
            .add_transaction_data_being_written(current_height, created.fee_paid_satoshis);

        Ok(txid)
    }

    // ---- §4.14 read API ----------------------------------------------------

    /// `time(hash?)`: with a hash, the block info of that hash; without
    /// one, the last processed block (reorg-stable, never the live tip).
    pub async fn time(&self, hash: Option<BlockHash>) -> ObserverResult<(u32, BlockHash)> {
        match hash {
            Some(hash) => {
                let info = self.client.get_block_info(&hash).await?;
                Ok((info.height, info.hash))
            }
            None => match self.last_processed_block.read().await.clone() {
                Some(meta) => Ok((meta.height, meta.hash)),
                None => {
                    let hash = self.client.get_block_hash(self.config.genesis_block_number).await?;
                    Ok((self.config.genesis_block_number, hash))
                }
            },
        }
    }

    pub async fn transactions(
        &self,
        since: Option<TransactionNumber>,
        since_hash: Option<BlockHash>,
    ) -> ObserverResult<(bool, Vec<SidetreeTransaction>)> {
        if since.is_some() != since_hash.is_some() {
            return Err(ObserverError::BadRequest);
        }

        if let (Some(since), Some(hash)) = (since, since_hash) {
            if !self.verify_block(since.block_height() as u32, hash).await? {
                return Err(ObserverError::InvalidTransactionNumberOrTimeHash);
            }
        }

        let Some(last_processed) = self.last_processed_block.read().await.clone() else {
            return Ok((false, Vec::new()));
        };
        if !self.verify_block(last_processed.height, last_processed.hash).await? {
            // The caller's view has fallen behind a reorg; it should retry
            // once this observer converges on the new chain.
            return Ok((false, Vec::new()));
        }

        // Fetch one row past the page budget so a full page can be told
        // apart from "exactly this many transactions exist and no more."
        let mut rows = self
            .transaction_store
            .transactions_later_than(since, TRANSACTIONS_PAGE_SIZE + 1)
            .await?;
        rows.retain(|tx| tx.transaction_time <= last_processed.height);

        let hit_page_limit = rows.len() > TRANSACTIONS_PAGE_SIZE;
        if hit_page_limit {
            rows.truncate(TRANSACTIONS_PAGE_SIZE);
        }

        // Keep the result complete "up to whole-block granularity": if the
        // page limit was hit mid-block, drop the partial tail rather than
        // return a block's transactions incompletely — unless doing so
        // would drop the page down to nothing, which happens when a single
        // block carries more Sidetree transactions than the page budget.
        // In that case emit the oversized block whole rather than make no
        // forward progress at all; the caller pages past it by `since`.
        if hit_page_limit {
            if let Some(&last_height) = rows.last().map(|tx| &tx.transaction_time) {
                let keep = rows.iter().rposition(|tx| tx.transaction_time != last_height).map(|i| i + 1).unwrap_or(0);
                if keep > 0 {
                    rows.truncate(keep);
                }
            }
        }

        let last_block_returned = rows.last().map(|tx| tx.transaction_time);
        let more_transactions = match last_block_returned {
            Some(height) => height < last_processed.height,
            None => false,
        };

        Ok((more_transactions, rows))
    }

    /// First candidate whose `(time, hash)` still matches the live chain,
    /// used by Core during its own reorg recovery.
    pub async fn first_valid_transaction(
        &self,
        candidates: &[(TransactionNumber, BlockHash)],
    ) -> ObserverResult<Option<SidetreeTransaction>> {
        for &(number, hash) in candidates {
            if self.verify_block(number.block_height() as u32, hash).await? {
                if let Some(tx) = self.transaction_store.transaction_at(number).await? {
                    return Ok(Some(tx));
                }
            }
        }
        Ok(None)
    }

    pub async fn get_normalized_fee(&self, block: u32) -> ObserverResult<u64> {
        self.fee_calculator.read().await.get_normalized_fee(block)
    }

    // ---- test support ------------------------------------------------------
    //
    // Exposed so the crate's `tests/` integration suite can drive one poll
    // tick deterministically instead of waiting on `run_periodic_poll`'s
    // sleep timer, and seed the spending monitor the way a restart recovers
    // in-flight writes. Not used by any production code path.

    /// Runs exactly one poll tick (compute starting block, scan through the
    /// live tip) if there is anything to do, mirroring one iteration of
    /// `run_periodic_poll`'s loop body. Returns `true` if a tick ran.
    #[doc(hidden)]
    pub async fn run_one_poll_tick_for_tests(self: &Arc<Self>) -> ObserverResult<bool> {
        match self.starting_block_for_periodic_poll().await? {
            Some(starting) => {
                self.process_transactions(starting).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[doc(hidden)]
    pub async fn record_spend_for_tests(&self, height: u32, fee_satoshis: u64) {
        self.spending_monitor
            .write()
            .await
            .add_transaction_data_being_written(height, fee_satoshis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin_client::tests_support::{coinbase_tx, plain_tx, sidetree_tx, FakeBitcoinClient};
    use crate::store::{InMemoryBlockMetadataStore, InMemoryQuantileGroupStore, InMemoryServiceStateStore, InMemoryTransactionStore};
    use bitcoin::Network;

    fn test_config(genesis: u32, data_directory: Option<String>) -> ObserverConfig {
        ObserverConfig {
            bitcoin_peer_uri: "http://127.0.0.1:0".to_string(),
            bitcoin_rpc_username: "user".to_string(),
            bitcoin_rpc_password: "pass".to_string(),
            bitcoin_wallet_or_import_string: "cUxxx".to_string(),
            bitcoin_data_directory: data_directory,
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

    // `BitcoinProcessor` only stores a trait object, so each test clones its
    // `FakeBitcoinClient` before handing one copy to the processor and
    // keeping the other to push blocks / inspect broadcasts.

    #[tokio::test]
    async fn clean_start_from_genesis_has_no_transactions() {
        let client = FakeBitcoinClient::new();
        for _ in 0..4 {
            client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
        }
        let config = test_config(0, None);
        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();

        processor.initialize().await.unwrap();

        let (more, rows) = processor.transactions(None, None).await.unwrap();
        assert!(!more);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn single_sidetree_transaction_is_recorded_with_expected_number() {
        let client = FakeBitcoinClient::new();
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
        let anchor_tx = sidetree_tx("sidetree:", "ABC", 4_000);
        client.set_transaction_fee(anchor_tx.id, 4_000).await;
        client
            .push_block(0, vec![coinbase_tx(&[5_000_000_000]), anchor_tx])
            .await;

        let config = test_config(0, None);
        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();

        processor.initialize().await.unwrap();

        let (more, rows) = processor.transactions(None, None).await.unwrap();
        assert!(!more);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_number.block_height(), 2);
        assert_eq!(rows[0].transaction_number.index_in_block(), 1);
        assert_eq!(rows[0].anchor_string, "ABC");
        assert_eq!(rows[0].transaction_fee_paid, 4_000);
    }

    #[tokio::test]
    async fn two_op_returns_are_ignored_but_still_counted() {
        let client = FakeBitcoinClient::new();
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;

        let push_a = bitcoin::script::PushBytesBuf::try_from(b"sidetree:abc".to_vec()).unwrap();
        let push_b = bitcoin::script::PushBytesBuf::try_from(b"unrelated".to_vec()).unwrap();
        let double_tx = BitcoinTransactionModel {
            id: bitcoin::Txid::from_byte_array([42u8; 32]),
            inputs: vec![BitcoinInputModel {
                previous_txid: Some(bitcoin::Txid::all_zeros()),
                previous_output_index: Some(0),
            }],
            outputs: vec![
                crate::bitcoin_client::BitcoinOutputModel {
                    value_satoshis: 0,
                    script_pubkey: bitcoin::ScriptBuf::new_op_return(push_a.as_push_bytes()),
                },
                crate::bitcoin_client::BitcoinOutputModel {
                    value_satoshis: 0,
                    script_pubkey: bitcoin::ScriptBuf::new_op_return(push_b.as_push_bytes()),
                },
            ],
            is_coinbase: false,
        };
        client.set_transaction_fee(double_tx.id, 500).await;
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), double_tx]).await;

        let config = test_config(0, None);
        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();

        processor.initialize().await.unwrap();

        let (_, rows) = processor.transactions(None, None).await.unwrap();
        assert!(rows.is_empty());

        let (_, hash) = processor.time(None).await.unwrap();
        let info = client.get_block_info(&hash).await.unwrap();
        assert_eq!(info.height, 1);
    }

    #[tokio::test]
    async fn reorg_triggers_revert_and_makes_stale_read_a_bad_request() {
        let client = FakeBitcoinClient::new();
        for _ in 0..6 {
            client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
        }

        let config = test_config(0, None);
        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();
        processor.initialize().await.unwrap();

        let (_, stale_hash) = processor.time(None).await.unwrap();
        assert_eq!(processor.block_metadata_store.last().await.unwrap().unwrap().height, 5);

        // Fork at height 3: truncate back to height 2 and extend on a new
        // variant.
        client.truncate_to(2).await;
        for _ in 0..3 {
            client.push_block(1, vec![coinbase_tx(&[5_000_000_000])]).await;
        }

        // Next tick should detect the fork and revert.
        let starting = processor.starting_block_for_periodic_poll().await.unwrap();
        assert!(starting.is_some());
        processor.process_transactions(starting.unwrap()).await.unwrap();

        assert_eq!(processor.block_metadata_store.last().await.unwrap().unwrap().height, 5);

        let stale_since = TransactionNumber::construct(3, 0).unwrap();
        let result = processor.transactions(Some(stale_since), Some(stale_hash)).await;
        assert!(matches!(result, Err(ObserverError::InvalidTransactionNumberOrTimeHash)));
    }

    #[tokio::test]
    async fn spending_cap_rejects_then_allows_smaller_fee() {
        let client = FakeBitcoinClient::new();
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000])]).await;
        client.set_balance(1_000_000).await;

        let mut config = test_config(0, None);
        config.bitcoin_fee_spending_cutoff = 10_000;
        config.bitcoin_fee_spending_cutoff_period_in_blocks = 6;

        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();
        processor.initialize().await.unwrap();

        processor
            .spending_monitor
            .write()
            .await
            .add_transaction_data_being_written(0, 8_000);

        client.set_next_create_fee(3_000).await;
        let rejected = processor.write_transaction("anchor-a", 3_000).await;
        assert!(matches!(rejected, Err(ObserverError::SpendingCapReached)));

        client.set_next_create_fee(1_500).await;
        let accepted = processor.write_transaction("anchor-b", 1_500).await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn block_reward_halves_on_schedule() {
        assert_eq!(block_reward_satoshis(0), 5_000_000_000);
        assert_eq!(block_reward_satoshis(210_000), 2_500_000_000);
        assert_eq!(block_reward_satoshis(210_000 * 64), 0);
    }

    #[tokio::test]
    async fn deterministic_sample_drives_identical_normalized_fee_across_restarts() {
        let client = FakeBitcoinClient::new();
        let txs: Vec<_> = (1..=4u8).map(|_| plain_tx(1)).collect();
        for (i, tx) in txs.iter().enumerate() {
            client.set_transaction_fee(tx.id, 1_000 * (i as u64 + 1)).await;
        }
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), txs[0].clone(), txs[1].clone()]).await;
        client.push_block(0, vec![coinbase_tx(&[5_000_000_000]), txs[2].clone(), txs[3].clone()]).await;

        let mut config = test_config(0, None);
        config.group_size_in_blocks = 2;
        config.historical_offset_in_blocks = 0;

        let client_arc: Arc<dyn BitcoinClient> = Arc::new(client.clone());
        let processor = BitcoinProcessor::new(
            config,
            client_arc,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryBlockMetadataStore::new()),
            Arc::new(InMemoryServiceStateStore::new()),
            Arc::new(InMemoryQuantileGroupStore::new()),
        )
        .await
        .unwrap();
        processor.initialize().await.unwrap();

        let fee = processor.get_normalized_fee(1).await.unwrap();
        assert!(fee > 0);
    }
}
