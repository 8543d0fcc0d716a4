//! In-memory reference implementations of the store traits, backed by
//! `tokio::sync::RwLock<BTreeMap<...>>`. Used both as the default runtime
//! backend (the spec treats durable storage as out of scope) and as the
//! fake driving the processor's unit tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bitcoin::BlockHash;
use tokio::sync::RwLock;

use crate::error::ObserverResult;
use crate::store::{BlockMetadataStore, QuantileGroupStore, ServiceStateStore, TransactionStore};
use crate::types::{BlockMetadata, QuantileGroup, ServiceState, SidetreeTransaction, TransactionNumber};

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: RwLock<BTreeMap<TransactionNumber, SidetreeTransaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn add(&self, transaction: SidetreeTransaction) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        rows.entry(transaction.transaction_number).or_insert(transaction);
        Ok(())
    }

    async fn transactions_later_than(
        &self,
        since: Option<TransactionNumber>,
        limit: usize,
    ) -> ObserverResult<Vec<SidetreeTransaction>> {
        let rows = self.rows.read().await;
        let iter = rows.iter().filter(|(number, _)| match since {
            Some(s) => **number > s,
            None => true,
        });
        Ok(iter.take(limit).map(|(_, tx)| tx.clone()).collect())
    }

    async fn transactions_starting_from(
        &self,
        inclusive_start_height: u32,
        exclusive_end_height: u32,
    ) -> ObserverResult<Vec<SidetreeTransaction>> {
        let rows = self.rows.read().await;
        let start = TransactionNumber::construct(inclusive_start_height as u64, 0)
            .unwrap_or(TransactionNumber::from_raw(0));
        Ok(rows
            .range(start..)
            .map(|(_, tx)| tx)
            .take_while(|tx| tx.transaction_time < exclusive_end_height)
            .cloned()
            .collect())
    }

    async fn transaction_at(&self, number: TransactionNumber) -> ObserverResult<Option<SidetreeTransaction>> {
        Ok(self.rows.read().await.get(&number).cloned())
    }

    async fn last(&self) -> ObserverResult<Option<SidetreeTransaction>> {
        Ok(self.rows.read().await.values().next_back().cloned())
    }

    async fn earliest(&self) -> ObserverResult<Option<SidetreeTransaction>> {
        Ok(self.rows.read().await.values().next().cloned())
    }

    async fn exponentially_spaced_transactions(&self) -> ObserverResult<Vec<SidetreeTransaction>> {
        let rows = self.rows.read().await;
        let all: Vec<&SidetreeTransaction> = rows.values().collect();
        if all.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        let last_index = all.len() - 1;
        result.push(all[last_index].clone());

        // Offsets from the last record: 1, 2, 4, 8, ... (`last, last-1,
        // last-2, last-4, ...` per §4.3), stopping at genesis.
        let mut offset: i64 = 1;
        loop {
            let index = last_index as i64 - offset;
            if index < 0 {
                break;
            }
            result.push(all[index as usize].clone());
            offset *= 2;
        }

        Ok(result)
    }

    async fn remove_transactions_later_than_or_equal(&self, cutoff: TransactionNumber) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        rows.retain(|number, _| *number < cutoff);
        Ok(())
    }

    async fn remove_by_transaction_time_hash(&self, hash: &BlockHash) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        rows.retain(|_, tx| tx.transaction_time_hash != *hash);
        Ok(())
    }

    async fn set_normalized_fee_for_block(&self, block_height: u64, normalized_fee: u64) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        let first = TransactionNumber::construct(block_height, 0).unwrap_or(TransactionNumber::from_raw(0));
        let last = TransactionNumber::last_of_block(block_height);
        for (number, tx) in rows.range_mut(first..=last) {
            debug_assert!(*number >= first && *number <= last);
            tx.normalized_transaction_fee = Some(normalized_fee);
        }
        Ok(())
    }

    async fn count(&self) -> ObserverResult<usize> {
        Ok(self.rows.read().await.len())
    }
}

#[derive(Default)]
pub struct InMemoryBlockMetadataStore {
    rows: RwLock<BTreeMap<u32, BlockMetadata>>,
}

impl InMemoryBlockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockMetadataStore for InMemoryBlockMetadataStore {
    async fn add(&self, metadata: BlockMetadata) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        rows.entry(metadata.height).or_insert(metadata);
        Ok(())
    }

    async fn get(&self, height: u32) -> ObserverResult<Option<BlockMetadata>> {
        Ok(self.rows.read().await.get(&height).cloned())
    }

    async fn last(&self) -> ObserverResult<Option<BlockMetadata>> {
        Ok(self.rows.read().await.values().next_back().cloned())
    }

    async fn range(&self, from_height: u32, to_height: u32) -> ObserverResult<Vec<BlockMetadata>> {
        Ok(self
            .rows
            .read()
            .await
            .range(from_height..=to_height)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn look_back_exponentially(&self, max_height: u32, min_height: u32) -> ObserverResult<Vec<u32>> {
        if max_height < min_height {
            return Ok(Vec::new());
        }

        // Offsets from `max_height`: 0, 1, 2, 4, 8, 16, ... (`maxH, maxH-1,
        // maxH-2, maxH-4, ...` per §4.4), stopping once a candidate would
        // fall below `min_height`.
        let mut result = vec![max_height];
        let mut offset: u32 = 1;
        loop {
            if offset > max_height {
                break;
            }
            let height = max_height - offset;
            if height < min_height {
                break;
            }
            result.push(height);
            if height == min_height {
                break;
            }
            offset = offset.saturating_mul(2);
        }
        Ok(result)
    }

    async fn remove_later_than_or_equal(&self, height: u32) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        rows.retain(|h, _| *h < height);
        Ok(())
    }

    async fn set_normalized_fee(&self, height: u32, normalized_fee: u64) -> ObserverResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(m) = rows.get_mut(&height) {
            m.normalized_fee = Some(normalized_fee);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryServiceStateStore {
    state: RwLock<Option<ServiceState>>,
}

impl InMemoryServiceStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceStateStore for InMemoryServiceStateStore {
    async fn get(&self) -> ObserverResult<Option<ServiceState>> {
        Ok(self.state.read().await.clone())
    }

    async fn put(&self, state: ServiceState) -> ObserverResult<()> {
        *self.state.write().await = Some(state);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryQuantileGroupStore {
    rows: RwLock<BTreeMap<u64, QuantileGroup>>,
}

impl InMemoryQuantileGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuantileGroupStore for InMemoryQuantileGroupStore {
    async fn add(&self, group: QuantileGroup) -> ObserverResult<()> {
        self.rows.write().await.insert(group.group_id, group);
        Ok(())
    }

    async fn all_ascending(&self) -> ObserverResult<Vec<QuantileGroup>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn remove_greater_than_or_equal(&self, cutoff_group_id: u64) -> ObserverResult<()> {
        self.rows.write().await.retain(|id, _| *id < cutoff_group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Writer;

    fn sample_tx(height: u64, index: u64) -> SidetreeTransaction {
        SidetreeTransaction {
            transaction_number: TransactionNumber::construct(height, index).unwrap(),
            transaction_time: height as u32,
            transaction_time_hash: bitcoin::BlockHash::all_zeros(),
            anchor_string: "abc".to_string(),
            transaction_fee_paid: 1000,
            normalized_transaction_fee: None,
            writer: Writer::Anonymous,
        }
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = InMemoryTransactionStore::new();
        store.add(sample_tx(10, 0)).await.unwrap();
        store.add(sample_tx(10, 0)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transactions_later_than_is_ascending_and_exclusive() {
        let store = InMemoryTransactionStore::new();
        store.add(sample_tx(10, 0)).await.unwrap();
        store.add(sample_tx(10, 1)).await.unwrap();
        store.add(sample_tx(11, 0)).await.unwrap();

        let since = TransactionNumber::construct(10, 0).unwrap();
        let rows = store.transactions_later_than(Some(since), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transaction_number.index_in_block(), 1);
        assert_eq!(rows[1].transaction_number.block_height(), 11);
    }

    #[tokio::test]
    async fn transactions_starting_from_is_half_open_by_height() {
        let store = InMemoryTransactionStore::new();
        store.add(sample_tx(10, 0)).await.unwrap();
        store.add(sample_tx(11, 0)).await.unwrap();
        store.add(sample_tx(12, 0)).await.unwrap();

        let rows = store.transactions_starting_from(10, 12).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].transaction_number.block_height(), 11);
    }

    #[tokio::test]
    async fn exponentially_spaced_transactions_descend_from_last() {
        let store = InMemoryTransactionStore::new();
        for h in 0..10u64 {
            store.add(sample_tx(h, 0)).await.unwrap();
        }

        let spaced = store.exponentially_spaced_transactions().await.unwrap();
        let heights: Vec<u64> = spaced.iter().map(|t| t.transaction_number.block_height()).collect();
        assert_eq!(heights[0], 9);
        assert!(heights.windows(2).all(|w| w[0] > w[1]));
    }

    #[tokio::test]
    async fn remove_later_than_or_equal_rolls_back_fork() {
        let store = InMemoryTransactionStore::new();
        store.add(sample_tx(10, 0)).await.unwrap();
        store.add(sample_tx(11, 0)).await.unwrap();
        store.add(sample_tx(12, 0)).await.unwrap();

        let cutoff = TransactionNumber::construct(11, 0).unwrap();
        store.remove_transactions_later_than_or_equal(cutoff).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_by_transaction_time_hash_drops_orphaned_block() {
        let store = InMemoryTransactionStore::new();
        let mut orphan = sample_tx(10, 0);
        orphan.transaction_time_hash = bitcoin::BlockHash::from_byte_array([7u8; 32]);
        store.add(orphan).await.unwrap();
        store.add(sample_tx(11, 0)).await.unwrap();

        store
            .remove_by_transaction_time_hash(&bitcoin::BlockHash::from_byte_array([7u8; 32]))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn block_metadata_add_is_idempotent_and_ordered() {
        let store = InMemoryBlockMetadataStore::new();
        store
            .add(BlockMetadata {
                height: 10,
                hash: bitcoin::BlockHash::all_zeros(),
                previous_hash: bitcoin::BlockHash::all_zeros(),
                total_fee: 100,
                transaction_count: 1,
                normalized_fee: None,
            })
            .await
            .unwrap();
        store
            .add(BlockMetadata {
                height: 10,
                hash: bitcoin::BlockHash::all_zeros(),
                previous_hash: bitcoin::BlockHash::all_zeros(),
                total_fee: 999,
                transaction_count: 5,
                normalized_fee: None,
            })
            .await
            .unwrap();

        let stored = store.get(10).await.unwrap().unwrap();
        assert_eq!(stored.total_fee, 100);
    }

    #[tokio::test]
    async fn look_back_exponentially_matches_spec_sequence() {
        let store = InMemoryBlockMetadataStore::new();
        let heights = store.look_back_exponentially(100, 90).await.unwrap();
        assert_eq!(heights, vec![100, 99, 98, 96, 92]);
    }

    #[tokio::test]
    async fn quantile_group_store_round_trips_and_trims() {
        let store = InMemoryQuantileGroupStore::new();
        for id in 0..4u64 {
            store
                .add(QuantileGroup {
                    group_id: id,
                    quantile: Some(id * 10),
                    frequency_vector: vec![1, 2, 3],
                })
                .await
                .unwrap();
        }
        assert_eq!(store.all_ascending().await.unwrap().len(), 4);

        store.remove_greater_than_or_equal(2).await.unwrap();
        let remaining = store.all_ascending().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|g| g.group_id < 2));
    }
}
