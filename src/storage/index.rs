//! Index updates derived from applied commands, and their batched delivery.

use crate::error::Result;
use crate::storage::command::Value;
use crate::storage::stores::GraphStores;
use crate::work_sync::{AsyncApply, Work, WorkSync};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    Label {
        node: u64,
        label: u32,
        added: bool,
    },
    /// The indexed value of `node` under schema rule `rule_id` changed.
    Value {
        node: u64,
        rule_id: u64,
        before: Option<Value>,
        after: Option<Value>,
    },
}

/// Receiver of index updates. Implementations own their index structures.
pub trait IndexUpdateListener: Send + Sync {
    /// `parallel` is true when several threads may call this concurrently.
    fn apply_updates(&self, updates: Vec<IndexUpdate>, parallel: bool) -> Result<()>;
}

/// Label scan store and exact-value indexes kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndexes {
    state: Mutex<IndexState>,
    flushes: AtomicUsize,
}

#[derive(Debug, Default)]
struct IndexState {
    labels: BTreeMap<u32, BTreeSet<u64>>,
    values: BTreeMap<u64, BTreeMap<Value, BTreeSet<u64>>>,
}

impl InMemoryIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every index from the stores' current content.
    pub fn rebuild(stores: &GraphStores) -> Self {
        let indexes = InMemoryIndexes::new();
        {
            let mut state = indexes.state.lock();
            for (node, record) in &stores.nodes {
                for label in &record.labels {
                    state.labels.entry(*label).or_default().insert(*node);
                }
            }
            for (rule_id, rule) in &stores.schema {
                let entries = state.values.entry(*rule_id).or_default();
                for (node, record) in &stores.nodes {
                    if !record.has_label(rule.label) {
                        continue;
                    }
                    if let Some(value) = stores.node_properties.get(&(*node, rule.property_key)) {
                        entries.entry(value.clone()).or_default().insert(*node);
                    }
                }
            }
        }
        indexes
    }

    pub fn nodes_with_label(&self, label: u32) -> Vec<u64> {
        self.state
            .lock()
            .labels
            .get(&label)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn nodes_with_value(&self, rule_id: u64, value: &Value) -> Vec<u64> {
        self.state
            .lock()
            .values
            .get(&rule_id)
            .and_then(|entries| entries.get(value))
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of `apply_updates` calls received.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl IndexUpdateListener for InMemoryIndexes {
    fn apply_updates(&self, updates: Vec<IndexUpdate>, _parallel: bool) -> Result<()> {
        let mut state = self.state.lock();
        for update in updates {
            match update {
                IndexUpdate::Label { node, label, added } => {
                    let nodes = state.labels.entry(label).or_default();
                    if added {
                        nodes.insert(node);
                    } else {
                        nodes.remove(&node);
                    }
                }
                IndexUpdate::Value {
                    node,
                    rule_id,
                    before,
                    after,
                } => {
                    let entries = state.values.entry(rule_id).or_default();
                    if let Some(before) = before {
                        if let Some(nodes) = entries.get_mut(&before) {
                            nodes.remove(&node);
                            if nodes.is_empty() {
                                entries.remove(&before);
                            }
                        }
                    }
                    if let Some(after) = after {
                        entries.entry(after).or_default().insert(node);
                    }
                }
            }
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct IndexMaterial {
    listener: Arc<dyn IndexUpdateListener>,
}

/// Updates of one or more transactions; combining concatenates in submission order.
pub struct IndexUpdatesWork(Vec<IndexUpdate>);

impl Work<IndexMaterial> for IndexUpdatesWork {
    fn combine(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    fn apply(self, material: &mut IndexMaterial) -> Result<()> {
        material.listener.apply_updates(self.0, false)
    }
}

pub type IndexApply = AsyncApply<IndexMaterial, IndexUpdatesWork>;

/// Delivers index updates to a listener, either batched across applying threads or,
/// in parallel mode, directly from each applying thread.
pub struct IndexUpdatesWorkSync {
    parallel: bool,
    listener: Arc<dyn IndexUpdateListener>,
    sync: WorkSync<IndexMaterial, IndexUpdatesWork>,
}

impl IndexUpdatesWorkSync {
    pub fn new(listener: Arc<dyn IndexUpdateListener>, parallel: bool) -> Self {
        IndexUpdatesWorkSync {
            parallel,
            sync: WorkSync::new(IndexMaterial {
                listener: listener.clone(),
            }),
            listener,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn new_batch(&self) -> Batch<'_> {
        Batch {
            owner: self,
            updates: Vec::new(),
        }
    }
}

/// Updates gathered while applying one transaction.
pub struct Batch<'a> {
    owner: &'a IndexUpdatesWorkSync,
    updates: Vec<IndexUpdate>,
}

impl Batch<'_> {
    pub fn add(&mut self, update: IndexUpdate) {
        self.updates.push(update);
    }

    pub fn extend(&mut self, updates: impl IntoIterator<Item = IndexUpdate>) {
        self.updates.extend(updates);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Applies the batch and waits until the listener has it.
    pub fn apply(self) -> Result<()> {
        self.apply_async()?.await_applied()
    }

    /// Hands the batch off. In parallel mode it is applied right here; otherwise it
    /// joins the next work-sync round and the handle waits for that round.
    pub fn apply_async(self) -> Result<IndexApply> {
        if self.updates.is_empty() {
            return Ok(AsyncApply::empty());
        }
        if self.owner.parallel {
            self.owner.listener.apply_updates(self.updates, true)?;
            return Ok(AsyncApply::empty());
        }
        Ok(self.owner.sync.apply_async(IndexUpdatesWork(self.updates)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::command::{NodeRecord, SchemaRule};
    use std::thread;

    fn label(node: u64, label: u32) -> IndexUpdate {
        IndexUpdate::Label {
            node,
            label,
            added: true,
        }
    }

    #[test]
    fn test_value_updates_move_nodes_between_entries() {
        let indexes = InMemoryIndexes::new();
        indexes
            .apply_updates(
                vec![IndexUpdate::Value {
                    node: 1,
                    rule_id: 7,
                    before: None,
                    after: Some(Value::Text("a".into())),
                }],
                false,
            )
            .unwrap();
        indexes
            .apply_updates(
                vec![IndexUpdate::Value {
                    node: 1,
                    rule_id: 7,
                    before: Some(Value::Text("a".into())),
                    after: Some(Value::Text("b".into())),
                }],
                false,
            )
            .unwrap();
        assert!(indexes.nodes_with_value(7, &Value::Text("a".into())).is_empty());
        assert_eq!(indexes.nodes_with_value(7, &Value::Text("b".into())), vec![1]);
        assert_eq!(indexes.flush_count(), 2);
    }

    #[test]
    fn test_rebuild_matches_store_content() {
        let mut stores = GraphStores::new();
        stores.nodes.insert(1, NodeRecord::with_labels(vec![3]));
        stores.nodes.insert(2, NodeRecord::with_labels(vec![4]));
        stores.node_properties.insert((1, 9), Value::Int(5));
        stores.node_properties.insert((2, 9), Value::Int(5));
        stores.schema.insert(
            11,
            SchemaRule {
                label: 3,
                property_key: 9,
            },
        );

        let indexes = InMemoryIndexes::rebuild(&stores);
        assert_eq!(indexes.nodes_with_label(3), vec![1]);
        assert_eq!(indexes.nodes_with_value(11, &Value::Int(5)), vec![1]);
    }

    #[test]
    fn test_work_synced_batches_reach_listener() {
        let indexes = Arc::new(InMemoryIndexes::new());
        let sync = Arc::new(IndexUpdatesWorkSync::new(indexes.clone(), false));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let sync = sync.clone();
                thread::spawn(move || {
                    for i in 0..20u64 {
                        let mut batch = sync.new_batch();
                        batch.add(label(t * 100 + i, 1));
                        batch.apply().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(indexes.nodes_with_label(1).len(), 160);
        assert!(indexes.flush_count() <= 160);
    }

    #[test]
    fn test_parallel_mode_passes_flag_to_listener() {
        struct FlagListener(Mutex<Vec<bool>>);
        impl IndexUpdateListener for FlagListener {
            fn apply_updates(&self, _updates: Vec<IndexUpdate>, parallel: bool) -> Result<()> {
                self.0.lock().push(parallel);
                Ok(())
            }
        }

        let listener = Arc::new(FlagListener(Mutex::new(Vec::new())));
        let parallel = IndexUpdatesWorkSync::new(listener.clone(), true);
        let mut batch = parallel.new_batch();
        batch.add(label(1, 1));
        batch.apply_async().unwrap().await_applied().unwrap();

        let synced = IndexUpdatesWorkSync::new(listener.clone(), false);
        let mut batch = synced.new_batch();
        batch.add(label(2, 1));
        batch.apply().unwrap();

        synced.new_batch().apply().unwrap();
        assert_eq!(*listener.0.lock(), vec![true, false]);
    }

    #[test]
    fn test_listener_failure_is_returned() {
        struct Broken;
        impl IndexUpdateListener for Broken {
            fn apply_updates(&self, _updates: Vec<IndexUpdate>, _parallel: bool) -> Result<()> {
                Err(Error::OutOfMemory("index page cache".to_string()))
            }
        }

        let sync = IndexUpdatesWorkSync::new(Arc::new(Broken), false);
        let mut batch = sync.new_batch();
        batch.add(label(1, 1));
        assert!(batch.apply().unwrap_err().is_out_of_memory());
    }
}
