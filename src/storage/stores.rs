use crate::error::{Error, Result};
use crate::log::BASE_TX_ID;
use crate::storage::command::{
    Direction, NodeRecord, PropertyOwner, RelationshipGroupRecord, RelationshipRecord, SchemaRule,
    TokenKind, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which transaction ids have been applied to the stores.
///
/// Pipelines may close ids out of order, so this keeps the highest id below which
/// everything is applied plus the applied ids above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSequence {
    highest_gapless: u64,
    out_of_order: BTreeSet<u64>,
}

impl AppliedSequence {
    pub fn new(highest_gapless: u64) -> Self {
        AppliedSequence {
            highest_gapless,
            out_of_order: BTreeSet::new(),
        }
    }

    pub fn highest_gapless(&self) -> u64 {
        self.highest_gapless
    }

    /// Highest applied id, gap or not.
    pub fn highest(&self) -> u64 {
        self.out_of_order
            .iter()
            .next_back()
            .copied()
            .unwrap_or(self.highest_gapless)
    }

    pub fn contains(&self, tx_id: u64) -> bool {
        tx_id <= self.highest_gapless || self.out_of_order.contains(&tx_id)
    }

    /// True if `tx_id` is the next id after the gapless prefix.
    pub fn is_next(&self, tx_id: u64) -> bool {
        tx_id == self.highest_gapless + 1
    }

    pub fn mark(&mut self, tx_id: u64) {
        if self.contains(tx_id) {
            return;
        }
        if !self.is_next(tx_id) {
            self.out_of_order.insert(tx_id);
            return;
        }
        self.highest_gapless = tx_id;
        while self.out_of_order.remove(&(self.highest_gapless + 1)) {
            self.highest_gapless += 1;
        }
    }
}

impl Default for AppliedSequence {
    fn default() -> Self {
        Self::new(BASE_TX_ID)
    }
}

pub type RelationshipCountKey = (Option<u32>, Option<u32>, Option<u32>);

/// The record stores: entity records, properties, tokens, schema, counts and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStores {
    pub nodes: BTreeMap<u64, NodeRecord>,
    pub relationships: BTreeMap<u64, RelationshipRecord>,
    pub node_properties: BTreeMap<(u64, u32), Value>,
    pub relationship_properties: BTreeMap<(u64, u32), Value>,
    pub relationship_groups: BTreeMap<u64, RelationshipGroupRecord>,
    pub group_degrees: BTreeMap<(u64, Direction), i64>,
    pub tokens: BTreeMap<(TokenKind, u32), String>,
    pub schema: BTreeMap<u64, SchemaRule>,
    pub node_counts: BTreeMap<Option<u32>, i64>,
    pub relationship_counts: BTreeMap<RelationshipCountKey, i64>,
    pub metadata: BTreeMap<String, i64>,
    pub next_node_id: u64,
    pub next_relationship_id: u64,
    pub applied: AppliedSequence,
}

impl GraphStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied_tx_id(&self) -> u64 {
        self.applied.highest_gapless()
    }

    pub fn node(&self, id: u64) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    pub fn relationship(&self, id: u64) -> Option<&RelationshipRecord> {
        self.relationships.get(&id)
    }

    pub fn property(&self, owner: PropertyOwner, key: u32) -> Option<&Value> {
        match owner {
            PropertyOwner::Node(id) => self.node_properties.get(&(id, key)),
            PropertyOwner::Relationship(id) => self.relationship_properties.get(&(id, key)),
        }
    }

    pub fn node_properties_of(&self, id: u64) -> impl Iterator<Item = (u32, &Value)> {
        self.node_properties
            .range((id, 0)..=(id, u32::MAX))
            .map(|((_, key), value)| (*key, value))
    }

    pub fn node_count(&self, label: Option<u32>) -> i64 {
        self.node_counts.get(&label).copied().unwrap_or(0)
    }

    pub fn relationship_count(&self, key: RelationshipCountKey) -> i64 {
        self.relationship_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn group_degree(&self, group_id: u64, direction: Direction) -> i64 {
        self.group_degrees
            .get(&(group_id, direction))
            .copied()
            .unwrap_or(0)
    }

    pub fn token(&self, kind: TokenKind, id: u32) -> Option<&str> {
        self.tokens.get(&(kind, id)).map(String::as_str)
    }

    pub fn allocate_node_id(&mut self) -> u64 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    pub fn allocate_relationship_id(&mut self) -> u64 {
        let id = self.next_relationship_id;
        self.next_relationship_id += 1;
        id
    }

    pub(crate) fn track_node_id(&mut self, id: u64) {
        self.next_node_id = self.next_node_id.max(id + 1);
    }

    pub(crate) fn track_relationship_id(&mut self, id: u64) {
        self.next_relationship_id = self.next_relationship_id.max(id + 1);
    }

    /// Rejects stores whose id bookkeeping contradicts their own content.
    pub fn verify(&self) -> Result<()> {
        if let Some(max) = self.nodes.keys().next_back() {
            if *max >= self.next_node_id {
                return Err(Error::Consistency(format!(
                    "node {} is in use but next node id is {}",
                    max, self.next_node_id
                )));
            }
        }
        if let Some(max) = self.relationships.keys().next_back() {
            if *max >= self.next_relationship_id {
                return Err(Error::Consistency(format!(
                    "relationship {} is in use but next relationship id is {}",
                    max, self.next_relationship_id
                )));
            }
        }
        Ok(())
    }
}
