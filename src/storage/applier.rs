//! The chain of appliers a command batch is dispatched through.
//!
//! Builtin appliers are variants of [`Applier`] and dispatched with `match`. Storage
//! format modules outside this crate plug in through [`ExternalApplierFactory`]. The
//! [`ApplierRegistry`] maps every command kind to the chain positions that handle it.

use crate::error::{Error, Result};
use crate::storage::command::{Command, CommandKind, Direction, PropertyOwner};
use crate::storage::index::IndexUpdate;
use crate::storage::stores::{GraphStores, RelationshipCountKey};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationMode {
    /// Transactions committed by this instance.
    Internal,
    /// Transactions committed elsewhere and shipped here.
    External,
    /// Replay of the log after a restart.
    Recovery,
}

/// Per-transaction applier supplied by an external collaborator.
pub trait TransactionApplier: Send {
    fn visit(&mut self, command: &Command) -> Result<()>;

    /// Flushes whatever the applier buffered. Runs while entity locks are still held.
    fn close(self: Box<Self>) -> Result<()>;
}

pub trait ExternalApplierFactory: Send + Sync {
    fn name(&self) -> &str;

    fn kinds(&self) -> &[CommandKind];

    fn create(&self, tx_id: u64, mode: ApplicationMode) -> Result<Box<dyn TransactionApplier>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinApplier {
    Store,
    Schema,
    Counts,
    GroupDegree,
    MetaData,
    Index,
}

impl BuiltinApplier {
    pub fn kinds(self) -> &'static [CommandKind] {
        match self {
            BuiltinApplier::Store => &[
                CommandKind::Node,
                CommandKind::Relationship,
                CommandKind::Property,
                CommandKind::RelationshipGroup,
                CommandKind::Token,
            ],
            BuiltinApplier::Schema => &[CommandKind::Schema],
            BuiltinApplier::Counts => &[CommandKind::NodeCounts, CommandKind::RelationshipCounts],
            BuiltinApplier::GroupDegree => &[CommandKind::GroupDegree],
            BuiltinApplier::MetaData => &[CommandKind::MetaData],
            BuiltinApplier::Index => &[CommandKind::Node, CommandKind::Property, CommandKind::Schema],
        }
    }

    fn create(self) -> Applier {
        match self {
            BuiltinApplier::Store => Applier::Store,
            BuiltinApplier::Schema => Applier::Schema,
            BuiltinApplier::Counts => Applier::Counts {
                nodes: BTreeMap::new(),
                relationships: BTreeMap::new(),
            },
            BuiltinApplier::GroupDegree => Applier::GroupDegree {
                deltas: BTreeMap::new(),
            },
            BuiltinApplier::MetaData => Applier::MetaData,
            BuiltinApplier::Index => Applier::Index {
                updates: Vec::new(),
            },
        }
    }
}

#[derive(Clone)]
enum Registration {
    Builtin(BuiltinApplier),
    External(Arc<dyn ExternalApplierFactory>),
}

/// Registration table: chain order plus, per command kind, the handling positions.
#[derive(Clone)]
pub struct ApplierRegistry {
    chain: Vec<Registration>,
    handlers: [Vec<usize>; CommandKind::COUNT],
}

impl ApplierRegistry {
    pub fn empty() -> Self {
        ApplierRegistry {
            chain: Vec::new(),
            handlers: Default::default(),
        }
    }

    /// Index derivation, then store, schema, counts, group degree and metadata.
    ///
    /// Index derivation runs first so it reads the stores as they were before the command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for builtin in [
            BuiltinApplier::Index,
            BuiltinApplier::Store,
            BuiltinApplier::Schema,
            BuiltinApplier::Counts,
            BuiltinApplier::GroupDegree,
            BuiltinApplier::MetaData,
        ] {
            registry.register_builtin(builtin);
        }
        registry
    }

    pub fn register_builtin(&mut self, builtin: BuiltinApplier) {
        self.add(Registration::Builtin(builtin), builtin.kinds());
    }

    pub fn register(&mut self, factory: Arc<dyn ExternalApplierFactory>) {
        let kinds = factory.kinds().to_vec();
        self.add(Registration::External(factory), &kinds);
    }

    fn add(&mut self, registration: Registration, kinds: &[CommandKind]) {
        let position = self.chain.len();
        self.chain.push(registration);
        for kind in kinds {
            self.handlers[kind.index()].push(position);
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Fresh appliers for one transaction.
    pub fn chain(&self, tx_id: u64, mode: ApplicationMode) -> Result<ApplierChain<'_>> {
        let mut appliers = Vec::with_capacity(self.chain.len());
        for registration in &self.chain {
            appliers.push(match registration {
                Registration::Builtin(builtin) => builtin.create(),
                Registration::External(factory) => {
                    Applier::External(factory.create(tx_id, mode)?)
                }
            });
        }
        Ok(ApplierChain {
            registry: self,
            appliers,
        })
    }
}

impl Default for ApplierRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ApplierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .chain
            .iter()
            .map(|r| match r {
                Registration::Builtin(b) => format!("{:?}", b),
                Registration::External(factory) => factory.name().to_string(),
            })
            .collect();
        f.debug_struct("ApplierRegistry").field("chain", &names).finish()
    }
}

pub enum Applier {
    Store,
    Schema,
    Counts {
        nodes: BTreeMap<Option<u32>, i64>,
        relationships: BTreeMap<RelationshipCountKey, i64>,
    },
    GroupDegree {
        deltas: BTreeMap<(u64, Direction), i64>,
    },
    MetaData,
    Index {
        updates: Vec<IndexUpdate>,
    },
    External(Box<dyn TransactionApplier>),
}

impl Applier {
    fn visit(&mut self, command: &Command, stores: &mut GraphStores) -> Result<()> {
        match self {
            Applier::Store => apply_record(command, stores),
            Applier::Schema => {
                if let Command::Schema { rule_id, after, .. } = command {
                    match after {
                        Some(rule) => {
                            stores.schema.insert(*rule_id, *rule);
                        }
                        None => {
                            stores.schema.remove(rule_id);
                        }
                    }
                }
                Ok(())
            }
            Applier::Counts {
                nodes,
                relationships,
            } => {
                match command {
                    Command::NodeCounts { label, delta } => {
                        *nodes.entry(*label).or_default() += delta;
                    }
                    Command::RelationshipCounts {
                        start_label,
                        rel_type,
                        end_label,
                        delta,
                    } => {
                        *relationships
                            .entry((*start_label, *rel_type, *end_label))
                            .or_default() += delta;
                    }
                    _ => {}
                }
                Ok(())
            }
            Applier::GroupDegree { deltas } => {
                if let Command::GroupDegree {
                    group_id,
                    direction,
                    delta,
                    ..
                } = command
                {
                    *deltas.entry((*group_id, *direction)).or_default() += delta;
                }
                Ok(())
            }
            Applier::MetaData => {
                if let Command::MetaData { key, value } = command {
                    stores.metadata.insert(key.clone(), *value);
                }
                Ok(())
            }
            Applier::Index { updates } => {
                derive_index_updates(command, stores, updates);
                Ok(())
            }
            Applier::External(applier) => applier.visit(command),
        }
    }

    fn close(self, stores: &mut GraphStores) -> Result<()> {
        match self {
            Applier::Counts {
                nodes,
                relationships,
            } => {
                for (label, delta) in nodes {
                    let count = stores.node_counts.entry(label).or_default();
                    *count = checked_count(*count, delta)?;
                }
                for (key, delta) in relationships {
                    let count = stores.relationship_counts.entry(key).or_default();
                    *count = checked_count(*count, delta)?;
                }
                Ok(())
            }
            Applier::GroupDegree { deltas } => {
                for (key, delta) in deltas {
                    let degree = stores.group_degrees.entry(key).or_default();
                    *degree = checked_count(*degree, delta)?;
                }
                Ok(())
            }
            Applier::External(applier) => applier.close(),
            Applier::Store | Applier::Schema | Applier::MetaData | Applier::Index { .. } => {
                Ok(())
            }
        }
    }
}

fn checked_count(current: i64, delta: i64) -> Result<i64> {
    match current.checked_add(delta) {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(Error::Consistency(format!(
            "count {} cannot take delta {}",
            current, delta
        ))),
    }
}

/// Writes the after image of a record command. Re-applying a command is harmless.
fn apply_record(command: &Command, stores: &mut GraphStores) -> Result<()> {
    match command {
        Command::Node { id, after, .. } => {
            match after {
                Some(record) => {
                    stores.nodes.insert(*id, record.clone());
                    stores.track_node_id(*id);
                }
                None => {
                    stores.nodes.remove(id);
                    let keys: Vec<u32> = stores.node_properties_of(*id).map(|(k, _)| k).collect();
                    for key in keys {
                        stores.node_properties.remove(&(*id, key));
                    }
                }
            }
            Ok(())
        }
        Command::Relationship { id, after, .. } => {
            match after {
                Some(record) => {
                    stores.relationships.insert(*id, record.clone());
                    stores.track_relationship_id(*id);
                }
                None => {
                    stores.relationships.remove(id);
                    stores
                        .relationship_properties
                        .retain(|(owner, _), _| owner != id);
                }
            }
            Ok(())
        }
        Command::Property {
            owner, key, after, ..
        } => {
            let map = match owner {
                PropertyOwner::Node(id) => {
                    if after.is_some() && !stores.nodes.contains_key(id) {
                        return Err(Error::Consistency(format!(
                            "property {} set on node {} which is not in use",
                            key, id
                        )));
                    }
                    (&mut stores.node_properties, *id)
                }
                PropertyOwner::Relationship(id) => {
                    if after.is_some() && !stores.relationships.contains_key(id) {
                        return Err(Error::Consistency(format!(
                            "property {} set on relationship {} which is not in use",
                            key, id
                        )));
                    }
                    (&mut stores.relationship_properties, *id)
                }
            };
            let (properties, id) = map;
            match after {
                Some(value) => {
                    properties.insert((id, *key), value.clone());
                }
                None => {
                    properties.remove(&(id, *key));
                }
            }
            Ok(())
        }
        Command::RelationshipGroup { id, after, .. } => {
            match after {
                Some(group) => {
                    stores.relationship_groups.insert(*id, group.clone());
                }
                None => {
                    stores.relationship_groups.remove(id);
                    stores.group_degrees.retain(|(group, _), _| group != id);
                }
            }
            Ok(())
        }
        Command::Token { kind, id, name } => {
            stores.tokens.insert((*kind, *id), name.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Index consequences of a command, read against the stores before it is applied.
fn derive_index_updates(command: &Command, stores: &GraphStores, updates: &mut Vec<IndexUpdate>) {
    match command {
        Command::Node { id, before, after } => {
            let old: &[u32] = before.as_ref().map(|r| r.labels.as_slice()).unwrap_or(&[]);
            let new: &[u32] = after.as_ref().map(|r| r.labels.as_slice()).unwrap_or(&[]);
            for label in old.iter().filter(|l| !new.contains(l)) {
                updates.push(IndexUpdate::Label {
                    node: *id,
                    label: *label,
                    added: false,
                });
                for (rule_id, rule) in stores.schema.iter().filter(|(_, r)| r.label == *label) {
                    if let Some(value) = stores.node_properties.get(&(*id, rule.property_key)) {
                        updates.push(IndexUpdate::Value {
                            node: *id,
                            rule_id: *rule_id,
                            before: Some(value.clone()),
                            after: None,
                        });
                    }
                }
            }
            for label in new.iter().filter(|l| !old.contains(l)) {
                updates.push(IndexUpdate::Label {
                    node: *id,
                    label: *label,
                    added: true,
                });
                for (rule_id, rule) in stores.schema.iter().filter(|(_, r)| r.label == *label) {
                    if let Some(value) = stores.node_properties.get(&(*id, rule.property_key)) {
                        updates.push(IndexUpdate::Value {
                            node: *id,
                            rule_id: *rule_id,
                            before: None,
                            after: Some(value.clone()),
                        });
                    }
                }
            }
        }
        Command::Property {
            owner: PropertyOwner::Node(node),
            key,
            before,
            after,
        } => {
            if before == after {
                return;
            }
            let Some(record) = stores.nodes.get(node) else {
                return;
            };
            for (rule_id, rule) in &stores.schema {
                if rule.property_key == *key && record.has_label(rule.label) {
                    updates.push(IndexUpdate::Value {
                        node: *node,
                        rule_id: *rule_id,
                        before: before.clone(),
                        after: after.clone(),
                    });
                }
            }
        }
        Command::Schema {
            rule_id,
            before,
            after,
        } => {
            // populate a created rule, empty a dropped one
            let (rule, adding) = match (before, after) {
                (None, Some(rule)) => (rule, true),
                (Some(rule), None) => (rule, false),
                _ => return,
            };
            for (node, record) in &stores.nodes {
                if !record.has_label(rule.label) {
                    continue;
                }
                if let Some(value) = stores.node_properties.get(&(*node, rule.property_key)) {
                    updates.push(IndexUpdate::Value {
                        node: *node,
                        rule_id: *rule_id,
                        before: (!adding).then(|| value.clone()),
                        after: adding.then(|| value.clone()),
                    });
                }
            }
        }
        _ => {}
    }
}

/// The appliers of one transaction, in chain order.
pub struct ApplierChain<'a> {
    registry: &'a ApplierRegistry,
    appliers: Vec<Applier>,
}

impl ApplierChain<'_> {
    /// Dispatches `command` to every applier registered for its kind.
    pub fn visit(&mut self, command: &Command, stores: &mut GraphStores) -> Result<()> {
        for &position in &self.registry.handlers[command.kind().index()] {
            self.appliers[position].visit(command, stores)?;
        }
        Ok(())
    }

    /// Index updates derived so far; the index applier is left empty.
    pub fn take_index_updates(&mut self) -> Vec<IndexUpdate> {
        let mut taken = Vec::new();
        for applier in &mut self.appliers {
            if let Applier::Index { updates } = applier {
                taken.append(updates);
            }
        }
        taken
    }

    /// Closes every applier in chain order. Stops at the first failure.
    pub fn close(self, stores: &mut GraphStores) -> Result<()> {
        for applier in self.appliers {
            applier.close(stores)?;
        }
        Ok(())
    }
}
