use crate::error::{Error, Result};
use crate::storage::command::{Command, Direction, PropertyOwner};
use crate::storage::stores::{GraphStores, RelationshipCountKey};
use std::collections::{BTreeMap, BTreeSet};

/// Checks that `commands` would apply cleanly on top of `stores`.
///
/// Runs before a transaction is appended: a batch the stores would refuse must never
/// become durable, or every recovery would replay the refusal. Records created or
/// deleted earlier in the same batch are taken into account.
pub fn validate_commands(stores: &GraphStores, commands: &[Command]) -> Result<()> {
    let mut nodes: BTreeMap<u64, bool> = BTreeMap::new();
    let mut relationships: BTreeMap<u64, bool> = BTreeMap::new();
    let mut cleared_groups: BTreeSet<u64> = BTreeSet::new();
    let mut node_counts: BTreeMap<Option<u32>, i64> = BTreeMap::new();
    let mut relationship_counts: BTreeMap<RelationshipCountKey, i64> = BTreeMap::new();
    let mut degrees: BTreeMap<(u64, Direction), i64> = BTreeMap::new();

    for command in commands {
        match command {
            Command::Node { id, after, .. } => {
                nodes.insert(*id, after.is_some());
            }
            Command::Relationship { id, after, .. } => {
                relationships.insert(*id, after.is_some());
            }
            Command::RelationshipGroup { id, after: None, .. } => {
                cleared_groups.insert(*id);
            }
            Command::Property {
                owner,
                key,
                after: Some(_),
                ..
            } => {
                let in_use = match owner {
                    PropertyOwner::Node(id) => nodes
                        .get(id)
                        .copied()
                        .unwrap_or_else(|| stores.nodes.contains_key(id)),
                    PropertyOwner::Relationship(id) => relationships
                        .get(id)
                        .copied()
                        .unwrap_or_else(|| stores.relationships.contains_key(id)),
                };
                if !in_use {
                    return Err(Error::InvalidOperation(format!(
                        "property {} set on {:?} which is not in use",
                        key, owner
                    )));
                }
            }
            Command::NodeCounts { label, delta } => {
                add_delta(node_counts.entry(*label).or_default(), *delta)?;
            }
            Command::RelationshipCounts {
                start_label,
                rel_type,
                end_label,
                delta,
            } => {
                let key = (*start_label, *rel_type, *end_label);
                add_delta(relationship_counts.entry(key).or_default(), *delta)?;
            }
            Command::GroupDegree {
                group_id,
                direction,
                delta,
                ..
            } => {
                add_delta(degrees.entry((*group_id, *direction)).or_default(), *delta)?;
            }
            _ => {}
        }
    }

    for (label, delta) in node_counts {
        check_total("node count", stores.node_count(label), delta)?;
    }
    for (key, delta) in relationship_counts {
        check_total("relationship count", stores.relationship_count(key), delta)?;
    }
    for ((group_id, direction), delta) in degrees {
        let current = if cleared_groups.contains(&group_id) {
            0
        } else {
            stores.group_degree(group_id, direction)
        };
        check_total("group degree", current, delta)?;
    }
    Ok(())
}

fn add_delta(total: &mut i64, delta: i64) -> Result<()> {
    *total = total
        .checked_add(delta)
        .ok_or_else(|| Error::InvalidOperation(format!("delta {} overflows", delta)))?;
    Ok(())
}

fn check_total(what: &str, current: i64, delta: i64) -> Result<()> {
    match current.checked_add(delta) {
        Some(n) if n >= 0 => Ok(()),
        _ => Err(Error::InvalidOperation(format!(
            "{} {} cannot take delta {}",
            what, current, delta
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::command::{NodeRecord, Value};

    fn set_property(node: u64) -> Command {
        Command::Property {
            owner: PropertyOwner::Node(node),
            key: 1,
            before: None,
            after: Some(Value::Int(1)),
        }
    }

    #[test]
    fn test_property_on_missing_node_is_rejected() {
        let stores = GraphStores::new();
        let result = validate_commands(&stores, &[set_property(99)]);
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_node_created_in_same_batch_is_in_use() {
        let stores = GraphStores::new();
        let create = Command::Node {
            id: 4,
            before: None,
            after: Some(NodeRecord::with_labels(vec![1])),
        };
        assert!(validate_commands(&stores, &[create.clone(), set_property(4)]).is_ok());

        let delete = Command::Node {
            id: 4,
            before: Some(NodeRecord::with_labels(vec![1])),
            after: None,
        };
        assert!(validate_commands(&stores, &[create, delete, set_property(4)]).is_err());
    }

    #[test]
    fn test_counts_judged_on_batch_total() {
        let mut stores = GraphStores::new();
        stores.node_counts.insert(Some(1), 1);
        let decrement = Command::NodeCounts {
            label: Some(1),
            delta: -1,
        };
        let increment = Command::NodeCounts {
            label: Some(1),
            delta: 1,
        };

        assert!(validate_commands(&stores, &[decrement.clone()]).is_ok());
        assert!(validate_commands(&stores, &[decrement.clone(), decrement.clone()]).is_err());
        assert!(
            validate_commands(&stores, &[decrement.clone(), decrement, increment]).is_ok()
        );
    }

    #[test]
    fn test_cleared_group_restarts_degrees_at_zero() {
        let mut stores = GraphStores::new();
        stores.group_degrees.insert((3, Direction::Outgoing), 5);
        let drop_group = Command::RelationshipGroup {
            id: 3,
            before: None,
            after: None,
        };
        let shrink = Command::GroupDegree {
            group_id: 3,
            owner: 0,
            direction: Direction::Outgoing,
            delta: -2,
        };
        assert!(validate_commands(&stores, &[shrink.clone()]).is_ok());
        assert!(validate_commands(&stores, &[drop_group, shrink]).is_err());
    }
}
