use crate::storage::locks::LockKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub labels: Vec<u32>,
}

impl NodeRecord {
    pub fn with_labels(labels: Vec<u32>) -> Self {
        NodeRecord { labels }
    }

    pub fn has_label(&self, label: u32) -> bool {
        self.labels.contains(&label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub rel_type: u32,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipGroupRecord {
    pub owner: u64,
    pub rel_type: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyOwner {
    Node(u64),
    Relationship(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Label,
    PropertyKey,
    RelationshipType,
}

/// An index rule: index nodes with `label` by the value of `property_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRule {
    pub label: u32,
    pub property_key: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Loop,
}

/// One physical mutation. Record commands carry before/after images so applying them
/// is idempotent; `None` means "not in use".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Node {
        id: u64,
        before: Option<NodeRecord>,
        after: Option<NodeRecord>,
    },
    Relationship {
        id: u64,
        before: Option<RelationshipRecord>,
        after: Option<RelationshipRecord>,
    },
    Property {
        owner: PropertyOwner,
        key: u32,
        before: Option<Value>,
        after: Option<Value>,
    },
    RelationshipGroup {
        id: u64,
        before: Option<RelationshipGroupRecord>,
        after: Option<RelationshipGroupRecord>,
    },
    Token {
        kind: TokenKind,
        id: u32,
        name: String,
    },
    Schema {
        rule_id: u64,
        before: Option<SchemaRule>,
        after: Option<SchemaRule>,
    },
    NodeCounts {
        label: Option<u32>,
        delta: i64,
    },
    RelationshipCounts {
        start_label: Option<u32>,
        rel_type: Option<u32>,
        end_label: Option<u32>,
        delta: i64,
    },
    MetaData {
        key: String,
        value: i64,
    },
    GroupDegree {
        group_id: u64,
        owner: u64,
        direction: Direction,
        delta: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Node,
    Relationship,
    Property,
    RelationshipGroup,
    Token,
    Schema,
    NodeCounts,
    RelationshipCounts,
    MetaData,
    GroupDegree,
}

impl CommandKind {
    pub const COUNT: usize = 10;

    pub const ALL: [CommandKind; CommandKind::COUNT] = [
        CommandKind::Node,
        CommandKind::Relationship,
        CommandKind::Property,
        CommandKind::RelationshipGroup,
        CommandKind::Token,
        CommandKind::Schema,
        CommandKind::NodeCounts,
        CommandKind::RelationshipCounts,
        CommandKind::MetaData,
        CommandKind::GroupDegree,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Node { .. } => CommandKind::Node,
            Command::Relationship { .. } => CommandKind::Relationship,
            Command::Property { .. } => CommandKind::Property,
            Command::RelationshipGroup { .. } => CommandKind::RelationshipGroup,
            Command::Token { .. } => CommandKind::Token,
            Command::Schema { .. } => CommandKind::Schema,
            Command::NodeCounts { .. } => CommandKind::NodeCounts,
            Command::RelationshipCounts { .. } => CommandKind::RelationshipCounts,
            Command::MetaData { .. } => CommandKind::MetaData,
            Command::GroupDegree { .. } => CommandKind::GroupDegree,
        }
    }

    /// The entity this command mutates, if it needs an entity lock.
    pub fn lock_key(&self) -> Option<LockKey> {
        match self {
            Command::Node { id, .. } => Some(LockKey::Node(*id)),
            Command::Relationship { id, .. } => Some(LockKey::Relationship(*id)),
            Command::Property { owner, .. } => Some(match owner {
                PropertyOwner::Node(id) => LockKey::Node(*id),
                PropertyOwner::Relationship(id) => LockKey::Relationship(*id),
            }),
            Command::RelationshipGroup { id, before, after } => after
                .as_ref()
                .or(before.as_ref())
                .map(|group| LockKey::Node(group.owner))
                .or(Some(LockKey::RelationshipGroup(*id))),
            Command::GroupDegree { owner, .. } => Some(LockKey::Node(*owner)),
            Command::Token { .. }
            | Command::Schema { .. }
            | Command::NodeCounts { .. }
            | Command::RelationshipCounts { .. }
            | Command::MetaData { .. } => None,
        }
    }
}

/// The commands of one committed transaction, ready to be applied to the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub tx_id: u64,
    pub commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new(tx_id: u64, commands: Vec<Command>) -> Self {
        CommandBatch { tx_id, commands }
    }

    /// Every entity lock the batch needs, in canonical acquisition order.
    pub fn lock_keys(&self) -> BTreeSet<LockKey> {
        self.commands.iter().filter_map(Command::lock_key).collect()
    }
}
