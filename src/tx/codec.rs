//! Byte-level encoding of command lists. The log itself treats payloads as opaque.

use crate::error::Result;
use crate::storage::command::Command;

pub trait CommandCodec: Send + Sync {
    fn encode(&self, commands: &[Command]) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Command>>;
}

/// Default codec: bincode over the serde derives of [`Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl CommandCodec for BincodeCodec {
    fn encode(&self, commands: &[Command]) -> Result<Vec<u8>> {
        Ok(bincode::serialize(commands)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Command>> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::command::{NodeRecord, PropertyOwner, Value};

    #[test]
    fn test_decodes_encoded_commands() {
        let commands = vec![
            Command::Node {
                id: 1,
                before: None,
                after: Some(NodeRecord::with_labels(vec![3])),
            },
            Command::Property {
                owner: PropertyOwner::Node(1),
                key: 2,
                before: None,
                after: Some(Value::Text("alice".to_string())),
            },
        ];
        let codec = BincodeCodec;
        let bytes = codec.encode(&commands).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), commands);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let result = BincodeCodec.decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 1]);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
