pub mod codec;
pub mod transaction;
pub mod validation;

pub use codec::{BincodeCodec, CommandCodec};
pub use transaction::{Committed, TransactionRepresentation};
pub use validation::validate_commands;
