pub mod transaction;

pub use transaction::{Metadata, NewTransaction, Transaction, TransactionStatus};
