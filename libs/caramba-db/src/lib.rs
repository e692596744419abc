pub mod db;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use db::{connect, connect_in_memory};
pub use memory::InMemoryTransactionStore;
pub use sqlx;
pub use store::{StoreError, StoreResult, TransactionStore};
