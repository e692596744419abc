pub mod settings_repo;
pub mod transaction_repo;
pub mod user_repo;

pub use settings_repo::SettingsRepository;
pub use transaction_repo::TransactionRepository;
pub use user_repo::{CreditOutcome, UserRepository};
