pub mod lock_manager;
pub mod transaction;
pub mod tx_manager;

pub use lock_manager::{KeyLockGuard, LockManager};
pub use transaction::{Transaction, TxState, WriteOp, WriteRecord};
pub use tx_manager::{CommitMode, TransactionManager};
