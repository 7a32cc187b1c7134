//! A tiny paged write queue that loads records into sled in transactional batches.
//!
//! Producers queue create, update, delete and custom operations on an
//! [`OperationQueue`]. Operations are buffered into pages and each page is run
//! inside one transaction of a [`TransactionalStore`]; a failing operation is
//! recorded without aborting the rest of its page.
//!
//! ```
//! use tinybatch::{EntityType, OperationQueue, Payload, QueueConfig, SledStore};
//!
//! let store = SledStore::temporary().unwrap();
//! let players = EntityType::new("players", "id").unique("startgg_id").field("gamer_tag");
//!
//! let mut queue = OperationQueue::new(store, QueueConfig::new(2, true));
//! queue.create(&players, Payload::new().with("startgg_id", "1").with("gamer_tag", "Zain"));
//! queue.create(&players, Payload::new().with("startgg_id", "1").with("gamer_tag", "Zain"));
//!
//! // The page filled up and was flushed; the duplicate was isolated.
//! let stats = queue.stats();
//! assert_eq!(stats.operations_successful, 1);
//! assert_eq!(stats.errors_pending, 1);
//! ```

pub mod config;
pub use config::{Config, QueueConfig, StoreConfig};

pub mod entity;
pub use entity::EntityType;

pub mod operation;
pub use operation::{CustomOperation, OperationKind, QueuedOperation, Upsert};

pub mod page;
pub use page::Page;

pub mod queue;
pub use queue::{ErrorRecord, OperationQueue};

pub mod record;
pub use record::Record;

pub mod result;
pub use result::{DbResult, TinyBatchError};

pub mod scope;
pub use scope::{batch_operations, BatchOutput, BatchScope};

pub mod stats;
pub use stats::QueueStats;

pub mod store;
pub use store::{Savepoint, SledStore, SledTransaction, Transaction, TransactionalStore};

pub mod tournament;

pub mod value;
pub use value::{Payload, Value};

mod encoding;
