//! SheetFS datanode: fixed-size chunk storage on local disk.
//!
//! A datanode group stores chunk files and serializes writes to each chunk
//! through a version counter persisted right behind the payload. Every
//! accepted write is committed to the group's journal topic before it
//! reaches disk; secondaries tail the journal and replay entries so that a
//! promoted replica holds byte-identical chunk files.

pub mod error;
pub mod journal;
pub mod node;
pub mod service;
pub mod store;

pub use error::{DataNodeError, DataNodeResult};
pub use journal::{checksum, JournalEntry};
pub use node::{DataNode, DataNodeConfig, DataNodeHandle, DataNodePhase, DataNodePublisher};
pub use service::DataNodeServer;
pub use store::{ChunkStore, PreparedWrite};
