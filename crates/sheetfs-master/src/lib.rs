//! SheetFS master: the metadata authority.
//!
//! The master owns the namespace directory, the sheet-to-chunk-to-cell
//! index, chunk placement across datanode groups, and the monotonic
//! per-chunk version counter that serializes writes. Durability comes from
//! two layers: every mutation is committed to the master journal before it
//! becomes visible, and the whole in-memory state is periodically
//! checkpointed to a transactional catalog together with the journal offset
//! replay must resume from.
//!
//! Masters run as a primary/secondary group coordinated through an external
//! election service; see [`node`] for the lifecycle.

pub mod alloc;
pub mod catalog;
pub mod cell;
pub mod chunk;
pub mod error;
pub mod filemgr;
pub mod journal;
pub mod node;
pub mod service;
pub mod sheetfile;

pub use alloc::DataNodeAllocator;
pub use catalog::{BatchOp, Catalog, Checkpoint, MemoryCatalog};
pub use cell::Cell;
pub use chunk::{Chunk, ChunkRow};
pub use error::{MasterError, MasterResult};
pub use filemgr::{FileManager, MapEntry};
pub use journal::{MasterEntry, TargetState};
pub use node::{MasterHandle, MasterNode, MasterNodeConfig, MasterPublisher, NodePhase};
pub use service::MasterServer;
pub use sheetfile::SheetFile;
