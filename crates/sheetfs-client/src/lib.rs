//! SheetFS client library.
//!
//! A client resolves the master primary through the election coordinator's
//! ack name, then performs cell operations as a two-step protocol: a master
//! round-trip yields a `(chunk, datanode, offset, size, version)` descriptor,
//! a datanode round-trip moves the bytes. Datanode stubs are cached per
//! group and re-resolved through the coordinator when a primary fails over.

pub mod assemble;
pub mod cancel;
pub mod client;
pub mod error;
pub mod file;

pub use cancel::CancelToken;
pub use client::Client;
pub use error::{ClientError, ClientResult};
pub use file::File;
