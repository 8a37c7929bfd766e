//! SheetFS integration test infrastructure.
//!
//! Brings up whole deployments in-process — coordinator, journal bus,
//! master and datanode groups, clients — with no sockets involved, so the
//! end-to-end scenarios in `tests/` exercise the real node lifecycles,
//! journaling and rediscovery paths deterministically.

pub mod harness;

pub use harness::{init_tracing, InProcessNet, TestCluster};
