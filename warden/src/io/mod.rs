//! Side-effecting services: filesystem stores, git, child processes.
//!
//! Every store is parameterized by a project root through [`init::WardenPaths`];
//! nothing here keeps process-wide state. One orchestrator owns a project at a
//! time and no locking is attempted.

pub mod atomic;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod git;
pub mod graph_store;
pub mod init;
pub mod process;
pub mod prompt;
pub mod scars;
pub mod state;
pub mod verifier;
pub mod worker;
