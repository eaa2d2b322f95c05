//! StarForth: a FORTH-79 virtual machine with a self-instrumenting,
//! adaptively-tuned threaded-code runtime.
//!
//! The execution engine keeps a decaying heat counter per dictionary entry,
//! accelerates lookup through an advisory hot-words cache, records execution
//! history in a rolling window, and periodically runs an integer-only
//! inference pass (the heartbeat) that retunes the decay slope, the window
//! width and the cache. Embedders construct a [`vm::Vm`], feed it source
//! with [`vm::Vm::interpret`], and observe the control plane through
//! published snapshots.

pub mod blocks;
pub mod compiler;
pub mod config;
pub mod dict;
pub mod error;
pub mod heartbeat;
pub mod heat;
pub mod hotwords;
pub mod inference;
pub mod inner;
pub mod q48;
pub mod repl;
pub mod vm;
pub mod window;
pub mod words;

pub use config::VmConfig;
pub use error::VmError;
pub use heartbeat::HeartbeatSnapshot;
pub use vm::{Cell, Vm, VmAddr};
