//! Worker side of the execution pipeline.
//!
//! # Components
//!
//! - [`WorkerLoop`]: blocks on one runtime partition of the queue and
//!   publishes a result per request
//! - [`Sandbox`]: runs user code against an input event; [`ProcessSandbox`]
//!   is the subprocess implementation
//! - [`harness`]: per-runtime entry-point templates
//!
//! # Execution Flow
//!
//! 1. [`WorkerLoop`] pops an [`ExecutionRequest`](crate::messages::ExecutionRequest)
//! 2. [`ProcessSandbox`] writes the harness into a fresh temp directory and
//!    runs the interpreter with the input on stdin
//! 3. The outcome is classified into an
//!    [`ExecutionResult`](crate::messages::ExecutionResult) and stored with a TTL
//!
//! # Isolation Note
//!
//! The only limit enforced on user code is the wall-clock timeout. Other
//! strategies (containers, microVMs) can be plugged in behind [`Sandbox`].

pub mod harness;
pub mod runner;
pub mod sandbox;

pub use runner::WorkerLoop;
pub use sandbox::{ProcessSandbox, Sandbox, SandboxOutcome};
