//! Invocation lifecycle: creation, dispatch to the queue, and one-time
//! reconciliation of worker results.

pub mod dispatch;
pub mod model;

pub use dispatch::{InvocationDispatcher, DEFAULT_LIST_LIMIT};
pub use model::{Invocation, InvocationCompletion, InvocationStatus};
