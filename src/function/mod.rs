//! Function metadata: registration, code binding and runtime routing.

pub mod model;
pub mod service;

pub use model::{CreateFunctionRequest, Function, FunctionParam, RuntimeFamily, DEFAULT_RUNTIME};
pub use service::FunctionService;
