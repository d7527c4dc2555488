//! Concurrency bridge between request handlers and the controller thread.
//!
//! - [`ControllerDispatch`] marshals closures onto the controller thread.
//! - [`ExecutionGate`] admits one tool invocation at a time.
//! - [`ToolInvoker`] combines both to run catalog tools.

pub mod dispatch;
pub mod gate;
pub mod invoker;

pub use dispatch::{ControllerDispatch, ControllerThread, ControllerWaker, ThreadIdentity};
pub use gate::{ExecutionGate, GatePermit};
pub use invoker::{InvokerSettings, ToolInvocation, ToolInvoker, ToolResult, ToolStatus};
