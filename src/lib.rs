//! docbridge: expose a single-threaded document host to concurrent clients.
//!
//! Tool calls arrive from two directions, a JSON-RPC 2.0 HTTP endpoint and a
//! streaming chat loop against an OpenAI-compatible model. Both run every
//! tool body on the host's controller thread, one at a time.
//!
//! - [`bridge`]: controller-thread dispatch, the execution gate, the invoker
//! - [`rpc`] and [`server`]: the protocol session and its HTTP transport
//! - [`agent`] and [`api`]: the conversation engine and model client
//! - [`tools`]: the tool trait, registry, and the headless document host

pub mod agent;
pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod rpc;
pub mod server;
#[cfg(test)]
pub mod testsupport;
pub mod tools;
pub mod types;
