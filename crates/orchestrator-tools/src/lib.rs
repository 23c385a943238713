//! HTTP client for the external tool-server that the orchestrator core
//! delegates side-effecting tool execution to (filesystem, HTTP, code
//! execution, browser, etc. all live behind that service, not in this
//! crate — see `orchestrator-core`'s `ToolServerClient` trait).

pub mod client;
pub mod confirmation;
pub mod hil;

pub use client::HttpToolServerClient;
pub use confirmation::{ConfirmationClient, ConfirmationStatus};
pub use hil::HilClient;
