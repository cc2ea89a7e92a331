//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides the capability catalog, the dispatch router and the protocol-level method
//! routing that sits behind every transport.

pub mod catalog;
pub mod dispatch;
pub mod rpc;
pub mod server;
