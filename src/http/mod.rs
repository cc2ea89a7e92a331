//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing: the session-bound `/mcp` endpoint and the public
//! metadata endpoints.

pub mod handlers;
