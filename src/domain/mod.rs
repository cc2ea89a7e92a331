//! Operations exposed over the Model Context Protocol
//!
//! Handlers bound into the capability catalog at startup.

pub mod tools;
