pub mod adapters;
pub mod cli;
pub mod commands;
pub mod control;
pub mod logging;
pub mod mcp;
