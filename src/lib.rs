// Library interface for toolbridge
// The binary and embedding orchestrators both go through these modules

pub mod cli;
pub mod config;
pub mod eth;
pub mod logging;
pub mod mcp;
pub mod search;
pub mod toolset;
pub mod x402;
