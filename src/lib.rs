//! Appium Gateway Hub - one gateway, many isolated Appium servers
//!
//! This library lets parallel test clients share a single entry point while
//! each gets its own backend server process:
//! - Allocates one port per session from a fixed range
//! - Launches and supervises one Appium server process per session
//! - Waits for each server's status endpoint before handing it to a client
//! - Proxies `/session/{id}/...` traffic transparently to the right server
//! - Captures each server's output into a per-session log file
//! - Reaps sessions that time out or whose server process dies

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pool;
pub mod ports;
pub mod reaper;
pub mod supervisor;
