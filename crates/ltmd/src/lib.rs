//! LTM Engine - Backend discovery, delta cache and refresh controller
//!
//! This crate connects to a locally running language-server backend and
//! keeps token-usage statistics for its sessions up to date:
//! - `platform` - per-OS process and port enumeration
//! - `discovery` - candidate verification and backend selection
//! - `transport` - authenticated JSON calls to the verified endpoint
//! - `fetcher` - page-until-empty retrieval of record streams
//! - `cache` - single-entry delta cache with resume offsets
//! - `controller` - actor serializing every refresh
//! - `poller` - periodic refresh of the active session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          ltmd                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────┐   commands   ┌──────────────────────────┐  │
//! │  │  poll task  │─────────────▶│     ControllerActor      │  │
//! │  │  CLI        │              │  DeltaCache, Connection  │  │
//! │  └─────────────┘              └─────┬──────────────┬─────┘  │
//! │                                     │              │        │
//! │                       locate        ▼              ▼ call   │
//! │              ┌───────────────────────────┐  ┌───────────┐   │
//! │              │ DiscoveryEngine           │  │ Transport │   │
//! │              │ PlatformStrategy + Probe  │  │ (HTTPS)   │   │
//! │              └───────────────────────────┘  └───────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cache;
pub mod command;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod fetcher;
pub mod platform;
pub mod poller;
pub mod transport;
