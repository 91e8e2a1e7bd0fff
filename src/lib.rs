//! # Linear Local
//!
//! Read-only, query-ready access to the local cache the Linear desktop app
//! keeps on disk.
//!
//! The snapshot's stores are undocumented, so nothing about them is
//! hard-coded: each store is sampled, its fields typed and its role
//! (issue, user, team, state, comment) inferred from signature fields.
//! Records are then decoded, cross-referenced and indexed in memory, and
//! the Index is rebuilt when it ages past its TTL.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RecordSource │──▶│ sniff_store  │──▶│ decode_record│
//! │ (snapshot)   │   │ (per store)  │   │ (per record) │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ CacheManager │◀──│ IndexBuilder │
//!                    │  (TTL, swap) │   │ (two pass)   │
//!                    └──────┬───────┘   └──────────────┘
//!                           ▼
//!                    ┌──────────────┐
//!                    │ QueryEngine  │──▶ tools ──▶ CLI / HTTP / MCP
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! linear-local summary                       # counts and store roles
//! linear-local issues --assignee ada         # filtered issue list
//! linear-local issue ENG-123                 # one issue in full
//! linear-local serve                         # HTTP + MCP on 127.0.0.1:7341
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and structured error bodies |
//! | [`models`] | Core entity types |
//! | [`source`] | Raw record sources (JSONL snapshot, in-memory) |
//! | [`schema`] | Sampling-based schema and role inference |
//! | [`decode`] | Record to entity decoding |
//! | [`index`] | Immutable in-memory Index and its builder |
//! | [`cache`] | TTL cache with single-flight rebuilds |
//! | [`cursor`] | Opaque pagination cursors |
//! | [`query`] | Filters, search, lookups and pagination |
//! | [`tools`] | Tool trait, registry and built-in tools |
//! | [`server`] | HTTP tool API and MCP endpoint |
//! | [`mcp`] | MCP protocol bridge |
//! | [`logging`] | Tracing subscriber setup |

pub mod cache;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod index;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod query;
pub mod schema;
pub mod server;
pub mod source;
pub mod tools;
