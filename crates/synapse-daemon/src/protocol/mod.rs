//! WebSocket protocol surface.
//!
//! The protocol stack is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Exchange operations               │  state machine + ledger
//! ├─────────────────────────────────────────┤
//! │        Dispatch                          │  validate + route by type
//! ├─────────────────────────────────────────┤
//! │        Session & handshake               │  challenge / auth
//! ├─────────────────────────────────────────┤
//! │        WebSocket transport               │  one JSON object per frame
//! └─────────────────────────────────────────┘
//! ```
//!
//! - [`server`]: connection acceptance, challenge, per-session loop
//! - [`dispatch`]: routing of validated messages to exchange handlers
//!
//! Per-connection ordering is the concurrency contract: a session's
//! frames are handled one at a time, in arrival order, and every
//! handler runs to completion before the next frame is read.

pub mod dispatch;
pub mod server;
