//! # lobby-core
//!
//! Single-session enforcement and presence broadcast for the Lobby hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionSet** - Live connections and the identity attached to each
//! - **SessionRegistry** - One connection per user, with atomic swap-and-evict
//! - **Presence** - Roster building, sensitive field filtering and fan-out
//! - **Dispatcher** - Drives identify, evict, register and announce
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │   Frame     │────▶│ Dispatcher  │────▶│ IdentityLookup  │
//! └─────────────┘     └─────────────┘     └─────────────────┘
//!                            │
//!               ┌────────────┼─────────────┐
//!               ▼            ▼             ▼
//!        ┌────────────┐ ┌──────────┐ ┌───────────────┐
//!        │  Registry  │ │ Presence │ │ ConnectionSet │
//!        └────────────┘ └──────────┘ └───────────────┘
//! ```

pub mod connection;
pub mod diagnostics;
pub mod dispatcher;
pub mod identity;
pub mod presence;
pub mod registry;

pub use connection::{Connection, ConnectionError, ConnectionSet, Outbox};
pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use identity::{IdentityLookup, LookupError, MemoryIdentityStore};
pub use presence::{broadcast, broadcast_with_limit, build_roster, BroadcastReport, SensitiveFilter};
pub use registry::SessionRegistry;

pub use lobby_protocol::{ConnectionId, Identity, Roster, ServerEvent, UserId};
