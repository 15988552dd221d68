//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, query string, body, headers)
//!     → policy.rs (whitelist via matcher.rs)
//!         - not whitelisted → local application port
//!     → paths.rs (query id: kill-query body, path grammar, UI query string)
//!         - bound id → router.rs returns the bound backend
//!     → headers.rs (routing group, client tags, excluded backend)
//!     → WeightedRoutingTable pick, adhoc group as fallback
//!
//! After the backend answers a submit:
//!     router.rs bind_query(id, backend) → in-memory map + cache
//! ```
//!
//! # Design Decisions
//! - A bound query never consults the weighted table again
//! - Bindings are written through to the cache so a restart keeps them
//! - No regex in the hot path (prefix matching and hand-written scanners)

pub mod headers;
pub mod matcher;
pub mod paths;
pub mod policy;
pub mod router;

pub use policy::{AllowAll, RequestAuthorizer, RoutingPolicy};
pub use router::{QueryAffinityRouter, QueryBinding, RouteDecision, RouteKind};
