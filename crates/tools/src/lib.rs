//! Tool dispatch surface: wires C1 (identity), C4–C7 (channels, registry,
//! messaging, work queue) behind one `ToolRouter::dispatch` entry point.

mod identity_cache;
mod router;

pub use identity_cache::IdentityCache;
pub use router::{ToolRouter, ToolResult};
