//! Broker adapter: streams, KV, and durable pull consumers,
//! abstracted behind the [`Broker`] trait so every other coordination
//! component is agnostic to the concrete transport.

mod broker_trait;
mod fake;
mod nats;
pub mod types;

pub use broker_trait::Broker;
pub use nats::NatsBroker;

/// In-memory [`Broker`] for tests. Exposed unconditionally (not just under
/// a feature flag) since every other `fleet-*` crate's test suite depends
/// on it and dev-dependency cycles on this crate are awkward in a
/// path-based workspace.
pub mod test_support {
    pub use crate::fake::FakeBroker;
}
