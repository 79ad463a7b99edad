//! # Event subscribers.
//!
//! External collaborators observe the core through [`Subscribe`]. The
//! orchestrator forwards every event appended to its [`EventStore`](crate::EventStore)
//! to a [`SubscriberSet`].
//!
//! ```text
//! EventStore::add ──► Bus ──► orchestrator listener ──► SubscriberSet::emit
//!                                                         ├──► LogWriter
//!                                                         ├──► alerting
//!                                                         └──► ...
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod embedded;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
