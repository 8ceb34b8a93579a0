//! Stemflow event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`Channel`]: the `<stage>:job:<kind>` channel a [`JobEvent`] is
//!   published on.
//! - [`Subscription`]: a receiver filtered to a set of channels.

pub mod bus;
pub mod channel;

pub use bus::{EventBus, JobEvent, Subscription};
pub use channel::{Channel, JobEventKind};
