//! Typed access to the hosted data service: table queries and the auth API.
//! A `DataClient` fronts one `Backend`; the REST backend talks to the hosted
//! service, the memory backend stands in for it locally and in tests.

mod query;
mod backend;
mod client;
mod rest;
mod memory;

pub use query::{Query, Filter, Order};
pub use backend::{Backend, AuthSession};
pub use client::{DataClient, TableQuery};
pub use rest::RestBackend;
pub use memory::MemoryBackend;

pub const PROFILES: &str = "profiles";
pub const EVENTS: &str = "events";
pub const REGISTRATIONS: &str = "event_registrations";
