//! Identity and session management for the portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod credentials;
mod store;
mod session;
mod request_context;

pub use principal::Identity;
pub use credentials::{validate_email, validate_password, MIN_PASSWORD_LEN};
pub use store::{SessionStore, PersistedSession, FileSessionStore, MemorySessionStore};
pub use session::{SessionManager, SessionState};
pub use request_context::RequestContext;
