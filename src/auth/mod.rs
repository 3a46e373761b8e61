pub mod admin_portal;
pub mod guard;
pub mod session;

pub use guard::{EntryPoint, GuardDecision, RouteGuard, SessionState};
pub use session::Session;
