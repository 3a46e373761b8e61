use crate::auth::session::Session;
use crate::error::{AppError, AppResult};
use crate::users::Role;

/// Where the caller stands before any route logic runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Identity not yet hydrated from storage. Guards must not redirect here.
    Loading,
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// The two login surfaces. Anonymous visitors are sent to the one their route belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    General,
    AdminPortal,
}

impl EntryPoint {
    pub fn login_path(&self) -> &'static str {
        match self {
            EntryPoint::General => "/login",
            EntryPoint::AdminPortal => "/admin-portal/login",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    Allow(Session),
    Redirect(&'static str),
}

/// Role allow-list for a route.
#[derive(Debug, Clone, Copy)]
pub struct RouteGuard {
    allowed: &'static [Role],
    entry: EntryPoint,
}

pub const ANY_ROLE: RouteGuard = RouteGuard::new(
    &[Role::Buyer, Role::Seller, Role::Admin],
    EntryPoint::General,
);
pub const SELLER_ONLY: RouteGuard = RouteGuard::new(&[Role::Seller], EntryPoint::General);
pub const ADMIN_PORTAL: RouteGuard = RouteGuard::new(&[Role::Admin], EntryPoint::AdminPortal);

impl RouteGuard {
    pub const fn new(allowed: &'static [Role], entry: EntryPoint) -> Self {
        Self { allowed, entry }
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }

    /// Pure function of the current state, so it is safe to call on every
    /// request or every time the session changes.
    pub fn evaluate(&self, state: &SessionState) -> GuardDecision {
        match state {
            SessionState::Loading => GuardDecision::Loading,
            SessionState::Anonymous => GuardDecision::Redirect(self.entry.login_path()),
            SessionState::Authenticated(session) if self.allows(session.role) => {
                GuardDecision::Allow(session.clone())
            }
            SessionState::Authenticated(session) => {
                GuardDecision::Redirect(session.role.home_path())
            }
        }
    }

    /// Handler-side form of [`evaluate`](Self::evaluate).
    pub fn enforce(&self, state: &SessionState) -> AppResult<Session> {
        match self.evaluate(state) {
            GuardDecision::Allow(session) => Ok(session),
            GuardDecision::Loading => Err(AppError::Loading),
            GuardDecision::Redirect(path) => {
                tracing::debug!("Guard redirecting to {}", path);
                Err(AppError::Redirect(path.to_string()))
            }
        }
    }
}
