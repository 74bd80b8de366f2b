use shared::domain::UserId;

/// Authenticated identity for one client session.
///
/// Constructed once after login and injected into every component that
/// needs it; no component reads identity or tokens from ambient storage
/// mid-operation.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub auth_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
        }
    }
}
