use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// User name that authenticates with the read-only password and gets no
/// scheduling-write capability.
pub const VIEWER_USER: &str = "viewer";

/// What a connection is allowed to do. Decided once at startup from the
/// login user; write commands check it before touching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ReadOnly,
    ReadWrite,
}

pub fn capability_for_user(user: Option<&str>) -> Capability {
    if user == Some(VIEWER_USER) {
        Capability::ReadOnly
    } else {
        Capability::ReadWrite
    }
}

#[derive(Debug)]
pub struct AularioAuthSource {
    password: String,
    readonly_password: Option<String>,
}

impl AularioAuthSource {
    pub fn new(password: String, readonly_password: Option<String>) -> Self {
        Self {
            password,
            readonly_password,
        }
    }
}

#[async_trait]
impl AuthSource for AularioAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let expected = match (login.user(), &self.readonly_password) {
            (Some(VIEWER_USER), Some(ro)) => ro,
            _ => &self.password,
        };
        Ok(Password::new(None, expected.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_is_read_only() {
        assert_eq!(capability_for_user(Some("viewer")), Capability::ReadOnly);
        assert_eq!(capability_for_user(Some("admin")), Capability::ReadWrite);
        assert_eq!(capability_for_user(None), Capability::ReadWrite);
    }
}
