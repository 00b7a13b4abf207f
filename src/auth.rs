//! Caller identity passed explicitly into every backend call and flow.

use std::fmt;

/// The signed-in parent on whose behalf requests are made.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub parent_id: String,
    pub email: Option<String>,
    access_token: Option<String>,
}

impl AuthContext {
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            email: None,
            access_token: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("parent_id", &self.parent_id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let auth = AuthContext::new("parent-42")
            .with_email("parent@example.com")
            .with_access_token("tok");
        assert_eq!(auth.parent_id, "parent-42");
        assert_eq!(auth.email.as_deref(), Some("parent@example.com"));
        assert_eq!(auth.access_token(), Some("tok"));
    }

    #[test]
    fn debug_output_hides_token() {
        let auth = AuthContext::new("p1").with_access_token("secret-token");
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("p1"));
        assert!(!rendered.contains("secret-token"));
    }
}
