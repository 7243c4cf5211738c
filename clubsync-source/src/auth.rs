use std::fmt;

/// Credential presented to the source on every SOAP call.
///
/// The wire form is a composite `app_id/function_id/username` string plus
/// a password; a realm tag selects the target environment.
#[derive(Debug, Clone)]
pub struct Credential {
    pub app_id: String,
    pub function_id: String,
    pub username: String,
    pub password: String,
    pub realm: String,
}

impl Credential {
    pub fn composite_username(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.function_id, self.username)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.composite_username(), self.realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_username_joins_app_function_and_username() {
        let cred = Credential {
            app_id: "app".into(),
            function_id: "42".into(),
            username: "alice".into(),
            password: "secret".into(),
            realm: "prod".into(),
        };
        assert_eq!(cred.composite_username(), "app/42/alice");
        assert_eq!(cred.to_string(), "app/42/alice@prod");
    }
}
