use axum::http::HeaderMap;
use roadwatch_core::store::Authorizer;
use roadwatch_core::types::{Caller, Identity};
use std::collections::HashSet;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Privilege is membership in a fixed set of user ids.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    admins: HashSet<String>,
}

impl StaticAuthorizer {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins
                .into_iter()
                .map(Into::into)
                .map(|id: String| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_privileged(&self, caller: &Caller) -> bool {
        caller
            .user_id()
            .map_or(false, |id| self.admins.contains(id))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the caller from identity headers set by the fronting auth proxy.
/// No user id means anonymous.
pub fn caller_from_headers(headers: &HeaderMap) -> Caller {
    match header(headers, USER_ID_HEADER) {
        Some(user_id) => Caller::User(Identity {
            user_id: user_id.to_string(),
            name: header(headers, USER_NAME_HEADER).unwrap_or_default().to_string(),
            email: header(headers, USER_EMAIL_HEADER).unwrap_or_default().to_string(),
        }),
        None => Caller::Anonymous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_from_headers(&headers), Caller::Anonymous);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(caller_from_headers(&headers), Caller::Anonymous);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u-7"));
        headers.insert(USER_NAME_HEADER, HeaderValue::from_static("Mariama"));
        let caller = caller_from_headers(&headers);
        let identity = caller.identity().unwrap();
        assert_eq!(identity.user_id, "u-7");
        assert_eq!(identity.name, "Mariama");
        assert_eq!(identity.email, "");
    }

    #[test]
    fn test_static_authorizer() {
        let auth = StaticAuthorizer::new(["admin", " ", "ops "]);
        assert_eq!(auth.admins.len(), 2);
        assert!(!auth.is_privileged(&Caller::Anonymous));

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("ops"));
        assert!(auth.is_privileged(&caller_from_headers(&headers)));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("someone"));
        assert!(!auth.is_privileged(&caller_from_headers(&headers)));
    }
}
