use actix_web::http::Method;

/// Access policy checked after authentication and before throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    AllowAny,
    IsAuthenticated,
    /// Anonymous clients may only use safe methods
    IsAuthenticatedOrReadOnly,
}

pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

impl Permission {
    pub fn has_permission(&self, method: &Method, authenticated: bool) -> bool {
        match self {
            Permission::AllowAny => true,
            Permission::IsAuthenticated => authenticated,
            Permission::IsAuthenticatedOrReadOnly => authenticated || is_safe_method(method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_policy_matrix() {
        let policy = Permission::IsAuthenticatedOrReadOnly;
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            assert!(policy.has_permission(&method, false));
        }
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(!policy.has_permission(&method, false));
            assert!(policy.has_permission(&method, true));
        }
    }

    #[test]
    fn authenticated_policy_rejects_anonymous_reads() {
        assert!(!Permission::IsAuthenticated.has_permission(&Method::GET, false));
        assert!(Permission::IsAuthenticated.has_permission(&Method::GET, true));
        assert!(Permission::AllowAny.has_permission(&Method::DELETE, false));
    }
}
