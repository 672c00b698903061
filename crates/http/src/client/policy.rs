//! Endpoint authentication classification

use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Whether an endpoint needs a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthPolicy {
    /// Credential required; fail with `Unauthenticated` when absent
    Always,
    /// Never attach a credential
    Public,
    /// Attach a credential when one is held, otherwise send anonymously
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct EndpointRule {
    method: Option<Method>,
    segments: Vec<Segment>,
    policy: AuthPolicy,
}

impl EndpointRule {
    fn matches(&self, method: &Method, path: &[&str]) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        self.segments.len() == path.len()
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(segment, part)| match segment {
                    Segment::Literal(literal) => literal == part,
                    Segment::Param => !part.is_empty(),
                })
    }
}

/// Ordered `(method, path pattern) -> AuthPolicy` table.
///
/// Patterns are slash-separated; a `{name}` segment matches any single
/// segment. Leading and trailing slashes and query strings are ignored.
/// The first matching rule wins. Paths no rule matches fall back by verb:
/// mutating verbs are `Always`, everything else `Public`.
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    rules: Vec<EndpointRule>,
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// POST, PUT, PATCH and DELETE
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

impl EndpointTable {
    /// Empty table; everything is classified by verb
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule, optionally restricted to one method
    #[must_use]
    pub fn rule(mut self, method: Option<Method>, pattern: &str, policy: AuthPolicy) -> Self {
        let segments = split_path(pattern)
            .into_iter()
            .map(|part| {
                if part.starts_with('{') && part.ends_with('}') {
                    Segment::Param
                } else {
                    Segment::Literal(part.to_string())
                }
            })
            .collect();
        self.rules.push(EndpointRule {
            method,
            segments,
            policy,
        });
        self
    }

    #[must_use]
    pub fn always(self, pattern: &str) -> Self {
        self.rule(None, pattern, AuthPolicy::Always)
    }

    #[must_use]
    pub fn public(self, pattern: &str) -> Self {
        self.rule(None, pattern, AuthPolicy::Public)
    }

    #[must_use]
    pub fn conditional(self, pattern: &str) -> Self {
        self.rule(None, pattern, AuthPolicy::Conditional)
    }

    /// Public for GET only; other verbs keep falling through
    #[must_use]
    pub fn public_get(self, pattern: &str) -> Self {
        self.rule(Some(Method::GET), pattern, AuthPolicy::Public)
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify a request
    pub fn classify(&self, method: &Method, path: &str) -> AuthPolicy {
        let parts = split_path(path);
        self.rules
            .iter()
            .find(|rule| rule.matches(method, &parts))
            .map_or_else(
                || {
                    if is_mutating(method) {
                        AuthPolicy::Always
                    } else {
                        AuthPolicy::Public
                    }
                },
                |rule| rule.policy,
            )
    }

    /// Classification of the blog API
    pub fn blog_defaults() -> Self {
        Self::new()
            // authentication
            .public("auth/register/")
            .public("auth/login/")
            .public("auth/token/")
            .public("auth/token/refresh/")
            .public("auth/token/verify/")
            .public("auth/check-authentication/")
            .always("auth/logout/")
            // users
            .always("users/me/")
            .always("users/{id}/profile/")
            .always("users/{id}/profile/update/")
            .always("users/{id}/profile/delete-account/")
            .always("users/{id}/profile/reset-password/")
            .public_get("users/{id}/")
            // posts
            .always("posts/create/")
            .always("posts/{id}/engagement/")
            .always("upload/post-thumbnail/")
            .conditional("posts/{id}/upvote/")
            .conditional("posts/{id}/downvote/")
            .public_get("posts/")
            .public_get("posts/most-viewed/")
            .public_get("posts/featured/")
            .public_get("posts/search/")
            .public_get("posts/category/{category}/")
            .public_get("posts/subcategory/{subcategory}/")
            .public_get("posts/user/{user}/")
            .public_get("posts/{id}/")
            .public_get("posts/{id}/comments/")
            // comments
            .public("comments/{id}/upvote/")
            .public("comments/{id}/downvote/")
            .public_get("comments/")
            .public_get("comments/{id}/")
            // taxonomy
            .public_get("tags/")
            .public_get("tags/{id}/")
            .public_get("categories/")
            .public_get("categories/{id}/")
            // notifications
            .always("notifications/")
            .always("notifications/create/")
            .public("notifications/{id}/read/")
            // moderation
            .always("moderation/pending-content/")
            .always("moderation/approve-content/{id}/")
            .always("moderation/reject-content/{id}/")
    }
}
