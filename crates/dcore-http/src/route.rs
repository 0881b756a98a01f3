//! Routes: an HTTP method plus a path template with named parameters.
//!
//! The template (`/channels/{channel_id}/messages`) is what rate-limit
//! buckets are keyed on. The resolved path is what goes on the wire. The
//! value of the route's *major parameter* (channel, guild, or webhook) is
//! part of the bucket identity because the server tracks quotas per major
//! parameter as well as per bucket hash.

use std::fmt;

/// Parameters that partition a bucket, in precedence order.
const MAJOR_PARAMS: &[&str] = &["channel_id", "guild_id", "webhook_id"];

/// Template prefix of routes that do not count against the global limit.
const GLOBAL_EXEMPT_PREFIX: &str = "/interactions/";

/// HTTP method of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a route for bucket lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    /// Method.
    pub method: Method,
    /// Path template.
    pub template: String,
    /// Major parameter value, if the template has one.
    pub major: Option<String>,
}

/// A request route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: String,
    path: String,
    major: Option<String>,
    global_exempt: bool,
}

impl Route {
    /// Create a route from a method and a template such as
    /// `/channels/{channel_id}/messages/{message_id}`.
    #[must_use]
    pub fn new(method: Method, template: impl Into<String>) -> Self {
        let template = template.into();
        let global_exempt = template.starts_with(GLOBAL_EXEMPT_PREFIX);
        Self {
            method,
            path: template.clone(),
            template,
            major: None,
            global_exempt,
        }
    }

    /// Shorthand for `Route::new(Method::Get, template)`.
    #[must_use]
    pub fn get(template: impl Into<String>) -> Self {
        Self::new(Method::Get, template)
    }

    /// Shorthand for `Route::new(Method::Post, template)`.
    #[must_use]
    pub fn post(template: impl Into<String>) -> Self {
        Self::new(Method::Post, template)
    }

    /// Shorthand for `Route::new(Method::Patch, template)`.
    #[must_use]
    pub fn patch(template: impl Into<String>) -> Self {
        Self::new(Method::Patch, template)
    }

    /// Shorthand for `Route::new(Method::Put, template)`.
    #[must_use]
    pub fn put(template: impl Into<String>) -> Self {
        Self::new(Method::Put, template)
    }

    /// Shorthand for `Route::new(Method::Delete, template)`.
    #[must_use]
    pub fn delete(template: impl Into<String>) -> Self {
        Self::new(Method::Delete, template)
    }

    /// Substitute `{name}` in the path with `value`.
    ///
    /// The first major parameter bound becomes the bucket partition; a
    /// webhook token bound after `webhook_id` is appended to it.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        let placeholder = format!("{{{name}}}");
        self.path = self.path.replace(&placeholder, &value);

        if self.major.is_none() && MAJOR_PARAMS.contains(&name) {
            self.major = Some(value);
        } else if name == "webhook_token"
            && let Some(major) = &mut self.major
        {
            major.push(':');
            major.push_str(&value);
        }
        self
    }

    /// Exclude this route from the account-wide limit.
    #[must_use]
    pub fn global_exempt(mut self) -> Self {
        self.global_exempt = true;
        self
    }

    /// Method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Path template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resolved path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Major parameter value.
    #[must_use]
    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }

    /// Whether the route bypasses the global gate.
    #[must_use]
    pub fn is_global_exempt(&self) -> bool {
        self.global_exempt
    }

    /// Whether every placeholder has been bound.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.path.contains('{')
    }

    /// Bucket lookup key.
    #[must_use]
    pub fn key(&self) -> RouteKey {
        RouteKey {
            method: self.method,
            template: self.template.clone(),
            major: self.major.clone(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)
    }
}
