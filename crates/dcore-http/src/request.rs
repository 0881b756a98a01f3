//! Request descriptors: what a caller hands the dispatcher.

use serde::Serialize;

use crate::error::{DispatchError, DispatchResult};
use crate::route::Route;

/// Retry cap applied when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// A file part of a multipart body.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// File name presented to the server.
    pub filename: String,
    /// MIME type of the file.
    pub content_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

/// Request body. The content type is derived from the variant.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Serialized JSON.
    Json(Vec<u8>),
    /// Encoded `multipart/form-data`.
    Multipart {
        /// Part boundary.
        boundary: String,
        /// Encoded parts.
        data: Vec<u8>,
    },
}

impl RequestBody {
    /// Serialize `value` as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] if `value` fails to serialize.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> DispatchResult<Self> {
        Ok(Self::Json(serde_json::to_vec(value)?))
    }

    /// Encode a `payload_json` part followed by `files[n]` parts.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] if `payload` fails to serialize.
    pub fn multipart<T: Serialize + ?Sized>(
        payload: &T,
        files: &[Attachment],
    ) -> DispatchResult<Self> {
        let boundary = format!("dcore-{:016x}", fastrand::u64(..));
        let mut data = Vec::new();

        push_part_header(
            &mut data,
            &boundary,
            "name=\"payload_json\"",
            "application/json",
        );
        data.extend_from_slice(&serde_json::to_vec(payload)?);
        data.extend_from_slice(b"\r\n");

        for (index, file) in files.iter().enumerate() {
            let disposition = format!(
                "name=\"files[{index}]\"; filename=\"{}\"",
                file.filename.replace('"', "")
            );
            push_part_header(&mut data, &boundary, &disposition, &file.content_type);
            data.extend_from_slice(&file.data);
            data.extend_from_slice(b"\r\n");
        }

        data.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Ok(Self::Multipart { boundary, data })
    }

    /// `Content-Type` header value, if the body has one.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json".to_owned()),
            Self::Multipart { boundary, .. } => {
                Some(format!("multipart/form-data; boundary={boundary}"))
            },
        }
    }

    /// Body bytes, if any.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => None,
            Self::Json(data) | Self::Multipart { data, .. } => Some(data.as_slice()),
        }
    }
}

fn push_part_header(out: &mut Vec<u8>, boundary: &str, disposition: &str, content_type: &str) {
    out.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; {disposition}\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
}

/// One logical request, including its retry counter.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Route (method, template, resolved path).
    pub route: Route,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: RequestBody,
    /// Value for `X-Audit-Log-Reason`.
    pub audit_log_reason: Option<String>,
    /// Failed sends so far. Only ever increases.
    pub attempt: u32,
    /// Retries allowed before a retryable failure becomes terminal.
    pub max_retries: u32,
}

impl RequestDescriptor {
    /// A descriptor for `route` with no body and the default retry cap.
    #[must_use]
    pub fn new(route: Route) -> Self {
        Self {
            route,
            headers: Vec::new(),
            body: RequestBody::Empty,
            audit_log_reason: None,
            attempt: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Decode`] if `value` fails to serialize.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> DispatchResult<Self> {
        Ok(self.with_body(RequestBody::json(value)?))
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the audit log reason.
    #[must_use]
    pub fn with_audit_log_reason(mut self, reason: impl Into<String>) -> Self {
        self.audit_log_reason = Some(reason.into());
        self
    }

    /// Override the retry cap.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Record one more failed send. Returns `true` while retries remain.
    pub fn record_failure(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt <= self.max_retries
    }

    /// Check the descriptor can be put on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for unbound path parameters
    /// or header values that are not visible ASCII.
    pub fn validate(&self) -> DispatchResult<()> {
        if !self.route.is_resolved() {
            return Err(DispatchError::InvalidRequest(format!(
                "unbound parameter in {}",
                self.route.path()
            )));
        }

        let values = self
            .headers
            .iter()
            .map(|(_, v)| v.as_str())
            .chain(self.audit_log_reason.as_deref());
        for value in values {
            if !value.bytes().all(|b| b == b' ' || b == b'\t' || b.is_ascii_graphic()) {
                return Err(DispatchError::InvalidRequest(format!(
                    "header value {value:?} contains characters that cannot be sent"
                )));
            }
        }
        Ok(())
    }
}
