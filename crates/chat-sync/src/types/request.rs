//! Request to the durable-storage endpoint.

/// A request/response call against durable storage.
#[derive(Clone, Debug, Default)]
pub struct StorageRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: bytes::Bytes,
}

impl StorageRequest {
    #[inline]
    pub fn new() -> Self {
        Self {
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new().with_path(path)
    }

    pub fn post_json(path: impl Into<String>, body: impl Into<bytes::Bytes>) -> Self {
        Self::new()
            .with_method("POST")
            .with_path(path)
            .with_content_type("application/json")
            .with_body(body)
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[inline]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}
