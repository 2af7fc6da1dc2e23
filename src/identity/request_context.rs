use super::Identity;

/// Per-request data carried through the HTTP endpoint for logging.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub request_id: String,
    pub method: String,
}

impl RequestContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self { identity: None, request_id: uuid::Uuid::new_v4().simple().to_string(), method: method.into() }
    }

    pub fn user_label(&self) -> String {
        self.identity.as_ref().map(|i| i.id.to_string()).unwrap_or_else(|| "-".to_string())
    }
}
