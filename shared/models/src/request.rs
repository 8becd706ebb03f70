use serde::{Deserialize, Serialize};

/// A normalized view of an inbound request, extracted once by the serving
/// layer and passed through the admission pipeline. Carries only envelope
/// data; payload bytes never enter this core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub query: String,
    pub host: String,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
    pub ip_address: Option<String>,
}

impl RequestSnapshot {
    pub fn is_state_changing(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }
}
