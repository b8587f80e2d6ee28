use uuid::Uuid;

use crate::request::PageQuery;

/// Called by the ingest edge before it accepts a publish
pub const PUBLISH_START: &str = "/api/auth/stream";
/// Called by the ingest edge after a publish ends
pub const PUBLISH_END: &str = "/api/auth/stream-end";

pub const ACCOUNTS: &str = "/api/accounts";
pub const ACTIVE_SESSIONS: &str = "/api/sessions/active";
pub const RECONCILE: &str = "/api/admin/reconcile";
pub const EVENTS: &str = "/api/events";

pub fn account_stream(account: &Uuid) -> String {
    format!("/api/accounts/{}/stream", account)
}

pub fn account_stream_key(account: &Uuid) -> String {
    format!("/api/accounts/{}/stream-key", account)
}

pub fn active_sessions(qry: PageQuery) -> String {
    let query = serde_html_form::to_string(qry).unwrap_or_default();
    if query.is_empty() {
        ACTIVE_SESSIONS.to_string()
    } else {
        format!("{}?{}", ACTIVE_SESSIONS, query)
    }
}
