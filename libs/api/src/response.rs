use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub stream_key: String,
    pub created_at: i64,
}

/// One live interval of a stream key. `ended_at` is `None` while live.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub stream_key: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub stream_key: String,
    pub is_live: bool,
    pub active_session: Option<Session>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    #[serde(flatten)]
    pub session: Session,
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Reconcile {
    pub reaped: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page_no: u64,
    pub page_size: u64,
    pub total: u64,
    pub page: u64,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(page_no: u64, page_size: u64, total: u64) -> Self {
        Self {
            page_no,
            page_size,
            total,
            page: total.div_ceil(page_size.max(1)),
            data: vec![],
        }
    }

    /// Whether the requested page holds any rows
    pub fn has_next_data(&self) -> bool {
        self.total > self.offset()
    }

    /// Rows before the requested page, saturating for out of range pages
    pub fn offset(&self) -> u64 {
        self.page_no.saturating_sub(1).saturating_mul(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        let page = Page::<()>::new(2, 2, 3);
        assert_eq!(2, page.page);
        assert_eq!(2, page.offset());
        assert!(page.has_next_data());
        assert!(!Page::<()>::new(3, 2, 3).has_next_data());
    }

    #[test]
    fn test_huge_page_no_has_no_data() {
        let page = Page::<()>::new(4611686018427387905, 4, 3);
        assert_eq!(u64::MAX, page.offset());
        assert!(!page.has_next_data());
    }
}
