use serde::{Deserialize, Serialize};

/// Body of an ingest edge publish callback.
///
/// nginx-rtmp style edges post `name=<key>` as a form, node based edges post
/// `{"name": "<key>"}`. Both carry the stream key in `name`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublishHook {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

impl PublishHook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app: None,
            addr: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegisterAccount {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_no: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}
