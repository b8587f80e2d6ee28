use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event reported by the relay/transcoding pipeline.
///
/// Forwarded to the telemetry sink as is, plus timestamp, environment and
/// server role enrichment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    Relay {
        stream_key: String,
        destination: String,
        event: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        stream_key: String,
        error_type: String,
        error_message: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Performance {
        stream_key: String,
        metric_name: String,
        metric_value: f64,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Connection {
        connection_id: String,
        event: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
}
