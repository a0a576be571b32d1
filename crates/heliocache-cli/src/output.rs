//! JSON envelope written to stdout for every command.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::CliError;

/// Request identifier (UUID v4), echoed in log lines for the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub request_id: RequestId,
    pub command: &'static str,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_serializes_meta_before_data() {
        let envelope = Envelope {
            meta: Meta {
                request_id: RequestId::new_v4(),
                command: "sources",
                latency_ms: 3,
                warnings: vec![String::from("cams: source.not_configured")],
            },
            data: json!({"providers": []}),
        };

        let encoded = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(encoded["meta"]["command"], "sources");
        assert_eq!(encoded["meta"]["warnings"][0], "cams: source.not_configured");
        assert_eq!(
            encoded["meta"]["request_id"]
                .as_str()
                .map(str::len),
            Some(36)
        );
    }
}
