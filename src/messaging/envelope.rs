use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form message metadata
pub type Meta = Map<String, Value>;

/// A validated message instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message identifier
    pub uuid: Uuid,
    /// Message name
    pub name: String,
    /// Validated payload
    pub payload: Value,
    /// Invocation metadata
    #[serde(default)]
    pub meta: Meta,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Metadata value by key
    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Metadata as a JSON object value
    pub fn meta_object(&self) -> Value {
        Value::Object(self.meta.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope {
            uuid: Uuid::nil(),
            name: "AddTodo".to_string(),
            payload: json!({"title": "Buy milk"}),
            meta: Meta::new(),
            created_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["uuid"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(value["createdAt"], "2024-01-02T03:04:05Z");
        assert_eq!(value["meta"], json!({}));

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }
}
