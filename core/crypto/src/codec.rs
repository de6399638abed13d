//! Transport encoding for key material and the associated-data context.
//!
//! Binary values cross the boundary as standard padded base64. The AAD
//! context is a fixed struct whose JSON form is the associated data bound
//! into every record ciphertext, so its serialization must be stable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keywarden_common::{Error, Result};

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
///
/// # Errors
/// - `InvalidInput` if the string is not valid base64
pub fn decode(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| Error::InvalidInput(format!("Invalid base64: {}", e)))
}

/// Serde adapter for `Vec<u8>` fields carried as base64 strings.
pub mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional base64 fields.
pub mod b64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&super::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::decode(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Serde adapter for raw key bytes; the decoded buffer is zeroized on drop.
pub mod b64_sensitive {
    use keywarden_common::SensitiveBytes;
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(
        bytes: &SensitiveBytes,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(super::encode(bytes.as_bytes()));
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SensitiveBytes, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        super::decode(&s)
            .map(SensitiveBytes::new)
            .map_err(serde::de::Error::custom)
    }
}

/// Context bound into a record ciphertext as associated data.
///
/// Field order is fixed by the struct definition and absent optional fields
/// are omitted, so [`AadContext::canonical_bytes`] is reproducible from a
/// deserialized copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AadContext {
    pub table: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl AadContext {
    /// Minimal context with only the table and record id.
    pub fn new(table: impl Into<String>, id: Value) -> Self {
        Self {
            table: table.into(),
            id,
            version: None,
            tenant: None,
            user: None,
        }
    }

    /// Derive the context for a plaintext record.
    ///
    /// `version` comes from `record.version`, falling back to
    /// `record.updated_at` as a timestamp in milliseconds. `tenant` comes from
    /// `workspace_id` then `tenant`; `user` from `user_id` then `updated_by`.
    pub fn from_record(table: impl Into<String>, id: Value, record: &Value) -> Self {
        let version = record
            .get("version")
            .and_then(integer_value)
            .or_else(|| record.get("updated_at").and_then(timestamp_value));

        let tenant = first_text(record, &["workspace_id", "tenant"]);
        let user = first_text(record, &["user_id", "updated_by"]);

        Self {
            table: table.into(),
            id,
            version,
            tenant,
            user,
        }
    }

    /// Apply caller overrides field by field.
    pub fn with_overrides(mut self, overrides: &AadOverrides) -> Self {
        if let Some(table) = &overrides.table {
            self.table = table.clone();
        }
        if let Some(id) = &overrides.id {
            self.id = id.clone();
        }
        if let Some(version) = overrides.version {
            self.version = Some(version);
        }
        if let Some(tenant) = &overrides.tenant {
            self.tenant = Some(tenant.clone());
        }
        if let Some(user) = &overrides.user {
            self.user = Some(user.clone());
        }
        self
    }

    /// Associated-data bytes: compact JSON with object keys inside `id` sorted.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let canonical = Self {
            id: sort_keys(&self.id),
            ..self.clone()
        };
        Ok(serde_json::to_vec(&canonical)?)
    }
}

/// Caller-supplied replacements for derived AAD fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AadOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| s.trim().parse().ok()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn first_text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base64_roundtrip() {
        let bytes = vec![0u8, 1, 2, 250, 255];
        assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        assert_eq!(encode(&[0u8; 3]), "AAAA");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not base64!").is_err());
    }

    #[test]
    fn test_from_record_minimal() {
        let ctx = AadContext::from_record("tasks", json!(1), &json!({"name": "x"}));
        assert_eq!(ctx, AadContext::new("tasks", json!(1)));
        assert_eq!(ctx.canonical_bytes().unwrap(), br#"{"table":"tasks","id":1}"#);
    }

    #[test]
    fn test_from_record_all_fields() {
        let record = json!({
            "version": 7,
            "workspace_id": "ws-1",
            "tenant": "ignored",
            "user_id": 42,
        });
        let ctx = AadContext::from_record("tasks", json!("t-1"), &record);

        assert_eq!(ctx.version, Some(7));
        assert_eq!(ctx.tenant.as_deref(), Some("ws-1"));
        assert_eq!(ctx.user.as_deref(), Some("42"));
        assert_eq!(
            ctx.canonical_bytes().unwrap(),
            br#"{"table":"tasks","id":"t-1","version":7,"tenant":"ws-1","user":"42"}"#
        );
    }

    #[test]
    fn test_version_from_updated_at() {
        let record = json!({
            "updated_at": "2024-01-01T00:00:00.000Z",
            "tenant": "acme",
            "updated_by": "alice",
        });
        let ctx = AadContext::from_record("projects", json!(3), &record);

        assert_eq!(ctx.version, Some(1_704_067_200_000));
        assert_eq!(ctx.tenant.as_deref(), Some("acme"));
        assert_eq!(ctx.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_version_string_and_unparseable() {
        let ctx = AadContext::from_record("t", json!(1), &json!({"version": "12"}));
        assert_eq!(ctx.version, Some(12));

        let ctx = AadContext::from_record("t", json!(1), &json!({"updated_at": "yesterday"}));
        assert_eq!(ctx.version, None);
    }

    #[test]
    fn test_overrides_merge() {
        let ctx = AadContext::from_record("tasks", json!(1), &json!({"tenant": "a"}));
        let overrides = AadOverrides {
            tenant: Some("b".to_string()),
            version: Some(2),
            ..Default::default()
        };
        let merged = ctx.with_overrides(&overrides);

        assert_eq!(merged.table, "tasks");
        assert_eq!(merged.tenant.as_deref(), Some("b"));
        assert_eq!(merged.version, Some(2));
    }

    #[test]
    fn test_canonical_bytes_stable_after_roundtrip() {
        let ctx = AadContext {
            table: "tasks".to_string(),
            id: json!({"b": 1, "a": [{"z": 0, "y": 1}]}),
            version: Some(5),
            tenant: None,
            user: Some("u".to_string()),
        };
        let wire = serde_json::to_string(&ctx).unwrap();
        let back: AadContext = serde_json::from_str(&wire).unwrap();

        assert_eq!(ctx.canonical_bytes().unwrap(), back.canonical_bytes().unwrap());
        assert_eq!(
            ctx.canonical_bytes().unwrap(),
            br#"{"table":"tasks","id":{"a":[{"y":1,"z":0}],"b":1},"version":5,"user":"u"}"#
        );
    }
}
