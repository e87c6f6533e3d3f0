/// HTTP runtime adapter
///
/// reqwest-backed implementation of `RuntimeAdapter` against the runtime's
/// REST API (`/api/v1/workflows`, `/api/v1/credentials`). Authentication is
/// an API-key header; the key is injected by the adapter factory from the
/// configured env var and never persisted.

use crate::adapters::{AdapterError, RuntimeAdapter, RuntimeCredential, RuntimeDefinition};
use async_trait::async_trait;
use serde_json::Value;

/// Header carrying the runtime API key.
const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Clone)]
pub struct HttpRuntimeAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRuntimeAdapter {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request and classify the response for retry decisions.
    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, AdapterError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| AdapterError::Transient {
                operation: operation.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(AdapterError::NotFound(operation.to_string()));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AdapterError::Transient {
                operation: operation.to_string(),
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(AdapterError::Permanent {
                operation: operation.to_string(),
                message: format!(
                    "status {}: {}",
                    status.as_u16(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }

        if status.as_u16() == 204 {
            return Ok(Value::Null);
        }
        response.json().await.map_err(|e| AdapterError::Permanent {
            operation: operation.to_string(),
            message: format!("malformed response body: {}", e),
        })
    }
}

/// Parse one definition payload into the adapter shape.
fn parse_definition(operation: &str, value: &Value) -> Result<RuntimeDefinition, AdapterError> {
    let obj = value.as_object().ok_or_else(|| AdapterError::Permanent {
        operation: operation.to_string(),
        message: "definition payload is not an object".to_string(),
    })?;

    // Runtime ids may be numbers or strings depending on provider version.
    let id = match obj.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(AdapterError::Permanent {
                operation: operation.to_string(),
                message: "definition payload has no id".to_string(),
            })
        }
    };
    let name = obj
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    let updated_at = obj
        .get("updatedAt")
        .and_then(|u| u.as_str())
        .map(str::to_string);

    Ok(RuntimeDefinition {
        id,
        name,
        body: value.clone(),
        updated_at,
    })
}

/// Unwrap list payloads that arrive either bare or under a "data" envelope.
fn unwrap_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[async_trait]
impl RuntimeAdapter for HttpRuntimeAdapter {
    async fn list_definitions(&self) -> Result<Vec<RuntimeDefinition>, AdapterError> {
        let payload = self
            .send(
                "list definitions",
                self.client.get(self.url("/api/v1/workflows")),
            )
            .await?;

        unwrap_list(payload)
            .iter()
            .map(|item| parse_definition("list definitions", item))
            .collect()
    }

    async fn get_definition(&self, id: &str) -> Result<RuntimeDefinition, AdapterError> {
        let operation = format!("get definition {}", id);
        let payload = self
            .send(
                &operation,
                self.client.get(self.url(&format!("/api/v1/workflows/{}", id))),
            )
            .await?;
        parse_definition(&operation, &payload)
    }

    async fn create_definition(&self, body: &Value) -> Result<RuntimeDefinition, AdapterError> {
        let payload = self
            .send(
                "create definition",
                self.client.post(self.url("/api/v1/workflows")).json(body),
            )
            .await?;
        parse_definition("create definition", &payload)
    }

    async fn update_definition(
        &self,
        id: &str,
        body: &Value,
    ) -> Result<RuntimeDefinition, AdapterError> {
        let operation = format!("update definition {}", id);
        let payload = self
            .send(
                &operation,
                self.client
                    .put(self.url(&format!("/api/v1/workflows/{}", id)))
                    .json(body),
            )
            .await?;
        parse_definition(&operation, &payload)
    }

    async fn delete_definition(&self, id: &str) -> Result<(), AdapterError> {
        self.send(
            &format!("delete definition {}", id),
            self.client
                .delete(self.url(&format!("/api/v1/workflows/{}", id))),
        )
        .await?;
        Ok(())
    }

    async fn list_credentials(&self) -> Result<Vec<RuntimeCredential>, AdapterError> {
        let payload = self
            .send(
                "list credentials",
                self.client.get(self.url("/api/v1/credentials")),
            )
            .await?;

        Ok(unwrap_list(payload)
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                let id = match obj.get("id") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return None,
                };
                Some(RuntimeCredential {
                    id,
                    name: obj.get("name")?.as_str()?.to_string(),
                    kind: obj
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definitions_parse_numeric_and_string_ids() {
        let with_number = parse_definition("t", &json!({ "id": 42, "name": "a" })).unwrap();
        assert_eq!(with_number.id, "42");

        let with_string =
            parse_definition("t", &json!({ "id": "wf-1", "name": "a", "updatedAt": "2026-01-01" }))
                .unwrap();
        assert_eq!(with_string.id, "wf-1");
        assert_eq!(with_string.updated_at.as_deref(), Some("2026-01-01"));
    }

    #[test]
    fn list_payloads_unwrap_data_envelopes() {
        assert_eq!(unwrap_list(json!([1, 2])).len(), 2);
        assert_eq!(unwrap_list(json!({ "data": [1] })).len(), 1);
        assert!(unwrap_list(json!({ "other": [1] })).is_empty());
    }
}
