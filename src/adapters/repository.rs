/// HTTP repository client
///
/// reqwest-backed implementation of `RepositoryClient` against a
/// GitHub-style contents API. Every read passes an explicit commit so drift
/// comparisons never chase a moving branch head mid-detection.

use crate::adapters::{AdapterError, RepositoryClient};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct HttpRepositoryClient {
    client: reqwest::Client,
    base_url: String,
    /// "org/name"
    repo: String,
    token: String,
}

impl HttpRepositoryClient {
    pub fn new(client: reqwest::Client, base_url: String, repo: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.base_url, self.repo, path)
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AdapterError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "driftway")
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
        Ok(response)
    }

    async fn send_json(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, AdapterError> {
        self.send(operation, request)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Permanent {
                operation: operation.to_string(),
                message: format!("malformed response body: {}", e),
            })
    }
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn resolve_branch_head(&self, branch: &str) -> Result<String, AdapterError> {
        let operation = format!("resolve head of branch {}", branch);
        let payload = self
            .send_json(
                &operation,
                self.client.get(self.url(&format!("/commits/{}", branch))),
            )
            .await?;

        payload
            .get("sha")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Permanent {
                operation,
                message: "commit payload has no sha".to_string(),
            })
    }

    async fn list_files(&self, path: &str, commit: &str) -> Result<Vec<String>, AdapterError> {
        let operation = format!("list files under {} at {}", path, commit);
        let payload = self
            .send_json(
                &operation,
                self.client
                    .get(self.url(&format!("/contents/{}", path)))
                    .query(&[("ref", commit)]),
            )
            .await?;

        let entries = payload.as_array().cloned().unwrap_or_default();
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let obj = entry.as_object()?;
                if obj.get("type")?.as_str()? != "file" {
                    return None;
                }
                let file_path = obj.get("path")?.as_str()?;
                file_path.ends_with(".json").then(|| file_path.to_string())
            })
            .collect())
    }

    async fn read_file(&self, path: &str, commit: &str) -> Result<String, AdapterError> {
        let operation = format!("read {} at {}", path, commit);
        // The raw media type avoids a base64 round-trip on reads.
        let response = self
            .send(
                &operation,
                self.client
                    .get(self.url(&format!("/contents/{}", path)))
                    .query(&[("ref", commit)])
                    .header("Accept", "application/vnd.github.raw"),
            )
            .await?;

        response.text().await.map_err(|e| AdapterError::Permanent {
            operation,
            message: format!("unreadable file body: {}", e),
        })
    }

    async fn commit_file(
        &self,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> Result<String, AdapterError> {
        let operation = format!("commit {} to {}", path, branch);

        // The contents API requires the current blob sha when updating.
        let existing_sha = match self
            .send_json(
                &operation,
                self.client
                    .get(self.url(&format!("/contents/{}", path)))
                    .query(&[("ref", branch)]),
            )
            .await
        {
            Ok(payload) => payload
                .get("sha")
                .and_then(|s| s.as_str())
                .map(str::to_string),
            Err(AdapterError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let mut body = json!({
            "message": message,
            "branch": branch,
            "content": BASE64.encode(content.as_bytes()),
        });
        if let Some(sha) = existing_sha {
            body["sha"] = json!(sha);
        }

        let payload = self
            .send_json(
                &operation,
                self.client
                    .put(self.url(&format!("/contents/{}", path)))
                    .json(&body),
            )
            .await?;

        payload
            .get("commit")
            .and_then(|c| c.get("sha"))
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Permanent {
                operation,
                message: "commit response has no sha".to_string(),
            })
    }
}
