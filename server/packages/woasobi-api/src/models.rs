use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_PROVIDER: &str = "OpenAI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
}

impl ModelInfo {
    fn openai(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: OPENAI_PROVIDER.to_string(),
        }
    }
}

pub fn default_codex_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::openai("gpt-5.3-codex", "GPT-5.3 Codex"),
        ModelInfo::openai("gpt-4.1", "GPT-4.1"),
    ]
}

pub fn codex_models_cache_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".codex").join("models_cache.json"))
}

#[derive(Debug, Deserialize)]
struct CodexModelsCache {
    #[serde(default)]
    models: Vec<CodexCachedModel>,
}

#[derive(Debug, Deserialize)]
struct CodexCachedModel {
    slug: Option<String>,
    display_name: Option<String>,
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: Option<String>,
}

/// Visible models from the Codex CLI's own cache file.
pub async fn load_cached_models(path: &Path) -> Vec<ModelInfo> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "codex models cache unavailable");
            return Vec::new();
        }
    };
    let cache: CodexModelsCache = match serde_json::from_slice(&raw) {
        Ok(cache) => cache,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "codex models cache unreadable");
            return Vec::new();
        }
    };
    cache
        .models
        .into_iter()
        .filter(|model| model.visibility.as_deref() != Some("hidden"))
        .filter_map(|model| {
            let id = model.slug.filter(|slug| !slug.is_empty())?;
            let name = model
                .display_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| id.clone());
            Some(ModelInfo::openai(id, name))
        })
        .collect()
}

pub fn normalize_base_url(base_url: Option<&str>) -> String {
    let trimmed = base_url.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_OPENAI_BASE_URL.to_string();
    }
    trimmed.strip_suffix('/').unwrap_or(trimmed).to_string()
}

/// Ids that name chat-capable OpenAI families, sorted.
pub fn select_chat_models(ids: impl IntoIterator<Item = String>) -> Vec<ModelInfo> {
    let mut ids: Vec<String> = ids
        .into_iter()
        .filter(|id| is_chat_model_id(id))
        .collect();
    ids.sort();
    ids.into_iter()
        .map(|id| ModelInfo::openai(id.clone(), id))
        .collect()
}

fn is_chat_model_id(id: &str) -> bool {
    let lowered = id.to_ascii_lowercase();
    if lowered.starts_with("gpt") || lowered.starts_with("codex") {
        return true;
    }
    let mut chars = lowered.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|next| next.is_ascii_digit())
}

pub async fn fetch_remote_models(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Option<Vec<ModelInfo>> {
    let url = format!("{base_url}/models");
    let response = match client.get(&url).bearer_auth(api_key).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(url = %url, error = %err, "model listing request failed");
            return None;
        }
    };
    if !response.status().is_success() {
        tracing::warn!(url = %url, status = %response.status(), "model listing rejected");
        return None;
    }
    let listing: ModelListResponse = match response.json().await {
        Ok(listing) => listing,
        Err(err) => {
            tracing::warn!(url = %url, error = %err, "model listing unreadable");
            return None;
        }
    };
    let models = select_chat_models(
        listing
            .data
            .into_iter()
            .filter_map(|entry| entry.id)
            .filter(|id| !id.is_empty()),
    );
    (!models.is_empty()).then_some(models)
}

/// Cache file, then the remote listing, then the built-in defaults.
pub async fn codex_models(
    client: &reqwest::Client,
    cache_path: Option<&Path>,
    api_key: Option<&str>,
    base_url: Option<&str>,
) -> Vec<ModelInfo> {
    if let Some(path) = cache_path {
        let cached = load_cached_models(path).await;
        if !cached.is_empty() {
            return cached;
        }
    }
    let Some(api_key) = api_key.filter(|key| !key.is_empty()) else {
        return default_codex_models();
    };
    let base_url = normalize_base_url(base_url);
    fetch_remote_models(client, &base_url, api_key)
        .await
        .unwrap_or_else(default_codex_models)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn cached_models_skip_hidden_and_blank_entries() {
        let dir = tempfile::tempdir().expect("create codex home");
        let path = dir.path().join("models_cache.json");
        std::fs::write(
            &path,
            json!({"models": [
                {"slug": "gpt-5.3-codex", "display_name": "GPT-5.3 Codex", "visibility": "list"},
                {"slug": "internal-preview", "visibility": "hidden"},
                {"slug": "", "display_name": "Nameless"},
                {"slug": "gpt-5-mini"}
            ]})
            .to_string(),
        )
        .expect("write cache");

        let models = load_cached_models(&path).await;
        assert_eq!(
            models,
            vec![
                ModelInfo::openai("gpt-5.3-codex", "GPT-5.3 Codex"),
                ModelInfo::openai("gpt-5-mini", "gpt-5-mini"),
            ]
        );
    }

    #[test]
    fn base_url_defaults_and_loses_trailing_slash() {
        assert_eq!(normalize_base_url(None), DEFAULT_OPENAI_BASE_URL);
        assert_eq!(normalize_base_url(Some("   ")), DEFAULT_OPENAI_BASE_URL);
        assert_eq!(normalize_base_url(Some("https://gw.example/v1/")), "https://gw.example/v1");
    }

    #[test]
    fn chat_model_filter_matches_known_families() {
        let models = select_chat_models(
            ["whisper-1", "o3-mini", "gpt-4.1", "Codex-mini", "omni-moderation", "dall-e-3", "o1"]
                .into_iter()
                .map(String::from),
        );
        let ids: Vec<&str> = models.iter().map(|model| model.id.as_str()).collect();
        assert_eq!(ids, vec!["Codex-mini", "gpt-4.1", "o1", "o3-mini"]);
    }

    #[tokio::test]
    async fn missing_key_uses_defaults() {
        let client = reqwest::Client::new();
        let models = codex_models(&client, None, None, None).await;
        assert_eq!(models, default_codex_models());
    }

    #[tokio::test]
    async fn remote_listing_is_filtered_with_bearer_key() {
        async fn list_models(headers: HeaderMap) -> Json<serde_json::Value> {
            let authorized = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                == Some("Bearer sk-test");
            if authorized {
                Json(json!({"data": [{"id": "gpt-4.1"}, {"id": "text-embedding-3-small"}, {"id": "o4-mini"}]}))
            } else {
                Json(json!({"data": []}))
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let app = Router::new().route("/v1/models", get(list_models));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::new();
        let base_url = format!("http://{addr}/v1/");
        let models = codex_models(&client, None, Some("sk-test"), Some(&base_url)).await;
        assert_eq!(
            models,
            vec![ModelInfo::openai("gpt-4.1", "gpt-4.1"), ModelInfo::openai("o4-mini", "o4-mini")]
        );

        let fallback = codex_models(&client, None, Some("sk-wrong"), Some(&base_url)).await;
        assert_eq!(fallback, default_codex_models());
        server.abort();
    }
}
