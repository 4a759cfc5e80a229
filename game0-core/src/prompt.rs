use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::PromptsCfg;
use crate::error::{CoreResult, Game0Error};
use crate::http_client::{HttpClient, RequestCtx};

pub const PROMPT_GAME_PLANNING: &str = "game-planning";
pub const PROMPT_CODE_GENERATION: &str = "code-generation";

/// Anything that can resolve a named system prompt to its text.
#[async_trait]
pub trait PromptSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self, prompt: &str) -> CoreResult<String>;
}

/// Reads `<dir>/<name>.txt`.
#[derive(Debug, Clone)]
pub struct FilePromptSource {
    dir: PathBuf,
}

impl FilePromptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PromptSource for FilePromptSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, prompt: &str) -> CoreResult<String> {
        if prompt.contains(['/', '\\']) || prompt.starts_with('.') {
            return Err(Game0Error::Validation(format!("invalid prompt name '{prompt}'")));
        }
        let path = self.dir.join(format!("{prompt}.txt"));
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Game0Error::Prompt {
                name: prompt.to_string(),
                message: format!("{}: {e}", path.display()),
            })?;
        Ok(text.trim().to_string())
    }
}

#[derive(Deserialize)]
struct RegistryPrompt {
    prompt: String,
}

/// Fetches prompts from a remote registry at `<base>/prompts/<name>`.
#[derive(Debug, Clone)]
pub struct RegistryPromptSource {
    http: HttpClient,
    base: String,
    api_key: Option<SecretString>,
}

impl RegistryPromptSource {
    pub fn new(http: HttpClient, base: String, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl PromptSource for RegistryPromptSource {
    fn name(&self) -> &str {
        "registry"
    }

    async fn load(&self, prompt: &str) -> CoreResult<String> {
        let url = format!("{}/prompts/{}", self.base, urlencoding::encode(prompt));
        let auth = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|v| vec![("Authorization", v)])
            .unwrap_or_default();
        let resp: RegistryPrompt = self
            .http
            .get_json(&url, &headers, &RequestCtx::default())
            .await?;
        let text = resp.prompt.trim().to_string();
        if text.is_empty() {
            return Err(Game0Error::Prompt {
                name: prompt.to_string(),
                message: "registry returned an empty prompt".into(),
            });
        }
        Ok(text)
    }
}

/// Tries `primary`, and on failure logs a warning and uses `fallback`.
pub struct FallbackPromptSource {
    primary: Arc<dyn PromptSource>,
    fallback: Arc<dyn PromptSource>,
}

impl FallbackPromptSource {
    pub fn new(primary: Arc<dyn PromptSource>, fallback: Arc<dyn PromptSource>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PromptSource for FallbackPromptSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn load(&self, prompt: &str) -> CoreResult<String> {
        match self.primary.load(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::warn!(
                    prompt,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "prompt source failed, falling back"
                );
                self.fallback.load(prompt).await
            }
        }
    }
}

/// Owned prompt cache over a source. Each instance is independent.
pub struct PromptCache {
    source: Arc<dyn PromptSource>,
    entries: Mutex<HashMap<String, String>>,
    hot_reload: bool,
}

impl PromptCache {
    pub fn new(source: Arc<dyn PromptSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            hot_reload: false,
        }
    }

    /// With hot reload on, every `get` goes back to the source.
    pub fn with_hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }

    /// Build the configured chain: registry (if any) falling back to the prompt directory.
    pub fn from_config(cfg: &PromptsCfg, http: &HttpClient) -> Self {
        let file: Arc<dyn PromptSource> = Arc::new(FilePromptSource::new(&cfg.dir));
        let source: Arc<dyn PromptSource> = match &cfg.registry {
            Some(reg) => {
                let key = reg
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .map(SecretString::from);
                let remote = Arc::new(RegistryPromptSource::new(http.clone(), reg.base_url.clone(), key));
                Arc::new(FallbackPromptSource::new(remote, file))
            }
            None => file,
        };
        Self::new(source).with_hot_reload(cfg.hot_reload)
    }

    pub async fn get(&self, prompt: &str) -> CoreResult<String> {
        if !self.hot_reload
            && let Some(hit) = self.entries.lock().await.get(prompt)
        {
            return Ok(hit.clone());
        }
        let text = self.source.load(prompt).await?;
        tracing::debug!(prompt, source = self.source.name(), "prompt loaded");
        if !self.hot_reload {
            self.entries.lock().await.insert(prompt.to_string(), text.clone());
        }
        Ok(text)
    }

    pub async fn invalidate(&self, prompt: &str) -> bool {
        self.entries.lock().await.remove(prompt).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
