use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointsCfg {
    /// Planning chat endpoint (streams an assistant turn).
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    /// Code generation endpoint (streams the game file).
    #[serde(default = "default_generate_url")]
    pub generate_url: String,
    /// Name of the environment variable holding a bearer token, if the endpoints need one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for EndpointsCfg {
    fn default() -> Self {
        Self {
            chat_url: default_chat_url(),
            generate_url: default_generate_url(),
            api_key_env: None,
        }
    }
}

fn default_chat_url() -> String {
    "http://localhost:3000/api/chat".into()
}
fn default_generate_url() -> String {
    "http://localhost:3000/api/generate-code".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RegistryCfg {
    /// Base URL of the remote prompt registry; prompts are fetched from `<base>/prompts/<name>`.
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PromptsCfg {
    #[serde(default = "default_prompts_dir")]
    pub dir: String,
    /// Re-read prompts on every request instead of caching them.
    #[serde(default)]
    pub hot_reload: bool,
    #[serde(default)]
    pub registry: Option<RegistryCfg>,
}

impl Default for PromptsCfg {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
            hot_reload: false,
            registry: None,
        }
    }
}

fn default_prompts_dir() -> String {
    "prompts".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ViewerCfg {
    /// Syntax token passed to the highlighter, e.g. "html".
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Soft cap on retained lines; `None` keeps everything.
    #[serde(default = "default_max_lines")]
    pub max_lines: Option<usize>,
    #[serde(default = "default_viewport_lines")]
    pub viewport_lines: usize,
    #[serde(default = "default_true")]
    pub auto_scroll: bool,
}

impl Default for ViewerCfg {
    fn default() -> Self {
        Self {
            language: default_language(),
            theme: default_theme(),
            max_lines: default_max_lines(),
            viewport_lines: default_viewport_lines(),
            auto_scroll: true,
        }
    }
}

fn default_language() -> String {
    "html".into()
}
fn default_theme() -> String {
    "InspiredGitHub".into()
}
fn default_max_lines() -> Option<usize> {
    Some(2_000)
}
fn default_viewport_lines() -> usize {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PuzzleCfg {
    /// Cadence of the overlay timer in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Elapsed time before the active piece is forced down one row.
    #[serde(default = "default_drop_interval_ms")]
    pub drop_interval_ms: u64,
    /// Let the game play itself when nobody is steering it.
    #[serde(default = "default_true")]
    pub attract: bool,
}

impl Default for PuzzleCfg {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            drop_interval_ms: default_drop_interval_ms(),
            attract: true,
        }
    }
}

fn default_tick_ms() -> u64 {
    50
}
fn default_drop_interval_ms() -> u64 {
    800
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, body included (default 300000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OutputCfg {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "game0-out".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoints: EndpointsCfg,
    #[serde(default)]
    pub prompts: PromptsCfg,
    #[serde(default)]
    pub viewer: ViewerCfg,
    #[serde(default)]
    pub puzzle: PuzzleCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub output: OutputCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::Game0Error::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::Game0Error::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::Game0Error::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::Game0Error::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::Game0Error::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::Game0Error::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would stall the overlay timer or the viewer.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.puzzle.tick_ms == 0 {
            return Err(crate::error::Game0Error::Validation(
                "puzzle.tick_ms must be greater than zero".into(),
            ));
        }
        if self.viewer.viewport_lines == 0 {
            return Err(crate::error::Game0Error::Validation(
                "viewer.viewport_lines must be greater than zero".into(),
            ));
        }
        if self.viewer.max_lines == Some(0) {
            return Err(crate::error::Game0Error::Validation(
                "viewer.max_lines must be omitted or greater than zero".into(),
            ));
        }
        Ok(())
    }
}
