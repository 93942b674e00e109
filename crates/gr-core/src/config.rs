//! Configuration management
//!
//! Settings are resolved in the following priority order:
//! 1. Environment variables
//! 2. `group-relay.toml` in the working directory
//! 3. Default values
//!
//! Inside the TOML file, `${VAR_NAME}` is expanded from the environment.
//! The resulting [`Config`] is built once at startup and handed to each
//! component constructor.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Default config file name looked up by [`Config::load`]
pub const CONFIG_FILE_NAME: &str = "group-relay.toml";

/// Verify token used when none is configured
pub const DEFAULT_VERIFY_TOKEN: &str = "YOUR_VERIFY_TOKEN";

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions API
    #[default]
    OpenAi,
    /// Anthropic Messages API
    Claude,
}

impl LlmProvider {
    /// Parse a provider name. Unknown names fall back to OpenAI-compatible.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => LlmProvider::Claude,
            _ => LlmProvider::OpenAi,
        }
    }

    /// Base URL used when no custom endpoint is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Claude => "https://api.anthropic.com/v1",
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (required)
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// API provider
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// System instruction sent ahead of every prompt
    pub system_prompt: String,

    /// Reply used when the completion call fails
    pub fallback_reply: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::OpenAi,
            base_url: None,
            system_prompt: default_system_prompt(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

impl LlmConfig {
    /// Base URL with the provider default applied
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}

/// Facebook Graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    /// Page access token. Optional: replies are skipped while unset.
    pub page_access_token: Option<String>,

    /// Shared secret compared on every verification request
    pub verify_token: String,

    /// Graph API base URL, including the version segment
    pub graph_api_url: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            page_access_token: None,
            verify_token: DEFAULT_VERIFY_TOKEN.to_string(),
            graph_api_url: default_graph_api_url(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port
    pub port: u16,

    /// Acknowledge deliveries before dispatching them
    pub async_dispatch: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            async_dispatch: false,
        }
    }
}

/// Main configuration for group-relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// LLM configuration
    pub llm: LlmConfig,

    /// Facebook configuration
    pub facebook: FacebookConfig,

    /// HTTP server configuration
    pub server: ServerConfig,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful and friendly assistant in a Facebook group. Keep your answers brief."
        .to_string()
}

fn default_fallback_reply() -> String {
    "Sorry, my AI brain is having a little trouble right now. Please try again later.".to_string()
}

fn default_graph_api_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Read a variable through `lookup`, treating empty values as unset
fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    /// Expand `${VAR_NAME}` occurrences using `lookup`.
    ///
    /// Unknown variables expand to an empty string. An unterminated `${`
    /// is kept verbatim.
    fn expand_env_vars<F>(value: &str, lookup: &F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut result = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let var_name = &after[..end];
                    if !var_name.is_empty() {
                        if let Some(v) = lookup(var_name) {
                            result.push_str(&v);
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_file_with(path, |key| std::env::var(key).ok())
    }

    /// Load a TOML file, resolving variables through `lookup`
    pub fn from_toml_file_with<P, F>(path: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        Self::from_toml_str(&toml_content, lookup)
    }

    /// Parse TOML content, expanding and overriding values through `lookup`.
    ///
    /// `${VAR}` is expanded inside parsed string values only, so variable
    /// contents are never read as TOML.
    pub fn from_toml_str<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: toml::Value = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        let toml_config: TomlConfig = Self::expand_toml_value(raw, &lookup)
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;

        let mut cfg = Self::from_toml_config(toml_config);
        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;

        Ok(cfg)
    }

    /// Expand variables in every string of a parsed TOML tree
    fn expand_toml_value<F>(value: toml::Value, lookup: &F) -> toml::Value
    where
        F: Fn(&str) -> Option<String>,
    {
        match value {
            toml::Value::String(s) => toml::Value::String(Self::expand_env_vars(&s, lookup)),
            toml::Value::Array(arr) => toml::Value::Array(
                arr.into_iter()
                    .map(|v| Self::expand_toml_value(v, lookup))
                    .collect(),
            ),
            toml::Value::Table(table) => toml::Value::Table(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::expand_toml_value(v, lookup)))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Load from `group-relay.toml` when present, otherwise from the environment
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILE_NAME).exists() {
            return Self::from_toml_file(CONFIG_FILE_NAME);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from defaults plus the variables `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_toml_config(toml: TomlConfig) -> Self {
        let llm = toml.llm.unwrap_or_default();
        let provider = llm
            .provider
            .as_deref()
            .map(LlmProvider::parse)
            .unwrap_or_default();

        let facebook = toml.facebook.unwrap_or_default();
        let server = toml.server.unwrap_or_default();

        Config {
            llm: LlmConfig {
                api_key: llm.api_key.unwrap_or_default(),
                model: llm.model.filter(|m| !m.is_empty()).unwrap_or_else(default_model),
                provider,
                base_url: llm.base_url.filter(|u| !u.is_empty()),
                system_prompt: llm
                    .system_prompt
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(default_system_prompt),
                fallback_reply: llm
                    .fallback_reply
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(default_fallback_reply),
            },
            facebook: FacebookConfig {
                page_access_token: facebook.page_access_token.filter(|t| !t.is_empty()),
                verify_token: facebook
                    .verify_token
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_VERIFY_TOKEN.to_string()),
                graph_api_url: facebook
                    .graph_api_url
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(default_graph_api_url),
            },
            server: ServerConfig {
                port: server.port.unwrap_or_else(default_port),
                async_dispatch: server.async_dispatch.unwrap_or(false),
            },
        }
    }

    /// Override settings with any variables `lookup` provides
    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // LLM
        if let Some(api_key) =
            non_empty(lookup, "OPENAI_API_KEY").or_else(|| non_empty(lookup, "LLM_API_KEY"))
        {
            self.llm.api_key = api_key;
        }
        if let Some(provider) = non_empty(lookup, "LLM_PROVIDER") {
            self.llm.provider = LlmProvider::parse(&provider);
        }
        if let Some(model) = non_empty(lookup, "LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = non_empty(lookup, "LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Some(prompt) = non_empty(lookup, "LLM_SYSTEM_PROMPT") {
            self.llm.system_prompt = prompt;
        }
        if let Some(reply) = non_empty(lookup, "LLM_FALLBACK_REPLY") {
            self.llm.fallback_reply = reply;
        }

        // Facebook
        if let Some(token) = non_empty(lookup, "FACEBOOK_PAGE_ACCESS_TOKEN") {
            self.facebook.page_access_token = Some(token);
        }
        if let Some(token) = non_empty(lookup, "FACEBOOK_VERIFY_TOKEN") {
            self.facebook.verify_token = token;
        }
        if let Some(url) = non_empty(lookup, "FACEBOOK_GRAPH_API_URL") {
            self.facebook.graph_api_url = url;
        }

        // Server
        if let Some(port) = non_empty(lookup, "PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {}", port)))?;
        }
        if let Some(flag) = non_empty(lookup, "WEBHOOK_ASYNC_DISPATCH") {
            self.server.async_dispatch = parse_flag(&flag);
        }

        Ok(())
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY (or LLM_API_KEY) is not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the effective LLM configuration
    pub fn llm_config(&self) -> &LlmConfig {
        &self.llm
    }

    /// Whether the built-in placeholder verify token is in use
    pub fn uses_default_verify_token(&self) -> bool {
        self.facebook.verify_token == DEFAULT_VERIFY_TOKEN
    }
}

// ============================================================================
// TOML file layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    llm: Option<TomlLlmConfig>,
    facebook: Option<TomlFacebookConfig>,
    server: Option<TomlServerConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    fallback_reply: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlFacebookConfig {
    #[serde(default)]
    page_access_token: Option<String>,
    #[serde(default)]
    verify_token: Option<String>,
    #[serde(default)]
    graph_api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServerConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    async_dispatch: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_llm_provider_default() {
        assert_eq!(LlmProvider::default(), LlmProvider::OpenAi);
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(LlmProvider::parse("claude"), LlmProvider::Claude);
        assert_eq!(LlmProvider::parse("Anthropic"), LlmProvider::Claude);
        assert_eq!(LlmProvider::parse("openai"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::parse("something-else"), LlmProvider::OpenAi);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert!(!config.server.async_dispatch);
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.facebook.graph_api_url, "https://graph.facebook.com/v19.0");
        assert!(config.facebook.page_access_token.is_none());
        assert!(config.uses_default_verify_token());
        assert_eq!(config.llm.effective_base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[("PORT", "8080")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_api_key_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[("OPENAI_API_KEY", "  ")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_lookup_reads_all_variables() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("LLM_BASE_URL", "http://localhost:9000/v1"),
            ("FACEBOOK_PAGE_ACCESS_TOKEN", "page-token"),
            ("FACEBOOK_VERIFY_TOKEN", "verify-me"),
            ("PORT", "8080"),
            ("WEBHOOK_ASYNC_DISPATCH", "true"),
        ]))
        .unwrap();

        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.effective_base_url(), "http://localhost:9000/v1");
        assert_eq!(config.facebook.page_access_token.as_deref(), Some("page-token"));
        assert_eq!(config.facebook.verify_token, "verify-me");
        assert!(!config.uses_default_verify_token());
        assert_eq!(config.server.port, 8080);
        assert!(config.server.async_dispatch);
    }

    #[test]
    fn test_openai_key_wins_over_llm_key() {
        let config = Config::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "generic"),
            ("OPENAI_API_KEY", "openai"),
        ]))
        .unwrap();
        assert_eq!(config.llm.api_key, "openai");

        let config = Config::from_lookup(lookup_from(&[("LLM_API_KEY", "generic")])).unwrap();
        assert_eq!(config.llm.api_key, "generic");
    }

    #[test]
    fn test_empty_page_token_counts_as_unset() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("FACEBOOK_PAGE_ACCESS_TOKEN", ""),
        ]))
        .unwrap();
        assert!(config.facebook.page_access_token.is_none());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "not-a-port"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_claude_provider_base_url() {
        let config = Config::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "key"),
            ("LLM_PROVIDER", "claude"),
        ]))
        .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Claude);
        assert_eq!(config.llm.effective_base_url(), "https://api.anthropic.com/v1");
    }

    #[test]
    fn test_expand_env_vars() {
        let lookup = lookup_from(&[("GR_TEST_VAR", "test_value")]);

        let result = Config::expand_env_vars("prefix_${GR_TEST_VAR}_suffix", &lookup);
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${NONEXISTENT_VAR}_suffix", &lookup);
        assert_eq!(result, "prefix__suffix");
    }

    #[test]
    fn test_expand_env_vars_edge_cases() {
        let lookup = lookup_from(&[]);
        assert_eq!(Config::expand_env_vars("no_vars_here", &lookup), "no_vars_here");
        assert_eq!(Config::expand_env_vars("${}_content", &lookup), "_content");
        assert_eq!(Config::expand_env_vars("open ${NEVER", &lookup), "open ${NEVER");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[llm]
provider = "openai"
model = "gpt-4o"
api_key = "${GR_KEY}"
system_prompt = "Be terse."

[facebook]
verify_token = "toml-verify"
graph_api_url = "http://127.0.0.1:9999/v19.0"

[server]
port = 8081
async_dispatch = true
"#;

        let config =
            Config::from_toml_str(toml_content, lookup_from(&[("GR_KEY", "from-env")])).unwrap();

        assert_eq!(config.llm.api_key, "from-env");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.system_prompt, "Be terse.");
        assert_eq!(
            config.llm.fallback_reply,
            "Sorry, my AI brain is having a little trouble right now. Please try again later."
        );
        assert_eq!(config.facebook.verify_token, "toml-verify");
        assert_eq!(config.facebook.graph_api_url, "http://127.0.0.1:9999/v19.0");
        assert_eq!(config.server.port, 8081);
        assert!(config.server.async_dispatch);
    }

    #[test]
    fn test_environment_overrides_toml() {
        let toml_content = r#"
[llm]
api_key = "toml-key"

[server]
port = 8081
"#;
        let config = Config::from_toml_str(
            toml_content,
            lookup_from(&[("OPENAI_API_KEY", "env-key"), ("PORT", "9090")]),
        )
        .unwrap();

        assert_eq!(config.llm.api_key, "env-key");
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_toml_without_key_is_fatal() {
        let result = Config::from_toml_str("[server]\nport = 1234\n", lookup_from(&[]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[llm]\napi_key = \"file-key\"\n").unwrap();

        let config = Config::from_toml_file_with(&path, lookup_from(&[])).unwrap();
        assert_eq!(config.llm.api_key, "file-key");
    }

    #[test]
    fn test_expanded_values_keep_quotes_and_backslashes() {
        let toml_content = r#"
[llm]
api_key = "${GR_KEY}"

[facebook]
verify_token = "${GR_VERIFY}"
"#;
        let config = Config::from_toml_str(
            toml_content,
            lookup_from(&[("GR_KEY", r"sk-a\b\n"), ("GR_VERIFY", r#"my"token"#)]),
        )
        .unwrap();

        assert_eq!(config.llm.api_key, r"sk-a\b\n");
        assert_eq!(config.facebook.verify_token, r#"my"token"#);
    }

    #[test]
    fn test_expanded_values_cannot_inject_keys() {
        let toml_content = r#"
[llm]
api_key = "${GR_KEY}"
"#;
        let config = Config::from_toml_str(
            toml_content,
            lookup_from(&[("GR_KEY", "k\"\n[server]\nport = 1\nx = \"")]),
        )
        .unwrap();

        assert_eq!(config.llm.api_key, "k\"\n[server]\nport = 1\nx = \"");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_empty_toml_values_use_defaults() {
        let toml_content = r#"
[llm]
api_key = "key"
model = ""

[facebook]
graph_api_url = ""
"#;
        let config = Config::from_toml_str(toml_content, lookup_from(&[])).unwrap();

        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.facebook.graph_api_url, "https://graph.facebook.com/v19.0");
    }

    #[test]
    fn test_missing_toml_file() {
        let result = Config::from_toml_file("/nonexistent/group-relay.toml");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
