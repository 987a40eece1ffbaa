use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard cap on a single uploaded image.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

/// Default bearer-token lifetime (7 days).
pub const DEFAULT_TOKEN_EXPIRE_SECONDS: u64 = 7 * 24 * 3600;

/// Flat application settings (vita.toml + bare env overrides).
///
/// The env names form the deployment contract: `OPENAI_API_KEY`,
/// `ZHIPU_API_KEY`, `VISION_MODEL`, `CHROMA_PERSIST_DIR`, `UPLOAD_DIR`, …
/// Figment maps them onto the lowercased field names below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `sqlite:` URL or a bare file path. Empty means `<data dir>/vita.db`.
    #[serde(default)]
    pub database_url: String,

    /// "openai" or "zhipu".
    #[serde(default = "default_ai_provider")]
    pub ai_provider: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub zhipu_api_key: String,
    #[serde(default = "default_zhipu_base_url")]
    pub zhipu_base_url: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_smart_model")]
    pub smart_model: String,
    #[serde(default = "default_simple_vision_model")]
    pub simple_vision_model: String,
    #[serde(default = "default_simple_text_model")]
    pub simple_text_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// `ADMIN_PASSWORD` wins; `AUTH_PASSWORD` is the accepted alias.
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub auth_password: String,
    #[serde(default = "default_token_expire")]
    pub token_expire_seconds: u64,

    /// Comma-joined list of allowed origins.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    #[serde(default)]
    pub chroma_persist_dir: String,
    #[serde(default)]
    pub upload_dir: String,

    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            ai_provider: default_ai_provider(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            zhipu_api_key: String::new(),
            zhipu_base_url: default_zhipu_base_url(),
            vision_model: default_vision_model(),
            text_model: default_text_model(),
            smart_model: default_smart_model(),
            simple_vision_model: default_simple_vision_model(),
            simple_text_model: default_simple_text_model(),
            embedding_model: default_embedding_model(),
            admin_password: String::new(),
            auth_password: String::new(),
            token_expire_seconds: default_token_expire(),
            cors_origins: default_cors_origins(),
            chroma_persist_dir: String::new(),
            upload_dir: String::new(),
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Settings {
    /// Load settings: defaults < vita.toml < environment.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("vita.toml");
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()
            .map_err(|e| crate::error::VitaError::Config(e.to_string()))
    }

    /// API key for the active provider. Empty means no-API-key mode.
    pub fn ai_api_key(&self) -> &str {
        match self.ai_provider.as_str() {
            "openai" => &self.openai_api_key,
            _ => &self.zhipu_api_key,
        }
    }

    /// Base URL for the active provider (no trailing slash).
    pub fn ai_base_url(&self) -> &str {
        match self.ai_provider.as_str() {
            "openai" => &self.openai_base_url,
            _ => &self.zhipu_base_url,
        }
    }

    /// The login password: `ADMIN_PASSWORD`, falling back to `AUTH_PASSWORD`.
    pub fn login_password(&self) -> Option<&str> {
        if !self.admin_password.is_empty() {
            Some(&self.admin_password)
        } else if !self.auth_password.is_empty() {
            Some(&self.auth_password)
        } else {
            None
        }
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Resolved SQLite database file path.
    pub fn database_path(&self) -> PathBuf {
        if self.database_url.is_empty() {
            return data_dir().join("vita.db");
        }
        // `sqlite:///tmp/x.db` keeps its absolute path after the scheme.
        let url = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url);
        PathBuf::from(url)
    }

    /// Directory holding the persistent vector collection.
    pub fn vector_persist_dir(&self) -> PathBuf {
        if self.chroma_persist_dir.is_empty() {
            data_dir().join("vectors")
        } else {
            PathBuf::from(&self.chroma_persist_dir)
        }
    }

    /// Root of the image upload tree.
    pub fn upload_root(&self) -> PathBuf {
        if self.upload_dir.is_empty() {
            data_dir().join("uploads")
        } else {
            PathBuf::from(&self.upload_dir)
        }
    }
}

/// Environment variables the loader consumes. Everything else is ignored so
/// unrelated host variables cannot poison extraction.
const ENV_KEYS: &[&str] = &[
    "DATABASE_URL",
    "AI_PROVIDER",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "ZHIPU_API_KEY",
    "ZHIPU_BASE_URL",
    "VISION_MODEL",
    "TEXT_MODEL",
    "SMART_MODEL",
    "SIMPLE_VISION_MODEL",
    "SIMPLE_TEXT_MODEL",
    "EMBEDDING_MODEL",
    "ADMIN_PASSWORD",
    "AUTH_PASSWORD",
    "TOKEN_EXPIRE_SECONDS",
    "CORS_ORIGINS",
    "CHROMA_PERSIST_DIR",
    "UPLOAD_DIR",
    "BIND",
    "PORT",
];

fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".vita")
}

fn default_ai_provider() -> String {
    "zhipu".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_zhipu_base_url() -> String {
    "https://open.bigmodel.cn/api/paas".to_string()
}
fn default_vision_model() -> String {
    "glm-4.6v".to_string()
}
fn default_text_model() -> String {
    "glm-4.7".to_string()
}
fn default_smart_model() -> String {
    "glm-4.7".to_string()
}
fn default_simple_vision_model() -> String {
    "glm-4.6v-flash".to_string()
}
fn default_simple_text_model() -> String {
    "glm-4.7-flash".to_string()
}
fn default_embedding_model() -> String {
    "embedding-3".to_string()
}
fn default_token_expire() -> u64 {
    DEFAULT_TOKEN_EXPIRE_SECONDS
}
fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_zhipu() {
        let s = Settings::default();
        assert_eq!(s.ai_provider, "zhipu");
        assert_eq!(s.vision_model, "glm-4.6v");
        assert_eq!(s.simple_text_model, "glm-4.7-flash");
        assert!(s.ai_api_key().is_empty());
        assert!(s.login_password().is_none());
    }

    #[test]
    fn database_url_forms() {
        let mut s = Settings::default();
        s.database_url = "sqlite:///tmp/x.db".into();
        assert_eq!(s.database_path(), PathBuf::from("/tmp/x.db"));
        s.database_url = "/var/lib/vita/vita.db".into();
        assert_eq!(s.database_path(), PathBuf::from("/var/lib/vita/vita.db"));
    }

    #[test]
    fn cors_list_trims_and_drops_empty() {
        let mut s = Settings::default();
        s.cors_origins = "http://a.test , http://b.test,,".into();
        assert_eq!(s.cors_origin_list(), vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn auth_password_is_alias() {
        let mut s = Settings::default();
        s.auth_password = "fallback".into();
        assert_eq!(s.login_password(), Some("fallback"));
        s.admin_password = "primary".into();
        assert_eq!(s.login_password(), Some("primary"));
    }
}
