use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn accepts(&self, token: &str) -> bool {
        self.api_keys.iter().any(|key| key == token)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub provider: String,
    pub api_base: String,
    pub api_key: String,
    pub default_model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    pub ping_interval_secs: u64,
    pub client_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub relay_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    pub broadcast: BroadcastConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("upstream.provider", "openai")?
            .set_default("upstream.api_base", "https://api.openai.com/v1")?
            .set_default("upstream.api_key", "${OPENAI_API_KEY}")?
            .set_default("upstream.default_model", "gpt-3.5-turbo")?
            .set_default("broadcast.ping_interval_secs", 10)?
            .set_default("broadcast.client_buffer", 256)?
            .set_default("chat.relay_url", "http://127.0.0.1:8000")?
            .set_default("chat.model", "gpt-3.5-turbo")?
            .set_default("chat.system_prompt", "You are an AI assistant.")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CHATRELAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.api_keys"),
            )
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;

        // Expand environment variables if present like ${OPENAI_API_KEY}
        app_config.server.host = expand_env(&app_config.server.host);
        app_config.upstream.api_key = expand_env(&app_config.upstream.api_key);
        app_config.auth.api_keys = app_config
            .auth
            .api_keys
            .iter()
            .map(|key| expand_env(key))
            .filter(|key| !key.is_empty())
            .collect();
        if let Some(ref mut key) = app_config.chat.api_key {
            *key = expand_env(key);
        }

        Ok(app_config)
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

fn expand_env(val: &str) -> String {
    match val.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).unwrap_or_default(),
        None => val.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = AppConfig::load("does-not-exist.yaml").unwrap();
        assert_eq!(config.upstream.provider, "openai");
        assert_eq!(config.broadcast.client_buffer, 256);
        assert_eq!(config.chat.system_prompt, "You are an AI assistant.");
    }

    #[test]
    fn expand_env_reads_variable() {
        std::env::set_var("CHATRELAY_TEST_EXPAND", "sk-test");
        assert_eq!(expand_env("${CHATRELAY_TEST_EXPAND}"), "sk-test");
        assert_eq!(expand_env("${CHATRELAY_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env("plain"), "plain");
    }

    #[test]
    fn auth_accepts_only_listed_keys() {
        let auth = AuthConfig {
            api_keys: vec!["alpha".to_string()],
        };
        assert!(auth.enabled());
        assert!(auth.accepts("alpha"));
        assert!(!auth.accepts("beta"));
        assert!(!AuthConfig::default().enabled());
    }
}
