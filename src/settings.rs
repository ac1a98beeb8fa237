use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_HISTORY: usize = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are part of a team of specialised assistants. Be concise and factual.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Travel,
    Recruiter,
}

impl std::str::FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "travel" => Ok(Profile::Travel),
            "recruiter" => Ok(Profile::Recruiter),
            other => anyhow::bail!("unknown profile: {}", other),
        }
    }
}

/// One configuration layer. Every field is optional so layers can be stacked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SettingsLayer {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub model_params: Option<ModelParams>,
    pub profile: Option<Profile>,
    pub max_history: Option<usize>,
    pub call_timeout_ms: Option<u64>,
    pub agent_timeout_ms: Option<u64>,
    pub gateway_retries: Option<u32>,
    pub retry_jitter_ms: Option<u64>,
    pub session_idle_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub system_prompt: Option<String>,
}

impl SettingsLayer {
    /// Built-in defaults, the bottom of the stack.
    pub fn defaults() -> Self {
        Self {
            base_url: Some(DEFAULT_BASE_URL.into()),
            api_key: None,
            model: Some(DEFAULT_MODEL.into()),
            model_params: Some(ModelParams { temperature: Some(0.3), max_tokens: Some(1024), top_p: None }),
            profile: Some(Profile::Travel),
            max_history: Some(DEFAULT_MAX_HISTORY),
            call_timeout_ms: Some(30_000),
            agent_timeout_ms: Some(90_000),
            gateway_retries: Some(1),
            retry_jitter_ms: Some(250),
            session_idle_ttl_secs: Some(30 * 60),
            sweep_interval_secs: Some(60),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let num = |k: &str| get(k).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            base_url: get("OPENAI_BASE_URL"),
            api_key: get("OPENAI_API_KEY"),
            model: get("SWITCHBOARD_MODEL"),
            model_params: None,
            profile: get("SWITCHBOARD_PROFILE").and_then(|p| p.parse().ok()),
            max_history: num("SWITCHBOARD_MAX_HISTORY").map(|n| n as usize),
            call_timeout_ms: num("SWITCHBOARD_CALL_TIMEOUT_MS"),
            agent_timeout_ms: num("SWITCHBOARD_AGENT_TIMEOUT_MS"),
            gateway_retries: num("SWITCHBOARD_GATEWAY_RETRIES").map(|n| n as u32),
            retry_jitter_ms: None,
            session_idle_ttl_secs: num("SWITCHBOARD_SESSION_TTL_SECS"),
            sweep_interval_secs: None,
            system_prompt: get("SWITCHBOARD_SYSTEM_PROMPT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub model_params: ModelParams,
    pub call_timeout: Duration,
    pub retries: u32,
    pub retry_jitter: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub gateway: GatewaySettings,
    pub profile: Profile,
    pub max_history: usize,
    pub agent_timeout: Duration,
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
    pub system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        // defaults layer is fully populated
        resolve_settings(&SettingsLayer::defaults(), &SettingsLayer::default(), &SettingsLayer::default())
            .unwrap_or_else(|_| unreachable!("built-in defaults are valid"))
    }
}

/// Resolves `cli` over `env` over `defaults`, field by field.
pub fn resolve_settings(
    defaults: &SettingsLayer,
    env: &SettingsLayer,
    cli: &SettingsLayer,
) -> anyhow::Result<Settings> {
    macro_rules! pick {
        ($field:ident) => {
            cli.$field
                .clone()
                .or_else(|| env.$field.clone())
                .or_else(|| defaults.$field.clone())
        };
    }
    let param = |f: fn(&ModelParams) -> Option<f32>| {
        cli.model_params
            .as_ref()
            .and_then(f)
            .or_else(|| env.model_params.as_ref().and_then(f))
            .or_else(|| defaults.model_params.as_ref().and_then(f))
    };

    let base_url = pick!(base_url).ok_or_else(|| anyhow::anyhow!("base_url not configured"))?;
    url::Url::parse(&base_url).map_err(|e| anyhow::anyhow!("invalid base_url {}: {}", base_url, e))?;

    let max_history = pick!(max_history).unwrap_or(DEFAULT_MAX_HISTORY);
    if max_history < 2 {
        anyhow::bail!("max_history must hold at least one user/assistant pair");
    }

    let model_params = ModelParams {
        temperature: param(|p| p.temperature),
        max_tokens: cli
            .model_params
            .as_ref()
            .and_then(|p| p.max_tokens)
            .or_else(|| env.model_params.as_ref().and_then(|p| p.max_tokens))
            .or_else(|| defaults.model_params.as_ref().and_then(|p| p.max_tokens)),
        top_p: param(|p| p.top_p),
    };

    Ok(Settings {
        gateway: GatewaySettings {
            base_url,
            api_key: pick!(api_key),
            model: pick!(model).unwrap_or_else(|| DEFAULT_MODEL.into()),
            model_params,
            call_timeout: Duration::from_millis(pick!(call_timeout_ms).unwrap_or(30_000)),
            retries: pick!(gateway_retries).unwrap_or(1),
            retry_jitter: Duration::from_millis(pick!(retry_jitter_ms).unwrap_or(250)),
        },
        profile: pick!(profile).unwrap_or_default(),
        max_history,
        agent_timeout: Duration::from_millis(pick!(agent_timeout_ms).unwrap_or(90_000)),
        session_idle_ttl: Duration::from_secs(pick!(session_idle_ttl_secs).unwrap_or(30 * 60)),
        sweep_interval: Duration::from_secs(pick!(sweep_interval_secs).unwrap_or(60)),
        system_prompt: pick!(system_prompt).unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
    })
}
