//! Service configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Core settings (database, port, timeline sizing) are always present and
//! fall back to defaults. Integrations (WhatsApp, Graph mailbox) are
//! optional: `from_env` returns `None` when their required variables are
//! missing, and the corresponding routes answer 503 instead of aborting
//! startup. LLM settings live in `crate::llm::config`.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TIMELINE_BATCH_SIZE: i64 = 200;
pub const DEFAULT_TIMELINE_PAGE_SIZE: usize = 20;

pub const DEFAULT_WHATSAPP_API_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_WHATSAPP_API_VERSION: &str = "v19.0";
pub const DEFAULT_WHATSAPP_COUNTRY_CODE: &str = "972";

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_GRAPH_LOGIN_URL: &str = "https://login.microsoftonline.com";

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// TIMELINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineConfig {
    /// Per-source row cap for one aggregation.
    pub batch_size: i64,
    /// Default page length for "load more".
    pub page_size: usize,
}

impl TimelineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let batch_size = env_parse("TIMELINE_BATCH_SIZE", DEFAULT_TIMELINE_BATCH_SIZE).max(1);
        let page_size = env_parse("TIMELINE_PAGE_SIZE", DEFAULT_TIMELINE_PAGE_SIZE).max(1);
        Self { batch_size, page_size }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_TIMELINE_BATCH_SIZE, page_size: DEFAULT_TIMELINE_PAGE_SIZE }
    }
}

// =============================================================================
// WHATSAPP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_base_url: String,
    pub api_version: String,
    pub default_country_code: String,
    pub verify_token: Option<String>,
}

impl WhatsAppConfig {
    /// Required: `WHATSAPP_ACCESS_TOKEN`, `WHATSAPP_PHONE_NUMBER_ID`.
    ///
    /// Optional: `WHATSAPP_API_BASE_URL`, `WHATSAPP_API_VERSION`,
    /// `WHATSAPP_DEFAULT_COUNTRY_CODE`, `WHATSAPP_VERIFY_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let access_token = env_nonempty("WHATSAPP_ACCESS_TOKEN")?;
        let phone_number_id = env_nonempty("WHATSAPP_PHONE_NUMBER_ID")?;
        Some(Self {
            access_token,
            phone_number_id,
            api_base_url: env_nonempty("WHATSAPP_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_WHATSAPP_API_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            api_version: env_nonempty("WHATSAPP_API_VERSION").unwrap_or_else(|| DEFAULT_WHATSAPP_API_VERSION.to_owned()),
            default_country_code: env_nonempty("WHATSAPP_DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|| DEFAULT_WHATSAPP_COUNTRY_CODE.to_owned()),
            verify_token: env_nonempty("WHATSAPP_VERIFY_TOKEN"),
        })
    }

    /// `{base}/{version}/{phone_number_id}` — prefix for message and media calls.
    #[must_use]
    pub fn phone_endpoint(&self) -> String {
        format!("{}/{}/{}", self.api_base_url, self.api_version, self.phone_number_id)
    }
}

// =============================================================================
// GRAPH MAILBOX
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Mailbox (UPN or id) that sends and syncs mail.
    pub mailbox: String,
    pub base_url: String,
    pub login_url: String,
    pub signature: Option<String>,
}

impl GraphConfig {
    /// Required: `GRAPH_TENANT_ID`, `GRAPH_CLIENT_ID`, `GRAPH_CLIENT_SECRET`, `GRAPH_MAILBOX`.
    ///
    /// Optional: `GRAPH_BASE_URL`, `GRAPH_LOGIN_URL`, `EMAIL_SIGNATURE`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Some(Self {
            tenant_id: env_nonempty("GRAPH_TENANT_ID")?,
            client_id: env_nonempty("GRAPH_CLIENT_ID")?,
            client_secret: env_nonempty("GRAPH_CLIENT_SECRET")?,
            mailbox: env_nonempty("GRAPH_MAILBOX")?,
            base_url: env_nonempty("GRAPH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            login_url: env_nonempty("GRAPH_LOGIN_URL")
                .unwrap_or_else(|| DEFAULT_GRAPH_LOGIN_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            signature: env_nonempty("EMAIL_SIGNATURE").map(|s| s.replace("\\n", "\n")),
        })
    }

    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.login_url, self.tenant_id)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
