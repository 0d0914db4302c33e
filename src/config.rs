use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Environment name shown in notifications (e.g. "prod", "dev")
    pub env_name: String,
    /// Hex-encoded ed25519 public key used to verify presented license keys
    pub license_public_key: Option<String>,
    /// Path to a file holding the hex-encoded ed25519 signing key.
    /// License creation is unavailable when unset.
    pub license_signing_key_file: Option<String>,
    /// Tags merged into every license key issued by this deployment
    pub required_license_tags: Vec<String>,
    /// Slack incoming-webhook URL (notifications are only logged when unset)
    pub slack_webhook_url: Option<String>,
    /// Incident escape hatch: accept every license check
    pub bypass_all_license_checks: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let required_license_tags = env::var("LICENSE_REQUIRED_TAGS")
            .map(|v| parse_tags(&v))
            .unwrap_or_default();

        let bypass_all_license_checks = env::var("BYPASS_ALL_LICENSE_CHECKS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "entitlements.db".to_string()),
            env_name: env::var("ENTITLEMENTS_ENV").unwrap_or_else(|_| "dev".to_string()),
            license_public_key: env::var("LICENSE_PUBLIC_KEY").ok().filter(|v| !v.is_empty()),
            license_signing_key_file: env::var("LICENSE_SIGNING_KEY_FILE")
                .ok()
                .filter(|v| !v.is_empty()),
            required_license_tags,
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            bypass_all_license_checks,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
