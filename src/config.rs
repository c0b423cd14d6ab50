use serde::Deserialize;

/// Razorpay credentials used for payment links.
#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
}

/// Cloudinary credentials used for product images.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub default_country: String,
    pub whatsapp_api_base_url: String,
    pub whatsapp_api_version: String,
    pub whatsapp_verify_token: String,
    pub whatsapp_app_secret: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_api_key: Option<String>,
    pub razorpay_base_url: String,
    pub razorpay: Option<RazorpayConfig>,
    pub razorpay_webhook_secret: Option<String>,
    pub cloudinary_base_url: String,
    pub cloudinary: Option<CloudinaryConfig>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn required_var(name: &str) -> anyhow::Result<String> {
    optional_var(name).ok_or_else(|| anyhow::anyhow!("{} environment variable required", name))
}

fn http_url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let raw = optional_var(name).unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(&raw)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = required_var("DATABASE_URL")
            .or_else(|_| required_var("DB_URL"))
            .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required"))
            .and_then(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })?;

        let port: u16 = parsed_var("PORT", 3000)
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let razorpay = match (
            optional_var("RAZORPAY_KEY_ID"),
            optional_var("RAZORPAY_KEY_SECRET"),
        ) {
            (Some(key_id), Some(key_secret)) => Some(RazorpayConfig { key_id, key_secret }),
            (None, None) => None,
            _ => anyhow::bail!("RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET must be set together"),
        };

        let cloudinary = match (
            optional_var("CLOUDINARY_CLOUD_NAME"),
            optional_var("CLOUDINARY_API_KEY"),
            optional_var("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET must be set together"
            ),
        };

        let config = Self {
            database_url,
            port,
            default_country: optional_var("DEFAULT_COUNTRY").unwrap_or_else(|| "IN".to_string()),
            whatsapp_api_base_url: http_url_var(
                "WHATSAPP_API_BASE_URL",
                "https://graph.facebook.com",
            )?,
            whatsapp_api_version: optional_var("WHATSAPP_API_VERSION")
                .unwrap_or_else(|| "v19.0".to_string()),
            whatsapp_verify_token: required_var("WHATSAPP_VERIFY_TOKEN")?,
            whatsapp_app_secret: optional_var("WHATSAPP_APP_SECRET"),
            gemini_base_url: http_url_var(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            )?,
            gemini_model: optional_var("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            gemini_api_key: optional_var("GEMINI_API_KEY"),
            razorpay_base_url: http_url_var("RAZORPAY_BASE_URL", "https://api.razorpay.com")?,
            razorpay,
            razorpay_webhook_secret: optional_var("RAZORPAY_WEBHOOK_SECRET"),
            cloudinary_base_url: http_url_var(
                "CLOUDINARY_BASE_URL",
                "https://api.cloudinary.com",
            )?,
            cloudinary,
            rate_limit_per_second: parsed_var("RATE_LIMIT_PER_SECOND", 10)?,
            rate_limit_burst: parsed_var("RATE_LIMIT_BURST", 20)?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!(
            "WhatsApp API: {}/{}",
            config.whatsapp_api_base_url,
            config.whatsapp_api_version
        );
        tracing::debug!("Server Port: {}", config.port);
        config.warn_about_disabled_features();

        Ok(config)
    }

    fn warn_about_disabled_features(&self) {
        if self.whatsapp_app_secret.is_none() {
            tracing::warn!("WHATSAPP_APP_SECRET not set: webhook signatures will not be verified");
        }
        if self.gemini_api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set: the AI assistant is disabled");
        }
        if self.razorpay.is_none() {
            tracing::warn!("Razorpay credentials not set: payment links are disabled");
        }
        if self.razorpay_webhook_secret.is_none() {
            tracing::warn!("RAZORPAY_WEBHOOK_SECRET not set: payment webhooks will be refused");
        }
        if self.cloudinary.is_none() {
            tracing::warn!("Cloudinary credentials not set: image uploads are disabled");
        }
    }

    /// A configuration with every optional integration disabled, used by tests
    /// and tools that never start the HTTP server.
    pub fn minimal(database_url: impl Into<String>, verify_token: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 3000,
            default_country: "IN".to_string(),
            whatsapp_api_base_url: "https://graph.facebook.com".to_string(),
            whatsapp_api_version: "v19.0".to_string(),
            whatsapp_verify_token: verify_token.into(),
            whatsapp_app_secret: None,
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_api_key: None,
            razorpay_base_url: "https://api.razorpay.com".to_string(),
            razorpay: None,
            razorpay_webhook_secret: None,
            cloudinary_base_url: "https://api.cloudinary.com".to_string(),
            cloudinary: None,
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
        }
    }
}
