use serde::Deserialize;

const DEV_JWT_SECRET: &str = "development-only-secret-change-me";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    /// Empty means "no database": the in-memory store is used instead.
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub referral_code_ttl_days: i64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Key the rate limiter on `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables (after `.env` has been applied).
    /// Call `finalize` once logging is up.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .set_default("environment", "development")?
            .set_default("port", 8080)?
            .set_default("database_url", "")?
            .set_default("database_max_connections", 10)?
            .set_default("run_migrations", true)?
            .set_default("jwt_secret", "")?
            .set_default("access_token_ttl_secs", 300)?
            .set_default("refresh_token_ttl_secs", 86_400)?
            .set_default("referral_code_ttl_days", 30)?
            .set_default("rate_limit_max_requests", 20)?
            .set_default("rate_limit_window_secs", 60)?
            .set_default("trust_proxy_headers", false)?
            .set_default("log_format", "text")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Fill in the development JWT secret and reject unusable values.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            if !self.is_development() {
                anyhow::bail!("JWT_SECRET must be set when ENVIRONMENT={}", self.environment);
            }
            tracing::warn!("JWT_SECRET not set, using the development secret");
            self.jwt_secret = DEV_JWT_SECRET.to_string();
        }
        if self.referral_code_ttl_days <= 0 {
            anyhow::bail!("REFERRAL_CODE_TTL_DAYS must be positive");
        }
        if self.rate_limit_window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS must be positive");
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn uses_database(&self) -> bool {
        !self.database_url.trim().is_empty()
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            environment: "test".to_string(),
            port: 0,
            database_url: String::new(),
            database_max_connections: 1,
            run_migrations: false,
            jwt_secret: "test_secret".to_string(),
            access_token_ttl_secs: 300,
            refresh_token_ttl_secs: 3600,
            referral_code_ttl_days: 30,
            rate_limit_max_requests: 1000,
            rate_limit_window_secs: 60,
            trust_proxy_headers: false,
            log_format: "text".to_string(),
        }
    }
}
