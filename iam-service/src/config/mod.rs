use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct IamConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub second_factor: SecondFactorConfig,
    pub tenancy: TenancyConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub swagger_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 signing secret
    pub secret: SecretString,
    pub session_ttl_minutes: i64,
    pub challenge_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SecondFactorConfig {
    pub totp_issuer: String,
    /// Number of 30-second steps accepted either side of the current one.
    pub totp_skew_steps: u8,
    pub backup_code_count: usize,
    pub challenge_max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Tenant used by logins that name none.
    pub default_tenant_slug: String,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Operator account created in the default tenant at startup while the
/// tenant has no principals.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub password_min_length: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    /// Key clients on the first `x-forwarded-for` hop instead of the peer
    /// address. Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl IamConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IamConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("iam-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                session_ttl_minutes: parse_env("SESSION_TTL_MINUTES", "1440", is_prod)?,
                challenge_ttl_minutes: parse_env("CHALLENGE_TTL_MINUTES", "5", is_prod)?,
            },
            second_factor: SecondFactorConfig {
                totp_issuer: get_env("TOTP_ISSUER", Some("iam"), is_prod)?,
                totp_skew_steps: parse_env("TOTP_SKEW_STEPS", "1", is_prod)?,
                backup_code_count: parse_env("BACKUP_CODE_COUNT", "8", is_prod)?,
                challenge_max_attempts: parse_env("CHALLENGE_MAX_ATTEMPTS", "3", is_prod)?,
            },
            tenancy: TenancyConfig {
                default_tenant_slug: get_env("DEFAULT_TENANT", Some("default"), is_prod)?,
                bootstrap_admin: bootstrap_admin_from_env()?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                password_min_length: parse_env("PASSWORD_MIN_LENGTH", "8", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("LOGIN_RATE_LIMIT_ATTEMPTS", "10", is_prod)?,
                login_window_seconds: parse_env("LOGIN_RATE_LIMIT_WINDOW_SECONDS", "60", is_prod)?,
                trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR", "false", is_prod)?,
            },
            swagger_enabled: parse_env("ENABLE_SWAGGER", if is_prod { "false" } else { "true" }, is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.session_ttl_minutes <= 0 {
            return Err(config_error("SESSION_TTL_MINUTES must be positive"));
        }

        if self.jwt.challenge_ttl_minutes <= 0 {
            return Err(config_error("CHALLENGE_TTL_MINUTES must be positive"));
        }

        if self.jwt.challenge_ttl_minutes >= self.jwt.session_ttl_minutes {
            return Err(config_error(
                "CHALLENGE_TTL_MINUTES must be shorter than SESSION_TTL_MINUTES",
            ));
        }

        if self.second_factor.backup_code_count == 0 {
            return Err(config_error("BACKUP_CODE_COUNT must be positive"));
        }

        if self.second_factor.challenge_max_attempts <= 0 {
            return Err(config_error("CHALLENGE_MAX_ATTEMPTS must be positive"));
        }

        if self.second_factor.totp_issuer.contains(':') {
            return Err(config_error("TOTP_ISSUER must not contain ':'"));
        }

        if let Some(admin) = &self.tenancy.bootstrap_admin {
            let min = usize::try_from(self.security.password_min_length).unwrap_or(usize::MAX);
            if admin.password.expose_secret().chars().count() < min {
                return Err(config_error(
                    "BOOTSTRAP_ADMIN_PASSWORD is shorter than PASSWORD_MIN_LENGTH",
                ));
            }
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret().len() < 32 {
                return Err(config_error(
                    "JWT_SECRET must be at least 32 bytes in production",
                ));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.swagger_enabled {
                tracing::warn!("Swagger UI is enabled in production");
            }
        }

        Ok(())
    }
}

fn bootstrap_admin_from_env() -> Result<Option<BootstrapAdmin>, AppError> {
    let read = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
    match (
        read("BOOTSTRAP_ADMIN_USERNAME"),
        read("BOOTSTRAP_ADMIN_EMAIL"),
        read("BOOTSTRAP_ADMIN_PASSWORD"),
    ) {
        (Some(username), Some(email), Some(password)) => Ok(Some(BootstrapAdmin {
            username,
            email,
            password: SecretString::new(password),
        })),
        (None, None, None) => Ok(None),
        _ => Err(config_error(
            "BOOTSTRAP_ADMIN_USERNAME, BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together",
        )),
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            // Production must set secrets and connection strings explicitly.
            Some(def) if !is_prod || !is_sensitive(key) => Ok(def.to_string()),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(format!(
                "{} is required but not set",
                key
            )))),
        },
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn is_sensitive(key: &str) -> bool {
    matches!(key, "DATABASE_URL" | "JWT_SECRET" | "ALLOWED_ORIGINS")
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl IamConfig {
    /// Settings for in-process use (tests, local tooling). Never reads the environment.
    pub fn for_tests(jwt_secret: &str) -> Self {
        IamConfig {
            common: core_config::Config {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            environment: Environment::Dev,
            service_name: "iam-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 0,
            },
            jwt: JwtConfig {
                secret: SecretString::new(jwt_secret.to_string()),
                session_ttl_minutes: 1440,
                challenge_ttl_minutes: 5,
            },
            second_factor: SecondFactorConfig {
                totp_issuer: "iam".to_string(),
                totp_skew_steps: 1,
                backup_code_count: 8,
                challenge_max_attempts: 3,
            },
            tenancy: TenancyConfig {
                default_tenant_slug: "default".to_string(),
                bootstrap_admin: None,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                password_min_length: 8,
            },
            rate_limit: RateLimitConfig {
                login_attempts: 1000,
                login_window_seconds: 60,
                trust_forwarded_for: false,
            },
            swagger_enabled: false,
        }
    }
}
