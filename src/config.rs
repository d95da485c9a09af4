//! Application configuration
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Service categories offered when `SERVICE_CATALOG` is not set
const DEFAULT_SERVICE_CATALOG: &[&str] = &[
    "Water Supply",
    "Electricity",
    "Road Maintenance",
    "Waste Collection",
    "Public Health",
    "Education",
    "Land Administration",
    "Security",
];

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Upload directory path
    pub upload_dir: String,
    /// Session expiration in hours
    pub session_expiry_hours: i64,
    /// Maximum request body size in bytes
    pub max_upload_size: usize,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Environment (development/production)
    pub environment: Environment,
    /// Trusted proxy IP prefixes (e.g., ["10.0.0.", "172.16."])
    /// Only trust X-Forwarded-For headers from these IPs
    pub trusted_proxies: Vec<String>,
    /// Complaint categories citizens may choose from
    pub service_catalog: Vec<String>,
    /// Days until a new complaint is due, if complaints have a deadline
    pub complaint_response_days: Option<i64>,
    /// Superadmin account created on first start
    pub superadmin: Option<SuperadminSeed>,
}

#[derive(Debug, Clone)]
pub struct SuperadminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // DATABASE_URL, or DATABASE_HOST + DATABASE_PORT + DATABASE_USER +
        // DATABASE_PASSWORD + DATABASE_NAME
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| {
                let host = env::var("DATABASE_HOST")?;
                let port = env::var("DATABASE_PORT").unwrap_or_else(|_| "5432".to_string());
                let user = env::var("DATABASE_USER")?;
                let password = env::var("DATABASE_PASSWORD")?;
                let db = env::var("DATABASE_NAME")?;
                Ok(format!(
                    "postgres://{}:{}@{}:{}/{}",
                    user, password, host, port, db
                ))
            })
            .map_err(|_: env::VarError| {
                ConfigError::Missing(
                    "DATABASE_URL, or DATABASE_HOST + DATABASE_USER + DATABASE_PASSWORD + DATABASE_NAME is required".to_string(),
                )
            })?;

        let complaint_response_days = match env::var("COMPLAINT_RESPONSE_DAYS") {
            Ok(days) if days.trim().is_empty() || days.trim() == "0" => None,
            Ok(days) => Some(days.trim().parse::<i64>().map_err(|_| {
                ConfigError::Invalid(format!("COMPLAINT_RESPONSE_DAYS must be a number, got '{}'", days))
            })?),
            Err(_) => Some(30),
        };

        let superadmin = match (env::var("SUPERADMIN_EMAIL"), env::var("SUPERADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => {
                if password.len() < 12 {
                    return Err(ConfigError::Invalid(
                        "SUPERADMIN_PASSWORD must be at least 12 characters".to_string(),
                    ));
                }
                Some(SuperadminSeed {
                    email: email.trim().to_lowercase(),
                    password,
                })
            }
            (Ok(_), Err(_)) => {
                return Err(ConfigError::Missing(
                    "SUPERADMIN_PASSWORD is required when SUPERADMIN_EMAIL is set".to_string(),
                ))
            }
            _ => None,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            database_url,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            session_expiry_hours: env::var("SESSION_EXPIRY_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(8),
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64 * 1024 * 1024), // identity document + 5 supporting documents
            cors_origins: split_list(env::var("CORS_ORIGINS").ok())
                .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
            environment,
            trusted_proxies: split_list(env::var("TRUSTED_PROXIES").ok()).unwrap_or_default(),
            service_catalog: split_list(env::var("SERVICE_CATALOG").ok()).unwrap_or_else(|| {
                DEFAULT_SERVICE_CATALOG
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            complaint_response_days,
            superadmin,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Comma-separated list; `None` when unset or empty
fn split_list(value: Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = value?
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(Some("Water Supply, Electricity ,,".to_string())),
            Some(vec!["Water Supply".to_string(), "Electricity".to_string()])
        );
        assert_eq!(split_list(Some(" , ".to_string())), None);
        assert_eq!(split_list(None), None);
    }
}
