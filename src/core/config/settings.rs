use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_u16,
    parse_u32, parse_u64,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, JobSettings, OcrSettings,
    RedisSettings, RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings,
    Settings, StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PROBOOK_HOST", "0.0.0.0");
        let port = env_or_default("PROBOOK_PORT", "8000");

        let environment =
            parse_environment(env_optional("PROBOOK_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PROBOOK_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Probook API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };

        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "probooksuperuser");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "probook_db");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let worker_concurrency =
            parse_u64("JOBS_WORKER_CONCURRENCY", env_or_default("JOBS_WORKER_CONCURRENCY", "4"))?;
        let lease_seconds =
            parse_u64("JOBS_LEASE_SECONDS", env_or_default("JOBS_LEASE_SECONDS", "60"))?;
        let max_attempts =
            parse_u32("JOBS_MAX_ATTEMPTS", env_or_default("JOBS_MAX_ATTEMPTS", "3"))?;
        let retry_backoff_seconds = parse_u64(
            "JOBS_RETRY_BACKOFF_SECONDS",
            env_or_default("JOBS_RETRY_BACKOFF_SECONDS", "5"),
        )?;
        let poll_interval_seconds = parse_u64(
            "JOBS_POLL_INTERVAL_SECONDS",
            env_or_default("JOBS_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let maintenance_interval_seconds = parse_u64(
            "JOBS_MAINTENANCE_INTERVAL_SECONDS",
            env_or_default("JOBS_MAINTENANCE_INTERVAL_SECONDS", "30"),
        )?;
        let idempotency_retention_hours = parse_u64(
            "JOBS_IDEMPOTENCY_RETENTION_HOURS",
            env_or_default("JOBS_IDEMPOTENCY_RETENTION_HOURS", "24"),
        )?;
        let dedupe_include_target = env_optional("JOBS_DEDUPE_INCLUDE_TARGET")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let completion_webhook_url = env_optional("JOBS_COMPLETION_WEBHOOK_URL");
        let submit_rate_limit_per_minute = parse_u64(
            "SUBMIT_RATE_LIMIT_PER_MINUTE",
            env_or_default("SUBMIT_RATE_LIMIT_PER_MINUTE", "30"),
        )?;

        let ocr_engine_url = env_or_default("OCR_ENGINE_URL", "");
        let ocr_api_key = env_or_default("OCR_ENGINE_API_KEY", "");
        let ocr_timeout_seconds =
            parse_u64("OCR_TIMEOUT_SECONDS", env_or_default("OCR_TIMEOUT_SECONDS", "120"))?;
        let ocr_max_submit_retries = parse_u32(
            "OCR_MAX_SUBMIT_RETRIES",
            env_or_default("OCR_MAX_SUBMIT_RETRIES", "3"),
        )?;

        let storage_root = env_or_default("STORAGE_ROOT", "storage");
        let public_base_url =
            env_or_default("PUBLIC_BASE_URL", "http://localhost:8000/media").trim_end_matches('/').to_string();

        let log_level = env_or_default("PROBOOK_LOG_LEVEL", "info");
        let json =
            env_optional("PROBOOK_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            jobs: JobSettings {
                worker_concurrency,
                lease_seconds,
                max_attempts,
                retry_backoff_seconds,
                poll_interval_seconds,
                maintenance_interval_seconds,
                idempotency_retention_hours,
                dedupe_include_target,
                completion_webhook_url,
                submit_rate_limit_per_minute,
            },
            ocr: OcrSettings {
                engine_url: ocr_engine_url,
                api_key: ocr_api_key,
                timeout_seconds: ocr_timeout_seconds,
                max_submit_retries: ocr_max_submit_retries,
            },
            storage: StorageSettings { root: storage_root, public_base_url },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn jobs(&self) -> &JobSettings {
        &self.jobs
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOBS_WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.jobs.lease_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOBS_LEASE_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.jobs.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOBS_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.jobs.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOBS_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.ocr.engine_url.is_empty() {
            return Err(ConfigError::MissingSecret("OCR_ENGINE_URL"));
        }
        if self.ocr.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OCR_ENGINE_API_KEY"));
        }

        Ok(())
    }
}
