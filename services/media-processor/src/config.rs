use shared::storage::StorageSettings;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// A bounding box a variant must fit within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for TargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

pub const DEFAULT_VARIANT_SIZES: [TargetSize; 4] = [
    TargetSize::new(320, 240),
    TargetSize::new(640, 480),
    TargetSize::new(1024, 768),
    TargetSize::new(1920, 1080),
];

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub max_upload_bytes: u64,
    /// Lower-case, dot-prefixed
    pub allowed_extensions: Vec<String>,
    pub variant_sizes: Vec<TargetSize>,
    pub webp_quality: u8,
    pub variant_timeout: Duration,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub sweep_interval: Duration,
    pub sweep_timeout: Duration,
    pub sweep_batch_size: i64,
    pub storage: StorageSettings,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 2 * 1024 * 1024,
            allowed_extensions: [".jpg", ".jpeg", ".png", ".webp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            variant_sizes: DEFAULT_VARIANT_SIZES.to_vec(),
            webp_quality: 80,
            variant_timeout: Duration::from_secs(30),
            worker_concurrency: 4,
            queue_capacity: 1024,
            sweep_interval: Duration::from_secs(300),
            sweep_timeout: Duration::from_secs(240),
            sweep_batch_size: 100,
            storage: StorageSettings::default(),
            database_url: None,
            db_max_connections: 10,
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let allowed_extensions = match get("MEDIA_ALLOWED_EXTENSIONS") {
            Some(raw) => parse_extensions(&raw)?,
            None => defaults.allowed_extensions,
        };
        let variant_sizes = match get("MEDIA_VARIANT_SIZES") {
            Some(raw) => parse_variant_sizes(&raw)?,
            None => defaults.variant_sizes,
        };

        let requested_quality: u32 =
            parse_or(&get, "MEDIA_WEBP_QUALITY", u32::from(defaults.webp_quality))?;
        let webp_quality = u8::try_from(requested_quality.min(100)).unwrap_or(100);
        if requested_quality > 100 {
            warn!("MEDIA_WEBP_QUALITY={} is above 100, using 100", requested_quality);
        }

        let worker_concurrency =
            parse_or(&get, "MEDIA_WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        let queue_capacity = parse_or(&get, "MEDIA_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let sweep_batch_size: i64 =
            parse_or(&get, "MEDIA_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?;
        for (var, value) in [
            ("MEDIA_WORKER_CONCURRENCY", worker_concurrency as i64),
            ("MEDIA_QUEUE_CAPACITY", queue_capacity as i64),
            ("MEDIA_SWEEP_BATCH_SIZE", sweep_batch_size),
        ] {
            if value <= 0 {
                return Err(invalid(var, value.to_string(), "must be positive"));
            }
        }

        let storage = StorageSettings {
            local_root: get("MEDIA_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.local_root),
            local_url_prefix: get("MEDIA_LOCAL_URL_PREFIX")
                .unwrap_or(defaults.storage.local_url_prefix),
            s3_bucket: get("MEDIA_S3_BUCKET"),
            s3_region: get("MEDIA_S3_REGION"),
            s3_endpoint: get("MEDIA_S3_ENDPOINT"),
            public_base_url: get("MEDIA_PUBLIC_BASE_URL"),
        };

        Ok(Self {
            max_upload_bytes: parse_or(&get, "MEDIA_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            allowed_extensions,
            variant_sizes,
            webp_quality,
            variant_timeout: seconds_or(&get, "MEDIA_VARIANT_TIMEOUT_SECS", defaults.variant_timeout)?,
            worker_concurrency,
            queue_capacity,
            sweep_interval: seconds_or(&get, "MEDIA_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            sweep_timeout: seconds_or(&get, "MEDIA_SWEEP_TIMEOUT_SECS", defaults.sweep_timeout)?,
            sweep_batch_size,
            storage,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
        })
    }
}

fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.into(),
        reason: reason.into(),
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, raw.clone(), e.to_string())),
        None => Ok(default),
    }
}

fn seconds_or<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, var, default.as_secs())?;
    if secs == 0 {
        return Err(invalid(var, "0", "must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse `320x240,640x480` into target boxes, keeping order and dropping
/// duplicates.
pub fn parse_variant_sizes(raw: &str) -> Result<Vec<TargetSize>, ConfigError> {
    const VAR: &str = "MEDIA_VARIANT_SIZES";
    let mut sizes = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (w, h) = entry
            .split_once(['x', 'X'])
            .ok_or_else(|| invalid(VAR, entry, "expected WIDTHxHEIGHT"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| invalid(VAR, entry, "width is not a number"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| invalid(VAR, entry, "height is not a number"))?;
        if width == 0 || height == 0 {
            return Err(invalid(VAR, entry, "dimensions must be positive"));
        }

        let size = TargetSize::new(width, height);
        if !sizes.contains(&size) {
            sizes.push(size);
        }
    }

    if sizes.is_empty() {
        return Err(invalid(VAR, raw, "no sizes given"));
    }
    Ok(sizes)
}

fn parse_extensions(raw: &str) -> Result<Vec<String>, ConfigError> {
    let extensions: Vec<String> = raw
        .split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty() && e != ".")
        .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
        .collect();

    if extensions.is_empty() {
        return Err(invalid("MEDIA_ALLOWED_EXTENSIONS", raw, "no extensions given"));
    }
    Ok(extensions)
}
