use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest width/height a receipt can encode (4 hex digits).
pub const MAX_ENCODABLE_DIMENSION: u32 = 0xFFFF;

/// Environment variables override file values, e.g. `PLUTO__WEB__PORT=9000`.
pub const ENV_PREFIX: &str = "PLUTO";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    /// Schema namespace qualifying every table (`main` for the primary database).
    pub schema: String,
    /// Database file attached under `schema` when it is not `main`.
    pub schema_path: Option<PathBuf>,
    /// Upper bound on a single upsert/delete transaction, in seconds.
    pub transaction_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub cache_control: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub image_dir: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub default_quality: u8,
    pub max_dimension: u32,
    /// Serialise concurrent cache misses for the same receipt.
    pub serialize_renders: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./pluto-images.db".to_string(),
                max_connections: Some(10),
                schema: "main".to_string(),
                schema_path: None,
                transaction_timeout_secs: Some(30),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cache_control: "public, max-age=86400".to_string(),
                max_upload_bytes: 32 * 1024 * 1024,
            },
            storage: StorageConfig {
                image_dir: PathBuf::from("./data/images"),
                cache_dir: PathBuf::from("./data/cache"),
            },
            render: RenderConfig {
                default_quality: 85,
                max_dimension: 4096,
                serialize_renders: true,
            },
        }
    }
}

impl Config {
    /// Load configuration from defaults, the TOML file at `path` and
    /// `PLUTO__*` environment variables, in that order of precedence.
    ///
    /// A missing file is created from the defaults so operators have a
    /// starting point to edit.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)
                .with_context(|| format!("writing default config to {}", path.display()))?;
        }

        let config: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::new(&path.to_string_lossy(), config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_schema_name(&self.database.schema) {
            bail!(
                "database.schema '{}' must be a non-empty identifier of ASCII letters, digits and underscores",
                self.database.schema
            );
        }
        if self.database.schema != "main" && self.database.schema_path.is_none() {
            bail!(
                "database.schema_path is required when database.schema is '{}'",
                self.database.schema
            );
        }
        if self.render.max_dimension == 0 || self.render.max_dimension > MAX_ENCODABLE_DIMENSION {
            bail!(
                "render.max_dimension must be between 1 and {}",
                MAX_ENCODABLE_DIMENSION
            );
        }
        if self.render.default_quality > 100 {
            bail!("render.default_quality must be at most 100");
        }
        Ok(())
    }
}

fn is_valid_schema_name(schema: &str) -> bool {
    let mut chars = schema.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
