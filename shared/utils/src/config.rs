use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

use aduana_models::{PublishTemplate, TariffCode, DEFAULT_UNIT_OF_MEASURE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vlm: VLMConfig,
    pub scripts: ScriptsConfig,
    pub normalization: NormalizationConfig,
    pub publish: PublishConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VLMConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// External extraction/publish scripts run as child processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    pub python: String,
    pub scripts_dir: String,
    pub timeout_seconds: u64,
    /// Pages rasterized for the vision fallback.
    pub max_pages: u32,
    pub image_extraction_script: String,
    pub table_extraction_script: String,
    pub rasterize_script: String,
    pub publish_script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub tariff_code_max_digits: usize,
    pub default_unit_of_measure: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub default_template: PublishTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Start with default values
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(
                File::with_name(&format!(
                    "config/{}",
                    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            // Add local config (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with ADUANA prefix
            .add_source(Environment::with_prefix("ADUANA").separator("__"));

        config.build()?.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_request_size: 32 * 1024 * 1024, // 32MB
                timeout_seconds: 300,
            },
            vlm: VLMConfig {
                api_url: "https://api.openai.com/v1".to_string(),
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 1200,
                temperature: 0.1,
                timeout_seconds: 120,
            },
            scripts: ScriptsConfig {
                python: env::var("PYTHON_PATH").unwrap_or_else(|_| "python".to_string()),
                scripts_dir: "scripts".to_string(),
                timeout_seconds: 180,
                max_pages: 3,
                image_extraction_script: "prep_liquidacion.py".to_string(),
                table_extraction_script: "parser_proforma.py".to_string(),
                rasterize_script: "pdf_to_images_b64.py".to_string(),
                publish_script: "commit_liquidacion.py".to_string(),
            },
            normalization: NormalizationConfig::default(),
            publish: PublishConfig {
                default_template: PublishTemplate::Maritimo,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                file_path: None,
            },
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            tariff_code_max_digits: TariffCode::CANONICAL_MAX_DIGITS,
            default_unit_of_measure: DEFAULT_UNIT_OF_MEASURE.to_string(),
        }
    }
}
