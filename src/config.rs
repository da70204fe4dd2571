use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Records written per transaction.
    #[serde(default = "default_write_batch")]
    pub write_batch: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_batch: default_write_batch(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_write_batch() -> usize {
    250
}
fn default_max_text_chars() -> usize {
    20_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_batch")]
    pub batch_size: usize,
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
    /// Scanned records between progress events and scheduler yields.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default = "default_recall_min_batch")]
    pub recall_min_batch: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_search_batch(),
            max_matches: default_max_matches(),
            progress_every: default_progress_every(),
            recall_min_batch: default_recall_min_batch(),
        }
    }
}

fn default_search_batch() -> usize {
    100
}
fn default_max_matches() -> usize {
    2000
}
fn default_progress_every() -> usize {
    500
}
fn default_recall_min_batch() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecallConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Summarizer program and arguments; prompts arrive on stdin.
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            command: Vec::new(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Defaults used when no config file is present.
    pub fn minimal() -> Self {
        Self::with_db_path("./data/memora.sqlite")
    }

    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            recall: RecallConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.write_batch == 0 {
        anyhow::bail!("ingest.write_batch must be > 0");
    }
    if config.ingest.max_text_chars == 0 {
        anyhow::bail!("ingest.max_text_chars must be > 0");
    }
    if config.search.batch_size == 0 {
        anyhow::bail!("search.batch_size must be > 0");
    }
    if config.search.max_matches == 0 {
        anyhow::bail!("search.max_matches must be > 0");
    }
    if config.search.progress_every == 0 {
        anyhow::bail!("search.progress_every must be > 0");
    }
    if config.recall.max_chunk_chars == 0 {
        anyhow::bail!("recall.max_chunk_chars must be > 0");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be pretty or json.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = parse("[db]\npath = \"/tmp/m.sqlite\"\n").unwrap();
        assert_eq!(config.ingest.write_batch, 250);
        assert_eq!(config.ingest.max_text_chars, 20_000);
        assert_eq!(config.search.batch_size, 100);
        assert_eq!(config.search.max_matches, 2000);
        assert_eq!(config.search.progress_every, 500);
        assert_eq!(config.recall.max_chunk_chars, 12_000);
        assert!(config.recall.command.is_empty());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn reads_summarizer_command() {
        let config = parse("[db]\npath = \"x\"\n[recall]\ncommand = [\"llm\", \"-q\"]\n").unwrap();
        assert_eq!(config.recall.command, vec!["llm", "-q"]);
    }

    #[test]
    fn rejects_zero_batch() {
        let err = parse("[db]\npath = \"x\"\n[search]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("search.batch_size"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = parse("[db]\npath = \"x\"\n[logging]\nformat = \"xml\"\n").unwrap_err();
        assert!(err.to_string().contains("logging format"));
    }
}
