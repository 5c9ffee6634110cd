use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::Provider;

pub const API_KEY_ENV: &str = "LLM_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AssistantConfig {
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub max_tokens: u32,
    pub log_level: String,
    /// Minimum pause between two LLM requests.
    pub min_request_interval_secs: f64,
    pub request_timeout_secs: u64,
    /// Relative paths are resolved against the project root.
    pub backup_dir: PathBuf,
    pub suggestions_file: PathBuf,
    pub templates_dir: PathBuf,
    /// Glob patterns (relative to the project) skipped when scanning directories.
    pub exclude_patterns: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            llm_provider: "gemini".to_string(),
            llm_model: Provider::Gemini.default_model().to_string(),
            llm_api_key: env::var(API_KEY_ENV).unwrap_or_default(),
            max_tokens: 1000,
            log_level: "info".to_string(),
            min_request_interval_secs: 4.0,
            request_timeout_secs: 30,
            backup_dir: PathBuf::from(".refactor_backups"),
            suggestions_file: PathBuf::from("suggestions.json"),
            templates_dir: PathBuf::from("prompt_templates"),
            exclude_patterns: Vec::new(),
        }
    }
}

impl AssistantConfig {
    /// Command-line values win over file values. Switching provider without
    /// naming a model also swaps the stale default model for the new provider's.
    pub fn apply_overrides(&mut self, api_key: Option<&str>, provider: Option<&str>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.llm_api_key = key.to_string();
        }

        if let Some(provider) = provider {
            let previous_default = Provider::parse(&self.llm_provider)
                .map(|p| p.default_model().to_string())
                .ok();
            let model_was_default = previous_default.as_deref() == Some(self.llm_model.as_str())
                || self.llm_model.is_empty();

            self.llm_provider = provider.to_lowercase();
            if model_was_default {
                if let Ok(p) = Provider::parse(provider) {
                    self.llm_model = p.default_model().to_string();
                }
            }
        }
    }

    pub fn resolve(&self, project: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project.join(path)
        }
    }

    /// Directories the tool writes into, which scans must not descend into.
    pub fn scan_skip_dirs(&self, project: &Path) -> Vec<PathBuf> {
        vec![self.resolve(project, &self.backup_dir)]
    }
}

/// Load the assistant configuration. A missing file means defaults; a broken
/// one is an error naming the file. serde_yaml also accepts JSON documents,
/// so `config.json` and `config.yaml` both work.
///
/// Nothing is logged here: this runs before the subscriber is installed.
pub fn load_config(path: Option<&Path>) -> Result<AssistantConfig> {
    match path.filter(|p| p.exists()) {
        Some(path) => read_config_file(path)
            .with_context(|| format!("Error reading config file {}", path.display())),
        None => Ok(AssistantConfig::default()),
    }
}

fn read_config_file(path: &Path) -> Result<AssistantConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path:?}"))?;

    let mut config: AssistantConfig =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.llm_api_key.is_empty() {
        config.llm_api_key = env::var(API_KEY_ENV).unwrap_or_default();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::collect_python_files;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Some(Path::new("/definitely/not/here.json"))).unwrap();
        assert_eq!(config.llm_provider, "gemini");
        assert_eq!(config.llm_model, "gemini-1.5-flash");
        assert_eq!(config.max_tokens, 1000);
    }

    #[test]
    fn test_json_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"llm_provider": "openai", "max_tokens": 2048}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.llm_provider, "openai");
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_yaml_file_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "llm_model: claude-3-haiku\nexclude_patterns:\n  - \"tests/*\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.llm_model, "claude-3-haiku");
        assert_eq!(config.exclude_patterns, vec!["tests/*".to_string()]);
    }

    #[test]
    fn test_invalid_file_is_an_error_naming_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not valid").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("Error reading config file"));
        assert!(message.contains(&file.path().display().to_string()));
        assert!(message.contains("Failed to parse config file"));
    }

    #[test]
    fn test_custom_backup_dir_is_skipped_by_scans() {
        let project = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backup_dir: snapshots").unwrap();
        let config = load_config(Some(file.path())).unwrap();

        for rel in ["app.py", "snapshots/20240101_120000/app.py"] {
            let path = project.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "x = 1\n").unwrap();
        }

        let skip = config.scan_skip_dirs(project.path());
        assert_eq!(skip, vec![project.path().join("snapshots")]);

        let files = collect_python_files(project.path(), &config.exclude_patterns, &skip).unwrap();
        assert_eq!(files, vec![project.path().join("app.py")]);
    }

    #[test]
    fn test_provider_override_swaps_default_model() {
        let mut config = AssistantConfig::default();
        config.apply_overrides(Some("sk-test"), Some("OpenAI"));

        assert_eq!(config.llm_api_key, "sk-test");
        assert_eq!(config.llm_provider, "openai");
        assert_eq!(config.llm_model, "gpt-4");
    }

    #[test]
    fn test_provider_override_keeps_explicit_model() {
        let mut config = AssistantConfig {
            llm_model: "my-model".to_string(),
            ..AssistantConfig::default()
        };
        config.apply_overrides(None, Some("anthropic"));

        assert_eq!(config.llm_model, "my-model");
    }
}
