use anyhow::Context;
use orrery_orchestrator::{OrchestratorConfig, PipelineDefinition};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Contents of `orrery.toml`.
#[derive(Debug, Deserialize)]
pub struct OrreryConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Extra or replacement pipeline definitions.
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

impl Default for OrreryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            orchestrator: OrchestratorConfig::default(),
            pipelines: Vec::new(),
        }
    }
}

impl OrreryConfig {
    /// Parse and validate a config document.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: OrreryConfig = toml::from_str(raw)?;
        config.orchestrator.validate()?;
        Ok(config)
    }

    /// Read the config file, falling back to defaults when it does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orrery_orchestrator::PipelineStage;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OrreryConfig::parse("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.orchestrator.default_timeout_secs, 300);
        assert!(config.pipelines.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = OrreryConfig::parse(
            r#"
            data_dir = "/var/lib/orrery"

            [orchestrator]
            max_concurrent_tasks = 8
            default_max_retries = 1
            retention_secs = 3600

            [orchestrator.retry]
            initial_delay_ms = 250

            [[pipelines]]
            task_type = "review"
            stages = [{ capability = "syntax_check" }, { assistant = "Sun" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.tasks_dir(), PathBuf::from("/var/lib/orrery/tasks"));
        assert_eq!(config.orchestrator.max_concurrent_tasks, 8);
        assert_eq!(config.orchestrator.default_max_retries, 1);
        assert_eq!(config.orchestrator.retention_secs, Some(3600));
        assert_eq!(config.orchestrator.retry.initial_delay_ms, 250);
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(
            config.pipelines[0].stages,
            vec![
                PipelineStage::Capability("syntax_check".into()),
                PipelineStage::Assistant("Sun".into()),
            ]
        );
    }

    #[test]
    fn test_invalid_orchestrator_settings_rejected() {
        let err = OrreryConfig::parse("[orchestrator]\nmax_concurrent_tasks = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent_tasks"));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrreryConfig::load(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orrery.toml");
        tokio::fs::write(&path, "data_dir = \"state\"\n").await.unwrap();
        let config = OrreryConfig::load(&path).await.unwrap();
        assert_eq!(config.data_dir, PathBuf::from("state"));
    }
}
