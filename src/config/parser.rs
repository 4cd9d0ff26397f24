//! Config file discovery, parsing and merging

use super::types::HomelabConfig;
use crate::error::{HomelabError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Environment variable overriding the default configs dir
pub const CONFIGS_DIR_ENV: &str = "HOMELAB_CONFIGS_DIR";

/// Config file extensions
pub const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Config parser
pub struct ConfigParser;

impl ConfigParser {
    /// Default configs dir: `~/.homelab`
    pub fn default_configs_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".homelab")
    }

    /// Find every config file under `dir`, sorted by path
    pub fn find_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let configs_dir_error = |source: std::io::Error| HomelabError::ConfigsDir {
            path: dir.display().to_string(),
            source,
        };

        let metadata = std::fs::metadata(dir).map_err(configs_dir_error)?;
        if !metadata.is_dir() {
            return Err(configs_dir_error(std::io::Error::other("not a directory")));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                configs_dir_error(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected")),
                )
            })?;

            let is_config = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CONFIG_EXTENSIONS.contains(&ext))
                .unwrap_or(false);

            if entry.file_type().is_file() && is_config {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Load and merge every config file under `dir`
    pub fn load_dir(dir: &Path) -> Result<HomelabConfig> {
        let files = Self::find_config_files(dir)?;
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "No config files found");
        }

        let mut config = HomelabConfig::default();
        for file in &files {
            tracing::debug!(file = %file.display(), "Parsing config file");
            config = Self::merge_configs(config, Self::parse_file(file)?);
        }

        Ok(config)
    }

    /// Parse config file from path
    pub fn parse_file(path: &Path) -> Result<HomelabConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| HomelabError::ConfigParse {
            path: path.display().to_string(),
            message: format!("Failed to read file: {}", e),
        })?;

        Self::parse_str(&content).map_err(|e| HomelabError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse config from string. An empty document yields an empty config.
    pub fn parse_str(content: &str) -> Result<HomelabConfig> {
        if content.trim().is_empty() {
            return Ok(HomelabConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Merge two configurations; list sections concatenate, global scalars
    /// from the overlay win.
    pub fn merge_configs(base: HomelabConfig, overlay: HomelabConfig) -> HomelabConfig {
        let mut result = base;

        result.global.env.extend(overlay.global.env);
        result.global.mount_defs.extend(overlay.global.mount_defs);

        let container = overlay.global.container;
        if container.stop_signal.is_some() {
            result.global.container.stop_signal = container.stop_signal;
        }
        if container.stop_timeout.is_some() {
            result.global.container.stop_timeout = container.stop_timeout;
        }
        if container.restart_policy.is_some() {
            result.global.container.restart_policy = container.restart_policy;
        }
        if container.domain_name.is_some() {
            result.global.container.domain_name = container.domain_name;
        }
        if !container.dns_search.is_empty() {
            result.global.container.dns_search = container.dns_search;
        }

        let networks = overlay.ipam.networks;
        result
            .ipam
            .networks
            .bridge_mode_networks
            .extend(networks.bridge_mode_networks);
        result
            .ipam
            .networks
            .container_mode_networks
            .extend(networks.container_mode_networks);

        result.hosts.extend(overlay.hosts);
        result.groups.extend(overlay.groups);
        result.containers.extend(overlay.containers);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
groups:
  - name: g1
    order: 1
containers:
  - info:
      group: g1
      container: c1
    image:
      image: abc/xyz
"#;

        let config = ConfigParser::parse_str(yaml).unwrap();
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.containers.len(), 1);
        assert_eq!(config.containers[0].image.image, "abc/xyz");
        assert_eq!(config.containers[0].lifecycle.order, 1);
    }

    #[test]
    fn test_parse_empty_document() {
        let config = ConfigParser::parse_str("\n").unwrap();
        assert_eq!(config, HomelabConfig::default());
    }

    #[test]
    fn test_load_dir_merges_files_in_path_order() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("a.yaml"),
            "global:\n  container:\n    stopSignal: SIGTERM\ngroups:\n  - name: g1\n    order: 1\n",
        )
        .unwrap();
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        std::fs::write(
            temp.path().join("nested").join("b.yml"),
            "global:\n  container:\n    stopSignal: SIGKILL\ngroups:\n  - name: g2\n    order: 2\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let config = ConfigParser::load_dir(temp.path()).unwrap();
        let names: Vec<&str> = config.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["g1", "g2"]);
        assert_eq!(
            config.global.container.stop_signal.as_deref(),
            Some("SIGKILL")
        );
    }

    #[test]
    fn test_missing_configs_dir() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("does-not-exist");

        let err = ConfigParser::load_dir(&missing).unwrap_err();
        match err {
            HomelabError::ConfigsDir { path, source } => {
                assert!(path.ends_with("does-not-exist"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("bad.yaml");
        std::fs::write(&file, "groups: [").unwrap();

        let err = ConfigParser::load_dir(temp.path()).unwrap_err();
        assert!(matches!(err, HomelabError::ConfigParse { ref path, .. } if path.ends_with("bad.yaml")));
    }
}
