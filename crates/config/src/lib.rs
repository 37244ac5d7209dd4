//! Layered configuration for staticpub.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults (serde field defaults),
//! 2. `staticpub.toml` in the user configuration directory,
//! 3. an explicitly given file (TOML, YAML or JSON, by extension),
//! 4. `STATICPUB_`-prefixed environment variables, with `__` separating
//!    nested keys (`STATICPUB_OUTPUT__PHP=true`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "staticpub.toml";
const ENV_PREFIX: &str = "STATICPUB_";

/// How far up or down the content tree a change propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    /// Just the node itself.
    #[default]
    None,
    /// One hop: the immediate parent, or the immediate children.
    Direct,
    /// The whole ancestor chain, or every descendant.
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Absolute URL of the site root; every cached URL lives below it.
    pub base_url: String,
    /// Root directory of the published cache.
    pub destination: PathBuf,
    /// Nest cached files under a directory per hostname.
    #[serde(default)]
    pub domain_based_caching: bool,
    /// Rewrite every URL to `https://`.
    #[serde(default)]
    pub force_ssl: bool,
    /// Maximum URLs per job; `0` puts everything in one job.
    #[serde(default)]
    pub urls_per_job: usize,
    /// URLs processed per job step.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Failed attempts before a job gives up on a URL.
    #[serde(default = "default_max_url_attempts")]
    pub max_url_attempts: u32,
    #[serde(default = "default_regenerate_parents")]
    pub regenerate_parents: Inclusion,
    #[serde(default)]
    pub regenerate_children: Inclusion,
    /// How long a claim may go without progress before it is considered
    /// abandoned and the URL (or job) may be claimed again.
    #[serde(default = "default_force_regeneration_secs")]
    pub force_regeneration_secs: u64,
    /// Legacy worker only: age at which another process's heartbeat is
    /// considered dead.
    #[serde(default = "default_heartbeat_threshold_secs")]
    pub heartbeat_threshold_secs: u64,
    /// Sleep between polls of an empty queue in daemon mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// JSON description of the content tree (see the CLI documentation).
    #[serde(default)]
    pub content_manifest: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_chunk_size() -> usize {
    200
}
fn default_max_url_attempts() -> u32 {
    3
}
fn default_regenerate_parents() -> Inclusion {
    Inclusion::Direct
}
fn default_force_regeneration_secs() -> u64 {
    600
}
fn default_heartbeat_threshold_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Also write a `.php` wrapper next to every `.html` file.
    pub php: bool,
    /// Write the PHP wrapper even for 4xx responses, so the error status is
    /// served from cache too.
    pub force_publish: bool,
    /// `Cache-Control: max-age` sent by the PHP wrapper, in seconds.
    pub max_age: u64,
    /// Placeholder in rendered pages that the stale copy replaces with
    /// `stale_notice`. Pages without it get no stale copy.
    pub stale_marker: String,
    pub stale_notice: String,
}
impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            php: false,
            force_publish: true,
            max_age: 300,
            stale_marker: "<!-- staticpub:stale -->".to_string(),
            stale_notice: r#"<div class="staticpub-stale">This page may be out of date.</div>"#.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Defaults to `queue.sqlite` in the user data directory.
    pub database: Option<PathBuf>,
    /// Legacy worker heartbeat file; defaults to `legacy.lock` next to the
    /// database.
    pub lock_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// CMS front-controller executable, run once per URL. A bare name is
    /// looked up on `PATH`.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}
impl Default for RenderConfig {
    fn default() -> Self {
        Self { command: None, args: Vec::new(), working_dir: None, timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub format: LogFormat,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "staticpub")
}

impl Config {
    /// Load every layer, then validate the result.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(dirs) = project_dirs() {
            let user_file = dirs.config_dir().join(CONFIG_FILENAME);
            tracing::debug!(path = %user_file.display(), exists = user_file.exists(), "user configuration file");
            figment = figment.merge(Toml::file(user_file));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.base_url)
            .or_raise(|| ErrorKind::Invalid("base_url", "not an absolute URL".to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            exn::bail!(ErrorKind::Invalid("base_url", format!("`{}` is not an http(s) URL with a host", self.base_url)));
        }
        if !self.destination.is_absolute() {
            exn::bail!(ErrorKind::Invalid("destination", "must be an absolute path".to_string()));
        }
        if self.chunk_size == 0 {
            exn::bail!(ErrorKind::Invalid("chunk_size", "must be at least 1".to_string()));
        }
        if self.max_url_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("max_url_attempts", "must be at least 1".to_string()));
        }
        if let Some(database) = &self.queue.database
            && database.as_os_str().is_empty()
        {
            exn::bail!(ErrorKind::Invalid("queue.database", "must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.queue.database {
            return Ok(path.clone());
        }
        let dirs = project_dirs().ok_or_else(|| exn::Exn::from(ErrorKind::NoDataDirectory))?;
        Ok(dirs.data_dir().join("queue.sqlite"))
    }

    pub fn lock_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.queue.lock_file {
            return Ok(path.clone());
        }
        Ok(self.database_path()?.with_file_name("legacy.lock"))
    }

    pub fn force_regeneration(&self) -> Duration {
        Duration::from_secs(self.force_regeneration_secs)
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_threshold_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MINIMAL: &str = r#"
        base_url = "https://example.com/"
        destination = "/var/www/cache"
    "#;

    fn load(toml: &str) -> Result<Config> {
        Config::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.urls_per_job, 0);
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.max_url_attempts, 3);
        assert_eq!(config.regenerate_parents, Inclusion::Direct);
        assert_eq!(config.regenerate_children, Inclusion::None);
        assert_eq!(config.force_regeneration(), Duration::from_secs(600));
        assert_eq!(config.heartbeat_threshold(), Duration::from_secs(30));
        assert!(!config.output.php);
        assert!(config.output.force_publish);
        assert_eq!(config.output.max_age, 300);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_nested_sections() {
        let config = load(&format!(
            "{MINIMAL}\nregenerate_children = \"recursive\"\n[output]\nphp = true\nmax_age = 60\n[log]\nformat = \"json\"\n"
        ))
        .unwrap();
        assert_eq!(config.regenerate_children, Inclusion::Recursive);
        assert!(config.output.php);
        assert_eq!(config.output.max_age, 60);
        // Unset keys in a partially given section keep their defaults.
        assert_eq!(config.output.stale_marker, "<!-- staticpub:stale -->");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_required_key() {
        let err = load(r#"base_url = "https://example.com/""#).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }

    #[rstest]
    #[case::relative_url("base_url = \"/site/\"\ndestination = \"/cache\"", "base_url")]
    #[case::ftp_url("base_url = \"ftp://example.com/\"\ndestination = \"/cache\"", "base_url")]
    #[case::relative_destination("base_url = \"https://example.com/\"\ndestination = \"cache\"", "destination")]
    #[case::zero_chunk("base_url = \"https://example.com/\"\ndestination = \"/cache\"\nchunk_size = 0", "chunk_size")]
    fn test_invalid_values(#[case] toml: &str, #[case] key: &str) {
        let err = load(toml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(k, _) if *k == key));
    }

    #[test]
    fn test_explicit_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yaml");
        std::fs::write(&path, "base_url: https://example.com/\ndestination: /srv/cache\nforce_ssl: true\n").unwrap();
        let config = Config::from_figment(Figment::new().merge(Yaml::file(&path))).unwrap();
        assert!(config.force_ssl);
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let err = Config::load(Some(Path::new("/nonexistent/staticpub.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_lock_file_defaults_next_to_database() {
        let mut config = load(MINIMAL).unwrap();
        config.queue.database = Some(PathBuf::from("/var/lib/staticpub/queue.sqlite"));
        assert_eq!(config.lock_file_path().unwrap(), PathBuf::from("/var/lib/staticpub/legacy.lock"));
    }
}
