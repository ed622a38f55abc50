use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::exec::{DEFAULT_TIMEOUT, ExecOptions};
use crate::processor::{FilePatterns, ProcessorSettings};
use crate::watch::WatcherSettings;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Location of the user overlay, before tilde expansion.
const USER_CONFIG_PATH: &str = "~/.config/claudelink/config.toml";

// ── Final (merged) config types ──

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Filesystem locations. `~` is expanded when runtime settings are built.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct PathsConfig {
    #[serde(default)]
    pub watch_dir: String,
    #[serde(default)]
    pub archive_dir: String,
    #[serde(default)]
    pub log_file: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub shell: String,
    /// Empty means "inherit the current directory".
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub timeout_secs: u64,
    /// Variables layered over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct WatchConfig {
    /// Delay between a notifier event and the existence re-check.
    #[serde(default)]
    pub settle_ms: u64,
    /// Rescan interval for platforms without a native notifier.
    #[serde(default)]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub suffixes: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// Inputs to the default deny-list rules.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct PolicyConfig {
    /// Path prefixes that name raw block devices.
    #[serde(default)]
    pub block_devices: Vec<String>,
    /// Programs that fetch remote content.
    #[serde(default)]
    pub downloaders: Vec<String>,
    /// Command interpreters: pipe targets for remote code and `-c` bodies.
    #[serde(default)]
    pub shells: Vec<String>,
    /// Commands that run their arguments as another command.
    #[serde(default)]
    pub wrappers: Vec<String>,
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    paths: PathsOverlay,
    #[serde(default)]
    execution: ExecutionOverlay,
    #[serde(default)]
    watch: WatchOverlay,
    #[serde(default)]
    policy: PolicyOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct PathsOverlay {
    watch_dir: Option<String>,
    archive_dir: Option<String>,
    log_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExecutionOverlay {
    shell: Option<String>,
    working_dir: Option<String>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    remove_env: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WatchOverlay {
    #[serde(default)]
    replace: bool,
    settle_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    suffixes: Vec<String>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    remove_suffixes: Vec<String>,
    #[serde(default)]
    remove_prefixes: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    block_devices: Vec<String>,
    #[serde(default)]
    downloaders: Vec<String>,
    #[serde(default)]
    shells: Vec<String>,
    #[serde(default)]
    wrappers: Vec<String>,
    #[serde(default)]
    remove_block_devices: Vec<String>,
    #[serde(default)]
    remove_downloaders: Vec<String>,
    #[serde(default)]
    remove_shells: Vec<String>,
    #[serde(default)]
    remove_wrappers: Vec<String>,
}

// ── Merge logic ──

/// Merge a user list into a default list.
/// In replace mode: user list replaces default entirely.
/// In merge mode: remove items first, then extend with additions (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

fn merge_scalar<T>(base: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *base = v;
    }
}

/// Expand a leading `~` to the home directory.
fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load configuration with resolution order:
    /// 1. Start with embedded defaults
    /// 2. Merge the overlay at `path`, or ~/.config/claudelink/config.toml
    ///    when no path is given and that file exists
    ///
    /// An explicitly named file must exist and parse.
    pub fn load(path: Option<&Path>) -> Result<Self, LinkError> {
        let mut config = Self::default_config();
        let overlay = match path {
            Some(path) => Some(Self::read_overlay(path)?),
            None => {
                let default_path = expand_path(USER_CONFIG_PATH);
                if default_path.is_file() {
                    Some(Self::read_overlay(&default_path)?)
                } else {
                    None
                }
            }
        };
        if let Some(overlay) = overlay {
            config.apply_overlay(overlay);
        }
        Ok(config)
    }

    fn read_overlay(path: &Path) -> Result<ConfigOverlay, LinkError> {
        let content = std::fs::read_to_string(path).map_err(|source| LinkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| LinkError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        let p = overlay.paths;
        merge_scalar(&mut self.paths.watch_dir, p.watch_dir);
        merge_scalar(&mut self.paths.archive_dir, p.archive_dir);
        merge_scalar(&mut self.paths.log_file, p.log_file);

        let e = overlay.execution;
        merge_scalar(&mut self.execution.shell, e.shell);
        merge_scalar(&mut self.execution.working_dir, e.working_dir);
        merge_scalar(&mut self.execution.timeout_secs, e.timeout_secs);
        self.execution.env.retain(|k, _| !e.remove_env.contains(k));
        self.execution.env.extend(e.env);

        let w = overlay.watch;
        merge_scalar(&mut self.watch.settle_ms, w.settle_ms);
        merge_scalar(&mut self.watch.poll_interval_ms, w.poll_interval_ms);
        merge_list(
            &mut self.watch.suffixes,
            w.suffixes,
            &w.remove_suffixes,
            w.replace,
        );
        merge_list(
            &mut self.watch.prefixes,
            w.prefixes,
            &w.remove_prefixes,
            w.replace,
        );

        let po = overlay.policy;
        merge_list(
            &mut self.policy.block_devices,
            po.block_devices,
            &po.remove_block_devices,
            po.replace,
        );
        merge_list(
            &mut self.policy.downloaders,
            po.downloaders,
            &po.remove_downloaders,
            po.replace,
        );
        merge_list(
            &mut self.policy.shells,
            po.shells,
            &po.remove_shells,
            po.replace,
        );
        merge_list(
            &mut self.policy.wrappers,
            po.wrappers,
            &po.remove_wrappers,
            po.replace,
        );
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }

    /// Override the watch directory (e.g. from --watch-dir).
    pub fn set_watch_dir(&mut self, dir: &Path) {
        self.paths.watch_dir = dir.to_string_lossy().into_owned();
    }

    /// Render the merged configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn file_patterns(&self) -> FilePatterns {
        FilePatterns {
            suffixes: self.watch.suffixes.clone(),
            prefixes: self.watch.prefixes.clone(),
        }
    }

    pub fn exec_options(&self) -> ExecOptions {
        let working_dir = match self.execution.working_dir.trim() {
            "" => None,
            dir => Some(expand_path(dir)),
        };
        // a zero timeout would fail every command at once
        let timeout = match self.execution.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        ExecOptions {
            shell: self.execution.shell.clone(),
            working_dir,
            env: self.execution.env.clone(),
            timeout,
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            archive_dir: expand_path(&self.paths.archive_dir),
            log_file: expand_path(&self.paths.log_file),
            patterns: self.file_patterns(),
            exec: self.exec_options(),
        }
    }

    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            watch_dir: expand_path(&self.paths.watch_dir),
            settle_delay: Duration::from_millis(self.watch.settle_ms),
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = Config::default_config();
        assert!(!config.paths.watch_dir.is_empty());
        assert!(!config.watch.suffixes.is_empty());
        assert!(!config.watch.prefixes.is_empty());
        assert!(!config.policy.block_devices.is_empty());
        assert!(!config.policy.shells.is_empty());
        assert!(config.execution.env.is_empty());
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default_config();
        assert_eq!(config.watch.suffixes, vec![".claude.json"]);
        assert_eq!(config.watch.prefixes, vec!["claude-cmd-"]);
        assert_eq!(config.execution.timeout_secs, 30);
        assert_eq!(config.watch.settle_ms, 100);
        assert!(config.policy.downloaders.contains(&"curl".to_string()));
        assert!(config.policy.downloaders.contains(&"wget".to_string()));
        assert!(config.policy.shells.contains(&"bash".to_string()));
        assert!(config.policy.block_devices.contains(&"/dev/sd".to_string()));
    }

    #[test]
    fn default_paths_expand_home() {
        let config = Config::default_config();
        let settings = config.processor_settings();
        assert!(!settings.archive_dir.to_string_lossy().starts_with('~'));
        assert!(settings.archive_dir.ends_with(".claudelink/processed"));
        assert!(settings.log_file.ends_with(".claudelink/claudelink.log"));
        let watcher = config.watcher_settings();
        assert!(watcher.watch_dir.ends_with("Downloads"));
        assert_eq!(watcher.settle_delay, Duration::from_millis(100));
    }

    #[test]
    fn default_exec_options() {
        let opts = Config::default_config().exec_options();
        assert_eq!(opts.shell, "sh");
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert!(opts.working_dir.is_some());
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [execution]
            timeout_secs = 0
        "#,
        );
        assert_eq!(config.exec_options().timeout, DEFAULT_TIMEOUT);
    }

    // ── Merge semantics ──

    #[test]
    fn overlay_extends_policy_list() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [policy]
            downloaders = ["aria2c"]
        "#,
        );
        assert!(config.policy.downloaders.contains(&"curl".to_string()));
        assert!(config.policy.downloaders.contains(&"aria2c".to_string()));
    }

    #[test]
    fn overlay_removes_from_policy_list() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [policy]
            remove_wrappers = ["xargs", "env"]
        "#,
        );
        assert!(!config.policy.wrappers.contains(&"xargs".to_string()));
        assert!(!config.policy.wrappers.contains(&"env".to_string()));
        assert!(config.policy.wrappers.contains(&"sudo".to_string()));
    }

    #[test]
    fn overlay_replace_watch_patterns() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [watch]
            replace = true
            suffixes = [".cmd.json"]
        "#,
        );
        assert_eq!(config.watch.suffixes, vec![".cmd.json"]);
        assert!(config.watch.prefixes.is_empty());
    }

    #[test]
    fn overlay_scalars_override() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [paths]
            watch_dir = "/srv/inbox"

            [execution]
            timeout_secs = 5
            shell = "bash"
        "#,
        );
        assert_eq!(config.paths.watch_dir, "/srv/inbox");
        assert_eq!(config.execution.timeout_secs, 5);
        assert_eq!(config.execution.shell, "bash");
        // untouched scalars keep their defaults
        assert_eq!(config.paths.archive_dir, "~/.claudelink/processed");
    }

    #[test]
    fn overlay_env_merges_and_removes() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [execution.env]
            LANG = "C"
            CI = "1"
        "#,
        );
        config.apply_overlay_str(
            r#"
            [execution]
            remove_env = ["CI"]
        "#,
        );
        assert_eq!(config.execution.env.get("LANG").map(String::as_str), Some("C"));
        assert!(!config.execution.env.contains_key("CI"));
    }

    #[test]
    fn overlay_no_duplicates() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [policy]
            shells = ["bash"]
        "#,
        );
        let count = config.policy.shells.iter().filter(|s| *s == "bash").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_overlay_changes_nothing() {
        let original = Config::default_config();
        let mut config = Config::default_config();
        config.apply_overlay_str("");
        assert_eq!(config.policy.wrappers, original.policy.wrappers);
        assert_eq!(config.paths.log_file, original.paths.log_file);
    }

    #[test]
    fn empty_working_dir_inherits() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [execution]
            working_dir = ""
        "#,
        );
        assert!(config.exec_options().working_dir.is_none());
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\nsettle_ms = 250\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.watch.settle_ms, 250);
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, LinkError::ConfigRead { .. }));
    }

    #[test]
    fn load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, LinkError::ConfigParse { .. }));
    }

    #[test]
    fn merged_config_renders_as_toml() {
        let rendered = Config::default_config().to_toml().unwrap();
        assert!(rendered.contains("[policy]"));
        assert!(rendered.contains("claude-cmd-"));
    }

    #[test]
    fn watch_dir_override() {
        let mut config = Config::default_config();
        config.set_watch_dir(Path::new("/tmp/inbox"));
        assert_eq!(
            config.watcher_settings().watch_dir,
            PathBuf::from("/tmp/inbox")
        );
    }
}
