use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IngestConfig {
    /// Tab separated export, regular file or named pipe.
    pub input: Option<PathBuf>,
    /// Replay speed multiplier, 0 replays as fast as possible.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Stop after this many records.
    pub limit: Option<u64>,
    /// Directory receiving a copy of the consumed input.
    pub mirror_dir: Option<PathBuf>,
    /// Bound on queued records, unbounded when unset.
    pub queue_capacity: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GeoConfig {
    #[serde(default = "default_geo_enabled")]
    pub enabled: bool,
    #[serde(default = "default_geo_v4_command")]
    pub v4_command: String,
    #[serde(default = "default_geo_v6_command")]
    pub v6_command: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    /// Export every device when the headless run ends.
    #[serde(default = "default_export_on_exit")]
    pub on_exit: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_log_stderr")]
    pub stderr: bool,
}

fn default_speed() -> f64 {
    0.0
}
fn default_geo_enabled() -> bool {
    false
}
fn default_geo_v4_command() -> String {
    String::from("geoiplookup")
}
fn default_geo_v6_command() -> String {
    String::from("geoiplookup6")
}
fn default_export_dir() -> PathBuf {
    std::env::temp_dir()
}
fn default_export_on_exit() -> bool {
    false
}
fn default_log_level() -> String {
    String::from("info")
}
fn default_log_file() -> PathBuf {
    PathBuf::from("traffic_inspector.log")
}
fn default_log_stderr() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            input: None,
            speed: default_speed(),
            limit: None,
            mirror_dir: None,
            queue_capacity: None,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            enabled: default_geo_enabled(),
            v4_command: default_geo_v4_command(),
            v6_command: default_geo_v6_command(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            dir: default_export_dir(),
            on_exit: default_export_on_exit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: default_log_file(),
            stderr: default_log_stderr(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    fn apply(&mut self, args: &CliArgs) {
        if let Some(input) = &args.input {
            self.ingest.input = Some(input.clone());
        }
        if let Some(speed) = args.speed {
            self.ingest.speed = speed;
        }
        if let Some(limit) = args.limit {
            self.ingest.limit = Some(limit);
        }
        if let Some(dir) = &args.preserve {
            self.ingest.mirror_dir = Some(dir.clone());
        }
        if args.geo {
            self.geo.enabled = true;
        }
        if args.export {
            self.export.on_exit = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Tab separated export to read, file or named pipe.
    pub input: Option<PathBuf>,

    /// Replay speed multiplier, 0 for no pacing.
    #[arg(short, long)]
    pub speed: Option<f64>,

    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Keep a copy of the input in this directory.
    #[arg(short, long)]
    pub preserve: Option<PathBuf>,

    /// Look up peer countries with geoiplookup.
    #[arg(long)]
    pub geo: bool,

    /// Export every device to JSON on exit.
    #[arg(long)]
    pub export: bool,

    #[arg(long)]
    pub log_level: Option<String>,
}

/// File values first, then command line overrides. A missing file means
/// defaults.
pub fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = if Path::new(&args.config).exists() {
        let contents = fs::read_to_string(&args.config)
            .with_context(|| format!("Failed to read config file {}", args.config))?;
        AppConfig::from_toml(&contents)?
    } else {
        AppConfig::default()
    };
    config.apply(args);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.ingest.input, None);
        assert_eq!(config.ingest.speed, 0.0);
        assert!(!config.geo.enabled);
        assert_eq!(config.geo.v6_command, "geoiplookup6");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            [ingest]
            input = "/tmp/capture.tsv"
            speed = 2.5

            [geo]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.input, Some(PathBuf::from("/tmp/capture.tsv")));
        assert_eq!(config.ingest.speed, 2.5);
        assert_eq!(config.ingest.limit, None);
        assert!(config.geo.enabled);
        assert_eq!(config.geo.v4_command, "geoiplookup");
        assert!(config.logging.stderr);
    }

    #[test]
    fn test_bad_file() {
        assert!(AppConfig::from_toml("[ingest]\nspeed = \"fast\"").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ingest]\nspeed = 1.0\nlimit = 10\n").unwrap();

        let args = CliArgs::parse_from([
            "traffic_inspector",
            "--config",
            path.to_str().unwrap(),
            "--speed",
            "4",
            "--geo",
            "input.tsv",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.ingest.speed, 4.0);
        assert_eq!(config.ingest.limit, Some(10));
        assert_eq!(config.ingest.input, Some(PathBuf::from("input.tsv")));
        assert!(config.geo.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let args = CliArgs::parse_from(["traffic_inspector", "--config", "/nonexistent/x.toml"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.ingest.limit, None);
        assert!(!config.export.on_exit);
    }
}
