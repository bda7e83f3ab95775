use faceprint_core::{DescriptorKind, DetectionStrategy, ServiceConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
pub struct Config {
    pub service: ServiceConfig,
    /// Where `Recognize` writes annotated result images.
    pub output_dir: PathBuf,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load the optional TOML file named by `FACEPRINT_CONFIG`, then apply
    /// `FACEPRINT_*` environment overrides.
    ///
    /// Relative directories resolve under `$XDG_DATA_HOME/faceprint`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let toml_source = match std::env::var("FACEPRINT_CONFIG") {
            Ok(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some((path, text))
            }
            Err(_) => None,
        };

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceprint");

        Self::from_sources(
            toml_source.as_ref().map(|(p, t)| (p.as_path(), t.as_str())),
            |key| std::env::var(key).ok(),
            &data_dir,
        )
    }

    fn from_sources(
        toml_source: Option<(&Path, &str)>,
        env: impl Fn(&str) -> Option<String>,
        data_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let mut service = match toml_source {
            Some((path, text)) => toml::from_str::<ServiceConfig>(text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            None => ServiceConfig::default(),
        };

        if let Some(dir) = env("FACEPRINT_IDENTITY_DIR") {
            service.identity_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env("FACEPRINT_MODEL_DIR") {
            service.model_dir = PathBuf::from(dir);
        }
        service.max_dimension = env_parse(&env, "FACEPRINT_MAX_DIMENSION", service.max_dimension);
        service.match_threshold = env_parse(&env, "FACEPRINT_MATCH_THRESHOLD", service.match_threshold);
        service.classifier_threshold =
            env_parse(&env, "FACEPRINT_CLASSIFIER_THRESHOLD", service.classifier_threshold);
        service.default_strategy =
            env_parse::<DetectionStrategy>(&env, "FACEPRINT_DEFAULT_STRATEGY", service.default_strategy);
        service.default_encoder =
            env_parse::<DescriptorKind>(&env, "FACEPRINT_DEFAULT_ENCODER", service.default_encoder);
        service.fallback_enabled = env_flag(&env, "FACEPRINT_FALLBACK_ENABLED", service.fallback_enabled);
        service.enhance_contrast = env_flag(&env, "FACEPRINT_ENHANCE_CONTRAST", service.enhance_contrast);
        service.train_on_demand = env_flag(&env, "FACEPRINT_TRAIN_ON_DEMAND", service.train_on_demand);
        service.training.epochs = env_parse(&env, "FACEPRINT_TRAIN_EPOCHS", service.training.epochs);
        service.training.batch_size = env_parse(&env, "FACEPRINT_TRAIN_BATCH_SIZE", service.training.batch_size);

        service.identity_dir = under(data_dir, service.identity_dir);
        service.model_dir = under(data_dir, service.model_dir);
        let output_dir = under(
            data_dir,
            env("FACEPRINT_OUTPUT_DIR").map_or_else(|| PathBuf::from("results"), PathBuf::from),
        );

        Ok(Self {
            service,
            output_dir,
            system_bus: env_flag(&env, "FACEPRINT_SYSTEM_BUS", false),
        })
    }
}

fn under(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    env(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(toml: Option<&str>, vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_sources(
            toml.map(|t| (Path::new("faceprint.toml"), t)),
            |key| vars.get(key).cloned(),
            Path::new("/data/faceprint"),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_resolve_under_data_dir() {
        let cfg = load(None, &[]);
        assert_eq!(cfg.service.identity_dir, PathBuf::from("/data/faceprint/known_faces"));
        assert_eq!(cfg.service.model_dir, PathBuf::from("/data/faceprint/models"));
        assert_eq!(cfg.output_dir, PathBuf::from("/data/faceprint/results"));
        assert!(!cfg.system_bus);
    }

    #[test]
    fn test_env_overrides_toml() {
        let toml = r#"
            match_threshold = 0.5
            identity_dir = "/srv/faces"

            [training]
            epochs = 3
        "#;
        let cfg = load(
            Some(toml),
            &[
                ("FACEPRINT_MATCH_THRESHOLD", "0.7"),
                ("FACEPRINT_DEFAULT_STRATEGY", "lbp"),
                ("FACEPRINT_SYSTEM_BUS", "1"),
            ],
        );
        assert_eq!(cfg.service.match_threshold, 0.7);
        assert_eq!(cfg.service.identity_dir, PathBuf::from("/srv/faces"));
        assert_eq!(cfg.service.training.epochs, 3);
        assert_eq!(cfg.service.default_strategy, DetectionStrategy::LbpCascade);
        assert!(cfg.system_bus);
    }

    #[test]
    fn test_bad_value_keeps_default() {
        let cfg = load(None, &[("FACEPRINT_MAX_DIMENSION", "huge"), ("FACEPRINT_FALLBACK_ENABLED", "0")]);
        assert_eq!(cfg.service.max_dimension, 1024);
        assert!(!cfg.service.fallback_enabled);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = Config::from_sources(Some((Path::new("x.toml"), "match_threshold = [")), |_| None, Path::new("/d"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
