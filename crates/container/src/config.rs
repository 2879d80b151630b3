//! Декларативная конфигурация правил контейнера.
//!
//! RulesConfig - сериализуемое зеркало Rules: политики строками, лимиты
//! числами. Загружается из TOML или JSON (формат определяется по
//! расширению файла), поддерживает именованные пресеты и override'ы
//! через переменные окружения `DI_*`. Незнакомое значение политики -
//! ошибка конфигурации, а не молчаливый fallback.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{DIError, DIResult};
use crate::reuse::Reuse;
use crate::rules::{DisposableTransientPolicy, MultipleDefaultPolicy, Rules};

/// Сериализуемая конфигурация правил.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    /// "transient" | "singleton" | "scoped"
    pub default_reuse: String,
    /// "error" | "prefer_last_registered"
    pub multiple_default_policy: String,
    /// "warn" | "ignore" | "error"
    pub disposable_transient: String,
    pub compile_threshold: u32,
    pub max_resolution_depth: usize,
    pub verbose_resolution_logging: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            default_reuse: "transient".to_string(),
            multiple_default_policy: "error".to_string(),
            disposable_transient: "warn".to_string(),
            compile_threshold: 1,
            max_resolution_depth: 256,
            verbose_resolution_logging: false,
        }
    }
}

impl RulesConfig {
    /// Именованный пресет: default / production / development / minimal.
    pub fn preset(name: &str) -> DIResult<Self> {
        match name {
            "default" => Ok(Self::default()),
            "production" => Ok(Self {
                disposable_transient: "error".to_string(),
                verbose_resolution_logging: false,
                ..Self::default()
            }),
            "development" => Ok(Self {
                disposable_transient: "warn".to_string(),
                verbose_resolution_logging: true,
                ..Self::default()
            }),
            "minimal" => Ok(Self {
                compile_threshold: 0,
                ..Self::default()
            }),
            other => Err(DIError::configuration(
                format!("unknown rules preset '{other}'"),
                Some("preset"),
            )),
        }
    }

    pub fn from_toml_str(content: &str) -> DIResult<Self> {
        toml::from_str(content).map_err(|error| {
            DIError::configuration(format!("invalid TOML: {error}"), None::<String>)
        })
    }

    pub fn from_json_str(content: &str) -> DIResult<Self> {
        serde_json::from_str(content).map_err(|error| {
            DIError::configuration(format!("invalid JSON: {error}"), None::<String>)
        })
    }

    /// Загрузка из файла с определением формата по расширению.
    pub fn from_file(path: impl AsRef<Path>) -> DIResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| {
            DIError::configuration(
                format!("cannot read {}: {error}", path.display()),
                Some("path"),
            )
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(DIError::configuration(
                format!("unsupported config extension {other:?}, expected toml or json"),
                Some("path"),
            )),
        }
    }

    /// Override'ы из переменных окружения:
    /// DI_DEFAULT_REUSE, DI_MULTIPLE_DEFAULT_POLICY, DI_DISPOSABLE_TRANSIENT,
    /// DI_COMPILE_THRESHOLD.
    pub fn apply_env_overrides(mut self) -> DIResult<Self> {
        if let Ok(value) = std::env::var("DI_DEFAULT_REUSE") {
            debug!(value, "env override DI_DEFAULT_REUSE");
            self.default_reuse = value;
        }
        if let Ok(value) = std::env::var("DI_MULTIPLE_DEFAULT_POLICY") {
            debug!(value, "env override DI_MULTIPLE_DEFAULT_POLICY");
            self.multiple_default_policy = value;
        }
        if let Ok(value) = std::env::var("DI_DISPOSABLE_TRANSIENT") {
            debug!(value, "env override DI_DISPOSABLE_TRANSIENT");
            self.disposable_transient = value;
        }
        if let Ok(value) = std::env::var("DI_COMPILE_THRESHOLD") {
            self.compile_threshold = value.parse().map_err(|_| {
                DIError::configuration(
                    format!("DI_COMPILE_THRESHOLD must be a number, got '{value}'"),
                    Some("compile_threshold"),
                )
            })?;
        }
        Ok(self)
    }

    /// Конвертация в неизменяемые Rules; незнакомые политики - ошибка.
    pub fn into_rules(self) -> DIResult<Rules> {
        let default_reuse = match self.default_reuse.as_str() {
            "transient" => Reuse::Transient,
            "singleton" => Reuse::Singleton,
            "scoped" => Reuse::Scoped,
            other => {
                return Err(DIError::configuration(
                    format!("unknown default_reuse '{other}'"),
                    Some("default_reuse"),
                ));
            }
        };

        let multiple_default_policy = match self.multiple_default_policy.as_str() {
            "error" => MultipleDefaultPolicy::Error,
            "prefer_last_registered" => MultipleDefaultPolicy::PreferLastRegistered,
            other => {
                return Err(DIError::configuration(
                    format!("unknown multiple_default_policy '{other}'"),
                    Some("multiple_default_policy"),
                ));
            }
        };

        let disposable_transient = match self.disposable_transient.as_str() {
            "warn" => DisposableTransientPolicy::Warn,
            "ignore" => DisposableTransientPolicy::Ignore,
            "error" => DisposableTransientPolicy::Error,
            other => {
                return Err(DIError::configuration(
                    format!("unknown disposable_transient '{other}'"),
                    Some("disposable_transient"),
                ));
            }
        };

        Ok(Rules {
            default_reuse,
            multiple_default_policy,
            disposable_transient,
            unknown_service: Vec::new(),
            compile_threshold: self.compile_threshold,
            max_resolution_depth: self.max_resolution_depth,
            verbose_resolution_logging: self.verbose_resolution_logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let rules = RulesConfig::default().into_rules().expect("valid default");
        assert_eq!(rules.default_reuse, Reuse::Transient);
        assert_eq!(rules.multiple_default_policy, MultipleDefaultPolicy::Error);
    }

    #[test]
    fn test_toml_parsing() {
        let config = RulesConfig::from_toml_str(
            r#"
                default_reuse = "singleton"
                multiple_default_policy = "prefer_last_registered"
                compile_threshold = 4
            "#,
        )
        .expect("parse");
        assert_eq!(config.default_reuse, "singleton");
        assert_eq!(config.compile_threshold, 4);

        let rules = config.into_rules().expect("convert");
        assert_eq!(rules.default_reuse, Reuse::Singleton);
        assert_eq!(
            rules.multiple_default_policy,
            MultipleDefaultPolicy::PreferLastRegistered
        );
    }

    #[test]
    fn test_json_parsing() {
        let config =
            RulesConfig::from_json_str(r#"{"disposable_transient": "error"}"#).expect("parse");
        let rules = config.into_rules().expect("convert");
        assert_eq!(
            rules.disposable_transient,
            DisposableTransientPolicy::Error
        );
    }

    #[test]
    fn test_unknown_policy_is_configuration_error() {
        let config = RulesConfig {
            multiple_default_policy: "newest_wins".to_string(),
            ..RulesConfig::default()
        };
        let error = config.into_rules().expect_err("unknown policy");
        assert_eq!(error.category(), "configuration");
    }

    #[test]
    fn test_presets() {
        assert_eq!(
            RulesConfig::preset("production")
                .expect("preset")
                .disposable_transient,
            "error"
        );
        assert!(RulesConfig::preset("fastest").is_err());
    }
}
