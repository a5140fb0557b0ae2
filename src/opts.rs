// src/opts.rs
//
// Política global por instancia: qué hacer ante una inconsistencia y cómo
// resolver los errores reparables. Se lee en cada reporte; sólo la cambia
// una acción administrativa (montaje, CLI, archivo de opciones).

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Límite por defecto de errores de E/S antes de degradar un dispositivo.
pub const DEFAULT_IO_ERROR_LIMIT: u64 = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Continue,
    #[default]
    FixSafe,
    #[serde(rename = "ro")]
    ReadOnly,
    Panic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixErrors {
    #[default]
    Exit,
    Ask,
    Yes,
    No,
}

impl FromStr for OnError {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "continue" => Ok(OnError::Continue),
            "fix_safe" => Ok(OnError::FixSafe),
            "ro" | "read_only" => Ok(OnError::ReadOnly),
            "panic" => Ok(OnError::Panic),
            other => Err(ConfigError::InvalidValue {
                option: "errors".into(),
                value: other.into(),
            }),
        }
    }
}

impl FromStr for FixErrors {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "exit" => Ok(FixErrors::Exit),
            "ask" => Ok(FixErrors::Ask),
            "yes" | "y" => Ok(FixErrors::Yes),
            "no" | "n" => Ok(FixErrors::No),
            other => Err(ConfigError::InvalidValue {
                option: "fix_errors".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnError::Continue => "continue",
            OnError::FixSafe => "fix_safe",
            OnError::ReadOnly => "ro",
            OnError::Panic => "panic",
        })
    }
}

impl fmt::Display for FixErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FixErrors::Exit => "exit",
            FixErrors::Ask => "ask",
            FixErrors::Yes => "yes",
            FixErrors::No => "no",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsckOptions {
    pub errors: OnError,
    pub fix_errors: FixErrors,
    pub ratelimit_errors: bool,
    /// Corrida en seco: no se escribe nada.
    pub nochanges: bool,
    pub io_error_limit: u64,
}

impl Default for FsckOptions {
    fn default() -> Self {
        Self {
            errors: OnError::default(),
            fix_errors: FixErrors::default(),
            ratelimit_errors: true,
            nochanges: false,
            io_error_limit: DEFAULT_IO_ERROR_LIMIT,
        }
    }
}

impl FsckOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Carga las opciones desde un archivo TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let opts = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), ?opts, "opciones de fsck cargadas");
        Ok(opts)
    }

    /// Aplica una cadena estilo opciones de montaje:
    /// `errors=ro,fix_errors=ask,noratelimit_errors,nochanges,io_error_limit=4`
    pub fn apply_mount_opts(&mut self, s: &str) -> Result<(), ConfigError> {
        for opt in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = match opt.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (opt, None),
            };

            match (key, value) {
                ("errors", Some(v)) => self.errors = v.parse()?,
                ("fix_errors", Some(v)) => self.fix_errors = v.parse()?,
                ("ratelimit_errors", None) => self.ratelimit_errors = true,
                ("noratelimit_errors", None) => self.ratelimit_errors = false,
                ("ratelimit_errors", Some(v)) => self.ratelimit_errors = parse_bool(key, v)?,
                ("nochanges", None) => self.nochanges = true,
                ("nochanges", Some(v)) => self.nochanges = parse_bool(key, v)?,
                ("io_error_limit", Some(v)) => {
                    self.io_error_limit = v.parse().map_err(|_| ConfigError::InvalidValue {
                        option: key.into(),
                        value: v.into(),
                    })?
                }
                ("errors" | "fix_errors" | "io_error_limit", None) => {
                    return Err(ConfigError::InvalidValue {
                        option: key.into(),
                        value: String::new(),
                    })
                }
                _ => return Err(ConfigError::UnknownOption(key.into())),
            }
        }
        Ok(())
    }
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            option: option.into(),
            value: value.into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = FsckOptions::default();
        assert_eq!(o.errors, OnError::FixSafe);
        assert_eq!(o.fix_errors, FixErrors::Exit);
        assert!(o.ratelimit_errors);
        assert!(!o.nochanges);
    }

    #[test]
    fn mount_opts_are_applied_in_order() {
        let mut o = FsckOptions::default();
        o.apply_mount_opts("errors=ro, fix_errors=ask,noratelimit_errors,nochanges,io_error_limit=3")
            .unwrap();
        assert_eq!(o.errors, OnError::ReadOnly);
        assert_eq!(o.fix_errors, FixErrors::Ask);
        assert!(!o.ratelimit_errors);
        assert!(o.nochanges);
        assert_eq!(o.io_error_limit, 3);

        o.apply_mount_opts("ratelimit_errors=on,nochanges=0").unwrap();
        assert!(o.ratelimit_errors);
        assert!(!o.nochanges);
    }

    #[test]
    fn bad_mount_opts() {
        let mut o = FsckOptions::default();
        assert_eq!(
            o.apply_mount_opts("bogus"),
            Err(ConfigError::UnknownOption("bogus".into()))
        );
        assert!(matches!(
            o.apply_mount_opts("errors=maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            o.apply_mount_opts("fix_errors"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn toml_options() {
        let o = FsckOptions::from_toml_str(
            r#"
errors = "continue"
fix_errors = "yes"
ratelimit_errors = false
"#,
        )
        .unwrap();
        assert_eq!(o.errors, OnError::Continue);
        assert_eq!(o.fix_errors, FixErrors::Yes);
        assert!(!o.ratelimit_errors);
        assert_eq!(o.io_error_limit, DEFAULT_IO_ERROR_LIMIT);

        assert!(matches!(
            FsckOptions::from_toml_str("errors = \"sometimes\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            FsckOptions::from_toml_str("unknown_key = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsck.toml");
        std::fs::write(&path, "errors = \"panic\"\n").unwrap();
        assert_eq!(FsckOptions::load(&path).unwrap().errors, OnError::Panic);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            FsckOptions::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
