// src/error.rs
use libc::{EAGAIN, EINVAL, EIO};
use thiserror::Error;

use crate::collab::RecoveryPass;
use crate::error_id::ErrorId;

/// Errores internos del motor de fsck. Nunca se confunden con un veredicto:
/// `Fix`/`Ignore`/`NotFixed` viajan en `Ok`, esto viaja en `Err`.
#[derive(Debug, Error)]
pub enum FsckError {
    #[error("errores de fsck sin corregir")]
    ErrorsNotFixed,
    #[error("el árbol necesita reparación de topología")]
    NeedTopologyRepair,
    #[error("error de validación al leer un nodo")]
    NodeReadValidate,
    #[error("la transacción debe reiniciarse")]
    TransactionRestart,
    #[error("falló el pase de recuperación {pass}: {reason}")]
    RecoveryPass { pass: RecoveryPass, reason: String },
    #[error("no se pudo cambiar el modo del sistema de archivos: {0}")]
    Mode(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FsckError {
    pub fn as_errno(&self) -> i32 {
        match self {
            FsckError::ErrorsNotFixed => EINVAL,
            FsckError::NeedTopologyRepair => EIO,
            FsckError::NodeReadValidate => EIO,
            FsckError::TransactionRestart => EAGAIN,
            FsckError::RecoveryPass { .. } => EIO,
            FsckError::Mode(_) => EIO,
            FsckError::Config(_) => EINVAL,
        }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, FsckError::TransactionRestart)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("opción desconocida: {0}")]
    UnknownOption(String),
    #[error("valor inválido para {option}: {value:?}")]
    InvalidValue { option: String, value: String },
    #[error("id de error duplicado en la tabla de capacidades: {0}")]
    DuplicateErrorId(ErrorId),
    #[error("id de error sin entrada en la tabla de capacidades: {0}")]
    MissingErrorId(ErrorId),
    #[error("no se pudo leer {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("archivo de opciones inválido: {0}")]
    Toml(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsckError::TransactionRestart.as_errno(), EAGAIN);
        assert_eq!(
            FsckError::from(ConfigError::UnknownOption("x".into())).as_errno(),
            EINVAL
        );
        assert!(FsckError::TransactionRestart.is_restart());
        assert!(!FsckError::ErrorsNotFixed.is_restart());
    }
}
