// src/key_err.rs
//
// Errores de validación de una clave almacenada. En lectura se resuelven
// siempre borrando la clave, sin preguntar; en escritura/commit deciden las
// capacidades del tipo de error.

use std::fmt;

use crate::error::FsckError;
use crate::error_id::{ErrorId, FsckFlags};
use crate::fs::Fs;
use crate::fsck_err::Verdict;

/// Dónde se estaba validando la clave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateSource {
    Superblock,
    Journal { seq: u64, offset: u32 },
    TreeRoot,
    TreeNode,
    Commit,
}

impl fmt::Display for ValidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidateSource::Superblock => f.write_str("superblock"),
            ValidateSource::Journal { seq, offset } => {
                write!(f, "journal seq={seq} offset={offset}")
            }
            ValidateSource::TreeRoot => f.write_str("tree_root"),
            ValidateSource::TreeNode => f.write_str("tree_node"),
            ValidateSource::Commit => f.write_str("commit"),
        }
    }
}

/// Árboles de QRFS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeId {
    Inodes,
    Dirents,
    Extents,
    Alloc,
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TreeId::Inodes => "inodes",
            TreeId::Dirents => "dirents",
            TreeId::Extents => "extents",
            TreeId::Alloc => "alloc",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidateFlags(u8);

impl ValidateFlags {
    pub const NONE: Self = Self(0);
    /// Lectura especulativa: no se reporta nada.
    pub const SILENT: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const COMMIT: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidateContext {
    pub source: ValidateSource,
    pub tree: TreeId,
    pub level: u8,
    pub flags: ValidateFlags,
}

impl ValidateContext {
    fn is_read(&self) -> bool {
        !self
            .flags
            .intersects(ValidateFlags::WRITE.union(ValidateFlags::COMMIT))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyVerdict {
    Delete,
    Keep,
}

impl Fs {
    /// Reporta una clave inválida. `key` se muestra con su `Display`.
    pub fn bkey_fsck_err(
        &self,
        key: &dyn fmt::Display,
        ctx: &ValidateContext,
        err: ErrorId,
        reason: &str,
    ) -> Result<KeyVerdict, FsckError> {
        if ctx.flags.contains(ValidateFlags::SILENT) {
            return Ok(KeyVerdict::Delete);
        }

        let mut flags = FsckFlags::NONE;
        if ctx.is_read() {
            if self.silenced.contains(err) {
                return Ok(KeyVerdict::Delete);
            }
            flags |= FsckFlags::AUTOFIX | FsckFlags::CAN_FIX;
        }

        let msg = format!(
            "clave inválida en {} tree={} level={}: {}\n  {}",
            ctx.source, ctx.tree, ctx.level, key, reason
        );

        // una plantilla por tipo de error: se limitan por separado
        match self.fsck_err_action(None, flags, err, err.name(), &msg, "borrar?")? {
            Verdict::Fix => Ok(KeyVerdict::Delete),
            Verdict::Ignore => Ok(KeyVerdict::Keep),
            Verdict::NotFixed => Err(FsckError::ErrorsNotFixed),
        }
    }
}
