/* Identificadores estables de cada categoría de inconsistencia y la tabla
estática de capacidades (qué se puede reparar, qué se puede ignorar, qué se
repara solo). La tabla se arma una vez al arrancar y no se modifica. */

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tracing::warn;

use crate::error::ConfigError;

/// Conjunto de capacidades de un tipo de error.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FsckFlags(u8);

impl FsckFlags {
    pub const NONE: Self = Self(0);
    pub const CAN_FIX: Self = Self(1 << 0);
    pub const CAN_IGNORE: Self = Self(1 << 1);
    pub const AUTOFIX: Self = Self(1 << 2);
    pub const NO_RATELIMIT: Self = Self(1 << 3);

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

impl BitOr for FsckFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for FsckFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for FsckFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FsckFlags, &str); 4] = [
            (FsckFlags::CAN_FIX, "CAN_FIX"),
            (FsckFlags::CAN_IGNORE, "CAN_IGNORE"),
            (FsckFlags::AUTOFIX, "AUTOFIX"),
            (FsckFlags::NO_RATELIMIT, "NO_RATELIMIT"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("FsckFlags(NONE)")
        } else {
            write!(f, "FsckFlags({})", set.join(" | "))
        }
    }
}

macro_rules! qrfs_errors {
    ($( $variant:ident = $code:literal, $name:literal, $flags:expr; )*) => {
        /// Una categoría de inconsistencia. El código numérico es estable.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ErrorId {
            $( $variant, )*
        }

        impl ErrorId {
            pub const ALL: &'static [ErrorId] = &[ $( ErrorId::$variant, )* ];

            pub const fn code(self) -> u16 {
                match self {
                    $( ErrorId::$variant => $code, )*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $( ErrorId::$variant => $name, )*
                }
            }

            pub fn from_code(code: u16) -> Option<ErrorId> {
                Self::ALL.iter().copied().find(|id| id.code() == code)
            }
        }

        const BUILTIN_FLAGS: &[(ErrorId, FsckFlags)] = &[
            $( (ErrorId::$variant, $flags), )*
        ];
    };
}

const FIX: FsckFlags = FsckFlags::CAN_FIX;
const IGNORE: FsckFlags = FsckFlags::CAN_IGNORE;
const AUTOFIX: FsckFlags = FsckFlags::AUTOFIX;
const NO_RATELIMIT: FsckFlags = FsckFlags::NO_RATELIMIT;
const NONE: FsckFlags = FsckFlags::NONE;

qrfs_errors! {
    SbBadMagic              = 0,  "sb_bad_magic",               FIX;
    SbInodeCountWrong       = 1,  "sb_inode_count_wrong",       FIX;
    SbBlockCountWrong       = 2,  "sb_block_count_wrong",       FIX;
    SbRootInodeOutOfRange   = 3,  "sb_root_inode_out_of_range", NONE;
    SbZeroBlocks            = 4,  "sb_zero_blocks",             NONE;
    SbZeroInodes            = 5,  "sb_zero_inodes",             NONE;
    InodeSizeInvalid        = 6,  "inode_size_invalid",         FIX;
    InodeBlockOutOfRange    = 7,  "inode_block_out_of_range",   FIX;
    InodeIndirectOutOfRange = 8,  "inode_indirect_out_of_range", FIX;
    InodeBlockDuplicate     = 9,  "inode_block_duplicate",      FIX;
    BlockMultiplyClaimed    = 10, "block_multiply_claimed",     FIX;
    RootNotDirectory        = 11, "root_not_directory",         NONE;
    DirentEmptyName         = 12, "dirent_empty_name",          FIX;
    DirentDangling          = 13, "dirent_dangling",            FIX;
    DirentTypeWrong         = 14, "dirent_type_wrong",          FIX.union(AUTOFIX);
    BitmapWrongSize         = 15, "bitmap_wrong_size",          FIX;
    BitmapBlockMarkedUsed   = 16, "bitmap_block_marked_used",   FIX.union(IGNORE);
    BitmapBlockMarkedFree   = 17, "bitmap_block_marked_free",   FIX;
    InodeOrphan             = 18, "inode_orphan",               FIX.union(IGNORE);
    KeyInvalid              = 19, "key_invalid",                NONE;
    KeyValTooBig            = 20, "key_val_too_big",            NONE;
    JournalEntryBad         = 21, "journal_entry_bad",          NO_RATELIMIT;
    NodeTopologyBad         = 22, "node_topology_bad",          NONE;
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tabla inmutable ErrorId -> capacidades.
#[derive(Debug, Clone)]
pub struct ErrorTable {
    flags: HashMap<ErrorId, FsckFlags>,
}

impl ErrorTable {
    /// Arma la tabla a partir de una lista declarativa de pares (id, flags).
    /// Un id repetido es un error de configuración.
    pub fn from_entries(entries: &[(ErrorId, FsckFlags)]) -> Result<Self, ConfigError> {
        let mut flags = HashMap::with_capacity(entries.len());
        for &(id, f) in entries {
            if flags.insert(id, f).is_some() {
                return Err(ConfigError::DuplicateErrorId(id));
            }
        }
        Ok(Self { flags })
    }

    /// La tabla que trae QRFS, con una entrada por cada `ErrorId`.
    pub fn builtin() -> Self {
        Self {
            flags: BUILTIN_FLAGS.iter().copied().collect(),
        }
    }

    /// Verifica que todos los ids usados por un llamador tengan entrada.
    pub fn require(&self, ids: &[ErrorId]) -> Result<(), ConfigError> {
        match ids.iter().find(|id| !self.flags.contains_key(id)) {
            Some(&missing) => Err(ConfigError::MissingErrorId(missing)),
            None => Ok(()),
        }
    }

    pub fn get(&self, id: ErrorId) -> Option<FsckFlags> {
        self.flags.get(&id).copied()
    }

    /// Capacidades de `id`; un id sin entrada se trata como "sin capacidades".
    pub fn flags(&self, id: ErrorId) -> FsckFlags {
        match self.get(id) {
            Some(f) => f,
            None => {
                warn!(error = %id, "id de error sin entrada en la tabla de capacidades");
                FsckFlags::NONE
            }
        }
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_id() {
        let table = ErrorTable::builtin();
        assert!(table.require(ErrorId::ALL).is_ok());
        assert_eq!(
            table.get(ErrorId::DirentTypeWrong),
            Some(FsckFlags::CAN_FIX | FsckFlags::AUTOFIX)
        );
    }

    #[test]
    fn codes_are_unique_and_round_trip() {
        for &id in ErrorId::ALL {
            assert_eq!(ErrorId::from_code(id.code()), Some(id));
        }
        assert_eq!(ErrorId::from_code(9999), None);
    }

    #[test]
    fn duplicate_entry_is_rejected() {
        let err = ErrorTable::from_entries(&[
            (ErrorId::KeyInvalid, FsckFlags::NONE),
            (ErrorId::KeyInvalid, FsckFlags::CAN_FIX),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateErrorId(ErrorId::KeyInvalid));
    }

    #[test]
    fn missing_entry_is_reported_and_looks_up_as_none() {
        let table = ErrorTable::from_entries(&[(ErrorId::KeyInvalid, FsckFlags::NONE)]).unwrap();
        assert_eq!(
            table.require(&[ErrorId::KeyInvalid, ErrorId::InodeOrphan]),
            Err(ConfigError::MissingErrorId(ErrorId::InodeOrphan))
        );
        assert_eq!(table.flags(ErrorId::InodeOrphan), FsckFlags::NONE);
    }

    #[test]
    fn flag_set_operations() {
        let f = FsckFlags::CAN_FIX | FsckFlags::AUTOFIX;
        assert!(f.contains(FsckFlags::CAN_FIX));
        assert!(!f.contains(FsckFlags::CAN_FIX | FsckFlags::CAN_IGNORE));
        assert!(f.intersects(FsckFlags::CAN_FIX | FsckFlags::CAN_IGNORE));
        assert_eq!(format!("{:?}", f), "FsckFlags(CAN_FIX | AUTOFIX)");
        assert_eq!(format!("{:?}", FsckFlags::NONE), "FsckFlags(NONE)");
    }
}
