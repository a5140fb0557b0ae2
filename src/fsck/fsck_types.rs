/*Estructuras básicas del fsck:
Superblock simplificado
Inode simplificado
Dirent
FsckReport (qué se encontró y qué se reparó) */

use serde::{Deserialize, Serialize};

pub const QRFS_MAGIC: u32 = 0x1234;
pub const QRFS_BLOCK_SIZE: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u32,
    pub num_inodes: u32,
    pub num_blocks: u32,
    pub root_inode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub is_dir: bool,
    pub size: u32,
    #[serde(default)]
    pub direct: Vec<u32>,
    #[serde(default)]
    pub indirect1: Option<u32>,
    #[serde(default)]
    pub indirect2: Option<u32>,
}

impl Inode {
    /// Todos los bloques que referencia: directos y luego indirectos.
    pub fn blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct
            .iter()
            .copied()
            .chain(self.indirect1)
            .chain(self.indirect2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    pub inode: u32,
    pub name: String,
    pub is_dir: bool,
    /// Una entrada no válida es un hueco libre del directorio.
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FsckReport {
    pub blocks_ok: bool,
    pub inodes_ok: bool,
    /// Problemas reportados.
    pub found: usize,
    /// Problemas reparados y escritos.
    pub fixed: usize,
    /// El motor decidió que no se podía seguir.
    pub halted: bool,
    /// Se escribió algo en el backend.
    pub changed: bool,
}

impl FsckReport {
    pub fn new() -> Self {
        Self {
            blocks_ok: true,
            inodes_ok: true,
            ..Self::default()
        }
    }

    /// Código de salida estilo fsck: 0 limpio, 1 todo reparado, 4 quedaron
    /// errores. El 8 (error operativo) lo decide el binario.
    pub fn exit_code(&self) -> i32 {
        if self.found == 0 {
            0
        } else if self.halted || self.fixed < self.found {
            4
        } else {
            1
        }
    }
}
