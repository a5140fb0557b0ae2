/*Imagen QRFS en memoria. Es el backend que usa fsck.qrfs: se carga y se
guarda como JSON, y las reparaciones se aplican sobre la copia en memoria. */

use serde::{Deserialize, Serialize};

use super::{fsck_backend::FsckBackend, fsck_types::*};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockBackend {
    pub superblock: Superblock,
    pub inodes: Vec<Inode>,
    /// Entradas de cada directorio, indexadas por número de inodo.
    #[serde(default)]
    pub dirs: Vec<Vec<Dirent>>,
    pub bitmap: Vec<bool>, // true = usado, false = libre
}

impl MockBackend {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Imagen chica con algunos errores para mostrar el fsck.
    pub fn demo() -> Self {
        let file = |blk| Inode {
            is_dir: false,
            size: 5,
            direct: vec![blk],
            indirect1: None,
            indirect2: None,
        };

        Self {
            superblock: Superblock {
                magic: QRFS_MAGIC,
                num_inodes: 3,
                num_blocks: 10,
                root_inode: 0,
            },
            inodes: vec![
                Inode {
                    is_dir: true,
                    size: 0,
                    direct: vec![],
                    indirect1: None,
                    indirect2: None,
                },
                file(1),
                // nadie lo referencia
                file(2),
            ],
            dirs: vec![vec![
                Dirent { name: ".".into(), inode: 0, is_dir: true, valid: true },
                Dirent { name: "..".into(), inode: 0, is_dir: true, valid: true },
                // tipo incorrecto
                Dirent { name: "file".into(), inode: 1, is_dir: true, valid: true },
            ]],
            bitmap: vec![
                false, // 0 libre
                true,  // 1 usado por inode 1
                true,  // 2 usado por inode 2
                true,  // 3 marcado usado sin dueño
                false, false, false, false, false, false,
            ],
        }
    }
}

impl FsckBackend for MockBackend {
    fn load_superblock(&self) -> Superblock {
        self.superblock.clone()
    }

    fn read_inode(&self, ino: u32) -> Option<Inode> {
        self.inodes.get(ino as usize).cloned()
    }

    fn read_dir(&self, ino: u32) -> Vec<Dirent> {
        self.dirs.get(ino as usize).cloned().unwrap_or_default()
    }

    fn load_all_inodes(&self) -> Vec<Inode> {
        self.inodes.clone()
    }

    fn load_block_bitmap(&self) -> Vec<bool> {
        self.bitmap.clone()
    }

    fn write_superblock(&mut self, sb: &Superblock) {
        self.superblock = sb.clone();
    }

    fn write_inode(&mut self, ino: u32, inode: &Inode) -> bool {
        match self.inodes.get_mut(ino as usize) {
            Some(slot) => {
                *slot = inode.clone();
                true
            }
            None => false,
        }
    }

    fn write_dir(&mut self, ino: u32, entries: &[Dirent]) {
        let idx = ino as usize;
        if self.dirs.len() <= idx {
            self.dirs.resize(idx + 1, Vec::new());
        }
        self.dirs[idx] = entries.to_vec();
    }

    fn write_block_bitmap(&mut self, bitmap: &[bool]) {
        self.bitmap = bitmap.to_vec();
    }
}
