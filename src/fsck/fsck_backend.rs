/*Interfaz del backend del fsck: cómo se leen el superblock, los inodos,
los directorios y el bitmap, y cómo se escriben las reparaciones.
Permite usar la imagen en memoria (mock) o un FS real detrás. */

use super::fsck_types::*;

pub trait FsckBackend {
    fn load_superblock(&self) -> Superblock;
    fn load_all_inodes(&self) -> Vec<Inode>;
    fn read_inode(&self, ino: u32) -> Option<Inode>;
    fn read_dir(&self, ino: u32) -> Vec<Dirent>;
    fn load_block_bitmap(&self) -> Vec<bool>;

    fn write_superblock(&mut self, sb: &Superblock);
    /// Falla (devuelve `false`) si `ino` no existe.
    fn write_inode(&mut self, ino: u32, inode: &Inode) -> bool;
    fn write_dir(&mut self, ino: u32, entries: &[Dirent]);
    fn write_block_bitmap(&mut self, bitmap: &[bool]);
}
