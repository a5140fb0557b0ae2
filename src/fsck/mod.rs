/* Chequeo de una imagen QRFS. Cada problema que encuentra un pase se
reporta al motor de errores del `Fs`, que decide si se repara. */

pub mod fsck;
pub mod fsck_backend;
pub mod fsck_types;
pub mod mock;

pub use fsck::run_fsck;
pub use fsck_backend::FsckBackend;
pub use fsck_types::{Dirent, FsckReport, Inode, Superblock, QRFS_BLOCK_SIZE, QRFS_MAGIC};
pub use mock::MockBackend;
