/* Interfaces con los colaboradores externos del motor: transacciones,
salida de texto, entrada de líneas, bitmap de errores silenciados, modo del
FS, pases de recuperación y journal. Incluye implementaciones simples que
usan el binario y las pruebas. */

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::error::FsckError;
use crate::error_id::ErrorId;

// -----------------------------------------------------------------------------
// Transacciones
// -----------------------------------------------------------------------------

/// Inodo dentro de un subvolumen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubvolInum {
    pub subvol: u32,
    pub inum: u64,
}

/// Lo que el prompter necesita de quien tiene locks tomados.
pub trait Lockable {
    /// Suelta los locks antes de bloquearse esperando al operador.
    fn unlock(&self);
    /// Suelta además todo lo que la transacción retiene a largo plazo.
    fn unlock_long(&self);
}

/// Transacción activa del llamador.
pub trait Transaction {
    fn unlock(&self);
    fn unlock_long(&self);
    /// Revalida la transacción; falla con `TransactionRestart` si algo
    /// cambió mientras estuvo suelta.
    fn relock(&self) -> Result<(), FsckError>;
    /// Contador monótono de reinicios.
    fn restart_count(&self) -> u64;

    /// Ruta de un inodo, si la transacción sabe resolverla.
    fn inum_to_path(&self, _inum: SubvolInum) -> Result<Option<String>, FsckError> {
        Ok(None)
    }
}

// -----------------------------------------------------------------------------
// Salida y entrada
// -----------------------------------------------------------------------------

pub trait Output: Send + Sync {
    fn append(&self, text: &str);
}

/// Escribe en stdout (o stderr) tal cual.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput {
    pub stderr: bool,
}

impl Output for ConsoleOutput {
    fn append(&self, text: &str) {
        // si la terminal se fue no hay a quién avisar
        let _ = if self.stderr {
            let mut err = io::stderr().lock();
            err.write_all(text.as_bytes()).and_then(|_| err.flush())
        } else {
            let mut out = io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|_| out.flush())
        };
    }
}

/// Acumula todo en memoria; se clona para leer lo escrito.
#[derive(Debug, Default, Clone)]
pub struct BufferOutput(Arc<Mutex<String>>);

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.0.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().lines().map(str::to_owned).collect()
    }

    /// Cuántas veces aparece `needle` en lo escrito.
    pub fn count(&self, needle: &str) -> usize {
        self.0.lock().matches(needle).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Output for BufferOutput {
    fn append(&self, text: &str) {
        self.0.lock().push_str(text);
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadLineError {
    #[error("tiempo de espera agotado")]
    Timeout,
    #[error("entrada cerrada")]
    Closed,
}

/// Fuente de líneas del operador. `timeout == None` espera sin límite.
pub trait LineInput: Send + Sync {
    fn read_line(&self, timeout: Option<Duration>) -> Result<String, ReadLineError>;
}

// -----------------------------------------------------------------------------
// Errores silenciados (bitmap del superblock)
// -----------------------------------------------------------------------------

pub trait SilencedErrors: Send + Sync {
    fn contains(&self, id: ErrorId) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoSilenced;

impl SilencedErrors for NoSilenced {
    fn contains(&self, _id: ErrorId) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone)]
pub struct SilencedSet(HashSet<ErrorId>);

impl SilencedSet {
    pub fn new(ids: impl IntoIterator<Item = ErrorId>) -> Self {
        Self(ids.into_iter().collect())
    }
}

impl SilencedErrors for SilencedSet {
    fn contains(&self, id: ErrorId) -> bool {
        self.0.contains(&id)
    }
}

// -----------------------------------------------------------------------------
// Modo del FS y dispositivos
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoErrorType {
    Read,
    Write,
    Checksum,
}

impl IoErrorType {
    pub const COUNT: usize = 3;

    pub const fn index(self) -> usize {
        self as usize
    }
}

pub trait FsMode: Send + Sync {
    /// Pasa todo el FS a solo lectura.
    fn set_read_only(&self) -> Result<(), FsckError>;
    /// ¿Se puede poner sólo este dispositivo en RO sin degradar el FS?
    fn device_can_go_ro(&self, dev: DeviceId) -> bool;
    fn downgrade_device(&self, dev: DeviceId) -> Result<(), FsckError>;
}

/// Modo del FS en memoria: registra las transiciones pedidas.
#[derive(Debug, Default)]
pub struct MemoryFsMode {
    read_only_calls: AtomicUsize,
    fail_read_only: bool,
    degradable: Mutex<HashSet<DeviceId>>,
    ro_devices: Mutex<Vec<DeviceId>>,
}

impl MemoryFsMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hace que `set_read_only` falle (el motor igual lo trata como fatal).
    pub fn failing() -> Self {
        Self {
            fail_read_only: true,
            ..Self::default()
        }
    }

    pub fn allow_device_ro(&self, dev: DeviceId) {
        self.degradable.lock().insert(dev);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only_calls.load(Ordering::Acquire) > 0 && !self.fail_read_only
    }

    pub fn read_only_calls(&self) -> usize {
        self.read_only_calls.load(Ordering::Acquire)
    }

    pub fn ro_devices(&self) -> Vec<DeviceId> {
        self.ro_devices.lock().clone()
    }
}

impl FsMode for MemoryFsMode {
    fn set_read_only(&self) -> Result<(), FsckError> {
        self.read_only_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_read_only {
            return Err(FsckError::Mode("no se pudo pasar a solo lectura".into()));
        }
        Ok(())
    }

    fn device_can_go_ro(&self, dev: DeviceId) -> bool {
        self.degradable.lock().contains(&dev)
    }

    fn downgrade_device(&self, dev: DeviceId) -> Result<(), FsckError> {
        if !self.device_can_go_ro(dev) {
            return Err(FsckError::Mode(format!("{dev} no se puede degradar")));
        }
        self.ro_devices.lock().push(dev);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Pases de recuperación y journal
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecoveryPass {
    CheckTopology,
    CheckInodes,
    CheckDirents,
    CheckAllocations,
}

impl fmt::Display for RecoveryPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryPass::CheckTopology => "check_topology",
            RecoveryPass::CheckInodes => "check_inodes",
            RecoveryPass::CheckDirents => "check_dirents",
            RecoveryPass::CheckAllocations => "check_allocations",
        })
    }
}

pub trait RecoveryPasses: Send + Sync {
    /// Pide que `pass` se (re)ejecute.
    fn run_explicit(&self, pass: RecoveryPass) -> Result<(), FsckError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecovery;

impl RecoveryPasses for NoRecovery {
    fn run_explicit(&self, pass: RecoveryPass) -> Result<(), FsckError> {
        Err(FsckError::RecoveryPass {
            pass,
            reason: "no hay pases de recuperación disponibles".into(),
        })
    }
}

pub trait Journal: Send + Sync {
    fn cur_seq(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_output_is_shared_between_clones() {
        let out = BufferOutput::new();
        let writer = out.clone();
        writer.append("uno\n");
        writer.append("dos uno\n");
        assert_eq!(out.lines(), vec!["uno", "dos uno"]);
        assert_eq!(out.count("uno"), 2);
        out.clear();
        assert!(writer.contents().is_empty());
    }

    #[test]
    fn memory_mode_tracks_transitions() {
        let mode = MemoryFsMode::new();
        assert!(!mode.is_read_only());
        mode.set_read_only().unwrap();
        assert!(mode.is_read_only());

        assert!(mode.downgrade_device(DeviceId(1)).is_err());
        mode.allow_device_ro(DeviceId(1));
        mode.downgrade_device(DeviceId(1)).unwrap();
        assert_eq!(mode.ro_devices(), vec![DeviceId(1)]);

        let failing = MemoryFsMode::failing();
        assert!(failing.set_read_only().is_err());
        assert!(!failing.is_read_only());
        assert_eq!(failing.read_only_calls(), 1);
    }

    #[test]
    fn silenced_set() {
        let set = SilencedSet::new([ErrorId::InodeOrphan]);
        assert!(set.contains(ErrorId::InodeOrphan));
        assert!(!set.contains(ErrorId::KeyInvalid));
        assert!(!NoSilenced.contains(ErrorId::InodeOrphan));
    }
}
