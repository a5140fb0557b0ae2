use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use crate::collab::{
    ConsoleOutput, DeviceId, FsMode, IoErrorType, Journal, LineInput, MemoryFsMode, NoRecovery,
    NoSilenced, Output, RecoveryPasses, SilencedErrors,
};
use crate::error::ConfigError;
use crate::error_id::{ErrorId, ErrorTable};
use crate::flags::{FsFlag, FsFlags};
use crate::opts::FsckOptions;
use crate::prompt::{ConsolePrompter, Prompter, RedirectPrompter, PROMPT_UNLOCK_LONG_AFTER};
use crate::registry::Registry;

// -----------------------------------------------------------------------------
// Dispositivos
// -----------------------------------------------------------------------------

/// Un miembro del FS con sus contadores de errores de E/S.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    name: String,
    errors: [AtomicU64; IoErrorType::COUNT],
    pub(crate) work_queued: AtomicBool,
    pub(crate) read_only: AtomicBool,
}

impl Device {
    fn new(id: DeviceId, name: String) -> Self {
        Self {
            id,
            name,
            errors: Default::default(),
            work_queued: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn errors(&self, ty: IoErrorType) -> u64 {
        self.errors[ty.index()].load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.iter().map(|e| e.load(Ordering::Relaxed)).sum()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub(crate) fn count_error(&self, ty: IoErrorType) -> u64 {
        self.errors[ty.index()].fetch_add(1, Ordering::Relaxed);
        self.total_errors()
    }
}

// -----------------------------------------------------------------------------
// Contadores por tipo de error (los que se persisten en el superblock)
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCount {
    pub nr: u64,
    pub last: SystemTime,
}

// -----------------------------------------------------------------------------
// Trabajo asíncrono de errores de E/S
// -----------------------------------------------------------------------------

pub(crate) enum IoJob {
    Downgrade(DeviceId),
    Barrier(mpsc::Sender<()>),
}

fn spawn_io_worker(fs: Weak<Fs>, rx: mpsc::Receiver<IoJob>) {
    let spawned = thread::Builder::new()
        .name("qrfs-io-error".into())
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    IoJob::Downgrade(dev) => {
                        let Some(fs) = fs.upgrade() else { break };
                        fs.io_error_work(dev);
                    }
                    IoJob::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

    if let Err(e) = spawned {
        // sin hilo el trabajo se hace en el llamador (ver `Fs::io_error`)
        warn!("no se pudo lanzar el hilo de errores de E/S: {e}");
    }
}

// -----------------------------------------------------------------------------
// Instancia del sistema de archivos
// -----------------------------------------------------------------------------

/// Estado de errores de una instancia de QRFS. Todo lo que el motor muta
/// vive acá, nunca en globales.
pub struct Fs {
    pub(crate) name: String,
    pub(crate) opts: RwLock<FsckOptions>,
    pub(crate) flags: FsFlags,
    pub(crate) table: ErrorTable,
    pub(crate) registry: Mutex<Registry>,
    /// Serializa las preguntas al operador; nunca se toma con `registry`.
    pub(crate) prompt_lock: Mutex<()>,
    pub(crate) prompter: Box<dyn Prompter>,
    pub(crate) output: Arc<dyn Output>,
    pub(crate) silenced: Arc<dyn SilencedErrors>,
    pub(crate) mode: Arc<dyn FsMode>,
    pub(crate) recovery: Arc<dyn RecoveryPasses>,
    pub(crate) journal: Option<Arc<dyn Journal>>,
    /// Lock exclusivo de estado (RW/RO, dispositivos).
    pub(crate) state_lock: RwLock<()>,
    pub(crate) devices: Vec<Arc<Device>>,
    pub(crate) counters: Mutex<HashMap<ErrorId, ErrorCount>>,
    pub(crate) io_tx: mpsc::Sender<IoJob>,
    pub(crate) panic_hook: Box<dyn Fn(&str) + Send + Sync>,
}

impl Fs {
    pub fn builder(name: impl Into<String>) -> FsBuilder {
        FsBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opts(&self) -> FsckOptions {
        *self.opts.read()
    }

    /// Cambio administrativo de opciones.
    pub fn set_opts(&self, opts: FsckOptions) {
        *self.opts.write() = opts;
    }

    pub fn flags(&self) -> &FsFlags {
        &self.flags
    }

    pub fn device(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Apariciones por tipo de error desde que se montó, ordenadas por código.
    pub fn error_counts(&self) -> Vec<(ErrorId, ErrorCount)> {
        let mut counts: Vec<_> = self.counters.lock().iter().map(|(k, v)| (*k, *v)).collect();
        counts.sort_by_key(|(id, _)| id.code());
        counts
    }

    pub(crate) fn count_error(&self, id: ErrorId) {
        let now = SystemTime::now();
        self.counters
            .lock()
            .entry(id)
            .and_modify(|c| {
                c.nr += 1;
                c.last = now;
            })
            .or_insert(ErrorCount { nr: 1, last: now });
    }

    /// Marca el inicio de una corrida de fsck. Al soltar el guard se apaga
    /// la bandera y se vacía el registro de errores.
    pub fn begin_fsck(&self) -> FsckRun<'_> {
        self.flags.set(FsFlag::FsckRunning);
        FsckRun { fs: self }
    }

    pub fn begin_recovery(&self) -> RecoveryRun<'_> {
        self.flags.set(FsFlag::RecoveryRunning);
        RecoveryRun { fs: self }
    }

    /// Espera a que el hilo de errores de E/S termine lo que tiene encolado.
    pub fn flush_io_errors(&self) {
        let (tx, rx) = mpsc::channel();
        if self.io_tx.send(IoJob::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

pub struct FsckRun<'a> {
    fs: &'a Fs,
}

impl Drop for FsckRun<'_> {
    fn drop(&mut self) {
        self.fs.flags.clear(FsFlag::FsckRunning);
        self.fs.flush_fsck_errs();
    }
}

pub struct RecoveryRun<'a> {
    fs: &'a Fs,
}

impl Drop for RecoveryRun<'_> {
    fn drop(&mut self) {
        self.fs.flags.clear(FsFlag::RecoveryRunning);
    }
}

// -----------------------------------------------------------------------------
// Construcción
// -----------------------------------------------------------------------------

pub struct FsBuilder {
    name: String,
    opts: FsckOptions,
    table: ErrorTable,
    prompter: Option<Box<dyn Prompter>>,
    prompt_input: Option<Arc<dyn LineInput>>,
    prompt_grace: Duration,
    output: Arc<dyn Output>,
    silenced: Arc<dyn SilencedErrors>,
    mode: Arc<dyn FsMode>,
    recovery: Arc<dyn RecoveryPasses>,
    journal: Option<Arc<dyn Journal>>,
    devices: Vec<(DeviceId, String)>,
    panic_hook: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl FsBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: FsckOptions::default(),
            table: ErrorTable::builtin(),
            prompter: None,
            prompt_input: None,
            prompt_grace: PROMPT_UNLOCK_LONG_AFTER,
            output: Arc::new(ConsoleOutput::default()),
            silenced: Arc::new(NoSilenced),
            mode: Arc::new(MemoryFsMode::new()),
            recovery: Arc::new(NoRecovery),
            journal: None,
            devices: Vec::new(),
            panic_hook: None,
        }
    }

    pub fn opts(mut self, opts: FsckOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn error_table(mut self, table: ErrorTable) -> Self {
        self.table = table;
        self
    }

    /// Prompter propio; tiene prioridad sobre `stdio`.
    pub fn prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Pregunta por un flujo redirigido en vez de la consola.
    pub fn stdio(mut self, input: Arc<dyn LineInput>) -> Self {
        self.prompt_input = Some(input);
        self
    }

    pub fn prompt_grace(mut self, grace: Duration) -> Self {
        self.prompt_grace = grace;
        self
    }

    pub fn output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = output;
        self
    }

    pub fn silenced(mut self, silenced: Arc<dyn SilencedErrors>) -> Self {
        self.silenced = silenced;
        self
    }

    pub fn fs_mode(mut self, mode: Arc<dyn FsMode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn recovery(mut self, recovery: Arc<dyn RecoveryPasses>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn device(mut self, id: DeviceId, name: impl Into<String>) -> Self {
        self.devices.push((id, name.into()));
        self
    }

    /// Lo que se hace con `errors=panic`. Por defecto aborta el proceso.
    pub fn panic_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.panic_hook = Some(Box::new(hook));
        self
    }

    /// Falla si la tabla de capacidades no cubre todos los `ErrorId`.
    pub fn build(self) -> Result<Arc<Fs>, ConfigError> {
        self.table.require(ErrorId::ALL)?;

        let prompter = match (self.prompter, self.prompt_input) {
            (Some(p), _) => p,
            (None, Some(input)) => Box::new(
                RedirectPrompter::new(input, self.output.clone())
                    .with_unlock_long_after(self.prompt_grace),
            ),
            (None, None) => Box::new(ConsolePrompter::new()),
        };

        let panic_hook = self.panic_hook.unwrap_or_else(|| {
            Box::new(|msg: &str| {
                error!("{msg}");
                std::process::abort();
            })
        });

        let (io_tx, io_rx) = mpsc::channel();

        Ok(Arc::new_cyclic(|weak| {
            spawn_io_worker(weak.clone(), io_rx);
            Fs {
                name: self.name,
                opts: RwLock::new(self.opts),
                flags: FsFlags::default(),
                table: self.table,
                registry: Mutex::new(Registry::default()),
                prompt_lock: Mutex::new(()),
                prompter,
                output: self.output,
                silenced: self.silenced,
                mode: self.mode,
                recovery: self.recovery,
                journal: self.journal,
                state_lock: RwLock::new(()),
                devices: self
                    .devices
                    .into_iter()
                    .map(|(id, name)| Arc::new(Device::new(id, name)))
                    .collect(),
                counters: Mutex::new(HashMap::new()),
                io_tx,
                panic_hook,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::BufferOutput;
    use crate::error_id::FsckFlags;

    fn test_fs() -> Arc<Fs> {
        Fs::builder("test")
            .output(Arc::new(BufferOutput::new()))
            .device(DeviceId(0), "sda")
            .build()
            .unwrap()
    }

    #[test]
    fn incomplete_capability_table_is_rejected() {
        let table = ErrorTable::from_entries(&[(ErrorId::KeyInvalid, FsckFlags::NONE)]).unwrap();
        let built = Fs::builder("test")
            .output(Arc::new(BufferOutput::new()))
            .error_table(table)
            .build();
        assert!(matches!(
            built,
            Err(ConfigError::MissingErrorId(id)) if id != ErrorId::KeyInvalid
        ));
    }

    #[test]
    fn run_guards_toggle_flags() {
        let fs = test_fs();
        {
            let _run = fs.begin_fsck();
            assert!(fs.flags().test(FsFlag::FsckRunning));
            let _rec = fs.begin_recovery();
            assert!(fs.flags().test(FsFlag::RecoveryRunning));
        }
        assert!(!fs.flags().test(FsFlag::FsckRunning));
        assert!(!fs.flags().test(FsFlag::RecoveryRunning));
    }

    #[test]
    fn error_counts_accumulate() {
        let fs = test_fs();
        fs.count_error(ErrorId::InodeOrphan);
        fs.count_error(ErrorId::SbBadMagic);
        fs.count_error(ErrorId::InodeOrphan);

        let counts = fs.error_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].0, ErrorId::SbBadMagic);
        assert_eq!(counts[1].0, ErrorId::InodeOrphan);
        assert_eq!(counts[1].1.nr, 2);
    }

    #[test]
    fn devices_are_looked_up_by_id() {
        let fs = test_fs();
        let dev = fs.device(DeviceId(0)).unwrap();
        assert_eq!(dev.name(), "sda");
        assert_eq!(dev.total_errors(), 0);
        assert!(fs.device(DeviceId(7)).is_none());
    }

    #[test]
    fn barrier_returns_with_nothing_queued() {
        test_fs().flush_io_errors();
    }
}
