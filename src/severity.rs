/* Escalamiento: inconsistencias, errores de topología, errores fatales y
errores de E/S por dispositivo. Es lo único que mueve el FS entero a solo
lectura (o lo detiene). */

use std::sync::atomic::Ordering;

use tracing::{error, info, warn};

use crate::collab::{DeviceId, IoErrorType, RecoveryPass};
use crate::error::FsckError;
use crate::flags::FsFlag;
use crate::fs::{Fs, IoJob};
use crate::opts::OnError;

impl Fs {
    /// Marca el FS con error y aplica la política `errors`. Devuelve `true`
    /// si el llamador debe tratarlo como fatal. Con `errors=panic` no vuelve.
    pub fn inconsistent_error(&self) -> bool {
        self.flags.set(FsFlag::Error);

        match self.opts().errors {
            OnError::Continue => false,
            OnError::FixSafe | OnError::ReadOnly => {
                if self.emergency_read_only() {
                    match &self.journal {
                        Some(j) => error!(
                            fs = %self.name,
                            seq = j.cur_seq(),
                            "inconsistencia detectada - solo lectura de emergencia en el journal"
                        ),
                        None => error!(fs = %self.name, "inconsistencia detectada - solo lectura de emergencia"),
                    }
                }
                true
            }
            OnError::Panic => {
                (self.panic_hook)(&format!("{}: pánico tras un error", self.name));
                true
            }
        }
    }

    /// Error de topología del árbol. Fuera de recuperación escala como
    /// inconsistencia; durante la recuperación pide el pase de topología.
    pub fn topology_error(&self) -> FsckError {
        self.flags.set(FsFlag::TopologyError);

        if !self.flags.test(FsFlag::RecoveryRunning) {
            self.inconsistent_error();
            return FsckError::NeedTopologyRepair;
        }

        info!(fs = %self.name, "programando {}", RecoveryPass::CheckTopology);
        match self.recovery.run_explicit(RecoveryPass::CheckTopology) {
            Err(e) => e,
            Ok(()) => FsckError::NodeReadValidate,
        }
    }

    /// Error fatal que no es una inconsistencia (p. ej. E/S agotada).
    pub fn fatal_error(&self) {
        if self.emergency_read_only() {
            error!(fs = %self.name, "error fatal - solo lectura de emergencia");
        }
    }

    /// Cuenta un error de E/S del dispositivo. No escala en el momento: si
    /// el dispositivo pasó el límite, encola el trabajo de degradarlo.
    pub fn io_error(&self, dev: DeviceId, ty: IoErrorType) {
        let Some(ca) = self.device(dev) else {
            warn!(fs = %self.name, %dev, "error de E/S en un dispositivo desconocido");
            return;
        };

        let total = ca.count_error(ty);
        if total <= self.opts().io_error_limit || ca.is_read_only() {
            return;
        }

        // uno encolado por dispositivo a la vez
        if ca.work_queued.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.io_tx.send(IoJob::Downgrade(dev)).is_err() {
            self.io_error_work(dev);
        }
    }

    /// Degrada `dev` a solo lectura o, si no se puede, todo el FS.
    pub(crate) fn io_error_work(&self, dev: DeviceId) {
        let Some(ca) = self.device(dev) else { return };

        {
            let _state = self.state_lock.write();

            let device_ro = self.mode.device_can_go_ro(dev)
                && match self.mode.downgrade_device(dev) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(fs = %self.name, %dev, "no se pudo degradar el dispositivo: {e}");
                        false
                    }
                };

            if device_ro {
                ca.read_only.store(true, Ordering::Release);
                error!(fs = %self.name, %dev, "demasiados errores de E/S, poniendo el dispositivo en RO");
            } else if self.emergency_read_only_locked() {
                error!(fs = %self.name, %dev, "demasiados errores de E/S, poniendo el sistema de archivos en RO");
            }
        }

        ca.work_queued.store(false, Ordering::Release);
    }

    /// Pasa todo el FS a solo lectura. Devuelve `true` sólo la primera vez.
    pub(crate) fn emergency_read_only(&self) -> bool {
        let _state = self.state_lock.write();
        self.emergency_read_only_locked()
    }

    fn emergency_read_only_locked(&self) -> bool {
        if self.flags.test_and_set(FsFlag::EmergencyRo) {
            return false;
        }

        if let Err(e) = self.mode.set_read_only() {
            error!(fs = %self.name, "falló el paso a solo lectura: {e}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::collab::{BufferOutput, MemoryFsMode, RecoveryPasses};
    use crate::opts::FsckOptions;

    fn fs_with(errors: OnError, mode: Arc<MemoryFsMode>) -> Arc<Fs> {
        Fs::builder("test")
            .opts(FsckOptions {
                errors,
                io_error_limit: 3,
                ..FsckOptions::default()
            })
            .output(Arc::new(BufferOutput::new()))
            .fs_mode(mode)
            .device(DeviceId(0), "sda")
            .device(DeviceId(1), "sdb")
            .build()
            .unwrap()
    }

    #[test]
    fn continue_is_not_fatal() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::Continue, mode.clone());
        assert!(!fs.inconsistent_error());
        assert!(fs.flags().test(FsFlag::Error));
        assert_eq!(mode.read_only_calls(), 0);
    }

    #[test]
    fn ro_is_fatal_and_idempotent() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::ReadOnly, mode.clone());
        assert!(fs.inconsistent_error());
        assert!(fs.inconsistent_error());
        assert!(mode.is_read_only());
        assert_eq!(mode.read_only_calls(), 1);
    }

    #[test]
    fn fatal_even_if_transition_fails() {
        let mode = Arc::new(MemoryFsMode::failing());
        let fs = fs_with(OnError::FixSafe, mode.clone());
        assert!(fs.inconsistent_error());
        assert_eq!(mode.read_only_calls(), 1);
    }

    #[test]
    fn panic_policy_calls_the_hook() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let fs = Fs::builder("test")
            .opts(FsckOptions {
                errors: OnError::Panic,
                ..FsckOptions::default()
            })
            .output(Arc::new(BufferOutput::new()))
            .panic_hook(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        assert!(fs.inconsistent_error());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fatal_error_does_not_mark_error() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::Continue, mode.clone());
        fs.fatal_error();
        assert!(!fs.flags().test(FsFlag::Error));
        assert!(fs.flags().test(FsFlag::EmergencyRo));
        assert!(mode.is_read_only());
    }

    #[test]
    fn topology_error_outside_recovery_escalates() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::ReadOnly, mode.clone());
        assert!(matches!(fs.topology_error(), FsckError::NeedTopologyRepair));
        assert!(fs.flags().test(FsFlag::TopologyError));
        assert!(fs.flags().test(FsFlag::Error));
        assert!(mode.is_read_only());
    }

    #[test]
    fn topology_error_during_recovery_schedules_pass() {
        struct Recorder(AtomicUsize);
        impl RecoveryPasses for Recorder {
            fn run_explicit(&self, pass: RecoveryPass) -> Result<(), FsckError> {
                assert_eq!(pass, RecoveryPass::CheckTopology);
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let mode = Arc::new(MemoryFsMode::new());
        let recorder = Arc::new(Recorder(AtomicUsize::new(0)));
        let fs = Fs::builder("test")
            .opts(FsckOptions {
                errors: OnError::ReadOnly,
                ..FsckOptions::default()
            })
            .output(Arc::new(BufferOutput::new()))
            .fs_mode(mode.clone())
            .recovery(recorder.clone())
            .build()
            .unwrap();

        let _rec = fs.begin_recovery();
        assert!(matches!(fs.topology_error(), FsckError::NodeReadValidate));
        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
        assert!(!fs.flags().test(FsFlag::Error));
        assert!(!mode.is_read_only());

        // sin pases disponibles se devuelve el error del pase
        let fs = fs_with(OnError::ReadOnly, Arc::new(MemoryFsMode::new()));
        let _rec = fs.begin_recovery();
        assert!(matches!(
            fs.topology_error(),
            FsckError::RecoveryPass { pass: RecoveryPass::CheckTopology, .. }
        ));
    }

    #[test]
    fn io_errors_below_limit_only_count() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::ReadOnly, mode.clone());
        fs.io_error(DeviceId(0), IoErrorType::Read);
        fs.io_error(DeviceId(0), IoErrorType::Checksum);
        fs.flush_io_errors();

        let dev = fs.device(DeviceId(0)).unwrap();
        assert_eq!(dev.errors(IoErrorType::Read), 1);
        assert_eq!(dev.errors(IoErrorType::Checksum), 1);
        assert!(!dev.is_read_only());
        assert_eq!(mode.read_only_calls(), 0);
    }

    #[test]
    fn too_many_io_errors_degrade_the_device() {
        let mode = Arc::new(MemoryFsMode::new());
        mode.allow_device_ro(DeviceId(1));
        let fs = fs_with(OnError::ReadOnly, mode.clone());

        for _ in 0..5 {
            fs.io_error(DeviceId(1), IoErrorType::Write);
        }
        fs.flush_io_errors();

        assert!(fs.device(DeviceId(1)).unwrap().is_read_only());
        assert_eq!(mode.ro_devices(), vec![DeviceId(1)]);
        assert_eq!(mode.read_only_calls(), 0);
    }

    #[test]
    fn undegradable_device_takes_the_whole_fs_ro() {
        let mode = Arc::new(MemoryFsMode::new());
        let fs = fs_with(OnError::ReadOnly, mode.clone());

        // llegar al límite no alcanza, hay que pasarlo
        for _ in 0..3 {
            fs.io_error(DeviceId(0), IoErrorType::Read);
        }
        fs.flush_io_errors();
        assert!(!fs.flags().test(FsFlag::EmergencyRo));
        assert_eq!(mode.read_only_calls(), 0);

        fs.io_error(DeviceId(0), IoErrorType::Read);
        fs.flush_io_errors();

        assert!(!fs.device(DeviceId(0)).unwrap().is_read_only());
        assert!(fs.flags().test(FsFlag::EmergencyRo));
        assert_eq!(mode.read_only_calls(), 1);
    }
}
