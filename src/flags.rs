// src/flags.rs
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Banderas de estado de una instancia del sistema de archivos.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FsFlag {
    Error = 0,
    TopologyError = 1,
    ErrorsFixed = 2,
    ErrorsNotFixed = 3,
    FsckRunning = 4,
    RecoveryRunning = 5,
    EmergencyRo = 6,
}

impl FsFlag {
    pub const ALL: [FsFlag; 7] = [
        FsFlag::Error,
        FsFlag::TopologyError,
        FsFlag::ErrorsFixed,
        FsFlag::ErrorsNotFixed,
        FsFlag::FsckRunning,
        FsFlag::RecoveryRunning,
        FsFlag::EmergencyRo,
    ];

    const fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// `errors_fixed` y `errors_not_fixed` sólo se encienden; el motor nunca
/// los apaga. `clear` queda para las banderas de "corrida en curso".
#[derive(Default)]
pub struct FsFlags(AtomicU32);

impl FsFlags {
    pub fn test(&self, flag: FsFlag) -> bool {
        self.0.load(Ordering::Acquire) & flag.mask() != 0
    }

    pub fn set(&self, flag: FsFlag) {
        self.0.fetch_or(flag.mask(), Ordering::AcqRel);
    }

    /// Enciende la bandera y devuelve si ya estaba encendida.
    pub fn test_and_set(&self, flag: FsFlag) -> bool {
        self.0.fetch_or(flag.mask(), Ordering::AcqRel) & flag.mask() != 0
    }

    pub(crate) fn clear(&self, flag: FsFlag) {
        debug_assert!(!matches!(flag, FsFlag::ErrorsFixed | FsFlag::ErrorsNotFixed));
        self.0.fetch_and(!flag.mask(), Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> Vec<FsFlag> {
        FsFlag::ALL.into_iter().filter(|f| self.test(*f)).collect()
    }
}

impl fmt::Debug for FsFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FsFlags").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear() {
        let flags = FsFlags::default();
        assert!(!flags.test(FsFlag::Error));
        flags.set(FsFlag::Error);
        assert!(flags.test(FsFlag::Error));
        assert!(!flags.test_and_set(FsFlag::FsckRunning));
        assert!(flags.test_and_set(FsFlag::FsckRunning));
        flags.clear(FsFlag::FsckRunning);
        assert!(!flags.test(FsFlag::FsckRunning));
        assert_eq!(flags.snapshot(), vec![FsFlag::Error]);
    }
}
