// src/msg.rs
//
// Prefijos de mensaje que identifican un inodo: la ruta si la transacción
// la puede resolver, o "inum subvol:inum".

use tracing::debug;

use crate::collab::{SubvolInum, Transaction};
use crate::error::FsckError;

/// Describe `inum`. Falla con `TransactionRestart` si la transacción se
/// reinició mientras se buscaba la ruta; el llamador debe reintentar.
pub fn inum_err_msg(trans: &dyn Transaction, inum: SubvolInum) -> Result<String, FsckError> {
    let restart_count = trans.restart_count();

    // sin subvolumen todavía no se intenta imprimir una ruta
    let path = if inum.subvol != 0 {
        loop {
            match trans.inum_to_path(inum) {
                Err(e) if e.is_restart() => continue,
                Err(e) => {
                    debug!(subvol = inum.subvol, inum = inum.inum, "sin ruta para el inodo: {e}");
                    break None;
                }
                Ok(path) => break path,
            }
        }
    } else {
        None
    };

    if trans.restart_count() != restart_count {
        return Err(FsckError::TransactionRestart);
    }

    Ok(path.unwrap_or_else(|| format!("inum {}:{}", inum.subvol, inum.inum)))
}

/// Como `inum_err_msg`, con el desplazamiento dentro del archivo.
pub fn inum_offset_err_msg(
    trans: &dyn Transaction,
    inum: SubvolInum,
    offset: u64,
) -> Result<String, FsckError> {
    let mut out = inum_err_msg(trans, inum)?;
    out.push_str(&format!(" offset {offset}: "));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Falla con reinicio las primeras `restarts` búsquedas.
    struct Trans {
        restarts: AtomicU64,
        count: AtomicU64,
        path: Option<&'static str>,
        broken: bool,
    }

    impl Trans {
        fn new(path: Option<&'static str>, restarts: u64) -> Self {
            Self {
                restarts: AtomicU64::new(restarts),
                count: AtomicU64::new(0),
                path,
                broken: false,
            }
        }
    }

    impl Transaction for Trans {
        fn unlock(&self) {}
        fn unlock_long(&self) {}
        fn relock(&self) -> Result<(), FsckError> {
            Ok(())
        }
        fn restart_count(&self) -> u64 {
            self.count.load(Ordering::SeqCst)
        }
        fn inum_to_path(&self, _inum: SubvolInum) -> Result<Option<String>, FsckError> {
            if self.restarts.load(Ordering::SeqCst) > 0 {
                self.restarts.fetch_sub(1, Ordering::SeqCst);
                self.count.fetch_add(1, Ordering::SeqCst);
                return Err(FsckError::TransactionRestart);
            }
            if self.broken {
                return Err(FsckError::NodeReadValidate);
            }
            Ok(self.path.map(str::to_owned))
        }
    }

    const INUM: SubvolInum = SubvolInum { subvol: 1, inum: 4096 };

    #[test]
    fn prints_the_path() {
        let t = Trans::new(Some("/home/a.txt"), 0);
        assert_eq!(inum_err_msg(&t, INUM).unwrap(), "/home/a.txt");
        assert_eq!(
            inum_offset_err_msg(&t, INUM, 512).unwrap(),
            "/home/a.txt offset 512: "
        );
    }

    #[test]
    fn falls_back_to_numbers() {
        let t = Trans::new(Some("/nunca"), 0);
        let no_subvol = SubvolInum { subvol: 0, inum: 7 };
        assert_eq!(inum_err_msg(&t, no_subvol).unwrap(), "inum 0:7");

        let mut t = Trans::new(None, 0);
        assert_eq!(inum_err_msg(&t, INUM).unwrap(), "inum 1:4096");
        t.broken = true;
        assert_eq!(inum_err_msg(&t, INUM).unwrap(), "inum 1:4096");
    }

    #[test]
    fn restart_is_reported() {
        let t = Trans::new(Some("/x"), 2);
        assert!(matches!(
            inum_err_msg(&t, INUM),
            Err(FsckError::TransactionRestart)
        ));
        // reintento ya sin reinicios
        assert_eq!(inum_err_msg(&t, INUM).unwrap(), "/x");
    }
}
