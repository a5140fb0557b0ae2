/* Memoria de errores de una corrida de fsck: un registro por plantilla de
mensaje, con el último mensaje, cuántas veces se vio y la decisión tomada.
Se usa siempre bajo el mutex `Fs::registry`. */

use std::collections::VecDeque;

use tracing::error;

use crate::fsck_err::Verdict;
use crate::opts::FixErrors;

/// A partir de cuántas apariciones de una plantilla se deja de imprimir.
pub const FSCK_ERR_RATELIMIT_NR: u64 = 10;

#[derive(Debug)]
pub struct FsckErrState {
    pub(crate) template: &'static str,
    pub(crate) last_msg: Option<String>,
    pub(crate) nr: u64,
    pub(crate) ratelimited: bool,
    /// Respuesta "para todos" (Y/N) del operador.
    pub(crate) fix: Option<FixErrors>,
    pub(crate) ret: Option<Verdict>,
}

/// Qué hacer con una nueva aparición.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Occurrence {
    /// Mismo texto que la vez anterior (reinicio de transacción).
    Replay(Verdict),
    Print,
    /// Se imprime y además se avisa que se empieza a limitar.
    Suppressing,
    Silent,
}

impl FsckErrState {
    fn new(template: &'static str) -> Self {
        Self {
            template,
            last_msg: None,
            nr: 0,
            ratelimited: false,
            fix: None,
            ret: None,
        }
    }

    pub(crate) fn record(&mut self, msg: &str, ratelimit: bool) -> Occurrence {
        if self.last_msg.as_deref() == Some(msg) {
            if let Some(ret) = self.ret {
                return Occurrence::Replay(ret);
            }
        }

        self.last_msg = Some(msg.to_owned());

        let occ = if ratelimit && self.nr >= FSCK_ERR_RATELIMIT_NR {
            if self.nr == FSCK_ERR_RATELIMIT_NR {
                self.ratelimited = true;
                Occurrence::Suppressing
            } else {
                Occurrence::Silent
            }
        } else {
            Occurrence::Print
        };

        self.nr += 1;
        occ
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    // el frente es el más reciente
    states: VecDeque<FsckErrState>,
    alloc_failed: bool,
}

impl Registry {
    /// Registro de `template`, creado si hace falta. `None` fuera de una
    /// corrida de fsck o si no hubo memoria para crearlo.
    pub(crate) fn get(&mut self, running: bool, template: &'static str) -> Option<&mut FsckErrState> {
        if !running {
            return None;
        }

        if let Some(pos) = self.states.iter().position(|s| s.template == template) {
            // los errores repetidos son lo común: al frente
            if pos != 0 {
                let s = self.states.remove(pos)?;
                self.states.push_front(s);
            }
            return self.states.front_mut();
        }

        if self.states.try_reserve(1).is_err() {
            if !self.alloc_failed {
                error!("sin memoria, no se pueden limitar los errores de fsck");
            }
            self.alloc_failed = true;
            return None;
        }

        self.states.push_front(FsckErrState::new(template));
        self.states.front_mut()
    }

    /// Igual que `get` pero sin crear ni reordenar.
    pub(crate) fn peek_mut(&mut self, template: &'static str) -> Option<&mut FsckErrState> {
        self.states.iter_mut().find(|s| s.template == template)
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    /// Vacía el registro y devuelve (cantidad, último mensaje) de cada
    /// plantilla que llegó a limitarse.
    pub(crate) fn flush(&mut self) -> Vec<(u64, String)> {
        self.alloc_failed = false;
        self.states
            .drain(..)
            .filter(|s| s.ratelimited)
            .filter_map(|s| s.last_msg.map(|msg| (s.nr, msg)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn templates(&self) -> Vec<&'static str> {
        self.states.iter().map(|s| s.template).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_tracked_outside_a_run() {
        let mut reg = Registry::default();
        assert!(reg.get(false, "a").is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn repeat_offenders_move_to_the_front() {
        let mut reg = Registry::default();
        reg.get(true, "a");
        reg.get(true, "b");
        reg.get(true, "c");
        assert_eq!(reg.templates(), vec!["c", "b", "a"]);
        reg.get(true, "a");
        assert_eq!(reg.templates(), vec!["a", "c", "b"]);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn ratelimit_after_threshold() {
        let mut s = FsckErrState::new("t");
        for i in 0..FSCK_ERR_RATELIMIT_NR {
            assert_eq!(s.record(&format!("msg {i}"), true), Occurrence::Print);
        }
        assert_eq!(s.record("msg 10", true), Occurrence::Suppressing);
        assert!(s.ratelimited);
        for i in 11..20 {
            assert_eq!(s.record(&format!("msg {i}"), true), Occurrence::Silent);
        }
        assert_eq!(s.nr, 20);
    }

    #[test]
    fn no_ratelimit_keeps_printing() {
        let mut s = FsckErrState::new("t");
        for i in 0..25 {
            assert_eq!(s.record(&format!("msg {i}"), false), Occurrence::Print);
        }
        assert!(!s.ratelimited);
    }

    #[test]
    fn identical_text_replays_cached_verdict() {
        let mut s = FsckErrState::new("t");
        assert_eq!(s.record("same", true), Occurrence::Print);
        // sin veredicto guardado todavía: cuenta como aparición nueva
        assert_eq!(s.record("same", true), Occurrence::Print);
        s.ret = Some(Verdict::Fix);
        assert_eq!(s.record("same", true), Occurrence::Replay(Verdict::Fix));
        assert_eq!(s.nr, 2);
    }

    #[test]
    fn flush_reports_only_ratelimited_and_empties() {
        let mut reg = Registry::default();
        {
            let s = reg.get(true, "noisy").unwrap();
            for i in 0..12 {
                s.record(&format!("noisy {i}"), true);
            }
        }
        reg.get(true, "quiet").unwrap().record("quiet", true);

        let summary = reg.flush();
        assert_eq!(summary, vec![(12, "noisy 11".to_string())]);
        assert_eq!(reg.len(), 0);
    }
}
