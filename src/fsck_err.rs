/* Motor de decisión de fsck: recibe una inconsistencia ya formateada y
decide si se repara, se ignora o no se puede seguir. Todo error de
consistencia termina acá; nunca sube sin resolver. */

use tracing::error;

use crate::collab::{Lockable, Transaction};
use crate::error::FsckError;
use crate::error_id::{ErrorId, FsckFlags};
use crate::flags::FsFlag;
use crate::fs::Fs;
use crate::opts::{FixErrors, OnError};
use crate::prompt::Answer;
use crate::registry::Occurrence;

/// Acción por defecto que se le propone al operador.
pub const DEFAULT_ACTION: &str = "reparar?";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Fix,
    Ignore,
    /// No se corrigió y no se puede seguir.
    NotFixed,
}

/// Separa una acción propia al final del mensaje: `"..., recrear?"`.
pub(crate) fn split_action(msg: &str) -> (&str, Option<&str>) {
    if msg.ends_with('?') {
        if let Some(pos) = msg.rfind(", ") {
            return (&msg[..pos], Some(&msg[pos + 2..]));
        }
    }
    (msg, None)
}

/// Gerundio de la acción: reparar? -> reparando, leer? -> leyendo.
pub(crate) fn actioning(action: &str) -> String {
    let verb = action.trim_end_matches('?').trim();

    if let Some(stem) = verb.strip_suffix("ar") {
        return format!("{stem}ando");
    }
    if let Some(stem) = verb.strip_suffix("er").or_else(|| verb.strip_suffix("ir")) {
        if stem.ends_with(['a', 'e', 'o', 'u']) {
            return format!("{stem}yendo");
        }
        return format!("{stem}iendo");
    }
    verb.to_owned()
}

struct TransLock<'a>(&'a dyn Transaction);

impl Lockable for TransLock<'_> {
    fn unlock(&self) {
        self.0.unlock();
    }

    fn unlock_long(&self) {
        self.0.unlock_long();
    }
}

/// Resultado de esperar el turno para preguntar.
enum Turn {
    Asked(Answer),
    ForAll,
    Answered(Verdict),
}

/// Lo que se va a mostrar al final de un reporte.
struct Report {
    out: String,
    print: bool,
    suppressing: bool,
    exiting: bool,
    inconsistent: bool,
}

impl Fs {
    /// Reporta una inconsistencia. `template` identifica al tipo de mensaje
    /// (para deduplicar y limitar) y `msg` es el texto ya formateado; si
    /// termina en `", <acción>?"` esa es la acción que se propone.
    pub fn fsck_err(
        &self,
        trans: Option<&dyn Transaction>,
        flags: FsckFlags,
        err: ErrorId,
        template: &'static str,
        msg: &str,
    ) -> Result<Verdict, FsckError> {
        let (text, action) = split_action(msg);
        self.fsck_err_action(trans, flags, err, template, text, action.unwrap_or(DEFAULT_ACTION))
    }

    /// Como `fsck_err`, pero sólo reporta si `cond` es verdadero.
    pub fn fsck_err_on(
        &self,
        cond: bool,
        trans: Option<&dyn Transaction>,
        flags: FsckFlags,
        err: ErrorId,
        template: &'static str,
        msg: &str,
    ) -> Result<Verdict, FsckError> {
        if !cond {
            return Ok(Verdict::Ignore);
        }
        self.fsck_err(trans, flags, err, template, msg)
    }

    /// Núcleo del motor con la acción ya separada del mensaje.
    pub fn fsck_err_action(
        &self,
        trans: Option<&dyn Transaction>,
        flags: FsckFlags,
        err: ErrorId,
        template: &'static str,
        text: &str,
        action: &str,
    ) -> Result<Verdict, FsckError> {
        let flags = flags | self.table.flags(err);
        let can_fix = flags.contains(FsckFlags::CAN_FIX);
        let can_ignore = flags.contains(FsckFlags::CAN_IGNORE);

        if self.silenced.contains(err) {
            return Ok(if can_fix { Verdict::Fix } else { Verdict::Ignore });
        }

        self.count_error(err);

        let opts = self.opts();
        let running = self.flags.test(FsFlag::FsckRunning);
        let ratelimit = opts.ratelimit_errors && !flags.contains(FsckFlags::NO_RATELIMIT);

        let mut report = Report {
            out: text.to_owned(),
            print: true,
            suppressing: false,
            exiting: false,
            inconsistent: false,
        };
        let mut fix_override = None;
        let mut asked = false;

        let mut reg = self.registry.lock();

        if let Some(s) = reg.get(running, template) {
            match s.record(text, ratelimit) {
                // reinicio de transacción: no se vuelve a preguntar
                Occurrence::Replay(ret) => return Ok(ret),
                Occurrence::Print => {}
                Occurrence::Suppressing => report.suppressing = true,
                Occurrence::Silent => report.print = false,
            }
            fix_override = s.fix;
        }

        let mut ret = Verdict::Ignore;

        if flags.contains(FsckFlags::AUTOFIX)
            && matches!(opts.errors, OnError::Continue | OnError::FixSafe)
        {
            if can_fix {
                report.out.push_str(", ");
                report.out.push_str(&actioning(action));
                ret = Verdict::Fix;
            } else {
                report.out.push_str(", continuando");
            }
        } else {
            if !running {
                if opts.errors != OnError::Continue
                    || !flags.intersects(FsckFlags::CAN_FIX | FsckFlags::CAN_IGNORE)
                {
                    report.out.push_str(", apagando");
                    report.inconsistent = true;
                    ret = Verdict::NotFixed;
                } else if can_fix {
                    report.out.push_str(", ");
                    report.out.push_str(&actioning(action));
                    ret = Verdict::Fix;
                } else {
                    report.out.push_str(", continuando");
                }
            } else if opts.fix_errors == FixErrors::Exit {
                report.out.push_str(", saliendo");
                ret = Verdict::NotFixed;
            } else if can_fix {
                match fix_override.unwrap_or(opts.fix_errors) {
                    FixErrors::Ask => {
                        // nunca se pregunta con el registro tomado
                        drop(reg);
                        let question = format!("{}, {}", report.out, action);
                        let turn = self.ask_fix(trans, template, text, &question, can_ignore);
                        reg = self.registry.lock();

                        match turn {
                            Turn::Asked(answer) => {
                                asked = true;
                                report.print = false;
                                report.out = question;
                                if answer.is_yes() {
                                    ret = Verdict::Fix;
                                }
                            }
                            // otro hilo ya contestó por este mismo texto
                            Turn::Answered(prev) => return Ok(prev),
                            // otro hilo contestó "para todos" mientras esperábamos
                            Turn::ForAll => match reg.peek_mut(template).and_then(|s| s.fix) {
                                Some(FixErrors::Yes) => {
                                    report.out.push_str(", ");
                                    report.out.push_str(&actioning(action));
                                    ret = Verdict::Fix;
                                }
                                _ => {
                                    report.out.push_str(", no ");
                                    report.out.push_str(&actioning(action));
                                }
                            },
                        }
                    }
                    FixErrors::Yes => {
                        report.out.push_str(", ");
                        report.out.push_str(&actioning(action));
                        ret = Verdict::Fix;
                    }
                    _ if opts.nochanges && !can_ignore => {
                        report.out.push_str(", ");
                        report.out.push_str(&actioning(action));
                        ret = Verdict::Fix;
                    }
                    _ => {
                        report.out.push_str(", no ");
                        report.out.push_str(&actioning(action));
                    }
                }
            } else if !can_ignore {
                report.out.push_str(" (reparación no implementada)");
            }

            if ret == Verdict::Ignore && (opts.fix_errors == FixErrors::Exit || !can_ignore) {
                ret = Verdict::NotFixed;
            }

            if running && ret == Verdict::NotFixed {
                report.exiting = true;
                report.print = true;
            }
        }

        // otro reporte pudo pisar el texto mientras se preguntaba
        if let Some(s) = reg.peek_mut(template) {
            if s.last_msg.as_deref() == Some(text) {
                s.ret = Some(ret);
            }
        }
        drop(reg);

        if report.print {
            report.out.push('\n');
            self.output.append(&report.out);
        }

        if report.exiting {
            error!(fs = %self.name, error = %err, "imposible continuar, deteniendo");
            self.output.append("Imposible continuar, deteniendo\n");
        } else if report.suppressing {
            self.output.append("Limitando nuevas instancias del error anterior\n");
        }

        if can_fix {
            if ret == Verdict::Fix {
                self.flags.set(FsFlag::ErrorsFixed);
            } else {
                self.flags.set(FsFlag::ErrorsNotFixed);
                self.flags.set(FsFlag::Error);
            }
        }
        if ret == Verdict::NotFixed {
            self.flags.set(FsFlag::ErrorsNotFixed);
            self.flags.set(FsFlag::Error);
        }

        if report.inconsistent {
            self.inconsistent_error();
        }

        // la transacción pudo invalidarse mientras esperábamos al operador;
        // la respuesta ya quedó guardada para cuando se reintente
        if asked {
            if let Some(trans) = trans {
                trans.relock()?;
            }
        }

        Ok(ret)
    }

    /// Pregunta al operador, de a un reporte por vez. Al conseguir el turno
    /// puede que ya no haga falta: hay una respuesta "para todos" de la
    /// plantilla o alguien ya contestó por el mismo texto.
    fn ask_fix(
        &self,
        trans: Option<&dyn Transaction>,
        template: &'static str,
        text: &str,
        question: &str,
        can_ignore: bool,
    ) -> Turn {
        let _turn = self.prompt_lock.lock();

        if let Some(s) = self.registry.lock().peek_mut(template) {
            if s.fix.is_some() {
                return Turn::ForAll;
            }
            if s.last_msg.as_deref() == Some(text) {
                if let Some(ret) = s.ret {
                    return Turn::Answered(ret);
                }
            }
        }

        let lock = trans.map(TransLock);
        let answer = self.prompter.ask(question, lock.as_ref().map(|l| l as &dyn Lockable));

        let ret = if answer.is_yes() {
            Verdict::Fix
        } else if can_ignore {
            Verdict::Ignore
        } else {
            Verdict::NotFixed
        };
        let all = match answer {
            Answer::AllNo => Some(FixErrors::No),
            Answer::AllYes => Some(FixErrors::Yes),
            Answer::No | Answer::Yes => None,
        };

        // la respuesta queda en el registro antes de soltar el turno
        if let Some(s) = self.registry.lock().peek_mut(template) {
            if all.is_some() {
                s.fix = all;
            }
            if s.last_msg.as_deref() == Some(text) {
                s.ret = Some(ret);
            }
        }
        Turn::Asked(answer)
    }

    /// Fin de corrida: resume los errores limitados y suelta todo el estado.
    pub fn flush_fsck_errs(&self) {
        let summary = self.registry.lock().flush();
        for (nr, msg) in summary {
            self.output
                .append(&format!("Se vieron {nr} errores como:\n    {msg}\n"));
        }
    }

    /// Cuántas plantillas tiene el registro de la corrida actual.
    pub fn tracked_errors(&self) -> usize {
        self.registry.lock().len()
    }
}
