/* Pregunta s/n al operador. Dos implementaciones: la de flujo redirigido
(cualquier `LineInput`, salida al `Output` del FS) y la de consola (stdin y
stdout). Si el llamador tiene locks tomados, se sueltan antes de esperar y,
pasado un rato sin respuesta, también los de largo plazo. */

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::collab::{LineInput, Lockable, Output, ReadLineError};

pub const YN_SUFFIX: &str = " (y,n, o Y,N para todos los errores de este tipo) ";

/// Tiempo que se espera con la transacción retenida antes de soltarla del todo.
pub const PROMPT_UNLOCK_LONG_AFTER: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    No,
    Yes,
    AllNo,
    AllYes,
}

impl Answer {
    pub fn is_yes(self) -> bool {
        matches!(self, Answer::Yes | Answer::AllYes)
    }
}

/// Exactamente un caracter: `n`, `y`, `N` o `Y`.
pub fn parse_yn(line: &str) -> Option<Answer> {
    match line.trim() {
        "n" => Some(Answer::No),
        "y" => Some(Answer::Yes),
        "N" => Some(Answer::AllNo),
        "Y" => Some(Answer::AllYes),
        _ => None,
    }
}

pub trait Prompter: Send + Sync {
    /// Muestra `question` y espera una respuesta válida. Nunca falla: si no
    /// hay a quién preguntar, la respuesta es `No`.
    fn ask(&self, question: &str, lock: Option<&dyn Lockable>) -> Answer;
}

/// Espera una respuesta válida en `input`; `show_suffix` se llama antes de
/// cada intento.
fn wait_answer(
    input: &dyn LineInput,
    show_suffix: &dyn Fn(),
    lock: Option<&dyn Lockable>,
    unlock_long_after: Duration,
) -> Answer {
    if let Some(lock) = lock {
        lock.unlock();
    }

    let mut unlock_long_at = lock.map(|_| Instant::now() + unlock_long_after);

    loop {
        show_suffix();

        let line = loop {
            let timeout = unlock_long_at.map(|at| at.saturating_duration_since(Instant::now()));
            match input.read_line(timeout) {
                Ok(line) => break line,
                Err(ReadLineError::Timeout) => {
                    if unlock_long_at.take().is_some() {
                        if let Some(lock) = lock {
                            debug!("sin respuesta del operador, soltando la transacción");
                            lock.unlock_long();
                        }
                    }
                }
                Err(ReadLineError::Closed) => return Answer::No,
            }
        };

        if let Some(answer) = parse_yn(&line) {
            return answer;
        }
    }
}

// -----------------------------------------------------------------------------
// Entrada por canal
// -----------------------------------------------------------------------------

/// `LineInput` alimentado por un canal. Cuando todos los `Sender` se
/// sueltan, la entrada queda cerrada.
pub struct ChannelInput {
    rx: Mutex<mpsc::Receiver<String>>,
}

impl ChannelInput {
    pub fn new() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx: Mutex::new(rx) })
    }

    /// Lee líneas de `reader` en un hilo aparte, para poder esperar con
    /// timeout sobre una entrada bloqueante.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> io::Result<Self> {
        let (tx, input) = Self::new();
        thread::Builder::new()
            .name("qrfs-prompt-input".into())
            .spawn(move || {
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(input)
    }
}

impl LineInput for ChannelInput {
    fn read_line(&self, timeout: Option<Duration>) -> Result<String, ReadLineError> {
        let rx = self.rx.lock();
        match timeout {
            Some(t) => rx.recv_timeout(t).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => ReadLineError::Timeout,
                mpsc::RecvTimeoutError::Disconnected => ReadLineError::Closed,
            }),
            None => rx.recv().map_err(|_| ReadLineError::Closed),
        }
    }
}

// -----------------------------------------------------------------------------
// Prompter redirigido
// -----------------------------------------------------------------------------

pub struct RedirectPrompter {
    input: Arc<dyn LineInput>,
    output: Arc<dyn Output>,
    unlock_long_after: Duration,
}

impl RedirectPrompter {
    pub fn new(input: Arc<dyn LineInput>, output: Arc<dyn Output>) -> Self {
        Self {
            input,
            output,
            unlock_long_after: PROMPT_UNLOCK_LONG_AFTER,
        }
    }

    pub fn with_unlock_long_after(mut self, after: Duration) -> Self {
        self.unlock_long_after = after;
        self
    }
}

impl Prompter for RedirectPrompter {
    fn ask(&self, question: &str, lock: Option<&dyn Lockable>) -> Answer {
        self.output.append(question);
        wait_answer(
            self.input.as_ref(),
            &|| self.output.append(YN_SUFFIX),
            lock,
            self.unlock_long_after,
        )
    }
}

// -----------------------------------------------------------------------------
// Prompter de consola
// -----------------------------------------------------------------------------

pub struct ConsolePrompter {
    interactive: bool,
    unlock_long_after: Duration,
    stdin: OnceLock<Option<ChannelInput>>,
}

impl ConsolePrompter {
    /// Pregunta sólo si stdin es una terminal.
    pub fn new() -> Self {
        Self::with_interactive(io::stdin().is_terminal())
    }

    pub fn with_interactive(interactive: bool) -> Self {
        Self {
            interactive,
            unlock_long_after: PROMPT_UNLOCK_LONG_AFTER,
            stdin: OnceLock::new(),
        }
    }

    fn stdin(&self) -> Option<&ChannelInput> {
        self.stdin
            .get_or_init(|| match ChannelInput::from_reader(io::BufReader::new(io::stdin())) {
                Ok(input) => Some(input),
                Err(e) => {
                    warn!("no se pudo leer la entrada estándar: {e}");
                    None
                }
            })
            .as_ref()
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

fn print_flush(text: &str) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(text.as_bytes()).and_then(|_| out.flush());
}

impl Prompter for ConsolePrompter {
    fn ask(&self, question: &str, lock: Option<&dyn Lockable>) -> Answer {
        print_flush(question);

        if !self.interactive {
            print_flush(" (no interactivo)\n");
            return Answer::No;
        }

        let Some(input) = self.stdin() else {
            return Answer::No;
        };

        wait_answer(input, &|| print_flush(YN_SUFFIX), lock, self.unlock_long_after)
    }
}
