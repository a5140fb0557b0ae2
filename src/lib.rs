//! Motor de errores de consistencia de QRFS.
//!
//! Decide qué hacer con cada inconsistencia que se detecta (ignorarla,
//! repararla sola, preguntarle al operador o escalar todo el FS a solo
//! lectura) y lleva la memoria por tipo de error durante una corrida de fsck.

mod collab;
mod error;
mod error_id;
mod flags;
mod fs;
mod fsck_err;
mod key_err;
mod msg;
mod opts;
mod prompt;
mod registry;
mod severity;

pub mod fsck;

pub use crate::collab::{
    BufferOutput, ConsoleOutput, DeviceId, FsMode, IoErrorType, Journal, LineInput, Lockable,
    MemoryFsMode, NoRecovery, NoSilenced, Output, ReadLineError, RecoveryPass, RecoveryPasses,
    SilencedErrors, SilencedSet, SubvolInum, Transaction,
};
pub use crate::error::{ConfigError, FsckError};
pub use crate::error_id::{ErrorId, ErrorTable, FsckFlags};
pub use crate::flags::{FsFlag, FsFlags};
pub use crate::fs::{Device, ErrorCount, Fs, FsBuilder, FsckRun, RecoveryRun};
pub use crate::fsck_err::{Verdict, DEFAULT_ACTION};
pub use crate::key_err::{KeyVerdict, TreeId, ValidateContext, ValidateFlags, ValidateSource};
pub use crate::msg::{inum_err_msg, inum_offset_err_msg};
pub use crate::opts::{FixErrors, FsckOptions, OnError};
pub use crate::prompt::{
    parse_yn, Answer, ChannelInput, ConsolePrompter, Prompter, RedirectPrompter,
    PROMPT_UNLOCK_LONG_AFTER, YN_SUFFIX,
};
pub use crate::registry::FSCK_ERR_RATELIMIT_NR;
