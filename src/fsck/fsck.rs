/*EL ARCHIVO PRINCIPAL DE FSCK. Los pases validan el superblock, los inodos,
los bloques, los directorios, el bitmap y los inodos huérfanos. Cada problema
pasa por el motor de errores del `Fs`; sólo se escribe una reparación si el
motor dice que se repare y no estamos en modo `nochanges`. */

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::{fsck_backend::FsckBackend, fsck_types::*};
use crate::error::FsckError;
use crate::error_id::{ErrorId, FsckFlags};
use crate::fs::Fs;
use crate::fsck_err::Verdict;

/// Qué parte del reporte queda marcada si el problema no se repara.
#[derive(Clone, Copy)]
enum Area {
    Superblock,
    Inodes,
    Blocks,
}

struct Checker<'a, B> {
    fs: &'a Fs,
    backend: &'a mut B,
    report: FsckReport,
    nochanges: bool,
}

impl<B: FsckBackend> Checker<'_, B> {
    /// Reporta un problema. `Ok(true)` si hay que escribir la reparación;
    /// si el motor decide que no se puede seguir, corta el pase.
    fn problem(
        &mut self,
        area: Area,
        err: ErrorId,
        template: &'static str,
        msg: &str,
    ) -> Result<bool, FsckError> {
        self.report.found += 1;

        let verdict = self.fs.fsck_err(None, FsckFlags::NONE, err, template, msg)?;
        let repair = verdict == Verdict::Fix && !self.nochanges;

        if repair {
            self.report.fixed += 1;
            self.report.changed = true;
        } else {
            match area {
                Area::Superblock => {}
                Area::Inodes => self.report.inodes_ok = false,
                Area::Blocks => self.report.blocks_ok = false,
            }
        }

        if verdict == Verdict::NotFixed {
            return Err(FsckError::ErrorsNotFixed);
        }
        Ok(repair)
    }

    fn run_passes(&mut self) -> Result<(), FsckError> {
        // --- Paso 1: Validación del superblock ---
        debug!("fsck: superblock");
        self.check_superblock()?;

        // --- Paso 2: Validación básica de inodos ---
        debug!("fsck: inodos");
        self.check_inodes_basic()?;

        // --- Paso 3: Validación global de bloques ---
        debug!("fsck: bloques");
        self.check_blocks_global()?;

        // --- Paso 4: Validación de directorios ---
        debug!("fsck: directorios");
        self.check_dirs()?;

        // --- Paso 5: Validación del bitmap global ---
        debug!("fsck: bitmap");
        self.check_bitmap_global()?;

        // --- Paso 6: Detección de inodos huérfanos ---
        debug!("fsck: huérfanos");
        self.check_orphan_inodes()
    }

    fn check_superblock(&mut self) -> Result<(), FsckError> {
        let mut sb = self.backend.load_superblock();
        let num_inodes = self.backend.load_all_inodes().len();
        let bitmap_len = self.backend.load_block_bitmap().len();
        let mut dirty = false;

        // 1. Magic number
        if sb.magic != QRFS_MAGIC
            && self.problem(
                Area::Superblock,
                ErrorId::SbBadMagic,
                "superblock: magic inválido",
                &format!("Superblock: magic inválido (0x{:x})", sb.magic),
            )?
        {
            sb.magic = QRFS_MAGIC;
            dirty = true;
        }

        // 2. Coincidencia del número de inodos
        if sb.num_inodes as usize != num_inodes
            && self.problem(
                Area::Inodes,
                ErrorId::SbInodeCountWrong,
                "superblock: num_inodes incorrecto",
                &format!(
                    "Superblock: num_inodes = {}, pero hay {} inodos reales",
                    sb.num_inodes, num_inodes
                ),
            )?
        {
            sb.num_inodes = num_inodes as u32;
            dirty = true;
        }

        // 3. Coincidencia del número de bloques; un bitmap vacío lo arregla
        // el pase del bitmap
        if bitmap_len != 0
            && sb.num_blocks as usize != bitmap_len
            && self.problem(
                Area::Blocks,
                ErrorId::SbBlockCountWrong,
                "superblock: num_blocks incorrecto",
                &format!(
                    "Superblock: num_blocks = {}, pero bitmap tiene {} entradas",
                    sb.num_blocks, bitmap_len
                ),
            )?
        {
            sb.num_blocks = bitmap_len as u32;
            dirty = true;
        }

        if dirty {
            self.backend.write_superblock(&sb);
        }

        // Estos no tienen reparación: el motor detiene la corrida
        if sb.root_inode as usize >= num_inodes {
            self.problem(
                Area::Inodes,
                ErrorId::SbRootInodeOutOfRange,
                "superblock: root_inode fuera de rango",
                &format!("Superblock: root_inode ({}) fuera de rango", sb.root_inode),
            )?;
        }

        if sb.num_blocks == 0 {
            self.problem(
                Area::Blocks,
                ErrorId::SbZeroBlocks,
                "superblock: num_blocks en 0",
                "Superblock: num_blocks no puede ser 0",
            )?;
        }

        if sb.num_inodes == 0 {
            self.problem(
                Area::Inodes,
                ErrorId::SbZeroInodes,
                "superblock: num_inodes en 0",
                "Superblock: num_inodes no puede ser 0",
            )?;
        }

        Ok(())
    }

    fn check_inodes_basic(&mut self) -> Result<(), FsckError> {
        let total_blocks = self.backend.load_superblock().num_blocks;

        for (idx, mut inode) in self.backend.load_all_inodes().into_iter().enumerate() {
            let mut dirty = false;

            // 1. Valida tamaño
            if inode.size == u32::MAX
                && self.problem(
                    Area::Inodes,
                    ErrorId::InodeSizeInvalid,
                    "inodo: tamaño inválido",
                    &format!("Inodo {idx} tiene tamaño inválido, recalcular?"),
                )?
            {
                inode.size = (inode.direct.len() as u32).saturating_mul(QRFS_BLOCK_SIZE);
                dirty = true;
            }

            // 2. Valida punteros directos
            let mut direct = Vec::with_capacity(inode.direct.len());
            for &blk in &inode.direct {
                if blk >= total_blocks
                    && self.problem(
                        Area::Inodes,
                        ErrorId::InodeBlockOutOfRange,
                        "inodo: bloque directo fuera de rango",
                        &format!("Inodo {idx}: bloque directo fuera de rango ({blk}), quitar?"),
                    )?
                {
                    dirty = true;
                    continue;
                }
                direct.push(blk);
            }

            // 3. Valida punteros indirectos
            for (name, slot) in [("indirect1", &mut inode.indirect1), ("indirect2", &mut inode.indirect2)] {
                let Some(blk) = *slot else { continue };
                if blk >= total_blocks
                    && self.problem(
                        Area::Inodes,
                        ErrorId::InodeIndirectOutOfRange,
                        "inodo: puntero indirecto fuera de rango",
                        &format!("Inodo {idx}: {name} fuera de rango ({blk}), quitar?"),
                    )?
                {
                    *slot = None;
                    dirty = true;
                }
            }

            // 4. Duplicados dentro del mismo inodo
            let mut seen = HashSet::new();
            let mut unique = Vec::with_capacity(direct.len());
            for blk in direct {
                if !seen.insert(blk)
                    && self.problem(
                        Area::Inodes,
                        ErrorId::InodeBlockDuplicate,
                        "inodo: bloque duplicado",
                        &format!("Inodo {idx}: bloque duplicado ({blk}), quitar?"),
                    )?
                {
                    dirty = true;
                    continue;
                }
                unique.push(blk);
            }
            inode.direct = unique;

            if dirty {
                self.backend.write_inode(idx as u32, &inode);
            }
        }
        Ok(())
    }

    fn check_blocks_global(&mut self) -> Result<(), FsckError> {
        // bloque -> primer inodo que lo usa
        let mut owner: HashMap<u32, usize> = HashMap::new();

        for (ino, mut inode) in self.backend.load_all_inodes().into_iter().enumerate() {
            let mut dirty = false;

            let mut direct = Vec::with_capacity(inode.direct.len());
            for &blk in &inode.direct {
                if self.claimed_by_other(&mut owner, ino, blk)? {
                    dirty = true;
                    continue;
                }
                direct.push(blk);
            }
            inode.direct = direct;

            for slot in [&mut inode.indirect1, &mut inode.indirect2] {
                let Some(blk) = *slot else { continue };
                if self.claimed_by_other(&mut owner, ino, blk)? {
                    *slot = None;
                    dirty = true;
                }
            }

            if dirty {
                self.backend.write_inode(ino as u32, &inode);
            }
        }
        Ok(())
    }

    /// `Ok(true)` si `blk` ya era de otro inodo y hay que quitárselo a `ino`.
    fn claimed_by_other(
        &mut self,
        owner: &mut HashMap<u32, usize>,
        ino: usize,
        blk: u32,
    ) -> Result<bool, FsckError> {
        let first = *owner.entry(blk).or_insert(ino);
        if first == ino {
            return Ok(false);
        }
        self.problem(
            Area::Blocks,
            ErrorId::BlockMultiplyClaimed,
            "bloque usado por más de un inodo",
            &format!("Inodo {ino}: bloque {blk} ya lo usa el inodo {first}, quitar?"),
        )
    }

    fn check_dirs(&mut self) -> Result<(), FsckError> {
        let sb = self.backend.load_superblock();
        let inodes = self.backend.load_all_inodes();

        // Si el root inode es inválido, no tiene sentido seguir
        let Some(root) = inodes.get(sb.root_inode as usize) else {
            return Ok(());
        };
        if !root.is_dir {
            self.problem(
                Area::Inodes,
                ErrorId::RootNotDirectory,
                "root no es un directorio",
                "Root inode no es un directorio",
            )?;
        }

        for (ino, inode) in inodes.iter().enumerate() {
            if !inode.is_dir {
                continue;
            }

            let mut dirty = false;
            let mut kept = Vec::new();

            for mut entry in self.backend.read_dir(ino as u32) {
                if !entry.valid {
                    kept.push(entry);
                    continue;
                }

                // Nombre vacío
                if entry.name.is_empty()
                    && self.problem(
                        Area::Inodes,
                        ErrorId::DirentEmptyName,
                        "dirent con nombre vacío",
                        &format!("Inodo {ino}: dirent con nombre vacío, borrar?"),
                    )?
                {
                    dirty = true;
                    continue;
                }

                // Inodo fuera de rango
                let Some(target) = inodes.get(entry.inode as usize) else {
                    let drop_it = self.problem(
                        Area::Inodes,
                        ErrorId::DirentDangling,
                        "dirent apunta a un inodo inexistente",
                        &format!(
                            "Inodo {ino}: dirent '{}' apunta a inodo inexistente ({}), borrar?",
                            entry.name, entry.inode
                        ),
                    )?;
                    if drop_it {
                        dirty = true;
                    } else {
                        kept.push(entry);
                    }
                    continue;
                };

                // Tipo no concuerda
                if entry.is_dir != target.is_dir
                    && self.problem(
                        Area::Inodes,
                        ErrorId::DirentTypeWrong,
                        "dirent con tipo incorrecto",
                        &format!("Dirent '{}' en inodo {ino} declara tipo incorrecto", entry.name),
                    )?
                {
                    entry.is_dir = target.is_dir;
                    dirty = true;
                }

                kept.push(entry);
            }

            if dirty {
                self.backend.write_dir(ino as u32, &kept);
            }
        }
        Ok(())
    }

    fn check_bitmap_global(&mut self) -> Result<(), FsckError> {
        let num_blocks = self.backend.load_superblock().num_blocks as usize;
        let mut bitmap = self.backend.load_block_bitmap();
        let mut dirty = false;

        // 1. Tamaño incorrecto
        if bitmap.len() != num_blocks {
            let resize = self.problem(
                Area::Blocks,
                ErrorId::BitmapWrongSize,
                "bitmap con tamaño incorrecto",
                &format!(
                    "Bitmap tiene tamaño incorrecto: {} en vez de {}",
                    bitmap.len(),
                    num_blocks
                ),
            )?;
            if !resize {
                return Ok(());
            }
            bitmap.resize(num_blocks, false);
            dirty = true;
        }

        // 2. Bloques realmente usados por inodos
        let mut used_by_inodes = vec![false; num_blocks];
        for inode in self.backend.load_all_inodes() {
            for blk in inode.blocks() {
                if let Some(used) = used_by_inodes.get_mut(blk as usize) {
                    *used = true;
                }
            }
        }

        // 3. Comparación bitmap <-> realidad
        for (block, used) in used_by_inodes.into_iter().enumerate() {
            if bitmap[block]
                && !used
                && self.problem(
                    Area::Blocks,
                    ErrorId::BitmapBlockMarkedUsed,
                    "bitmap: bloque usado sin dueño",
                    &format!("Bitmap marca usado el bloque {block}, pero ningún inodo lo usa, liberar?"),
                )?
            {
                bitmap[block] = false;
                dirty = true;
            }

            if !bitmap[block]
                && used
                && self.problem(
                    Area::Blocks,
                    ErrorId::BitmapBlockMarkedFree,
                    "bitmap: bloque libre en uso",
                    &format!("Bitmap marca libre el bloque {block}, pero algún inodo lo usa, marcar?"),
                )?
            {
                bitmap[block] = true;
                dirty = true;
            }
        }

        if dirty {
            self.backend.write_block_bitmap(&bitmap);
        }
        Ok(())
    }

    fn check_orphan_inodes(&mut self) -> Result<(), FsckError> {
        let sb = self.backend.load_superblock();
        let inodes = self.backend.load_all_inodes();

        // Sin un root válido no hay dónde reconectar
        let root = sb.root_inode;
        if !inodes.get(root as usize).is_some_and(|i| i.is_dir) {
            return Ok(());
        }

        // El root SIEMPRE se considera referenciado
        let mut referenced = vec![false; inodes.len()];
        referenced[root as usize] = true;

        // Un directorio no se referencia a sí mismo con "."
        for (ino, inode) in inodes.iter().enumerate() {
            if !inode.is_dir {
                continue;
            }
            for entry in self.backend.read_dir(ino as u32) {
                if entry.valid && entry.inode as usize != ino {
                    if let Some(r) = referenced.get_mut(entry.inode as usize) {
                        *r = true;
                    }
                }
            }
        }

        let mut root_entries = self.backend.read_dir(root);
        let mut dirty = false;

        for (ino, inode) in inodes.iter().enumerate() {
            if referenced[ino] {
                continue;
            }
            if self.problem(
                Area::Inodes,
                ErrorId::InodeOrphan,
                "inodo huérfano",
                &format!("Inodo {ino} huérfano, reconectar?"),
            )? {
                root_entries.push(Dirent {
                    inode: ino as u32,
                    name: format!("#{ino}"),
                    is_dir: inode.is_dir,
                    valid: true,
                });
                dirty = true;
            }
        }

        if dirty {
            self.backend.write_dir(root, &root_entries);
        }
        Ok(())
    }
}

/// Corre todos los pases sobre `backend`. Un `Err` es un error operativo;
/// si el motor decide detenerse, el reporte queda con `halted`.
pub fn run_fsck<B: FsckBackend>(fs: &Fs, backend: &mut B) -> Result<FsckReport, FsckError> {
    let nochanges = fs.opts().nochanges;
    let _run = fs.begin_fsck();

    let mut ck = Checker {
        fs,
        backend,
        report: FsckReport::new(),
        nochanges,
    };

    match ck.run_passes() {
        Ok(()) => {}
        Err(FsckError::ErrorsNotFixed) => ck.report.halted = true,
        Err(e) => return Err(e),
    }

    let report = ck.report;
    info!(
        fs = fs.name(),
        found = report.found,
        fixed = report.fixed,
        halted = report.halted,
        "fsck terminado"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collab::{BufferOutput, MemoryFsMode};
    use crate::fsck::mock::MockBackend;
    use crate::opts::{FixErrors, FsckOptions};

    fn fs_with(opts: FsckOptions, out: &BufferOutput) -> Arc<Fs> {
        Fs::builder("img")
            .opts(opts)
            .output(Arc::new(out.clone()))
            .fs_mode(Arc::new(MemoryFsMode::new()))
            .build()
            .unwrap()
    }

    fn yes() -> FsckOptions {
        FsckOptions {
            fix_errors: FixErrors::Yes,
            ..FsckOptions::default()
        }
    }

    fn clean() -> MockBackend {
        let mut img = MockBackend::demo();
        img.inodes.truncate(2);
        img.superblock.num_inodes = 2;
        img.dirs[0][2].is_dir = false;
        img.bitmap[2] = false;
        img.bitmap[3] = false;
        img
    }

    #[test]
    fn clean_image_exits_zero() {
        let out = BufferOutput::new();
        let fs = fs_with(FsckOptions::default(), &out);
        let mut img = clean();
        let before = img.clone();

        let rep = run_fsck(&fs, &mut img).unwrap();
        assert_eq!(rep.found, 0);
        assert_eq!(rep.exit_code(), 0);
        assert!(rep.blocks_ok && rep.inodes_ok);
        assert_eq!(img, before);
        assert!(out.contents().is_empty());
    }

    #[test]
    fn demo_is_fully_repaired_with_yes() {
        let out = BufferOutput::new();
        let fs = fs_with(yes(), &out);
        let mut img = MockBackend::demo();

        let rep = run_fsck(&fs, &mut img).unwrap();
        assert_eq!((rep.found, rep.fixed), (3, 3));
        assert_eq!(rep.exit_code(), 1);
        assert!(rep.changed);

        assert!(!img.dirs[0][2].is_dir);
        assert!(!img.bitmap[3]);
        assert!(img.dirs[0].iter().any(|d| d.name == "#2" && d.inode == 2));

        let text = out.contents();
        assert!(text.contains("Dirent 'file' en inodo 0 declara tipo incorrecto, reparando\n"));
        assert!(text.contains("ningún inodo lo usa, liberando\n"));
        assert!(text.contains("Inodo 2 huérfano, reconectando\n"));

        // segunda pasada: limpio
        let rep = run_fsck(&fs, &mut img).unwrap();
        assert_eq!(rep.exit_code(), 0);
    }

    #[test]
    fn default_options_stop_at_the_first_real_problem() {
        let out = BufferOutput::new();
        let fs = fs_with(FsckOptions::default(), &out);
        let mut img = MockBackend::demo();

        let rep = run_fsck(&fs, &mut img).unwrap();
        // el tipo del dirent se repara solo; el bitmap detiene la corrida
        assert!(rep.halted);
        assert_eq!((rep.found, rep.fixed), (2, 1));
        assert_eq!(rep.exit_code(), 4);
        assert!(!img.dirs[0][2].is_dir);
        assert!(img.bitmap[3]);
        assert!(out.contents().contains(", saliendo\nImposible continuar, deteniendo\n"));
    }

    #[test]
    fn nochanges_reports_without_writing() {
        let out = BufferOutput::new();
        let fs = fs_with(
            FsckOptions {
                fix_errors: FixErrors::No,
                nochanges: true,
                ..FsckOptions::default()
            },
            &out,
        );
        let mut img = MockBackend::demo();
        let before = img.clone();

        let rep = run_fsck(&fs, &mut img).unwrap();
        assert!(!rep.halted);
        assert_eq!((rep.found, rep.fixed), (3, 0));
        assert!(!rep.changed);
        assert_eq!(rep.exit_code(), 4);
        assert_eq!(img, before);
        assert!(out.contents().contains(", no reconectando\n"));
    }

    #[test]
    fn unrepairable_root_halts() {
        let out = BufferOutput::new();
        let fs = fs_with(yes(), &out);
        let mut img = clean();
        img.superblock.root_inode = 9;

        let rep = run_fsck(&fs, &mut img).unwrap();
        assert!(rep.halted);
        assert!(!rep.inodes_ok);
        assert!(out
            .contents()
            .contains("Superblock: root_inode (9) fuera de rango (reparación no implementada)\n"));
    }

    #[test]
    fn out_of_range_and_shared_blocks() {
        let out = BufferOutput::new();
        let fs = fs_with(yes(), &out);
        let mut img = clean();
        img.inodes[1].direct = vec![1, 1, 42];
        img.inodes[1].indirect2 = Some(77);
        img.inodes.push(Inode {
            is_dir: false,
            size: 1,
            direct: vec![1],
            indirect1: None,
            indirect2: None,
        });
        img.superblock.num_inodes = 3;
        img.dirs[0].push(Dirent { inode: 2, name: "b".into(), is_dir: false, valid: true });

        let rep = run_fsck(&fs, &mut img).unwrap();
        assert_eq!(rep.exit_code(), 1);
        assert_eq!(img.inodes[1].direct, vec![1]);
        assert_eq!(img.inodes[1].indirect2, None);
        assert!(img.inodes[2].direct.is_empty());
        assert!(out.contents().contains("Inodo 2: bloque 1 ya lo usa el inodo 1, quitando\n"));
    }

    #[test]
    fn repeated_bitmap_errors_are_ratelimited() {
        let out = BufferOutput::new();
        let fs = fs_with(yes(), &out);
        let mut img = clean();
        img.bitmap = vec![true; 17];
        img.superblock.num_blocks = 17;

        let rep = run_fsck(&fs, &mut img).unwrap();
        // el bloque 1 sí está en uso
        assert_eq!(rep.found, 16);
        // el resumen final repite el texto pero sin la acción
        assert_eq!(out.count(", liberando\n"), 11);
        assert_eq!(out.count("Bitmap marca usado"), 12);
        assert_eq!(out.count("Limitando nuevas instancias del error anterior\n"), 1);
        assert!(out.contents().ends_with(
            "Se vieron 16 errores como:\n    Bitmap marca usado el bloque 16, pero ningún inodo lo usa\n"
        ));
        assert_eq!(img.bitmap.iter().filter(|b| **b).count(), 1);
    }
}
