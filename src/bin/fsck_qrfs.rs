use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use qrfs::fsck::{run_fsck, FsckReport, MockBackend};
use qrfs::{ConsoleOutput, ConsolePrompter, FixErrors, Fs, FsckOptions, OnError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Chequea y repara una imagen QRFS.
#[derive(Parser, Debug)]
#[command(name = "fsck.qrfs", version)]
struct Cli {
    /// Imagen en JSON. Sin imagen se chequea una de demostración.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Reparar todo sin preguntar
    #[arg(short = 'y', conflicts_with_all = ["no", "preen"])]
    yes: bool,

    /// No reparar ni escribir nada
    #[arg(short = 'n', conflicts_with = "preen")]
    no: bool,

    /// Reparar sólo lo seguro, sin preguntar
    #[arg(short = 'p')]
    preen: bool,

    /// Opciones estilo montaje: errors=ro,fix_errors=ask,...
    #[arg(short = 'o')]
    options: Option<String>,

    /// Archivo TOML con las opciones base
    #[arg(long)]
    config: Option<PathBuf>,

    /// Política ante una inconsistencia: continue, fix_safe, ro, panic
    #[arg(long)]
    errors: Option<OnError>,

    /// Imprimir todas las instancias de cada error
    #[arg(long)]
    no_ratelimit: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn build_opts(cli: &Cli) -> Result<FsckOptions> {
    let mut opts = match &cli.config {
        Some(path) => FsckOptions::load(path)
            .with_context(|| format!("leyendo opciones de {}", path.display()))?,
        None => FsckOptions {
            fix_errors: FixErrors::Ask,
            ..FsckOptions::default()
        },
    };

    if let Some(o) = &cli.options {
        opts.apply_mount_opts(o).context("opciones -o inválidas")?;
    }
    if let Some(errors) = cli.errors {
        opts.errors = errors;
    }

    if cli.yes {
        opts.fix_errors = FixErrors::Yes;
    } else if cli.no {
        opts.fix_errors = FixErrors::No;
        opts.nochanges = true;
    } else if cli.preen {
        opts.errors = OnError::FixSafe;
        opts.fix_errors = FixErrors::No;
    }

    if cli.no_ratelimit {
        opts.ratelimit_errors = false;
    }
    Ok(opts)
}

fn load_image(cli: &Cli) -> Result<MockBackend> {
    match &cli.image {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("no se pudo leer {}", path.display()))?;
            MockBackend::from_json(&text)
                .with_context(|| format!("imagen inválida: {}", path.display()))
        }
        None => Ok(MockBackend::demo()),
    }
}

fn print_summary(rep: &FsckReport) {
    println!("\n{}", " QRFS FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());

    // ——————————————————————————————————————————
    //       RESULTADOS DE BLOQUES
    // ——————————————————————————————————————————
    println!("\n{}", "Bloques".bold().underline());

    if rep.blocks_ok {
        println!("  {} Bloques OK", "✓".green());
    } else {
        println!("  {} Quedan errores en bloques", "✗".red());
    }

    // ——————————————————————————————————————————
    //       RESULTADOS DE INODOS
    // ——————————————————————————————————————————
    println!("\n{}", "Inodos".bold().underline());

    if rep.inodes_ok {
        println!("  {} Inodos OK", "✓".green());
    } else {
        println!("  {} Quedan errores en inodos", "✗".red());
    }

    // ——————————————————————————————————————————
    //       RESUMEN FINAL
    // ——————————————————————————————————————————
    println!("\n{}", "Resumen".bold().underline());

    if rep.found == 0 {
        println!("{} Sistema de archivos limpio.\n", "✓ OK".green().bold());
    } else if rep.exit_code() == 1 {
        println!(
            "{} {} errores reparados.\n",
            "✓ FSCK completado:".green().bold(),
            rep.fixed.to_string().yellow()
        );
    } else {
        let head = if rep.halted {
            "✗ FSCK detenido:"
        } else {
            "✗ FSCK completado con errores:"
        };
        println!(
            "{} {} errores encontrados, {} reparados.\n",
            head.red().bold(),
            rep.found.to_string().yellow(),
            rep.fixed.to_string().yellow()
        );
    }
}

fn run(cli: Cli) -> Result<i32> {
    let opts = build_opts(&cli)?;
    debug!(?opts, "opciones de fsck");

    let mut image = load_image(&cli)?;

    let qfs = Fs::builder("qrfs")
        .opts(opts)
        .prompter(Box::new(ConsolePrompter::new()))
        .output(Arc::new(ConsoleOutput::default()))
        .build()
        .context("tabla de capacidades incompleta")?;

    let rep = run_fsck(&qfs, &mut image).context("fsck falló")?;
    print_summary(&rep);

    if rep.changed {
        if let Some(path) = &cli.image {
            let text = image.to_json().context("serializando la imagen")?;
            fs::write(path, text)
                .with_context(|| format!("no se pudo escribir {}", path.display()))?;
            println!("Imagen reparada guardada en {}", path.display());
        }
    }

    Ok(rep.exit_code())
}

fn main() {
    init_logging();

    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "fsck.qrfs:".red().bold());
            8
        }
    };
    process::exit(code);
}
