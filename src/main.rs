//! Punto de entrada ("driver").
//!
//! Este módulo lee un modelo de programa serializado, orquesta las
//! fases del back end y expone una CLI.

use anyhow::{self, Context};
use bitflags::bitflags;
use clap::{self, crate_version, Arg, Command};
use miny18::{
    error::{CompileError, Diagnostics, Error},
    model::Program,
    source::Located,
    Compilation,
};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process,
};

bitflags! {
    /// Listados opcionales tras una compilación exitosa.
    struct Dumps: u32 {
        const SYMBOLS = 1 << 0;
        const IR = 1 << 1;
        const TREES = 1 << 2;
    }
}

fn main() {
    // Parsing de CLI
    let args = Command::new("Miny18 compiler")
        .version(crate_version!())
        .arg(
            Arg::new("model")
                .required(true)
                .value_name("MODEL")
                .help("Program model (JSON)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .value_name("FILE")
                .help("Output file ('-' for stdout)"),
        )
        .arg(Arg::new("symbols").short('s').help("Dump symbol layout"))
        .arg(Arg::new("ir").short('i').help("Dump optimized IR"))
        .arg(Arg::new("trees").short('c').help("Dump call trees"))
        .arg(Arg::new("debug").short('d').help("Debug logging"))
        .get_matches();

    let level = if args.is_present("debug") {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut dumps = Dumps::empty();
    for (flag, dump) in [
        ("symbols", Dumps::SYMBOLS),
        ("ir", Dumps::IR),
        ("trees", Dumps::TREES),
    ] {
        if args.is_present(flag) {
            dumps |= dump;
        }
    }

    // `required(true)` garantiza presencia
    let model_path = Path::new(args.value_of("model").unwrap_or_default());
    let output = match args.value_of("output") {
        Some(path) => PathBuf::from(path),
        None => model_path.with_extension("asm"),
    };

    let model = match read_model(model_path) {
        Ok(model) => model,
        Err(error) => {
            eprintln!("Error: {:?}", error);
            process::exit(1);
        }
    };

    let compilation = match miny18::build(&model) {
        Ok(compilation) => compilation,
        Err(error) => {
            eprint!("{}", report(error));
            process::exit(2);
        }
    };

    if let Err(error) = write_output(&model, &compilation, &output) {
        if output != Path::new("-") {
            let _ = fs::remove_file(&output);
        }

        match error {
            Error::Compile(error) => {
                eprint!("{}", report(error));
                process::exit(2);
            }

            error => {
                let error = anyhow::Error::new(error)
                    .context(format!("Failed to emit to: {}", output.display()));

                eprintln!("Error: {:?}", error);
                process::exit(1);
            }
        }
    }

    println!("---- Success ----");
    if let Err(error) = write_dumps(&model, &compilation, dumps) {
        eprintln!("Error: {:?}", error);
        process::exit(1);
    }
}

/// Los errores internos se distinguen de los del programa de entrada.
fn report(error: Located<CompileError>) -> Diagnostics {
    let internal = matches!(error.val(), CompileError::Internal { .. });
    let diagnostics = Diagnostics::from(error);

    if internal {
        diagnostics.kind("internal error")
    } else {
        diagnostics
    }
}

fn read_model(path: &Path) -> anyhow::Result<Program> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read model: {}", path.display()))?;

    serde_json::from_str(&source)
        .with_context(|| format!("Failed to decode model: {}", path.display()))
}

fn write_output(model: &Program, compilation: &Compilation, path: &Path) -> Result<(), Error> {
    if path == Path::new("-") {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        return compilation.emit(model, &mut stdout);
    }

    let mut file = BufWriter::new(File::create(path)?);
    compilation.emit(model, &mut file)?;
    file.flush()?;

    Ok(())
}

fn write_dumps(model: &Program, compilation: &Compilation, dumps: Dumps) -> io::Result<()> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    if dumps.contains(Dumps::SYMBOLS) {
        compilation.layout.dump(model, &mut stdout)?;
    }

    if dumps.contains(Dumps::IR) {
        for label in &compilation.layout.order {
            if let Some(function) = compilation.program.functions.get(label) {
                write!(stdout, "{}", function)?;
            }
        }
    }

    if dumps.contains(Dumps::TREES) {
        for tree in compilation.forest.trees() {
            tree.dump(&compilation.program.functions, &mut stdout)?;
        }
    }

    Ok(())
}
