//! fmlpack CLI
//!
//! Create, extract and list FML archives (similar to the tar command).

use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fmlpack::{
    extract, list, pack, BinaryPolicy, Error, ExtractOptions, PackOptions, SymlinkPolicy, WalkOptions,
    FORMAT_SPEC,
};
use tracing::{debug, Level};

#[derive(Parser, Debug)]
#[command(name = "fmlpack")]
#[command(version)]
#[command(about = "Pack directory trees into FML text archives and back")]
struct Cli {
    /// Verbose output (-v for progress, -vv for debugging)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an archive from files and directories
    #[command(visible_alias = "c")]
    Create {
        /// Files and directories to archive
        #[arg(required_unless_present = "include_spec")]
        inputs: Vec<PathBuf>,

        /// Output archive file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Base directory for relative inputs and archive paths
        #[arg(short = 'C', long)]
        directory: Option<PathBuf>,

        /// Exclude paths matching a gitignore-style pattern (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,

        /// Also honour .gitignore files and skip .git directories
        #[arg(long)]
        gitignore: bool,

        /// Put the FML format description first in the archive
        #[arg(long)]
        include_spec: bool,

        /// Archive the ignore files themselves
        #[arg(long)]
        include_ignore_files: bool,

        /// How to store files that are not text
        #[arg(long, value_enum, default_value_t = BinaryArg::Base64)]
        binary: BinaryArg,

        /// How to treat symbolic links (never followed)
        #[arg(long, value_enum, default_value_t = SymlinkArg::Skip)]
        symlinks: SymlinkArg,

        /// Fail when any input is skipped
        #[arg(long)]
        strict: bool,
    },

    /// Extract an archive
    #[command(name = "x", visible_alias = "extract")]
    Extract {
        /// Archive file to extract (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Directory to extract to
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        /// Fail on collisions and on text outside of any entry
        #[arg(long)]
        strict: bool,
    },

    /// List contents of an archive
    #[command(name = "t", visible_alias = "list")]
    List {
        /// Archive file to list (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },

    /// Print the FML format description
    Spec,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BinaryArg {
    Base64,
    Skip,
}

impl From<BinaryArg> for BinaryPolicy {
    fn from(arg: BinaryArg) -> Self {
        match arg {
            BinaryArg::Base64 => BinaryPolicy::Base64,
            BinaryArg::Skip => BinaryPolicy::Skip,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SymlinkArg {
    Skip,
    Error,
}

impl From<SymlinkArg> for SymlinkPolicy {
    fn from(arg: SymlinkArg) -> Self {
        match arg {
            SymlinkArg::Skip => SymlinkPolicy::Skip,
            SymlinkArg::Error => SymlinkPolicy::Error,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    debug!("Parsed CLI arguments: {cli:?}");

    let verbose = cli.verbose > 0;
    let ok = match cli.command {
        Commands::Create {
            inputs,
            output,
            directory,
            exclude,
            gitignore,
            include_spec,
            include_ignore_files,
            binary,
            symlinks,
            strict,
        } => {
            let walk = WalkOptions {
                excludes: exclude,
                use_gitignore: gitignore,
                include_ignore_files,
                binary: binary.into(),
                symlinks: symlinks.into(),
                ..Default::default()
            };
            let options = PackOptions { walk, include_spec };
            create_archive(inputs, output, directory, options, strict)?
        }
        Commands::Extract {
            input,
            directory,
            overwrite,
            strict,
        } => {
            let options = ExtractOptions {
                overwrite,
                reject_stray_text: strict,
            };
            extract_archive(input, directory, options, strict, verbose)?
        }
        Commands::List { input } => {
            list_archive(input, verbose)?;
            true
        }
        Commands::Spec => {
            print!("{}", FORMAT_SPEC);
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn setup_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .without_time()
        .compact()
        .init();
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn create_archive(
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    directory: Option<PathBuf>,
    mut options: PackOptions,
    strict: bool,
) -> Result<bool> {
    let cwd = env::current_dir().context("Failed to determine the current directory")?;
    let base = directory.map(|dir| absolute(&cwd, &dir));
    let roots: Vec<PathBuf> = inputs
        .iter()
        .map(|input| absolute(base.as_deref().unwrap_or(&cwd), input))
        .collect();
    options.walk.base = base;

    let report = match &output {
        Some(output_path) => {
            let output_path = absolute(&cwd, output_path);
            let file = File::create(&output_path)
                .with_context(|| format!("Failed to create: {}", output_path.display()))?;
            options.walk.skip_paths.push(output_path.clone());

            let report = pack(&roots, &options, BufWriter::new(file))
                .with_context(|| format!("Failed to write: {}", output_path.display()))?;
            println!("FML archive created: {}", output_path.display());
            report
        }
        None => {
            let stdout = io::stdout();
            pack(&roots, &options, BufWriter::new(stdout.lock())).context("Failed to write archive")?
        }
    };

    debug!("{} directories, {} files", report.directories, report.files);
    summarize("input(s) skipped or failed", &report.issues);
    Ok(report.is_success(strict))
}

fn open_input(input: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to read: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

fn extract_archive(
    input: Option<PathBuf>,
    directory: PathBuf,
    options: ExtractOptions,
    strict: bool,
    verbose: bool,
) -> Result<bool> {
    let cwd = env::current_dir().context("Failed to determine the current directory")?;
    let target = absolute(&cwd, &directory);
    let reader = open_input(input.as_deref())?;

    let report = extract(reader, &target, &options)
        .with_context(|| format!("Failed to extract into: {}", target.display()))?;

    if verbose {
        for dir in &report.directories {
            println!("Created directory: {}", dir);
        }
        for file in &report.files {
            println!("Extracted: {}", file);
        }
    }

    summarize("entry(ies) not extracted", &report.failures);
    Ok(report.is_success(strict))
}

fn list_archive(input: Option<PathBuf>, verbose: bool) -> Result<()> {
    let reader = open_input(input.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for item in list(reader) {
        let entry = item.context("Failed to read archive")?;
        if !verbose {
            writeln!(out, "{}", entry.path)?;
        } else if entry.is_dir {
            writeln!(out, "{}  dir", entry.path)?;
        } else {
            let enc = if entry.is_binary { "base64" } else { "text" };
            writeln!(out, "{}  {}  {}", entry.path, enc, entry.size)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Individual problems were already logged as they happened
fn summarize(what: &str, problems: &[Error]) {
    if !problems.is_empty() {
        eprintln!("fmlpack: {} {}", problems.len(), what);
    }
}
