//! LoD Script CLI
//!
//! Command-line tool for disassembling and recompiling event scripts.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lod_script::{
    compile, Disassembler, DisassemblerOptions, JsonFormatter, ListingFormatter, Meta, Script,
    ScriptFormatter, SummaryFormatter,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Legend of Dragoon event script disassembler and compiler.
///
/// Recovers code, tables and strings from script images, and compiles
/// edited JSON models back to binary.
#[derive(Parser, Debug)]
#[command(name = "lod-script")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Call metadata (JSON)
    #[arg(short, long, global = true, env = "LOD_SCRIPT_META")]
    meta: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disassemble a script image
    Disasm {
        /// Script image
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[command(flatten)]
        listing: ListingArgs,
    },
    /// Compile a JSON model back to a script image
    Compile {
        /// JSON model produced by `disasm --format json`
        input: PathBuf,

        /// Output image
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Check that scripts survive disassembly and recompilation unchanged
    Roundtrip {
        /// Script images
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Disassemble and round-trip every file under a directory
    #[cfg(feature = "batch")]
    Batch {
        /// Input directory
        input: PathBuf,

        /// Directory receiving listings
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        analysis: AnalysisArgs,

        #[command(flatten)]
        listing: ListingArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct AnalysisArgs {
    /// Heuristic preset
    #[arg(long, default_value = "normal")]
    mode: AnalysisMode,

    /// Additional branch address to probe (hex or decimal, repeatable)
    #[arg(short, long = "branch", value_parser = parse_address)]
    branches: Vec<u32>,
}

impl AnalysisArgs {
    fn options(&self) -> DisassemblerOptions {
        let options = match self.mode {
            AnalysisMode::Normal => DisassemblerOptions::new(),
            AnalysisMode::Fast => DisassemblerOptions::fast(),
            AnalysisMode::Thorough => DisassemblerOptions::thorough(),
        };
        self.branches
            .iter()
            .fold(options, |options, address| options.with_extra_branch(*address))
    }
}

#[derive(Args, Debug, Clone)]
struct ListingArgs {
    /// Print call indices instead of method names
    #[arg(long)]
    strip_names: bool,

    /// Omit commentary from listings
    #[arg(long)]
    strip_comments: bool,
}

impl ListingArgs {
    fn formatter(&self) -> ListingFormatter {
        ListingFormatter {
            strip_names: self.strip_names,
            strip_comments: self.strip_comments,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Assembly listing
    Text,
    /// Editable JSON model
    Json,
    /// Compact single-line summary
    Summary,
}

/// Analysis mode options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AnalysisMode {
    /// Normal analysis (default)
    Normal,
    /// Fast analysis (shallower lookahead)
    Fast,
    /// Thorough analysis (deeper lookahead)
    Thorough,
}

fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid address {text:?}: {err}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let filter = if cli.verbose {
        EnvFilter::new("lod_script=debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_meta(path: Option<&Path>) -> anyhow::Result<Meta> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening metadata {}", path.display()))?;
            Meta::from_reader(BufReader::new(file))
                .with_context(|| format!("reading metadata {}", path.display()))
        }
        None => Ok(Meta::new()),
    }
}

fn disassemble_path(path: &Path, meta: &Meta, options: DisassemblerOptions) -> anyhow::Result<(Vec<u8>, Script)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let script = Disassembler::with_options(meta, options)
        .disassemble(&bytes)
        .with_context(|| format!("disassembling {}", path.display()))?;
    Ok((bytes, script))
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let meta = load_meta(cli.meta.as_deref())?;

    match &cli.command {
        Command::Disasm {
            input,
            out,
            format,
            analysis,
            listing,
        } => {
            let (_, script) = disassemble_path(input, &meta, analysis.options())?;
            let formatter: Box<dyn ScriptFormatter> = match format {
                OutputFormat::Text => Box::new(listing.formatter()),
                OutputFormat::Json => Box::new(JsonFormatter::new()),
                OutputFormat::Summary => Box::new(SummaryFormatter::new()),
            };
            let output = formatter.format_script(&script, &meta, input);

            match out {
                Some(out) => std::fs::write(out, output)
                    .with_context(|| format!("writing {}", out.display()))?,
                None => print!("{output}"),
            }
            Ok(true)
        }
        Command::Compile { input, out } => {
            let json = std::fs::read_to_string(input)
                .with_context(|| format!("reading {}", input.display()))?;
            let script = Script::from_json(&json)
                .with_context(|| format!("parsing {}", input.display()))?;
            let bytes = compile(&script).with_context(|| format!("compiling {}", input.display()))?;
            std::fs::write(out, &bytes).with_context(|| format!("writing {}", out.display()))?;

            if !cli.quiet {
                println!("{}: {} bytes", out.display(), bytes.len());
            }
            Ok(true)
        }
        Command::Roundtrip { files, analysis } => {
            let mut success = true;

            for path in files {
                let (bytes, script) = disassemble_path(path, &meta, analysis.options())?;
                let compiled = compile(&script)
                    .with_context(|| format!("compiling {}", path.display()))?;

                if compiled == bytes {
                    if !cli.quiet {
                        println!("{}\tok\t{} diagnostics", path.display(), script.diagnostics.len());
                    }
                } else {
                    println!("{}\tMISMATCH", path.display());
                    success = false;
                }
            }
            Ok(success)
        }
        #[cfg(feature = "batch")]
        Command::Batch {
            input,
            out,
            analysis,
            listing,
        } => {
            use lod_script::batch::{self, BatchOptions, Outcome};

            if !input.is_dir() {
                anyhow::bail!("'{}' is not a directory", input.display());
            }

            let options = BatchOptions {
                output_dir: out.clone(),
                disassembler: analysis.options(),
                listing: listing.formatter(),
            };
            let reports = batch::process_directory(input, &meta, &options)?;
            let failures = reports.iter().filter(|report| !report.is_ok()).count();

            for report in &reports {
                match &report.outcome {
                    Outcome::Identical if cli.quiet => {}
                    Outcome::Identical => println!(
                        "{}\tok\t{} words\t{} diagnostics",
                        report.path.display(),
                        report.words,
                        report.diagnostics
                    ),
                    Outcome::Mismatch { expected, actual } => println!(
                        "{}\tMISMATCH\texpected {}\tgot {}",
                        report.path.display(),
                        expected,
                        actual
                    ),
                    Outcome::Failed(message) => {
                        println!("{}\tFAILED\t{}", report.path.display(), message);
                    }
                }
            }

            if !cli.quiet {
                println!("{} files, {} failures", reports.len(), failures);
            }
            Ok(failures == 0)
        }
    }
}
