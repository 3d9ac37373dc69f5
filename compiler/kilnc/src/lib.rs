//! Kiln CLI: argument parsing and report rendering for the `kiln` binary.
//!
//! `kiln build` runs the incremental pipeline against the Emscripten
//! toolchain; `kiln clean` removes the build directory.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kiln_engine::{
    clean, BuildLayout, BuildMode, BuildPipeline, BuildReport, BuildResult, CompileReport,
    EmscriptenToolchain, EngineConfig, FlagsFile, ToolchainFlags,
};

/// Incremental WebAssembly sketch builds.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Incremental WebAssembly sketch builder")]
pub struct Cli {
    /// Show every rebuild decision.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the library and sketch into `out/sketch.js` + `out/sketch.wasm`.
    Build(BuildArgs),
    /// Remove the build directory.
    Clean(CleanArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Library source directory.
    #[arg(long, default_value = "src")]
    pub library: PathBuf,

    /// Sketch source directory.
    #[arg(long, default_value = "sketch")]
    pub sketch: PathBuf,

    #[arg(long, default_value = "build")]
    pub build_dir: PathBuf,

    /// Header to precompile.
    #[arg(long)]
    pub pch: Option<PathBuf>,

    /// TOML flags file with `[common]` and per-mode tables.
    #[arg(long)]
    pub flags_file: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = ModeArg::Quick)]
    pub mode: ModeArg,

    /// Rebuild every stage regardless of freshness.
    #[arg(short, long)]
    pub force: bool,

    /// Remove the build directory before building.
    #[arg(long)]
    pub clean: bool,

    /// Parallel compile jobs (0 = host parallelism).
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Split library sources into this many unity chunks (0 = disabled).
    #[arg(long, default_value_t = 0)]
    pub unity_chunks: usize,

    /// C++ compiler driver.
    #[arg(long, default_value = "em++")]
    pub cxx: PathBuf,

    /// Archiver.
    #[arg(long, default_value = "emar")]
    pub ar: PathBuf,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[arg(long, default_value = "build")]
    pub build_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Debug,
    Quick,
    Release,
}

impl From<ModeArg> for BuildMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Debug => BuildMode::Debug,
            ModeArg::Quick => BuildMode::Quick,
            ModeArg::Release => BuildMode::Release,
        }
    }
}

impl Cli {
    /// Default tracing filter for the chosen verbosity; `RUST_LOG` overrides it.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "kiln_engine=debug,kilnc=debug"
        } else if self.quiet {
            "warn"
        } else {
            "kiln_engine=info,kilnc=info"
        }
    }
}

impl BuildArgs {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.library, &self.sketch, &self.build_dir)
            .with_mode(self.mode.into())
            .with_force(self.force)
            .with_jobs(self.jobs)
            .with_unity_chunks(self.unity_chunks);
        if let Some(header) = &self.pch {
            config = config.with_pch_header(header);
        }
        config
    }

    fn flags_file(&self) -> BuildResult<FlagsFile> {
        match &self.flags_file {
            Some(path) => FlagsFile::load(path),
            None => Ok(FlagsFile::default()),
        }
    }
}

/// Run one CLI invocation, printing the summary to stdout.
pub fn run(cli: &Cli) -> BuildResult<()> {
    match &cli.command {
        Command::Build(args) => {
            let report = build(args)?;
            if !cli.quiet {
                print!("{}", render_report(&report));
            }
            Ok(())
        }
        Command::Clean(args) => clean(&BuildLayout::new(&args.build_dir)),
    }
}

pub fn build(args: &BuildArgs) -> BuildResult<BuildReport> {
    let config = args.engine_config();
    if args.clean {
        clean(&config.layout)?;
    }
    let toolchain = EmscriptenToolchain::new()
        .with_compiler(&args.cxx)
        .with_archiver(&args.ar);
    let flags = ToolchainFlags::new(args.flags_file()?, &toolchain);
    tracing::debug!(?config, "starting build");
    BuildPipeline::new(&config, &toolchain, &flags).run()
}

/// Per-stage timings followed by unit counts.
pub fn render_report(report: &BuildReport) -> String {
    let mut out = String::new();
    for timing in &report.timings {
        let _ = writeln!(out, "  {:<24} {:>8.2?}", timing.stage.to_string(), timing.duration);
    }
    let _ = writeln!(out, "library: {}", render_counts(&report.library));
    let _ = writeln!(out, "sketch:  {}", render_counts(&report.sketch));
    if let Some(link) = &report.link {
        let state = match &link.reason {
            Some(reason) => format!("linked ({reason})"),
            None => "up to date".to_string(),
        };
        let _ = writeln!(out, "output:  {} {state}", link.output.display());
    }
    let _ = writeln!(
        out,
        "{} compiled, {} up to date, {} total in {:.2?}",
        report.compiled_count(),
        report.up_to_date_count(),
        report.total_units(),
        report.duration
    );
    out
}

fn render_counts(report: &CompileReport) -> String {
    let mut line = format!(
        "{} compiled, {} up to date, {} total",
        report.compiled.len(),
        report.up_to_date.len(),
        report.total()
    );
    if report.fast_path {
        line.push_str(" (fast path)");
    }
    line
}
