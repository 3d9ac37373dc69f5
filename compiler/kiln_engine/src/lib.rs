//! Kiln Incremental Build Engine
//!
//! Builds a static library and a sketch translation unit for a WebAssembly
//! target, then links them into a `.js` + `.wasm` artifact pair. Every stage
//! decides on its own whether its output is still valid, so a second run
//! with no changes does no work at all.
//!
//! # Pipeline
//!
//! ```text
//! FlagsProvider ──► PchManager ──► ParallelCompiler (library units)
//!                                        │
//!                                        ▼
//!                               LibraryArchiver (partial link + thin archive)
//!                                        │
//!                                        ▼
//!                   ParallelCompiler (sketch units) ──► FinalLinker
//! ```
//!
//! Stages run strictly in order; only compilation jobs run in parallel.
//! Upstream invalidation always propagates downstream: a recompiled object
//! forces the partial link, a rebuilt archive forces the final link.
//!
//! # Build Directory
//!
//! ```text
//! build/
//! ├── pch/precompiled.pch      # precompiled header (+ .d depfile)
//! ├── pch_metadata.json        # header hash, flags hash, compiler version
//! ├── obj/                     # library objects and depfiles
//! ├── unity/                   # generated unity chunks (optional)
//! ├── lib/libmerged.o          # relocatable merge of all library objects
//! ├── lib/liblibrary.a         # thin archive referencing libmerged.o
//! ├── library_metadata.json    # fast-path record
//! ├── sketch/                  # sketch objects and depfiles
//! ├── sketch_metadata.json
//! ├── out/sketch.js            # final artifact
//! ├── out/sketch.wasm          # binary payload
//! └── link_metadata.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kiln_engine::{BuildPipeline, EmscriptenToolchain, EngineConfig, FlagsFile, ToolchainFlags};
//!
//! let config = EngineConfig::new("src", "sketch", "build").with_jobs(8);
//! let toolchain = EmscriptenToolchain::new();
//! let flags = ToolchainFlags::new(FlagsFile::load("build_flags.toml")?, &toolchain);
//!
//! let report = BuildPipeline::new(&config, &toolchain, &flags).run()?;
//! println!("{} compiled, {} up to date", report.compiled_count(), report.up_to_date_count());
//! ```

pub mod archive;
pub mod cancel;
pub mod compile;
pub mod depfile;
pub mod error;
pub mod flags;
pub mod hash;
pub mod layout;
pub mod link;
pub mod metadata;
pub mod pch;
pub mod pipeline;
pub mod rebuild;
pub mod stamp;
pub mod testing;
pub mod toolchain;
pub mod units;

pub use archive::{ArchiveOutcome, LibraryArchiver, MergeReason};
pub use cancel::CancelToken;
pub use compile::{fast_path_applies, CompileReport, FastPathInputs, ParallelCompiler};
pub use depfile::{Depfile, DepfileError};
pub use error::{BuildError, BuildResult, UnitFailure};
pub use flags::{BuildFlags, BuildMode, FixedFlags, FlagsFile, FlagsProvider, ToolchainFlags};
pub use hash::{combine_hashes, hash_bytes, hash_file, hash_flag_set, hash_string, ContentHash};
pub use layout::{BuildLayout, EngineConfig};
pub use link::{wasm_companion, FinalLinker, LinkOutcome, LinkReason};
pub use metadata::{AuxFile, LibraryMetadata, LinkMetadata, MetadataFile, PchMetadata};
pub use pch::{PchArtifact, PchManager, PchOutcome, PchRebuildReason};
pub use pipeline::{clean, BuildPipeline, BuildReport, Stage, StageTiming};
pub use rebuild::{Decision, DecisionEngine, RebuildReason};
pub use toolchain::{
    Capability, EmscriptenToolchain, HeaderJob, LinkJob, ToolOutput, Toolchain, UnitJob,
};
pub use units::{discover_sources, newest_mtime, units_for, write_unity_chunks, CompilationUnit};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for build output.
///
/// Call this once at startup. Safe to call multiple times.
/// `RUST_LOG` takes precedence over `default_directive`
/// (e.g. `RUST_LOG=kiln_engine=debug` shows every rebuild decision).
pub fn init_tracing(default_directive: &str) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_level(true))
            .with(filter)
            .try_init();
    });
}
