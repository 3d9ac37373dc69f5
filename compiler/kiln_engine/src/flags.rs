//! Compiler and link flags.
//!
//! Flags come from a [`FlagsProvider`]. The engine only cares about two
//! derived values: the canonical compile-flags hash (defines plus compiler
//! flags, order-insensitive) and the link-flags hash.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::hash::{hash_flag_set, hash_string, ContentHash};
use crate::toolchain::Toolchain;

/// Optimization profile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Debug,
    #[default]
    Quick,
    Release,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::Debug => "debug",
            BuildMode::Quick => "quick",
            BuildMode::Release => "release",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(BuildMode::Debug),
            "quick" => Some(BuildMode::Quick),
            "release" => Some(BuildMode::Release),
            _ => None,
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags for one invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Preprocessor defines, with or without a leading `-D`.
    pub defines: Vec<String>,
    pub compiler_flags: Vec<String>,
    pub link_flags: Vec<String>,
}

impl BuildFlags {
    /// Arguments passed to every compile: defines as `-D...`, then compiler flags.
    pub fn compile_args(&self) -> Vec<String> {
        self.defines
            .iter()
            .map(|d| {
                if d.starts_with("-D") {
                    d.clone()
                } else {
                    format!("-D{d}")
                }
            })
            .chain(self.compiler_flags.iter().cloned())
            .collect()
    }

    /// Canonical hash of everything that affects object code.
    pub fn flags_hash(&self) -> ContentHash {
        hash_flag_set(&self.compile_args())
    }

    /// Hash of the link flags. Order matters for link lines, so it is kept.
    pub fn link_flags_hash(&self) -> ContentHash {
        hash_string(&self.link_flags.join("\n"))
    }
}

/// Supplies the flags and compiler identity for a build.
pub trait FlagsProvider: Send + Sync {
    fn build_flags(&self, mode: BuildMode) -> BuildResult<BuildFlags>;

    /// A string that changes whenever the compiler does.
    fn compiler_version(&self) -> BuildResult<String>;
}

/// The same flags for every mode, with a fixed version string.
#[derive(Clone, Debug)]
pub struct FixedFlags {
    pub flags: BuildFlags,
    pub version: String,
}

impl FixedFlags {
    pub fn new(flags: BuildFlags, version: impl Into<String>) -> Self {
        FixedFlags {
            flags,
            version: version.into(),
        }
    }
}

impl FlagsProvider for FixedFlags {
    fn build_flags(&self, _mode: BuildMode) -> BuildResult<BuildFlags> {
        Ok(self.flags.clone())
    }

    fn compiler_version(&self) -> BuildResult<String> {
        Ok(self.version.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FlagSection {
    defines: Vec<String>,
    compiler_flags: Vec<String>,
    link_flags: Vec<String>,
}

/// A TOML flags file.
///
/// ```toml
/// [common]
/// defines = ["PLATFORM_WASM"]
/// compiler_flags = ["-std=gnu++17", "-fno-exceptions"]
/// link_flags = ["-sMODULARIZE=1"]
///
/// [release]
/// compiler_flags = ["-O3", "-flto"]
/// ```
///
/// The table for the selected mode is appended to `[common]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlagsFile {
    common: FlagSection,
    debug: FlagSection,
    quick: FlagSection,
    release: FlagSection,
}

impl FlagsFile {
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        Self::parse(&text, path)
    }

    /// Parse flags file text; `path` is used only for error messages.
    pub fn parse(text: &str, path: &Path) -> BuildResult<Self> {
        toml::from_str(text).map_err(|e| BuildError::InvalidFlagsFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn resolve(&self, mode: BuildMode) -> BuildFlags {
        let section = match mode {
            BuildMode::Debug => &self.debug,
            BuildMode::Quick => &self.quick,
            BuildMode::Release => &self.release,
        };
        let join = |a: &[String], b: &[String]| a.iter().chain(b).cloned().collect::<Vec<_>>();
        BuildFlags {
            defines: join(&self.common.defines, &section.defines),
            compiler_flags: join(&self.common.compiler_flags, &section.compiler_flags),
            link_flags: join(&self.common.link_flags, &section.link_flags),
        }
    }
}

/// Flags from a [`FlagsFile`], versioned by the toolchain's own report.
pub struct ToolchainFlags<'a, T: Toolchain + ?Sized> {
    file: FlagsFile,
    toolchain: &'a T,
}

impl<'a, T: Toolchain + ?Sized> ToolchainFlags<'a, T> {
    pub fn new(file: FlagsFile, toolchain: &'a T) -> Self {
        ToolchainFlags { file, toolchain }
    }
}

impl<T: Toolchain + ?Sized> FlagsProvider for ToolchainFlags<'_, T> {
    fn build_flags(&self, mode: BuildMode) -> BuildResult<BuildFlags> {
        Ok(self.file.resolve(mode))
    }

    fn compiler_version(&self) -> BuildResult<String> {
        self.toolchain.version()
    }
}
