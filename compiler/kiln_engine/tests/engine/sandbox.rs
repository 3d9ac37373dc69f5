use std::fs;
use std::path::{Path, PathBuf};

use kiln_engine::testing::FakeToolchain;
use kiln_engine::{
    BuildFlags, BuildPipeline, BuildReport, BuildResult, CancelToken, CompilationUnit,
    EngineConfig, FixedFlags,
};
use tempfile::TempDir;

/// A temporary project: `lib/` sources, `sketch/sketch.cpp`, a PCH header
/// under `include/`, and a `build/` directory.
pub struct Sandbox {
    _dir: TempDir,
    pub root: PathBuf,
    pub config: EngineConfig,
    pub fake: FakeToolchain,
    pub flags: FixedFlags,
}

impl Sandbox {
    pub fn new(library: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for sub in ["lib", "sketch", "include"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        for name in library {
            fs::write(root.join("lib").join(name), format!("int {};\n", stem(name))).unwrap();
        }
        fs::write(root.join("sketch/sketch.cpp"), "int main() { return 0; }\n").unwrap();
        fs::write(root.join("include/pch.h"), "#pragma once\n").unwrap();

        let config = EngineConfig::new(root.join("lib"), root.join("sketch"), root.join("build"))
            .with_jobs(4);
        let flags = FixedFlags::new(
            BuildFlags {
                defines: vec!["PLATFORM_WASM".to_string()],
                compiler_flags: vec!["-std=gnu++17".to_string()],
                link_flags: vec!["-sMODULARIZE=1".to_string()],
            },
            "fake-em++ 1.0",
        );
        Sandbox {
            _dir: dir,
            root,
            config,
            fake: FakeToolchain::new(),
            flags,
        }
    }

    #[must_use]
    pub fn with_pch(mut self) -> Self {
        let header = self.pch_header();
        self.config = self.config.with_pch_header(header);
        self
    }

    pub fn lib(&self, name: &str) -> PathBuf {
        self.root.join("lib").join(name)
    }

    pub fn sketch_source(&self) -> PathBuf {
        self.root.join("sketch/sketch.cpp")
    }

    pub fn pch_header(&self) -> PathBuf {
        self.root.join("include/pch.h")
    }

    /// The unit the pipeline builds for library source `name`.
    pub fn unit(&self, name: &str) -> CompilationUnit {
        CompilationUnit::for_source(
            &self.lib(name),
            &self.config.library_dir,
            &self.config.layout.obj_dir(),
        )
    }

    pub fn run(&self) -> BuildResult<BuildReport> {
        self.run_config(&self.config, CancelToken::new())
    }

    pub fn run_forced(&self) -> BuildResult<BuildReport> {
        let config = self.config.clone().with_force(true);
        self.run_config(&config, CancelToken::new())
    }

    pub fn run_with_cancel(&self, cancel: CancelToken) -> BuildResult<BuildReport> {
        self.run_config(&self.config, cancel)
    }

    pub fn run_config(&self, config: &EngineConfig, cancel: CancelToken) -> BuildResult<BuildReport> {
        BuildPipeline::new(config, &self.fake, &self.flags)
            .with_cancel(cancel)
            .run()
    }

    /// Run, then forget every invocation so the next run counts from zero.
    pub fn settle(&self) -> BuildReport {
        let report = self.run().unwrap();
        self.fake.reset_invocations();
        report
    }
}

pub fn names(units: &[CompilationUnit]) -> Vec<String> {
    let mut names: Vec<String> = units.iter().map(CompilationUnit::name).collect();
    names.sort();
    names
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("x")
}
