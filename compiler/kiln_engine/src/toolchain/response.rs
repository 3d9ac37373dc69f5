//! Response files (`@file` arguments).
//!
//! The partial link passes every library object through a response file so
//! large libraries never hit command-line length limits.

use std::ffi::OsStr;
use std::path::Path;

use crate::error::BuildResult;
use crate::stamp;

/// Write one argument per line to `path`.
///
/// Arguments containing spaces, quotes or backslashes are double-quoted with
/// `"` and `\` escaped, which is how GNU-style response files are read.
pub fn write_response_file<S: AsRef<OsStr>>(path: &Path, args: &[S]) -> BuildResult<()> {
    let mut contents = String::new();
    for arg in args {
        contents.push_str(&quote_arg(&arg.as_ref().to_string_lossy()));
        contents.push('\n');
    }
    stamp::write_atomic(path, contents.as_bytes())
}

fn quote_arg(arg: &str) -> String {
    if !arg.contains([' ', '"', '\\', '\t']) {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
