//! Generates `mirror_env_allowlist.rs` (every quoted `MIRROR_*` key the
//! sources read) and exports a per-build id as `BUILD_UUID`.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_PREFIX: &str = "\"MIRROR_";

fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Keys appear as whole string literals such as `"MIRROR_ROOT"`; literals
/// that merely start with the prefix (log tags, messages) are skipped.
fn quoted_keys(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices(KEY_PREFIX).filter_map(move |(start, _)| {
        let literal = &source[start + 1..];
        let key = &literal[..literal.find('"')?];
        key.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
            .then_some(key)
    })
}

fn main() -> io::Result<()> {
    let mut keys = BTreeSet::new();
    for file in source_files(Path::new("src"))? {
        let source = fs::read_to_string(&file)?;
        keys.extend(quoted_keys(&source).map(str::to_owned));
    }

    let out_dir = env::var_os("OUT_DIR").ok_or_else(|| io::Error::other("OUT_DIR unset"))?;
    let mut out = fs::File::create(Path::new(&out_dir).join("mirror_env_allowlist.rs"))?;
    writeln!(out, "pub const GENERATED_MIRROR_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in &keys {
        writeln!(out, "    {key:?},")?;
    }
    writeln!(out, "];")?;

    let built = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(io::Error::other)?;
    println!(
        "cargo:rustc-env=BUILD_UUID={}-{:x}{:08x}",
        env::var("CARGO_PKG_VERSION").unwrap_or_default(),
        built.as_secs(),
        built.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
