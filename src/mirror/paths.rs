use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MirrorPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub posts_file: PathBuf,
    pub member_file: PathBuf,
    pub history_file: PathBuf,
    pub era_titles_file: PathBuf,
    pub assets_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl MirrorPaths {
    pub fn under(root: &Path) -> Self {
        Self::with_data_dir(root, root.join("data"))
    }

    fn with_data_dir(root: &Path, data_dir: PathBuf) -> Self {
        Self {
            root: root.to_path_buf(),
            posts_file: data_dir.join("posts.json"),
            member_file: data_dir.join("member.json"),
            history_file: data_dir.join("member_history.json"),
            era_titles_file: data_dir.join("member_single_titles.json"),
            assets_dir: data_dir.join("archive"),
            logs_dir: data_dir.join("logs"),
            data_dir,
        }
    }

    /// Absolute location of an asset path recorded relative to `root`.
    pub fn resolve_relative(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<MirrorPaths> {
    let cwd = env::current_dir().context("current directory could not be resolved")?;
    let root = env_or_default_path("MIRROR_ROOT", cwd);
    let data_dir = env_or_default_path("MIRROR_DATA_DIR", root.join("data"));

    let mut paths = MirrorPaths::with_data_dir(&root, data_dir);
    paths.logs_dir = env_or_default_path("MIRROR_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}
