use crate::mirror::model::ImageRef;
use crate::mirror::transport::{BinaryFetch, Pacer};
use crate::mirror::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

const FINGERPRINT_CHARS: usize = 10;
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcome {
    /// Path relative to the mirror root, `/`-separated.
    pub relative_path: String,
    pub downloaded: bool,
}

/// Result of archiving one image on a path where failures degrade to the
/// remote URL instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedImage {
    pub image: ImageRef,
    pub downloaded: bool,
    pub fell_back: bool,
}

/// Content-addressed, idempotent image store. The only writer under
/// `assets_dir`.
pub struct AssetArchiver<'a> {
    root: PathBuf,
    assets_dir: PathBuf,
    referer: String,
    fetcher: &'a dyn BinaryFetch,
    pacer: Pacer,
}

pub fn url_fingerprint(remote_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote_url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..FINGERPRINT_CHARS].to_string()
}

fn sanitize_component(raw: &str, allow_dot: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = false;
    for ch in raw.trim().chars() {
        let keep = ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || (allow_dot && ch == '.');
        if keep {
            out.push(ch);
            prev_sep = false;
        } else if !prev_sep {
            out.push('_');
            prev_sep = true;
        }
    }
    out.trim_matches(|c: char| c == '_' || c == '.').to_string()
}

fn url_path(remote_url: &str) -> String {
    match Url::parse(remote_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => remote_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

fn image_extension(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    ext.and_then(|ext| IMAGE_EXTENSIONS.into_iter().find(|known| *known == ext))
        .unwrap_or("jpg")
}

/// `<group>/<key>_<fingerprint>_<name>` for `remote_url`; pure.
pub fn asset_relative_name(remote_url: &str, group: &str, logical_key: &str) -> String {
    let path = url_path(remote_url);
    let group = match sanitize_component(group, false) {
        g if g.is_empty() => "misc".to_string(),
        g => g,
    };
    let key = match sanitize_component(logical_key, false) {
        k if k.is_empty() => "unknown".to_string(),
        k => k,
    };
    let original_name = path.rsplit('/').next().unwrap_or_default();
    let name = match sanitize_component(original_name, true) {
        n if n.is_empty() => format!("{group}.{}", image_extension(&path)),
        n => n,
    };
    format!("{group}/{key}_{}_{name}", url_fingerprint(remote_url))
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl<'a> AssetArchiver<'a> {
    pub fn new(
        root: &Path,
        assets_dir: &Path,
        referer: &str,
        fetcher: &'a dyn BinaryFetch,
        pacer: Pacer,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            assets_dir: assets_dir.to_path_buf(),
            referer: referer.to_string(),
            fetcher,
            pacer,
        }
    }

    fn relative_to_root(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.root) {
            Ok(rel) => to_slash_path(rel),
            Err(_) => absolute.display().to_string(),
        }
    }

    /// Local copy of `remote_url`, downloading only when the deterministic
    /// path is missing/empty or `force_refresh` is set.
    pub fn ensure(
        &self,
        remote_url: &str,
        group: &str,
        logical_key: &str,
        force_refresh: bool,
    ) -> Result<AssetOutcome> {
        let absolute = self
            .assets_dir
            .join(asset_relative_name(remote_url, group, logical_key));
        let relative_path = self.relative_to_root(&absolute);

        if !force_refresh && non_empty_file(&absolute) {
            return Ok(AssetOutcome {
                relative_path,
                downloaded: false,
            });
        }

        self.pacer.pace();
        let payload = self.fetcher.fetch_bytes(remote_url, &self.referer)?;
        if payload.is_empty() {
            anyhow::bail!("empty response body for {remote_url}");
        }
        write_atomic(&absolute, &payload)?;

        Ok(AssetOutcome {
            relative_path,
            downloaded: true,
        })
    }

    /// `ensure`, but a failure links the remote URL and records a warning.
    pub fn archive_or_link(
        &self,
        remote_url: &str,
        group: &str,
        logical_key: &str,
        force_refresh: bool,
        stage: &str,
    ) -> ArchivedImage {
        match self.ensure(remote_url, group, logical_key, force_refresh) {
            Ok(outcome) => ArchivedImage {
                image: ImageRef::archived(outcome.relative_path, remote_url),
                downloaded: outcome.downloaded,
                fell_back: false,
            },
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "ASSET_FALLBACK",
                    stage,
                    action: "link-remote",
                    subject: &format!("{group}/{logical_key}"),
                    url: remote_url,
                    retry: "next-run",
                    reason: "download-failed",
                    err: &format!("{err:#}"),
                });
                ArchivedImage {
                    image: ImageRef::remote(remote_url),
                    downloaded: false,
                    fell_back: true,
                }
            }
        }
    }

    /// Copy the archived file at `local_copy` (relative to the root) into the
    /// slot for `remote_url`, unless that slot is already filled and
    /// `force_refresh` is off.
    fn copy_into(
        &self,
        local_copy: &str,
        remote_url: &str,
        group: &str,
        logical_key: &str,
        force_refresh: bool,
    ) -> Result<AssetOutcome> {
        let absolute = self
            .assets_dir
            .join(asset_relative_name(remote_url, group, logical_key));
        let relative_path = self.relative_to_root(&absolute);
        if !force_refresh && non_empty_file(&absolute) {
            return Ok(AssetOutcome {
                relative_path,
                downloaded: false,
            });
        }

        let source = self.root.join(local_copy);
        let payload =
            fs::read(&source).with_context(|| format!("failed to read {}", source.display()))?;
        if payload.is_empty() {
            anyhow::bail!("archived copy is empty: {}", source.display());
        }
        write_atomic(&absolute, &payload)?;
        Ok(AssetOutcome {
            relative_path,
            downloaded: false,
        })
    }

    /// `archive_or_link`, but an already archived copy of the same URL is
    /// copied instead of downloaded again.
    pub fn archive_reusing(
        &self,
        remote_url: &str,
        group: &str,
        logical_key: &str,
        force_refresh: bool,
        local_copy: Option<&str>,
        stage: &str,
    ) -> ArchivedImage {
        if let Some(local_copy) = local_copy {
            match self.copy_into(local_copy, remote_url, group, logical_key, force_refresh) {
                Ok(outcome) => {
                    return ArchivedImage {
                        image: ImageRef::archived(outcome.relative_path, remote_url),
                        downloaded: false,
                        fell_back: false,
                    };
                }
                Err(err) => tracing::debug!("local copy unusable, downloading instead: {err:#}"),
            }
        }
        self.archive_or_link(remote_url, group, logical_key, force_refresh, stage)
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("asset path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage write in {}", parent.display()))?;
    tmp.write_all(payload)?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    pub(crate) struct FakeFetch {
        pub calls: RefCell<Vec<String>>,
        pub failing: BTreeSet<String>,
    }

    impl FakeFetch {
        pub(crate) fn failing(urls: &[&str]) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                failing: urls.iter().map(|u| u.to_string()).collect(),
            }
        }

        pub(crate) fn count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl BinaryFetch for FakeFetch {
        fn fetch_bytes(&self, url: &str, _referer: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(url.to_string());
            if self.failing.contains(url) {
                anyhow::bail!("simulated failure for {url}");
            }
            Ok(format!("bytes:{url}").into_bytes())
        }
    }

    fn archiver<'a>(root: &Path, fetch: &'a FakeFetch) -> AssetArchiver<'a> {
        AssetArchiver::new(
            root,
            &root.join("data/archive"),
            "https://example.com/",
            fetch,
            Pacer::new(Duration::ZERO),
        )
    }

    #[test]
    fn relative_name_is_deterministic_and_sanitized() {
        let url = "https://example.com/images/14/ca0/ab cd/1000_1000_102400.jpg?x=1";
        let a = asset_relative_name(url, "profile", "6th_2023-06-07");
        let b = asset_relative_name(url, "profile", "6th_2023-06-07");
        assert_eq!(a, b);
        assert!(a.starts_with("profile/6th_2023-06-07_"));
        assert!(a.ends_with("_1000_1000_102400.jpg"));
    }

    #[test]
    fn distinct_urls_under_same_key_do_not_collide() {
        let a = asset_relative_name("https://example.com/a/1000.jpg", "greeting_card", "2024-02");
        let b = asset_relative_name("https://example.com/b/1000.jpg", "greeting_card", "2024-02");
        assert_ne!(a, b);
    }

    #[test]
    fn nameless_urls_fall_back_to_group_name() {
        let name = asset_relative_name("https://example.com/", "greeting_photo", "");
        assert!(name.starts_with("greeting_photo/unknown_"));
        assert!(name.ends_with("_greeting_photo.jpg"));
    }

    #[test]
    fn second_ensure_reuses_existing_file() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let store = archiver(tmp.path(), &fetch);
        let url = "https://example.com/images/a.jpg";

        let first = store.ensure(url, "blog", "101", false).expect("first");
        let second = store.ensure(url, "blog", "101", false).expect("second");

        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("data/archive/blog/101_"));
        assert_eq!(fetch.count(), 1);
        let bytes = fs::read(tmp.path().join(&first.relative_path)).expect("read");
        assert_eq!(bytes, format!("bytes:{url}").into_bytes());
    }

    #[test]
    fn force_refresh_bypasses_cache() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let store = archiver(tmp.path(), &fetch);
        let url = "https://example.com/images/a.jpg";

        store.ensure(url, "member", "profile", false).expect("first");
        let again = store.ensure(url, "member", "profile", true).expect("forced");
        assert!(again.downloaded);
        assert_eq!(fetch.count(), 2);
    }

    #[test]
    fn empty_file_is_refetched() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let store = archiver(tmp.path(), &fetch);
        let url = "https://example.com/images/a.jpg";

        let first = store.ensure(url, "blog", "7", false).expect("first");
        fs::write(tmp.path().join(&first.relative_path), b"").expect("truncate");
        let second = store.ensure(url, "blog", "7", false).expect("second");
        assert!(second.downloaded);
    }

    #[test]
    fn fetch_failure_is_returned_and_nothing_written() {
        let tmp = tempdir().expect("tempdir");
        let url = "https://example.com/images/broken.jpg";
        let fetch = FakeFetch::failing(&[url]);
        let store = archiver(tmp.path(), &fetch);

        assert!(store.ensure(url, "blog", "9", false).is_err());
        let expected = tmp
            .path()
            .join("data/archive")
            .join(asset_relative_name(url, "blog", "9"));
        assert!(!expected.exists());
    }

    #[test]
    fn archive_or_link_falls_back_to_remote_url() {
        let tmp = tempdir().expect("tempdir");
        let ok = "https://example.com/images/ok.jpg";
        let bad = "https://example.com/images/bad.jpg";
        let fetch = FakeFetch::failing(&[bad]);
        let store = archiver(tmp.path(), &fetch);

        let good = store.archive_or_link(ok, "blog", "5", false, "posts");
        assert!(good.downloaded && !good.fell_back);
        assert!(good.image.local_path().is_some());

        let degraded = store.archive_or_link(bad, "blog", "5", false, "posts");
        assert!(degraded.fell_back);
        assert_eq!(degraded.image, ImageRef::remote(bad));
    }

    #[test]
    fn archived_copy_is_reused_without_a_second_download() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let store = archiver(tmp.path(), &fetch);
        let url = "https://example.com/images/photo.jpg";

        let slot = store.archive_or_link(url, "member", "profile", true, "profile");
        let copy = store.archive_reusing(
            url,
            "profile",
            "8th_2024-02-05",
            true,
            slot.image.local_path(),
            "history",
        );

        assert_eq!(fetch.count(), 1);
        assert!(!copy.downloaded && !copy.fell_back);
        let copied = copy.image.local_path().expect("local copy");
        assert!(copied.starts_with("data/archive/profile/8th_2024-02-05_"));
        assert_eq!(
            fs::read(tmp.path().join(copied)).expect("copy"),
            format!("bytes:{url}").into_bytes()
        );
    }

    #[test]
    fn missing_local_copy_falls_back_to_download() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let store = archiver(tmp.path(), &fetch);
        let url = "https://example.com/images/photo.jpg";

        let copy = store.archive_reusing(
            url,
            "profile",
            "7th_2023-10-01",
            true,
            Some("data/archive/member/gone.jpg"),
            "history",
        );
        assert!(copy.downloaded);
        assert_eq!(fetch.count(), 1);
    }
}
