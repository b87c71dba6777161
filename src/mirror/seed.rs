use crate::mirror::assets::AssetArchiver;
use crate::mirror::eras::{EraTitles, PROFILE_TIMELINE, TimelinePhoto};
use crate::mirror::history::{HistoryLimits, cap, order_history};
use crate::mirror::model::{GreetingEntry, HistoryLog, ImageSlot, ProfileEntry};
use anyhow::{Context, Result};
use url::Url;

/// Thread the missing greeting months were recovered from.
const RECOVERED_GREETING_SOURCE: &str =
    "http://krsw.5ch.net/test/read.cgi/sakurazaka46/1723164478/";

/// A greeting month the official page no longer lists. The card is
/// `<image_dir><hash>.jpg` and the photo `<image_dir><hash>-01.jpg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredGreeting {
    pub month: &'static str,
    pub image_dir: &'static str,
    pub hash: &'static str,
}

pub const RECOVERED_GREETINGS: [RecoveredGreeting; 6] = [
    RecoveredGreeting {
        month: "2023-07",
        image_dir: "/images/14/65a/",
        hash: "2175019b0807171c8afa3701f8b94",
    },
    RecoveredGreeting {
        month: "2023-08",
        image_dir: "/images/14/214/",
        hash: "5514f902e2c48f8a6f56e2eeddbe8",
    },
    RecoveredGreeting {
        month: "2023-09",
        image_dir: "/images/14/462/",
        hash: "e76c3ccbee98f95e08bb725f5fc0d",
    },
    RecoveredGreeting {
        month: "2023-10",
        image_dir: "/images/14/8af/",
        hash: "92f1731e4a74bee5c5e2a8471765b",
    },
    RecoveredGreeting {
        month: "2024-02",
        image_dir: "/images/14/0af/",
        hash: "ea6443f6fbf4e6a372fe7761f8386",
    },
    RecoveredGreeting {
        month: "2024-03",
        image_dir: "/images/14/a3c/",
        hash: "a6c1d5686c5f7ca21e8d7c8fc2bf8",
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    pub profile_added: usize,
    pub greeting_added: usize,
    pub evicted: usize,
    pub downloads: usize,
    pub fallbacks: usize,
}

impl SeedOutcome {
    pub fn changed(&self) -> bool {
        self.profile_added + self.greeting_added + self.evicted > 0
    }
}

fn join(base: &Url, path: &str) -> Result<String> {
    base.join(path)
        .map(String::from)
        .with_context(|| format!("cannot resolve {path} against {base}"))
}

fn timeline_entry(
    photo: &TimelinePhoto,
    archiver: &AssetArchiver<'_>,
    titles: &EraTitles,
    base: &Url,
    out: &mut SeedOutcome,
) -> Result<ProfileEntry> {
    let url = join(base, &format!("{}{}", photo.image_dir, photo.image_file))?;
    let key = format!("{}_{}", photo.era, photo.date);
    let archived = archiver.archive_or_link(&url, "profile", &key, false, "seed");
    out.downloads += usize::from(archived.downloaded);
    out.fallbacks += usize::from(archived.fell_back);
    Ok(ProfileEntry {
        era: photo.era.to_string(),
        era_title: titles.resolve(photo.era),
        updated_at: format!("{}T00:00:00Z", photo.date),
        source_url: join(base, photo.news_path)?,
        image: archived.image,
    })
}

fn recovered_entry(
    recovered: &RecoveredGreeting,
    archiver: &AssetArchiver<'_>,
    base: &Url,
    out: &mut SeedOutcome,
) -> Result<GreetingEntry> {
    let stem = format!("{}{}", recovered.image_dir, recovered.hash);
    let mut archive = |slot: ImageSlot, path: String| -> Result<_> {
        let url = join(base, &path)?;
        let archived = archiver.archive_or_link(&url, slot.key(), recovered.month, false, "seed");
        out.downloads += usize::from(archived.downloaded);
        out.fallbacks += usize::from(archived.fell_back);
        Ok(archived.image)
    };
    let greeting_card = archive(ImageSlot::GreetingCard, format!("{stem}.jpg"))?;
    let greeting_photo = archive(ImageSlot::GreetingPhoto, format!("{stem}-01.jpg"))?;
    Ok(GreetingEntry {
        month: recovered.month.to_string(),
        updated_at: format!("{}-01T00:00:00Z", recovered.month),
        source_url: RECOVERED_GREETING_SOURCE.to_string(),
        greeting_card,
        greeting_photo,
    })
}

/// Add the curated profile timeline and the recovered greeting months to
/// `log`. Eras and months already present are left untouched.
pub fn seed_history(
    log: &mut HistoryLog,
    archiver: &AssetArchiver<'_>,
    titles: &EraTitles,
    base: &Url,
    limits: HistoryLimits,
) -> Result<SeedOutcome> {
    let mut out = SeedOutcome::default();

    for photo in &PROFILE_TIMELINE {
        if log.profile_history.iter().any(|e| e.era == photo.era) {
            continue;
        }
        let entry = timeline_entry(photo, archiver, titles, base, &mut out)?;
        log.profile_history.push(entry);
        out.profile_added += 1;
    }

    for recovered in &RECOVERED_GREETINGS {
        if log.greeting_history.iter().any(|e| e.month == recovered.month) {
            continue;
        }
        let entry = recovered_entry(recovered, archiver, base, &mut out)?;
        log.greeting_history.push(entry);
        out.greeting_added += 1;
    }

    let reordered = order_history(log);
    out.evicted = cap(&mut log.profile_history, limits.max_profile_entries)
        + cap(&mut log.greeting_history, limits.max_greeting_entries);
    tracing::debug!(
        profile_added = out.profile_added,
        greeting_added = out.greeting_added,
        reordered,
        "history seeded"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::assets::tests::FakeFetch;
    use crate::mirror::model::ImageRef;
    use crate::mirror::transport::Pacer;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    const UNLIMITED: HistoryLimits = HistoryLimits {
        max_profile_entries: 0,
        max_greeting_entries: 0,
    };

    fn archiver<'a>(root: &Path, fetch: &'a FakeFetch) -> AssetArchiver<'a> {
        AssetArchiver::new(
            root,
            &root.join("data/archive"),
            "https://sakurazaka46.com/",
            fetch,
            Pacer::new(Duration::ZERO),
        )
    }

    fn base() -> Url {
        Url::parse("https://sakurazaka46.com").expect("base")
    }

    fn seed(root: &Path, fetch: &FakeFetch, log: &mut HistoryLog) -> SeedOutcome {
        seed_history(log, &archiver(root, fetch), &EraTitles::default(), &base(), UNLIMITED)
            .expect("seed")
    }

    #[test]
    fn empty_history_gets_the_whole_timeline_newest_first() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let mut log = HistoryLog::default();

        let out = seed(tmp.path(), &fetch, &mut log);
        assert_eq!(out.profile_added, 10);
        assert_eq!(out.greeting_added, 6);
        assert_eq!(out.downloads, 10 + 12);

        let eras = log.profile_history.iter().map(|e| e.era.as_str()).collect::<Vec<_>>();
        assert_eq!(eras.first(), Some(&"14th"));
        assert_eq!(eras.last(), Some(&"debut"));

        let debut = &log.profile_history[9];
        assert_eq!(debut.updated_at, "2023-03-05T00:00:00Z");
        assert_eq!(debut.era_title, "初披露");
        assert_eq!(
            debut.source_url,
            "https://sakurazaka46.com/s/s46/news/detail/O00056?ima=0000"
        );
        let local = debut.image.local_path().expect("archived");
        assert!(local.starts_with("data/archive/profile/debut_2023-03-05_"));

        let months = log.greeting_history.iter().map(|e| e.month.as_str()).collect::<Vec<_>>();
        assert_eq!(
            months,
            vec!["2024-03", "2024-02", "2023-10", "2023-09", "2023-08", "2023-07"]
        );
        let july = &log.greeting_history[5];
        assert_eq!(july.updated_at, "2023-07-01T00:00:00Z");
        assert_eq!(july.source_url, RECOVERED_GREETING_SOURCE);
        assert!(july.greeting_photo.original_src.ends_with("2175019b0807171c8afa3701f8b94-01.jpg"));
    }

    #[test]
    fn reseeding_adds_and_downloads_nothing() {
        let tmp = tempdir().expect("tempdir");
        let mut log = HistoryLog::default();
        seed(tmp.path(), &FakeFetch::default(), &mut log);
        let snapshot = log.clone();

        let fetch = FakeFetch::default();
        let out = seed(tmp.path(), &fetch, &mut log);
        assert!(!out.changed());
        assert_eq!(fetch.count(), 0);
        assert_eq!(log, snapshot);
    }

    #[test]
    fn existing_eras_and_months_are_kept() {
        let tmp = tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let mine =
            ImageRef::archived("data/archive/profile/mine.jpg".into(), "https://e.com/8.jpg");
        let mut log = HistoryLog {
            profile_history: vec![ProfileEntry {
                era: "8th".into(),
                era_title: "custom".into(),
                updated_at: "2024-02-10T00:00:00Z".into(),
                source_url: "https://e.com/artist/62".into(),
                image: mine.clone(),
            }],
            greeting_history: vec![GreetingEntry {
                month: "2024-02".into(),
                updated_at: "2024-02-10T00:00:00Z".into(),
                source_url: "https://e.com/artist/62".into(),
                greeting_card: mine.clone(),
                greeting_photo: mine.clone(),
            }],
            ..HistoryLog::default()
        };

        let out = seed(tmp.path(), &fetch, &mut log);
        assert_eq!((out.profile_added, out.greeting_added), (9, 5));

        let eighth = log.profile_history.iter().find(|e| e.era == "8th").expect("8th");
        assert_eq!(eighth.era_title, "custom");
        assert_eq!(eighth.image, mine);
        let february = log.greeting_history.iter().find(|e| e.month == "2024-02");
        assert_eq!(february.map(|e| &e.greeting_card), Some(&mine));
    }

    #[test]
    fn unreachable_seed_images_link_remote() {
        let tmp = tempdir().expect("tempdir");
        let url = "https://sakurazaka46.com/images/14/ca0/572ecb7cb460dba8b46b387d34bd3/\
                   1000_1000_102400.jpg";
        let fetch = FakeFetch::failing(&[url]);
        let mut log = HistoryLog::default();

        let out = seed(tmp.path(), &fetch, &mut log);
        assert_eq!(out.fallbacks, 1);
        let debut = log.profile_history.iter().find(|e| e.era == "debut").expect("debut");
        assert_eq!(debut.image, ImageRef::remote(url));
    }
}
