use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const UNKNOWN_ERA: &str = "unknown";

const DEFAULT_ERA_TITLES: [(&str, &str); 10] = [
    ("debut", "初披露"),
    ("6th", "Start over!"),
    ("7th", "承認欲求"),
    ("8th", "何歳の頃に戻りたいのか？"),
    ("9th", "自業自得"),
    ("10th", "I want tomorrow to come"),
    ("11th", "UDAGAWA GENERATION"),
    ("12th", "Make or Break"),
    ("13th", "Addiction"),
    ("14th", "The growing up train"),
];

/// One officially announced profile photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelinePhoto {
    pub era: &'static str,
    /// Announcement day, `YYYY-MM-DD`.
    pub date: &'static str,
    pub news_path: &'static str,
    /// Directory part of the image path, ending in `/`.
    pub image_dir: &'static str,
    pub image_file: &'static str,
}

const fn photo(
    era: &'static str,
    date: &'static str,
    news_path: &'static str,
    image_dir: &'static str,
) -> TimelinePhoto {
    TimelinePhoto {
        era,
        date,
        news_path,
        image_dir,
        image_file: "1000_1000_102400.jpg",
    }
}

/// Curated official profile photos, oldest first.
pub const PROFILE_TIMELINE: [TimelinePhoto; 10] = [
    photo(
        "debut",
        "2023-03-05",
        "/s/s46/news/detail/O00056?ima=0000",
        "/images/14/ca0/572ecb7cb460dba8b46b387d34bd3/",
    ),
    photo(
        "6th",
        "2023-06-07",
        "/s/s46/news/detail/R00229?ima=0000",
        "/images/14/af7/a0011a634fa1ccec92d152ee39c91/",
    ),
    photo(
        "7th",
        "2023-10-01",
        "/s/s46/news/detail/R00260?ima=0000",
        "/images/14/842/73cd105bf3acf943503d8249d69e4/",
    ),
    photo(
        "8th",
        "2024-02-04",
        "/s/s46/news/detail/R00299?ima=0000",
        "/images/14/180/606c2dc266ddd3747e7e21558556c/",
    ),
    photo(
        "9th",
        "2024-06-06",
        "/s/s46/news/detail/R00337?ima=0000",
        "/images/14/be0/fe91190770835022bc200192706bb/",
    ),
    photo(
        "10th",
        "2024-10-03",
        "/s/s46/news/detail/R00379?ima=0000",
        "/images/14/85d/f84df7c62d914449bce4c1fdc86ea/",
    ),
    photo(
        "11th",
        "2025-02-03",
        "/s/s46/news/detail/R00411?ima=0000",
        "/images/14/ea5/a2067241562a73164d6dbee181f64/",
    ),
    photo(
        "12th",
        "2025-06-04",
        "/s/s46/news/detail/R00461?ima=0000",
        "/images/14/708/a6b4e3b457ed47f5694338bc46491/",
    ),
    photo(
        "13th",
        "2025-10-01",
        "/s/s46/news/detail/R00496?ima=0000",
        "/images/14/833/2715333dadd74a1157f37fdbf0108/",
    ),
    photo(
        "14th",
        "2026-02-02",
        "/s/s46/news/detail/R00521?ima=0000",
        "/images/14/44a/4e7a8c8ab86faba15404dffa70f48/",
    ),
];

fn era_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[/_\-.])(debut|\d{1,2}(?:st|nd|rd|th))(?:[/_\-.]|$)")
            .unwrap_or_else(|err| panic!("era token pattern is invalid: {err}"))
    })
}

/// Best-effort era label for a profile image URL.
pub fn classify_era(remote_url: &str) -> Option<String> {
    if let Some(known) = PROFILE_TIMELINE
        .iter()
        .find(|photo| remote_url.contains(photo.image_dir))
    {
        return Some(known.era.to_string());
    }

    let path = remote_url.split(['?', '#']).next().unwrap_or_default();
    era_token_pattern()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn ordinal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,3})(?:st|nd|rd|th)$")
            .unwrap_or_else(|err| panic!("ordinal pattern is invalid: {err}"))
    })
}

/// Position of `label` in the release sequence: `debut` is 0, `<n>th` is n.
/// Labels outside the sequence (including `unknown`) have no rank.
pub fn era_rank(label: &str) -> Option<u32> {
    let label = label.trim();
    if label.eq_ignore_ascii_case("debut") {
        return Some(0);
    }
    ordinal_pattern()
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|n| n.as_str().parse().ok())
}

#[derive(Debug, Clone)]
pub struct EraTitles {
    table: BTreeMap<String, String>,
}

impl Default for EraTitles {
    fn default() -> Self {
        Self {
            table: DEFAULT_ERA_TITLES
                .iter()
                .map(|(label, title)| ((*label).to_string(), (*title).to_string()))
                .collect(),
        }
    }
}

impl EraTitles {
    /// Built-in table overlaid with the lookup file at `path`. A missing or
    /// malformed file leaves the built-in table in place.
    pub fn load(path: &Path) -> Self {
        let mut titles = Self::default();
        let Ok(raw) = fs::read_to_string(path) else {
            return titles;
        };
        titles.overlay_str(&raw);
        titles
    }

    fn overlay_str(&mut self, raw: &str) {
        let Ok(Value::Object(map)) = json5::from_str::<Value>(raw) else {
            tracing::debug!("era title lookup is not an object; using built-in titles");
            return;
        };
        for (key, value) in map {
            let label = key.trim();
            let title = match &value {
                Value::String(s) => s.trim().to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if !label.is_empty() && !title.is_empty() {
                self.table.insert(label.to_string(), title);
            }
        }
    }

    /// Title for `label`; empty when unknown.
    pub fn resolve(&self, label: &str) -> String {
        let label = label.trim();
        if label.is_empty() {
            return String::new();
        }
        self.table.get(label).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}
