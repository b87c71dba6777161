use crate::mirror::model::{
    ContentBlock, GreetingEntry, HISTORY_VERSION, HistoryLog, ImageRef, MemberProfile, Post,
    ProfileEntry,
};
use crate::mirror::eras::UNKNOWN_ERA;
use crate::mirror::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

fn warn_reset(path: &Path, reason: &str) {
    warn::emit(WarnEvent {
        code: "STATE_RESET",
        stage: "load",
        action: "use-default",
        subject: &path.display().to_string(),
        url: "",
        retry: "rewritten-next-save",
        reason,
        err: "",
    });
}

/// Parsed JSON at `path`, or `None` when the file is missing, unreadable or
/// not JSON.
fn read_json(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn_reset(path, &format!("unreadable: {err}"));
            return None;
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn_reset(path, &format!("invalid json: {err}"));
            None
        }
    }
}

fn str_field(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn id_field(obj: &Value) -> Option<u64> {
    match obj.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn image_field(obj: &Value) -> Option<ImageRef> {
    let original_src = str_field(obj, "originalSrc");
    let src = str_field(obj, "src");
    match (src.is_empty(), original_src.is_empty()) {
        (true, true) => None,
        (true, false) => Some(ImageRef::remote(&original_src)),
        (false, true) => Some(ImageRef {
            original_src: src.clone(),
            src,
        }),
        (false, false) => Some(ImageRef { src, original_src }),
    }
}

fn image_at(obj: &Value, key: &str) -> Option<ImageRef> {
    obj.get(key).filter(|v| v.is_object()).and_then(image_field)
}

fn parse_block(value: &Value) -> Option<ContentBlock> {
    match value.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = value.get("text").and_then(Value::as_str)?;
            Some(ContentBlock::Text {
                text: text.to_string(),
            })
        }
        Some("image") => image_field(value).map(ContentBlock::Image),
        _ => None,
    }
}

fn parse_post(value: &Value) -> Option<Post> {
    let id = id_field(value)?;
    let mut post = Post {
        id,
        title: str_field(value, "title"),
        date: str_field(value, "date"),
        tags: Vec::new(),
        content_blocks: value
            .get("contentBlocks")
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(parse_block).collect())
            .unwrap_or_default(),
        source_url: str_field(value, "sourceUrl"),
    };
    if post.content_blocks.is_empty() {
        // Records written before content blocks existed carry flat text.
        let content = str_field(value, "content");
        if !content.is_empty() {
            post.content_blocks.push(ContentBlock::Text { text: content });
        }
    }
    if let Some(tags) = value.get("tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            post.push_tag(tag);
        }
    }
    Some(post)
}

pub fn load_posts(path: &Path) -> Vec<Post> {
    let Some(value) = read_json(path) else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        warn_reset(path, "posts file is not an array");
        return Vec::new();
    };
    let posts = items.iter().filter_map(parse_post).collect::<Vec<_>>();
    if posts.len() != items.len() {
        tracing::warn!(
            dropped = items.len() - posts.len(),
            "posts without a usable id were ignored in {}",
            path.display()
        );
    }
    posts
}

pub fn load_profile(path: &Path) -> Option<MemberProfile> {
    let value = read_json(path)?;
    if !value.is_object() {
        warn_reset(path, "profile file is not an object");
        return None;
    }
    match serde_json::from_value::<MemberProfile>(value.clone()) {
        Ok(profile) => Some(profile),
        Err(_) => {
            // Keep whatever slots are still readable so change detection
            // does not force needless refreshes.
            let images = value.get("images").cloned().unwrap_or(Value::Null);
            let mut profile = MemberProfile {
                name: str_field(&value, "name"),
                source_url: str_field(&value, "sourceUrl"),
                ..MemberProfile::default()
            };
            profile.images.profile = image_at(&images, "profile");
            profile.images.greeting_card = image_at(&images, "greetingCard");
            profile.images.greeting_photo = image_at(&images, "greetingPhoto");
            Some(profile)
        }
    }
}

fn parse_profile_entry(value: &Value) -> Option<ProfileEntry> {
    let image = image_at(value, "image")?;
    let era = match str_field(value, "single") {
        era if era.is_empty() => str_field(value, "era"),
        era => era,
    };
    let era_title = match str_field(value, "singleTitle") {
        title if title.is_empty() => str_field(value, "eraTitle"),
        title => title,
    };
    Some(ProfileEntry {
        era: if era.is_empty() {
            UNKNOWN_ERA.to_string()
        } else {
            era
        },
        era_title,
        updated_at: str_field(value, "updatedAt"),
        source_url: str_field(value, "sourceUrl"),
        image,
    })
}

fn parse_greeting_entry(value: &Value) -> Option<GreetingEntry> {
    let month = str_field(value, "month");
    if month.is_empty() {
        return None;
    }
    Some(GreetingEntry {
        month,
        updated_at: str_field(value, "updatedAt"),
        source_url: str_field(value, "sourceUrl"),
        greeting_card: image_at(value, "greetingCard")?,
        greeting_photo: image_at(value, "greetingPhoto")?,
    })
}

/// Parse-with-defaults loader for the history log. Duplicate keys collapse
/// to their first (newest) occurrence.
pub fn load_history(path: &Path) -> HistoryLog {
    let Some(value) = read_json(path) else {
        return HistoryLog::default();
    };
    if !value.is_object() {
        warn_reset(path, "history file is not an object");
        return HistoryLog::default();
    }

    let entries = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    let mut seen_eras = BTreeSet::new();
    let profile_history = entries("profileHistory")
        .iter()
        .filter_map(parse_profile_entry)
        .filter(|entry| entry.era == UNKNOWN_ERA || seen_eras.insert(entry.era.clone()))
        .collect();

    let mut seen_months = BTreeSet::new();
    let greeting_history = entries("greetingHistory")
        .iter()
        .filter_map(parse_greeting_entry)
        .filter(|entry| seen_months.insert(entry.month.clone()))
        .collect();

    HistoryLog {
        version: value
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(HISTORY_VERSION)
            .max(HISTORY_VERSION),
        updated_at: str_field(&value, "updatedAt"),
        profile_history,
        greeting_history,
    }
}

/// Serialize `payload` as pretty JSON and atomically replace `path`, unless
/// the file already holds exactly those bytes. Returns whether it wrote.
pub fn save_json<T: Serialize>(path: &Path, payload: &T) -> Result<bool> {
    let data = format!("{}\n", serde_json::to_string_pretty(payload)?);
    if fs::read(path).is_ok_and(|existing| existing == data.as_bytes()) {
        return Ok(false);
    }

    let parent = path
        .parent()
        .with_context(|| format!("state path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage write in {}", parent.display()))?;
    tmp.write_all(data.as_bytes())?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
