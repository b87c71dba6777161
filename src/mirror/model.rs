use serde::{Deserialize, Serialize};

/// One archived blog entry. `id` is the archive-wide primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub title: String,
    /// `YYYY-MM-DD`; lexicographic order is chronological order.
    pub date: String,
    pub tags: Vec<String>,
    pub content_blocks: Vec<ContentBlock>,
    pub source_url: String,
}

impl Post {
    /// Append `tag` unless it is blank or already present.
    pub fn push_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return;
        }
        self.tags.push(tag.to_string());
    }

    pub fn image_blocks(&self) -> impl Iterator<Item = &ImageRef> {
        self.content_blocks.iter().filter_map(|block| match block {
            ContentBlock::Image(image) => Some(image),
            ContentBlock::Text { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image(ImageRef),
}

/// An image as stored in the archive: `src` is what readers load, which is
/// the local archived copy or, after a failed download, the remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub src: String,
    pub original_src: String,
}

impl ImageRef {
    pub fn remote(url: &str) -> Self {
        Self {
            src: url.to_string(),
            original_src: url.to_string(),
        }
    }

    pub fn archived(local_path: String, url: &str) -> Self {
        Self {
            src: local_path,
            original_src: url.to_string(),
        }
    }

    pub fn local_path(&self) -> Option<&str> {
        if self.src.is_empty() || self.src == self.original_src {
            None
        } else {
            Some(&self.src)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberImages {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ImageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting_card: Option<ImageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting_photo: Option<ImageRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    Profile,
    GreetingCard,
    GreetingPhoto,
}

impl ImageSlot {
    pub const ALL: [ImageSlot; 3] = [Self::Profile, Self::GreetingCard, Self::GreetingPhoto];

    pub fn key(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::GreetingCard => "greeting_card",
            Self::GreetingPhoto => "greeting_photo",
        }
    }
}

impl MemberImages {
    pub fn slot(&self, slot: ImageSlot) -> Option<&ImageRef> {
        match slot {
            ImageSlot::Profile => self.profile.as_ref(),
            ImageSlot::GreetingCard => self.greeting_card.as_ref(),
            ImageSlot::GreetingPhoto => self.greeting_photo.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: ImageSlot) -> &mut Option<ImageRef> {
        match slot {
            ImageSlot::Profile => &mut self.profile,
            ImageSlot::GreetingCard => &mut self.greeting_card,
            ImageSlot::GreetingPhoto => &mut self.greeting_photo,
        }
    }

    /// Remote URL currently published for `slot`, if any.
    pub fn remote_url(&self, slot: ImageSlot) -> Option<&str> {
        self.slot(slot)
            .map(|image| image.original_src.trim())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAttribute {
    pub label: String,
    pub value: String,
}

/// Latest snapshot of the tracked member. Replaced wholesale on every
/// successful profile fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kana: String,
    #[serde(default)]
    pub attributes: Vec<MemberAttribute>,
    #[serde(default)]
    pub images: MemberImages,
    #[serde(default)]
    pub source_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub greeting_list_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_era: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_era_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting_month: Option<String>,
}

/// Persisted under the `single`/`singleTitle` keys the front-end reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntry {
    #[serde(rename = "single")]
    pub era: String,
    #[serde(rename = "singleTitle")]
    pub era_title: String,
    pub updated_at: String,
    pub source_url: String,
    pub image: ImageRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreetingEntry {
    /// `YYYY-MM` in the reference timezone.
    pub month: String,
    pub updated_at: String,
    pub source_url: String,
    pub greeting_card: ImageRef,
    pub greeting_photo: ImageRef,
}

pub const HISTORY_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLog {
    pub version: u32,
    pub updated_at: String,
    pub profile_history: Vec<ProfileEntry>,
    pub greeting_history: Vec<GreetingEntry>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            updated_at: String::new(),
            profile_history: Vec::new(),
            greeting_history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_tag_keeps_insertion_order_and_uniqueness() {
        let mut post = Post {
            id: 1,
            title: String::new(),
            date: "2024-02-01".into(),
            tags: Vec::new(),
            content_blocks: Vec::new(),
            source_url: String::new(),
        };
        post.push_tag("member");
        post.push_tag("2024-02");
        post.push_tag(" member ");
        post.push_tag("");
        assert_eq!(post.tags, vec!["member", "2024-02"]);
    }

    #[test]
    fn content_blocks_serialize_with_type_tag() {
        let blocks = vec![
            ContentBlock::Text {
                text: "hello".into(),
            },
            ContentBlock::Image(ImageRef::archived(
                "data/archive/blog/1_ab_x.jpg".into(),
                "https://example.com/x.jpg",
            )),
        ];
        let json = serde_json::to_value(&blocks).expect("json");
        assert_eq!(json[0]["type"], "text");
        assert_eq!(json[1]["type"], "image");
        assert_eq!(json[1]["src"], "data/archive/blog/1_ab_x.jpg");
        assert_eq!(json[1]["originalSrc"], "https://example.com/x.jpg");
    }

    #[test]
    fn profile_entries_keep_single_keys_on_disk() {
        let entry = ProfileEntry {
            era: "7th".into(),
            era_title: "承認欲求".into(),
            updated_at: "2023-10-01T00:00:00Z".into(),
            source_url: String::new(),
            image: ImageRef::remote("https://example.com/7th.jpg"),
        };
        let json = serde_json::to_value(&entry).expect("json");
        assert_eq!(json["single"], "7th");
        assert_eq!(json["singleTitle"], "承認欲求");
        assert!(json.get("era").is_none());
    }

    #[test]
    fn local_path_is_absent_after_fallback() {
        let image = ImageRef::remote("https://example.com/x.jpg");
        assert_eq!(image.local_path(), None);
        let image = ImageRef::archived("data/a.jpg".into(), "https://example.com/x.jpg");
        assert_eq!(image.local_path(), Some("data/a.jpg"));
    }
}
