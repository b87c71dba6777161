use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::commands::CommandReport;
use crate::mirror::model::{HistoryLog, ImageRef, ImageSlot, MemberProfile, Post};
use crate::mirror::paths::resolve_paths;
use crate::mirror::store;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

/// One image referenced from persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub owner: String,
    pub image: ImageRef,
}

pub fn collect_asset_refs(
    posts: &[Post],
    profile: Option<&MemberProfile>,
    history: &HistoryLog,
) -> Vec<AssetRef> {
    let mut refs = Vec::new();
    let mut push = |owner: String, image: &ImageRef| {
        refs.push(AssetRef {
            owner,
            image: image.clone(),
        })
    };

    for post in posts {
        for image in post.image_blocks() {
            push(format!("post:{}", post.id), image);
        }
    }
    if let Some(profile) = profile {
        for slot in ImageSlot::ALL {
            if let Some(image) = profile.images.slot(slot) {
                push(format!("member:{}", slot.key()), image);
            }
        }
    }
    for entry in &history.profile_history {
        push(format!("profile_history:{}", entry.era), &entry.image);
    }
    for entry in &history.greeting_history {
        push(format!("greeting_history:{}", entry.month), &entry.greeting_card);
        push(format!("greeting_history:{}", entry.month), &entry.greeting_photo);
    }
    refs
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("verify");

    let posts = store::load_posts(&paths.posts_file);
    let profile = store::load_profile(&paths.member_file);
    let history = store::load_history(&paths.history_file);
    let refs = collect_asset_refs(&posts, profile.as_ref(), &history);

    let mut local = 0usize;
    let mut missing = Vec::new();
    let mut remote_only = Vec::new();
    for asset in &refs {
        match asset.image.local_path() {
            Some(relative) => {
                local += 1;
                if !non_empty_file(&paths.resolve_relative(relative)) {
                    missing.push(format!("{} {}", asset.owner, relative));
                }
            }
            None => remote_only.push(format!("{} {}", asset.owner, asset.image.original_src)),
        }
    }

    report.detail(format!("assets.referenced={}", refs.len()));
    report.detail(format!("assets.local={local}"));
    report.detail(format!("assets.missing={}", missing.len()));
    report.detail(format!("assets.remote_only={}", remote_only.len()));

    for line in &remote_only {
        report.detail(format!("remote_only={line}"));
    }
    for line in missing {
        if opts.strict {
            report.issue(format!("missing asset {line}"));
        } else {
            report.detail(format!("missing={line}"));
        }
    }
    if opts.strict && !remote_only.is_empty() {
        report.issue(format!(
            "{} image(s) are linked remotely instead of archived",
            remote_only.len()
        ));
    }

    Ok(report)
}
