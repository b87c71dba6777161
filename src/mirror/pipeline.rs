use crate::error::MirrorError;
use crate::mirror::assets::AssetArchiver;
use crate::mirror::audit;
use crate::mirror::config::MirrorConfig;
use crate::mirror::discovery::{Discovery, StopReason, discover_new_ids};
use crate::mirror::eras::EraTitles;
use crate::mirror::history::{HistoryLimits, Reconciler, TrackChange};
use crate::mirror::model::{ContentBlock, ImageSlot, MemberProfile, Post};
use crate::mirror::paths::MirrorPaths;
use crate::mirror::posts;
use crate::mirror::seed::{SeedOutcome, seed_history};
use crate::mirror::source::SourceAdapter;
use crate::mirror::store;
use crate::mirror::transport::{BinaryFetch, Pacer};
use crate::mirror::util::{Clock, utc_stamp};
use crate::mirror::warn::{self, WarnEvent};
use anyhow::Result;
use std::collections::BTreeSet;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// New posts only, then profile and history.
    Incremental,
    /// Every listed post, replacing the post archive, then profile and history.
    Full,
    ProfileOnly,
}

impl SyncMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
            Self::ProfileOnly => "profile-only",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostsPhase {
    pub pages_read: usize,
    pub stop: String,
    pub partial: bool,
    pub discovered: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub downloads: usize,
    pub fallbacks: usize,
    pub archived_total: usize,
    pub file_written: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePhase {
    pub downloads: usize,
    pub fallbacks: usize,
    pub profile_track: TrackChange,
    pub greeting_track: TrackChange,
    pub titles_backfilled: usize,
    pub evicted: usize,
    pub current_era: Option<String>,
    pub greeting_month: Option<String>,
    pub profile_written: bool,
    pub history_written: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedPhase {
    pub outcome: SeedOutcome,
    pub history_written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    pub posts: Option<PostsPhase>,
    /// Present when the curated history seed was requested.
    pub seed: Option<SeedPhase>,
    pub profile: Option<ProfilePhase>,
    /// Set when the profile phase was aborted in a mode that tolerates it.
    pub profile_error: Option<String>,
}

/// Collaborators for one run. The run is the single owner of the archive
/// files for its duration.
pub struct SyncContext<'a> {
    pub paths: &'a MirrorPaths,
    pub cfg: &'a MirrorConfig,
    pub source: &'a dyn SourceAdapter,
    pub fetcher: &'a dyn BinaryFetch,
    pub clock: &'a dyn Clock,
    pub titles: &'a EraTitles,
}

fn stop_label(stop: &StopReason) -> &'static str {
    match stop {
        StopReason::KnownReached => "known-reached",
        StopReason::EmptyPage => "end-of-listing",
        StopReason::PageCap => "page-cap",
        StopReason::FetchFailed(_) => "fetch-failed",
    }
}

fn history_limits(cfg: &MirrorConfig) -> HistoryLimits {
    HistoryLimits {
        max_profile_entries: cfg.history.max_profile_entries,
        max_greeting_entries: cfg.history.max_greeting_entries,
    }
}

/// Run the posts phase (unless profile-only), the optional history seed,
/// then the profile phase.
pub fn run_sync(
    ctx: &SyncContext<'_>,
    mode: SyncMode,
    seed_history: bool,
) -> Result<SyncOutcome> {
    let referer = ctx.source.referer();
    let archiver = AssetArchiver::new(
        &ctx.paths.root,
        &ctx.paths.assets_dir,
        &referer,
        ctx.fetcher,
        Pacer::new(ctx.cfg.pacing.image_delay()),
    );

    let posts = match mode {
        SyncMode::ProfileOnly => None,
        SyncMode::Incremental | SyncMode::Full => Some(sync_posts(ctx, &archiver, mode)?),
    };

    let seed = if seed_history {
        Some(seed_phase(ctx, &archiver)?)
    } else {
        None
    };

    let (profile, profile_error) = match sync_profile(ctx, &archiver) {
        Ok(phase) => (Some(phase), None),
        Err(err) if mode != SyncMode::ProfileOnly => (None, Some(format!("{err:#}"))),
        Err(err) => return Err(err),
    };

    Ok(SyncOutcome {
        mode,
        posts,
        seed,
        profile,
        profile_error,
    })
}

fn archive_post_images(post: &mut Post, archiver: &AssetArchiver<'_>, phase: &mut PostsPhase) {
    let key = post.id.to_string();
    for block in &mut post.content_blocks {
        let ContentBlock::Image(image) = block else {
            continue;
        };
        let archived = archiver.archive_or_link(&image.original_src, "blog", &key, false, "posts");
        phase.downloads += usize::from(archived.downloaded);
        phase.fallbacks += usize::from(archived.fell_back);
        *image = archived.image;
    }
}

fn sync_posts(
    ctx: &SyncContext<'_>,
    archiver: &AssetArchiver<'_>,
    mode: SyncMode,
) -> Result<PostsPhase> {
    let existing = store::load_posts(&ctx.paths.posts_file);
    let known = match mode {
        SyncMode::Full => BTreeSet::new(),
        _ => posts::known_ids(&existing),
    };

    let discovery: Discovery = discover_new_ids(
        &known,
        ctx.cfg.discovery.max_pages,
        ctx.cfg.discovery.known_overlap,
        |n| ctx.source.list_page(n),
    );
    let mut phase = PostsPhase {
        pages_read: discovery.pages_read,
        stop: stop_label(&discovery.stop).to_string(),
        partial: discovery.is_partial(),
        discovered: discovery.new_ids.len(),
        ..PostsPhase::default()
    };

    if let StopReason::FetchFailed(reason) = &discovery.stop {
        if discovery.new_ids.is_empty() {
            audit::record(ctx.paths, "posts", "failed", reason);
            return Err(MirrorError::ListingUnavailable(reason.clone()).into());
        }
        warn::emit(WarnEvent {
            code: "LISTING_PARTIAL",
            stage: "discovery",
            action: "merge-collected",
            subject: &format!("pages_read={}", discovery.pages_read),
            url: "",
            retry: "next-run",
            reason: "page-fetch-failed",
            err: reason,
        });
    }

    let total = discovery.new_ids.len();
    let mut fresh = Vec::with_capacity(total);
    let mut skipped_ids = BTreeSet::new();
    for (index, id) in discovery.new_ids.iter().copied().enumerate() {
        tracing::info!("[{}/{total}] fetch post {id}", index + 1);
        match ctx.source.fetch_post(id) {
            Ok(mut post) => {
                archive_post_images(&mut post, archiver, &mut phase);
                fresh.push(post);
            }
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "POST_SKIPPED",
                    stage: "posts",
                    action: "skip",
                    subject: &id.to_string(),
                    url: "",
                    retry: "next-run",
                    reason: "fetch-or-parse-failed",
                    err: &format!("{err:#}"),
                });
                skipped_ids.insert(id);
            }
        }
    }
    phase.fetched = fresh.len();
    phase.skipped = skipped_ids.len();

    // A full resync replaces the archive, except for posts it could not
    // re-fetch and everything when the listing itself broke off.
    let base = match mode {
        SyncMode::Full if !phase.partial => existing
            .into_iter()
            .filter(|post| skipped_ids.contains(&post.id))
            .collect(),
        _ => existing,
    };
    let merged = posts::merge(fresh, base);
    phase.archived_total = merged.len();
    phase.file_written = store::save_json(&ctx.paths.posts_file, &merged)?;

    audit::record(
        ctx.paths,
        "posts",
        if phase.skipped == 0 && !phase.partial {
            "ok"
        } else {
            "degraded"
        },
        &format!(
            "discovered={} fetched={} skipped={} downloads={} fallbacks={} total={}",
            phase.discovered,
            phase.fetched,
            phase.skipped,
            phase.downloads,
            phase.fallbacks,
            phase.archived_total
        ),
    );
    Ok(phase)
}

/// Archive the current image slots, forcing a download when a slot's remote
/// URL differs from the one previously saved.
fn archive_member_slots(
    profile: &mut MemberProfile,
    previous: Option<&MemberProfile>,
    archiver: &AssetArchiver<'_>,
    phase: &mut ProfilePhase,
) {
    for slot in ImageSlot::ALL {
        let Some(url) = profile.images.remote_url(slot).map(str::to_string) else {
            continue;
        };
        let previous_url = previous.and_then(|p| p.images.remote_url(slot));
        let force_refresh = previous_url != Some(url.as_str());
        let archived =
            archiver.archive_or_link(&url, "member", slot.key(), force_refresh, "profile");
        phase.downloads += usize::from(archived.downloaded);
        phase.fallbacks += usize::from(archived.fell_back);
        *profile.images.slot_mut(slot) = Some(archived.image);
    }
}

fn seed_phase(ctx: &SyncContext<'_>, archiver: &AssetArchiver<'_>) -> Result<SeedPhase> {
    let base = Url::parse(ctx.cfg.source.base_url.trim_end_matches('/'))
        .map_err(|err| MirrorError::InvalidConfig(format!("source.base_url: {err}")))?;
    let mut history = store::load_history(&ctx.paths.history_file);
    let outcome = seed_history(
        &mut history,
        archiver,
        ctx.titles,
        &base,
        history_limits(ctx.cfg),
    )?;
    if outcome.changed() || history.updated_at.is_empty() {
        history.updated_at = utc_stamp(ctx.clock.now());
    }
    let history_written = store::save_json(&ctx.paths.history_file, &history)?;

    audit::record(
        ctx.paths,
        "seed",
        if outcome.fallbacks == 0 { "ok" } else { "degraded" },
        &format!(
            "profile_added={} greeting_added={} downloads={} fallbacks={}",
            outcome.profile_added, outcome.greeting_added, outcome.downloads, outcome.fallbacks
        ),
    );
    Ok(SeedPhase {
        outcome,
        history_written,
    })
}

fn sync_profile(ctx: &SyncContext<'_>, archiver: &AssetArchiver<'_>) -> Result<ProfilePhase> {
    let mut profile = match ctx.source.fetch_profile() {
        Ok(profile) => profile,
        Err(err) => {
            let message = format!("{err:#}");
            warn::emit(WarnEvent {
                code: "PROFILE_ABORTED",
                stage: "profile",
                action: "skip-phase",
                subject: "member",
                url: "",
                retry: "next-run",
                reason: "fetch-or-parse-failed",
                err: &message,
            });
            audit::record(ctx.paths, "profile", "failed", &message);
            return Err(err);
        }
    };

    let mut phase = ProfilePhase::default();
    let previous = store::load_profile(&ctx.paths.member_file);
    archive_member_slots(&mut profile, previous.as_ref(), archiver, &mut phase);

    let mut history = store::load_history(&ctx.paths.history_file);
    let reconciler = Reconciler::new(
        archiver,
        ctx.titles,
        ctx.clock,
        ctx.cfg.history.timezone()?,
        history_limits(ctx.cfg),
    );
    let outcome = reconciler.reconcile(&mut history, &mut profile);

    phase.downloads += outcome.downloads;
    phase.fallbacks += outcome.fallbacks;
    phase.titles_backfilled = outcome.titles_backfilled;
    phase.evicted = outcome.evicted;
    phase.current_era = profile.current_era.clone();
    phase.greeting_month = profile.greeting_month.clone();
    phase.profile_track = outcome.profile;
    phase.greeting_track = outcome.greeting;

    phase.history_written = store::save_json(&ctx.paths.history_file, &history)?;
    phase.profile_written = store::save_json(&ctx.paths.member_file, &profile)?;

    audit::record(
        ctx.paths,
        "profile",
        if phase.fallbacks == 0 { "ok" } else { "degraded" },
        &format!(
            "profile={} greeting={} downloads={} fallbacks={}",
            phase.profile_track.label(),
            phase.greeting_track.label(),
            phase.downloads,
            phase.fallbacks
        ),
    );
    Ok(phase)
}
