use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::mirror::config::{MirrorConfig, load_config, validate};
use crate::mirror::eras::EraTitles;
use crate::mirror::paths::{MirrorPaths, resolve_paths};
use crate::mirror::pipeline::{self, SyncContext, SyncMode, SyncOutcome};
use crate::mirror::source::SiteAdapter;
use crate::mirror::transport::HttpFetcher;
use crate::mirror::util::SystemClock;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub full: bool,
    pub profile_only: bool,
    pub request_delay_ms: Option<u64>,
    pub image_delay_ms: Option<u64>,
    pub max_pages: Option<usize>,
    pub era_titles: Option<PathBuf>,
    pub seed_history: bool,
}

impl SyncOptions {
    fn mode(&self) -> SyncMode {
        if self.profile_only {
            SyncMode::ProfileOnly
        } else if self.full {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        }
    }

    fn apply(&self, cfg: &mut MirrorConfig) {
        if let Some(ms) = self.request_delay_ms {
            cfg.pacing.request_delay_ms = ms;
        }
        if let Some(ms) = self.image_delay_ms {
            cfg.pacing.image_delay_ms = ms;
        }
        if let Some(pages) = self.max_pages {
            cfg.discovery.max_pages = pages;
        }
        if let Some(path) = &self.era_titles {
            cfg.era_titles_path = Some(path.clone());
        }
    }
}

fn era_titles_file(paths: &MirrorPaths, cfg: &MirrorConfig) -> PathBuf {
    match &cfg.era_titles_path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => paths.root.join(path),
        None => paths.era_titles_file.clone(),
    }
}

fn describe(report: &mut CommandReport, outcome: &SyncOutcome) {
    report.detail(format!("mode={}", outcome.mode.label()));

    if let Some(posts) = &outcome.posts {
        report.detail(format!("posts.pages_read={}", posts.pages_read));
        report.detail(format!("posts.stop={}", posts.stop));
        report.detail(format!("posts.discovered={}", posts.discovered));
        report.detail(format!("posts.fetched={}", posts.fetched));
        report.detail(format!("posts.skipped={}", posts.skipped));
        report.detail(format!("posts.downloads={}", posts.downloads));
        report.detail(format!("posts.fallbacks={}", posts.fallbacks));
        report.detail(format!("posts.total={}", posts.archived_total));
        report.detail(format!("posts.written={}", posts.file_written));
    }

    if let Some(seed) = &outcome.seed {
        report.detail(format!("seed.profile_added={}", seed.outcome.profile_added));
        report.detail(format!("seed.greeting_added={}", seed.outcome.greeting_added));
        report.detail(format!("seed.downloads={}", seed.outcome.downloads));
        report.detail(format!("seed.fallbacks={}", seed.outcome.fallbacks));
        report.detail(format!("seed.written={}", seed.history_written));
    }

    if let Some(profile) = &outcome.profile {
        report.detail(format!("profile.downloads={}", profile.downloads));
        report.detail(format!("profile.fallbacks={}", profile.fallbacks));
        report.detail(format!("history.profile={}", profile.profile_track.label()));
        report.detail(format!("history.greeting={}", profile.greeting_track.label()));
        report.detail(format!(
            "history.titles_backfilled={}",
            profile.titles_backfilled
        ));
        report.detail(format!("history.evicted={}", profile.evicted));
        if let Some(era) = &profile.current_era {
            report.detail(format!("profile.current_era={era}"));
        }
        if let Some(month) = &profile.greeting_month {
            report.detail(format!("profile.greeting_month={month}"));
        }
        report.detail(format!("profile.written={}", profile.profile_written));
        report.detail(format!("history.written={}", profile.history_written));
    }
    if let Some(err) = &outcome.profile_error {
        report.detail(format!("profile.aborted={err}"));
    }
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");

    if opts.full && opts.profile_only {
        report.issue("invalid flags: use only one of --full or --profile-only");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths)?;
    opts.apply(&mut cfg);
    validate(&cfg)?;

    let titles_path = era_titles_file(&paths, &cfg);
    let titles = EraTitles::load(&titles_path);
    tracing::debug!(
        path = %titles_path.display(),
        entries = titles.len(),
        "era titles loaded"
    );

    let http = HttpFetcher::new(&cfg.source, &cfg.transport)?;
    let site = SiteAdapter::new(&http, &cfg.source, &cfg.pacing)?;
    let ctx = SyncContext {
        paths: &paths,
        cfg: &cfg,
        source: &site,
        fetcher: &http,
        clock: &SystemClock,
        titles: &titles,
    };

    report.detail(format!("root={}", paths.root.display()));
    let outcome = pipeline::run_sync(&ctx, opts.mode(), opts.seed_history)?;
    describe(&mut report, &outcome);

    Ok(report)
}
