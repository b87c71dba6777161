use anyhow::Result;
use std::collections::BTreeSet;
use std::env;

use crate::commands::CommandReport;
use crate::mirror::model::HistoryLog;
use crate::mirror::paths::resolve_paths;
use crate::mirror::store;
use crate::mirror::util::month_range;

include!(concat!(env!("OUT_DIR"), "/mirror_env_allowlist.rs"));

/// Months between the oldest and newest greeting entry with no entry of
/// their own, oldest first.
pub fn missing_greeting_months(history: &HistoryLog) -> Vec<String> {
    let present = history
        .greeting_history
        .iter()
        .map(|entry| entry.month.as_str())
        .collect::<BTreeSet<_>>();
    let (Some(oldest), Some(newest)) = (present.first(), present.last()) else {
        return Vec::new();
    };
    month_range(oldest, newest)
        .into_iter()
        .filter(|month| !present.contains(month.as_str()))
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("root={}", paths.root.display()));
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("assets_dir={}", paths.assets_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    let posts = store::load_posts(&paths.posts_file);
    report.detail(format!("posts.count={}", posts.len()));
    if let Some(newest) = posts.first() {
        report.detail(format!("posts.newest={} ({})", newest.id, newest.date));
    }
    if let Some(oldest) = posts.last() {
        report.detail(format!("posts.oldest={} ({})", oldest.id, oldest.date));
    }

    match store::load_profile(&paths.member_file) {
        Some(profile) => {
            report.detail(format!("profile.name={}", profile.name));
            if let Some(era) = &profile.current_era {
                let title = profile.current_era_title.as_deref().unwrap_or("");
                report.detail(format!("profile.current_era={era} {title}").trim_end().to_string());
            }
        }
        None => report.issue("missing member profile (run `blog-mirror sync`)"),
    }

    let history = store::load_history(&paths.history_file);
    report.detail(format!(
        "history.profile_entries={}",
        history.profile_history.len()
    ));
    report.detail(format!(
        "history.greeting_entries={}",
        history.greeting_history.len()
    ));
    if let (Some(newest), Some(oldest)) = (
        history.greeting_history.first(),
        history.greeting_history.last(),
    ) {
        report.detail(format!(
            "history.greeting_months={}..{}",
            oldest.month, newest.month
        ));
    }
    let gaps = missing_greeting_months(&history);
    if !gaps.is_empty() {
        report.detail(format!("history.missing_months={}", gaps.join(",")));
    }
    if !history.updated_at.is_empty() {
        report.detail(format!("history.updated_at={}", history.updated_at));
    }

    if !paths.posts_file.exists() {
        report.issue("missing posts archive (run `blog-mirror sync`)");
    }

    let set_keys = GENERATED_MIRROR_ENV_ALLOWLIST
        .iter()
        .filter(|key| env::var_os(key).is_some())
        .copied()
        .collect::<Vec<_>>();
    if !set_keys.is_empty() {
        report.detail(format!("env.set={}", set_keys.join(",")));
    }
    report.detail(format!("build_id={}", env!("BUILD_UUID")));

    Ok(report)
}
