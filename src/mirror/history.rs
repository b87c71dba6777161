use crate::mirror::assets::{ArchivedImage, AssetArchiver};
use crate::mirror::eras::{EraTitles, UNKNOWN_ERA, classify_era, era_rank};
use crate::mirror::model::{
    GreetingEntry, HistoryLog, ImageRef, ImageSlot, MemberProfile, ProfileEntry,
};
use crate::mirror::util::{Clock, date_key, month_key, utc_stamp};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// `0` keeps every entry.
    pub max_profile_entries: usize,
    pub max_greeting_entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrackChange {
    #[default]
    Unchanged,
    /// No usable remote URL(s) on the current profile.
    Skipped,
    Prepended {
        key: String,
    },
    /// An entry with the same key existed and was replaced and promoted.
    Replaced {
        key: String,
    },
    /// A remote-only image of the current entry was archived locally.
    Healed {
        key: String,
    },
}

impl TrackChange {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged | Self::Skipped)
    }

    pub fn label(&self) -> String {
        match self {
            Self::Unchanged => "unchanged".to_string(),
            Self::Skipped => "skipped".to_string(),
            Self::Prepended { key } => format!("prepended:{key}"),
            Self::Replaced { key } => format!("replaced:{key}"),
            Self::Healed { key } => format!("healed:{key}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub profile: TrackChange,
    pub greeting: TrackChange,
    pub titles_backfilled: usize,
    pub evicted: usize,
    /// Stored history was out of key order and has been re-sorted.
    pub reordered: bool,
    pub downloads: usize,
    pub fallbacks: usize,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        self.profile.changed()
            || self.greeting.changed()
            || self.titles_backfilled > 0
            || self.evicted > 0
            || self.reordered
    }

    pub(crate) fn count(&mut self, archived: &ArchivedImage) {
        self.downloads += usize::from(archived.downloaded);
        self.fallbacks += usize::from(archived.fell_back);
    }
}

/// Drop the oldest entries beyond `max`; returns how many were dropped.
pub(crate) fn cap<T>(entries: &mut Vec<T>, max: usize) -> usize {
    if max == 0 || entries.len() <= max {
        return 0;
    }
    let dropped = entries.len() - max;
    entries.truncate(max);
    dropped
}

/// Insert `entry` at the front, first removing any entry with the same key.
fn upsert_front<T>(entries: &mut Vec<T>, entry: T, same_key: impl Fn(&T) -> bool) -> bool {
    let replaced = match entries.iter().position(same_key) {
        Some(pos) => {
            entries.remove(pos);
            true
        }
        None => false,
    };
    entries.insert(0, entry);
    replaced
}

/// Newest era first. Unranked photos (`unknown`) lead, newest recording
/// first, since an unclassified photo is one the release table does not
/// know yet.
fn era_order(a: &ProfileEntry, b: &ProfileEntry) -> Ordering {
    let (rank_a, rank_b) = (era_rank(&a.era), era_rank(&b.era));
    rank_a
        .is_some()
        .cmp(&rank_b.is_some())
        .then_with(|| rank_b.cmp(&rank_a))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}

fn month_order(a: &GreetingEntry, b: &GreetingEntry) -> Ordering {
    b.month.cmp(&a.month)
}

fn sort_if_needed<T>(entries: &mut [T], order: fn(&T, &T) -> Ordering) -> bool {
    if entries.is_sorted_by(|a, b| order(a, b) != Ordering::Greater) {
        return false;
    }
    entries.sort_by(order);
    true
}

/// Restore newest-first key order on both tracks; true when anything moved.
pub fn order_history(log: &mut HistoryLog) -> bool {
    let profile = sort_if_needed(&mut log.profile_history, era_order);
    let greeting = sort_if_needed(&mut log.greeting_history, month_order);
    profile || greeting
}

/// Day part of a stored `updatedAt` stamp in `tz`, or today.
fn recorded_day(stamp: &str, now: DateTime<Utc>, tz: Tz) -> String {
    let at = DateTime::parse_from_rfc3339(stamp)
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or(now);
    date_key(at, tz)
}

/// Maintains the era-keyed profile-photo history and the month-keyed
/// greeting history from successive profile snapshots.
pub struct Reconciler<'a> {
    assets: &'a AssetArchiver<'a>,
    titles: &'a EraTitles,
    clock: &'a dyn Clock,
    timezone: Tz,
    limits: HistoryLimits,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        assets: &'a AssetArchiver<'a>,
        titles: &'a EraTitles,
        clock: &'a dyn Clock,
        timezone: Tz,
        limits: HistoryLimits,
    ) -> Self {
        Self {
            assets,
            titles,
            clock,
            timezone,
            limits,
        }
    }

    /// Update `log` from the freshly fetched `profile`, then denormalize the
    /// current era and newest greeting month onto `profile`.
    ///
    /// Image slots on `profile` that are already archived locally are copied
    /// into history instead of downloaded again.
    pub fn reconcile(&self, log: &mut HistoryLog, profile: &mut MemberProfile) -> ReconcileOutcome {
        let now = self.clock.now();
        let mut out = ReconcileOutcome::default();

        self.reconcile_profile(log, profile, now, &mut out);
        self.reconcile_greeting(log, profile, now, &mut out);

        out.titles_backfilled = self.backfill_titles(log);
        out.reordered = order_history(log);
        out.evicted = cap(&mut log.profile_history, self.limits.max_profile_entries)
            + cap(&mut log.greeting_history, self.limits.max_greeting_entries);

        if out.changed() || log.updated_at.is_empty() {
            log.updated_at = utc_stamp(now);
        }

        let current_url = profile
            .images
            .remote_url(ImageSlot::Profile)
            .map(str::to_string);
        let current_era = current_url
            .as_deref()
            .and_then(|url| {
                log.profile_history
                    .iter()
                    .find(|entry| entry.image.original_src == url)
            })
            .or_else(|| log.profile_history.first());
        profile.current_era = current_era.map(|entry| entry.era.clone());
        profile.current_era_title = current_era
            .map(|entry| entry.era_title.clone())
            .filter(|title| !title.is_empty());
        profile.greeting_month = log.greeting_history.first().map(|entry| entry.month.clone());

        out
    }

    /// Archive a remote-only `image` again; true when it is now local.
    fn heal(
        &self,
        image: &mut ImageRef,
        group: &str,
        key: &str,
        local_copy: Option<&str>,
        out: &mut ReconcileOutcome,
    ) -> bool {
        if image.local_path().is_some() {
            return false;
        }
        let url = image.original_src.clone();
        let archived = self
            .assets
            .archive_reusing(&url, group, key, false, local_copy, "history");
        out.count(&archived);
        if archived.fell_back {
            return false;
        }
        *image = archived.image;
        true
    }

    fn reconcile_profile(
        &self,
        log: &mut HistoryLog,
        profile: &MemberProfile,
        now: DateTime<Utc>,
        out: &mut ReconcileOutcome,
    ) {
        let Some(url) = profile.images.remote_url(ImageSlot::Profile) else {
            out.profile = TrackChange::Skipped;
            return;
        };
        let local_copy = profile
            .images
            .slot(ImageSlot::Profile)
            .and_then(ImageRef::local_path);

        // Any archived photo counts, so re-showing an older era's photo does
        // not record a new change.
        if let Some(entry) = log
            .profile_history
            .iter_mut()
            .find(|entry| entry.image.original_src == url)
        {
            let key = format!(
                "{}_{}",
                entry.era,
                recorded_day(&entry.updated_at, now, self.timezone)
            );
            if self.heal(&mut entry.image, "profile", &key, local_copy, out) {
                out.profile = TrackChange::Healed {
                    key: entry.era.clone(),
                };
            }
            return;
        }

        let era = classify_era(url).unwrap_or_else(|| UNKNOWN_ERA.to_string());
        let key = format!("{era}_{}", date_key(now, self.timezone));
        let archived = self
            .assets
            .archive_reusing(url, "profile", &key, true, local_copy, "history");
        out.count(&archived);

        let entry = ProfileEntry {
            era_title: self.titles.resolve(&era),
            updated_at: utc_stamp(now),
            source_url: profile.source_url.clone(),
            image: archived.image,
            era: era.clone(),
        };
        // Unclassified photos carry no usable key, so they always prepend.
        let replaced = if era == UNKNOWN_ERA {
            log.profile_history.insert(0, entry);
            false
        } else {
            upsert_front(&mut log.profile_history, entry, |e| e.era == era)
        };
        out.profile = if replaced {
            TrackChange::Replaced { key: era }
        } else {
            TrackChange::Prepended { key: era }
        };
    }

    fn reconcile_greeting(
        &self,
        log: &mut HistoryLog,
        profile: &MemberProfile,
        now: DateTime<Utc>,
        out: &mut ReconcileOutcome,
    ) {
        let (Some(card_url), Some(photo_url)) = (
            profile.images.remote_url(ImageSlot::GreetingCard),
            profile.images.remote_url(ImageSlot::GreetingPhoto),
        ) else {
            out.greeting = TrackChange::Skipped;
            return;
        };
        let local_copy = move |slot| profile.images.slot(slot).and_then(ImageRef::local_path);
        let card_copy = local_copy(ImageSlot::GreetingCard);
        let photo_copy = local_copy(ImageSlot::GreetingPhoto);

        // A month already holding this exact pair is the current one.
        if let Some(known) = log.greeting_history.iter_mut().find(|e| {
            e.greeting_card.original_src == card_url && e.greeting_photo.original_src == photo_url
        }) {
            let card_group = ImageSlot::GreetingCard.key();
            let photo_group = ImageSlot::GreetingPhoto.key();
            let month = known.month.as_str();
            let card = self.heal(&mut known.greeting_card, card_group, month, card_copy, out);
            let photo = self.heal(&mut known.greeting_photo, photo_group, month, photo_copy, out);
            if card || photo {
                out.greeting = TrackChange::Healed {
                    key: known.month.clone(),
                };
            }
            return;
        }

        let latest = log.greeting_history.first();
        let card_changed = latest.is_none_or(|e| e.greeting_card.original_src != card_url);
        let photo_changed = latest.is_none_or(|e| e.greeting_photo.original_src != photo_url);

        let month = month_key(now, self.timezone);
        let mut archive = |changed: bool,
                           url: &str,
                           slot: ImageSlot,
                           local_copy: Option<&str>,
                           previous: Option<ImageRef>| {
            match previous {
                Some(image) if !changed => image,
                _ => {
                    let archived = self.assets.archive_reusing(
                        url,
                        slot.key(),
                        &month,
                        true,
                        local_copy,
                        "history",
                    );
                    out.count(&archived);
                    archived.image
                }
            }
        };
        let greeting_card = archive(
            card_changed,
            card_url,
            ImageSlot::GreetingCard,
            card_copy,
            latest.map(|e| e.greeting_card.clone()),
        );
        let greeting_photo = archive(
            photo_changed,
            photo_url,
            ImageSlot::GreetingPhoto,
            photo_copy,
            latest.map(|e| e.greeting_photo.clone()),
        );

        let entry = GreetingEntry {
            month: month.clone(),
            updated_at: utc_stamp(now),
            source_url: profile.source_url.clone(),
            greeting_card,
            greeting_photo,
        };
        let replaced = upsert_front(&mut log.greeting_history, entry, |e| e.month == month);

        out.greeting = if replaced {
            TrackChange::Replaced { key: month }
        } else {
            TrackChange::Prepended { key: month }
        };
    }

    fn backfill_titles(&self, log: &mut HistoryLog) -> usize {
        let mut healed = 0usize;
        for entry in log
            .profile_history
            .iter_mut()
            .filter(|entry| entry.era_title.is_empty())
        {
            let title = self.titles.resolve(&entry.era);
            if !title.is_empty() {
                entry.era_title = title;
                healed += 1;
            }
        }
        healed
    }
}
