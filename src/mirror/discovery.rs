use anyhow::Result;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A known id was reached (after `known_overlap` extra known ids).
    KnownReached,
    EmptyPage,
    PageCap,
    FetchFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// New ids, most recent first.
    pub new_ids: Vec<u64>,
    pub pages_read: usize,
    pub stop: StopReason,
}

impl Discovery {
    pub fn is_partial(&self) -> bool {
        matches!(self.stop, StopReason::FetchFailed(_))
    }
}

/// Walk the recency-ordered listing and collect ids not in `known`.
///
/// The listing is assumed to grow only at its head: scanning ends at the
/// first known id. An older id resurfacing above newer unseen ones makes
/// this under-fetch; `known_overlap > 0` keeps scanning past that many
/// additional known ids to narrow the window. A page failure ends the scan
/// with whatever was collected so far.
pub fn discover_new_ids<F>(
    known: &BTreeSet<u64>,
    max_pages: usize,
    known_overlap: usize,
    mut page: F,
) -> Discovery
where
    F: FnMut(usize) -> Result<Vec<u64>>,
{
    let mut seen = BTreeSet::new();
    let mut new_ids = Vec::new();
    let mut known_hits = 0usize;
    let mut pages_read = 0usize;

    for n in 0..max_pages {
        let ids = match page(n) {
            Ok(ids) => ids,
            Err(err) => {
                return Discovery {
                    new_ids,
                    pages_read,
                    stop: StopReason::FetchFailed(format!("page {n}: {err:#}")),
                };
            }
        };
        pages_read += 1;
        if ids.is_empty() {
            return Discovery {
                new_ids,
                pages_read,
                stop: StopReason::EmptyPage,
            };
        }

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if known.contains(&id) {
                known_hits += 1;
                if known_hits > known_overlap {
                    return Discovery {
                        new_ids,
                        pages_read,
                        stop: StopReason::KnownReached,
                    };
                }
                continue;
            }
            new_ids.push(id);
        }
    }

    Discovery {
        new_ids,
        pages_read,
        stop: StopReason::PageCap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paged(listing: &[u64], per_page: usize) -> Vec<Vec<u64>> {
        listing.chunks(per_page).map(<[u64]>::to_vec).collect()
    }

    #[test]
    fn stops_at_first_known_id_without_reading_further_pages() {
        let known = BTreeSet::from([5, 4, 3]);
        let pages = paged(&[9, 8, 5, 4, 3, 2, 1], 3);
        let mut reads = Vec::new();

        let out = discover_new_ids(&known, 10, 0, |n| {
            reads.push(n);
            Ok(pages.get(n).cloned().unwrap_or_default())
        });

        assert_eq!(out.new_ids, vec![9, 8]);
        assert_eq!(out.stop, StopReason::KnownReached);
        assert_eq!(reads, vec![0]);
    }

    #[test]
    fn empty_archive_scans_until_empty_page() {
        let pages = paged(&[3, 2, 1], 2);
        let out = discover_new_ids(&BTreeSet::new(), 10, 0, |n| {
            Ok(pages.get(n).cloned().unwrap_or_default())
        });
        assert_eq!(out.new_ids, vec![3, 2, 1]);
        assert_eq!(out.pages_read, 3);
        assert_eq!(out.stop, StopReason::EmptyPage);
    }

    #[test]
    fn page_cap_bounds_full_scan() {
        let out = discover_new_ids(&BTreeSet::new(), 2, 0, |n| Ok(vec![100 - n as u64]));
        assert_eq!(out.new_ids, vec![100, 99]);
        assert_eq!(out.stop, StopReason::PageCap);
    }

    #[test]
    fn duplicate_ids_across_pages_are_collected_once() {
        let pages = vec![vec![7, 6], vec![6, 5], vec![]];
        let out = discover_new_ids(&BTreeSet::new(), 10, 0, |n| Ok(pages[n].clone()));
        assert_eq!(out.new_ids, vec![7, 6, 5]);
    }

    #[test]
    fn failure_returns_partial_result() {
        let out = discover_new_ids(&BTreeSet::new(), 10, 0, |n| {
            if n == 0 {
                Ok(vec![11, 10])
            } else {
                anyhow::bail!("timeout")
            }
        });
        assert_eq!(out.new_ids, vec![11, 10]);
        assert_eq!(out.pages_read, 1);
        assert!(out.is_partial());
    }

    // Non-monotonic listing: 6 resurfaced above unseen 2. With no overlap the
    // scan stops at 6 and misses 2; an overlap of one known id recovers it.
    #[test]
    fn resurfaced_id_under_fetches_unless_overlap_allows() {
        let known = BTreeSet::from([6, 5, 4]);
        let listing = vec![vec![7, 6, 2, 5, 4], vec![]];

        let strict = discover_new_ids(&known, 10, 0, |n| Ok(listing[n].clone()));
        assert_eq!(strict.new_ids, vec![7]);

        let overlapped = discover_new_ids(&known, 10, 1, |n| Ok(listing[n].clone()));
        assert_eq!(overlapped.new_ids, vec![7, 2]);
        assert_eq!(overlapped.stop, StopReason::KnownReached);
    }
}
