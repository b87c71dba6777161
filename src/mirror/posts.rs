use crate::mirror::model::Post;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Newest first: date descending (as `YYYY-MM-DD` text), then id descending.
pub fn archive_order(a: &Post, b: &Post) -> Ordering {
    b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id))
}

/// Combine a fresh batch with the existing archive. Existing posts are kept
/// unless a fresh post with the same id supersedes them.
pub fn merge(fresh: Vec<Post>, existing: Vec<Post>) -> Vec<Post> {
    let mut by_id = BTreeMap::new();
    for post in existing.into_iter().chain(fresh) {
        by_id.insert(post.id, post);
    }
    let mut merged = by_id.into_values().collect::<Vec<_>>();
    merged.sort_by(archive_order);
    merged
}

pub fn known_ids(posts: &[Post]) -> BTreeSet<u64> {
    posts.iter().map(|post| post.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::model::ContentBlock;

    fn post(id: u64, date: &str, text: &str) -> Post {
        Post {
            id,
            title: format!("post {id}"),
            date: date.to_string(),
            tags: Vec::new(),
            content_blocks: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            source_url: format!("https://example.com/{id}"),
        }
    }

    #[test]
    fn keeps_every_existing_id_and_prefers_fresh_values() {
        let existing = vec![
            post(3, "2024-01-03", "old three"),
            post(2, "2024-01-02", "old two"),
            post(1, "2024-01-01", "old one"),
        ];
        let fresh = vec![post(4, "2024-01-04", "new four"), post(2, "2024-01-02", "edited two")];

        let merged = merge(fresh, existing.clone());

        assert_eq!(
            merged.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![4, 3, 2, 1]
        );
        assert_eq!(merged[2].content_blocks, post(2, "", "edited two").content_blocks);
        assert_eq!(merged[1], existing[0]);
        assert_eq!(merged[3], existing[2]);
    }

    #[test]
    fn orders_by_date_then_id_descending() {
        let merged = merge(
            vec![
                post(10, "2024-02-01", ""),
                post(12, "2024-02-01", ""),
                post(11, "2024-03-01", ""),
                post(13, "2023-12-31", ""),
            ],
            Vec::new(),
        );
        assert_eq!(
            merged.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![11, 12, 10, 13]
        );
    }

    // Clock-skewed dates win over id order: a larger id with an older date
    // sorts after a smaller id with a newer date.
    #[test]
    fn skewed_dates_order_by_date_first() {
        let merged = merge(
            vec![post(20, "2024-01-01", ""), post(19, "2024-01-05", "")],
            Vec::new(),
        );
        assert_eq!(merged[0].id, 19);
    }

    #[test]
    fn empty_existing_means_fresh_only() {
        let merged = merge(vec![post(1, "2024-01-01", "")], Vec::new());
        assert_eq!(known_ids(&merged), BTreeSet::from([1]));
    }

    #[test]
    fn merge_is_stable_when_repeated() {
        let existing = vec![post(2, "2024-01-02", "b"), post(1, "2024-01-01", "a")];
        let once = merge(Vec::new(), existing);
        let twice = merge(Vec::new(), once.clone());
        assert_eq!(once, twice);
    }
}
