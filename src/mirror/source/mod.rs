pub mod parse;
pub mod site;

use crate::mirror::model::{MemberProfile, Post};
use anyhow::Result;

pub use site::SiteAdapter;

/// Remote content source: a recency-ordered listing, post details and the
/// member profile page.
pub trait SourceAdapter {
    /// Ids on listing page `n`, newest first. Empty means end of listing.
    fn list_page(&self, n: usize) -> Result<Vec<u64>>;
    fn fetch_post(&self, id: u64) -> Result<Post>;
    fn fetch_profile(&self) -> Result<MemberProfile>;
    /// Referer sent with image downloads.
    fn referer(&self) -> String;
}
