use crate::error::MirrorError;
use crate::mirror::config::{PacingConfig, SourceConfig};
use crate::mirror::model::{MemberProfile, Post};
use crate::mirror::source::{SourceAdapter, parse};
use crate::mirror::transport::{HttpFetcher, Pacer};
use anyhow::{Context, Result};
use url::Url;

/// HTTP adapter for the official site. Page requests share one pacer.
pub struct SiteAdapter<'a> {
    http: &'a HttpFetcher,
    base: Url,
    member_code: String,
    pacer: Pacer,
}

impl<'a> SiteAdapter<'a> {
    pub fn new(
        http: &'a HttpFetcher,
        source: &SourceConfig,
        pacing: &PacingConfig,
    ) -> Result<Self> {
        let base = Url::parse(source.base_url.trim_end_matches('/'))
            .map_err(|err| MirrorError::InvalidConfig(format!("source.base_url: {err}")))?;
        Ok(Self {
            http,
            base,
            member_code: source.member_code.clone(),
            pacer: Pacer::new(pacing.request_delay()),
        })
    }

    fn origin(&self) -> String {
        self.base.as_str().trim_end_matches('/').to_string()
    }

    pub fn listing_url(&self, page: usize) -> String {
        let mut url = format!(
            "{}/s/s46/diary/blog/list?ima=0000&ct={}&cd=blog",
            self.origin(),
            self.member_code
        );
        if page > 0 {
            url.push_str(&format!("&page={page}"));
        }
        url
    }

    pub fn detail_url(&self, id: u64) -> String {
        format!("{}/s/s46/diary/detail/{id}?ima=0000&cd=blog", self.origin())
    }

    pub fn member_url(&self) -> String {
        format!("{}/s/s46/artist/{}?ima=0000", self.origin(), self.member_code)
    }

    pub fn greeting_list_url(&self) -> String {
        format!("{}/s/s46/page/greeting?ima=0000", self.origin())
    }

    fn get(&self, url: &str) -> Result<String> {
        self.pacer.pace();
        self.http.fetch_text(url)
    }
}

impl SourceAdapter for SiteAdapter<'_> {
    fn list_page(&self, n: usize) -> Result<Vec<u64>> {
        let url = self.listing_url(n);
        let html = self.get(&url)?;
        parse::listing_ids(&html).with_context(|| format!("failed to parse listing {url}"))
    }

    fn fetch_post(&self, id: u64) -> Result<Post> {
        let url = self.detail_url(id);
        let html = self.get(&url)?;
        parse::parse_post(id, &html, &self.base, &url)
    }

    fn fetch_profile(&self) -> Result<MemberProfile> {
        let url = self.member_url();
        let html = self.get(&url)?;
        parse::parse_member(&html, &self.base, &url, &self.greeting_list_url())
    }

    fn referer(&self) -> String {
        self.member_url()
    }
}
