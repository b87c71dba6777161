//! Pure page parsers for the official site. Every function takes the page body
//! and returns structured records; nothing here touches the network.

use crate::error::MirrorError;
use crate::mirror::model::{
    ContentBlock, ImageRef, MemberAttribute, MemberImages, MemberProfile, Post,
};
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use url::Url;

pub const HASHTAG_LIMIT: usize = 6;
const FALLBACK_DATE: &str = "1970-01-01";

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(source).unwrap_or_else(|err| panic!("invalid pattern {source}: {err}"))
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector {css}: {err:?}"))
}

fn first<'a>(scope: ElementRef<'a>, css: &str) -> Result<Option<ElementRef<'a>>> {
    Ok(scope.select(&selector(css)?).next())
}

fn element_text(element: ElementRef<'_>) -> String {
    compact_lines(&element.text().collect::<String>())
}

/// Trim every line and collapse runs of blank lines into one.
pub fn compact_lines(raw: &str) -> String {
    let mut out = Vec::new();
    let mut last_blank = false;
    let cleaned = raw.replace(['\r', '\u{FFFC}'], "");
    for line in cleaned.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            if !last_blank {
                out.push("");
            }
            last_blank = true;
        } else {
            out.push(line);
            last_blank = false;
        }
    }
    out.join("\n").trim().to_string()
}

/// Resolve relative and protocol-relative `raw` against `base`.
pub fn absolute_url(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim().replace("\\/", "/");
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    base.join(&raw).ok().map(String::from)
}

/// Post ids in listing order from the main blog list of a listing page.
/// A page without the list yields no ids.
pub fn listing_ids(html: &str) -> Result<Vec<u64>> {
    static DETAIL_HREF: OnceLock<Regex> = OnceLock::new();
    let href_id = pattern(&DETAIL_HREF, r"/s/s46/diary/detail/(\d+)\?ima=0000&cd=blog");

    let document = Html::parse_document(html);
    let Some(list) = document
        .select(&selector(r#"ul[class^="com-blog-part"]"#)?)
        .next()
    else {
        return Ok(Vec::new());
    };

    let mut seen = BTreeSet::new();
    let mut ids = Vec::new();
    for link in list.select(&selector("a[href]")?) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(id) = href_id
            .captures(href)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        else {
            continue;
        };
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// `YYYY/MM/DD HH:MM` (or any text starting with a slash date) to `YYYY-MM-DD`.
pub fn post_date(raw: &str) -> Option<String> {
    static DATE: OnceLock<Regex> = OnceLock::new();
    let caps = pattern(&DATE, r"(\d{4})[/.-](\d{1,2})[/.-](\d{1,2})").captures(raw)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.format("%Y-%m-%d").to_string())
}

/// Up to `limit` distinct hashtags in order of first appearance.
pub fn hashtags(text: &str, limit: usize) -> Vec<String> {
    static HASHTAG: OnceLock<Regex> = OnceLock::new();
    let re = pattern(&HASHTAG, r"[#＃]([0-9A-Za-zぁ-んァ-ヶ一-龯ー_]+)");

    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        if out.len() >= limit {
            break;
        }
        let tag = caps[1].trim_matches('_');
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

struct BodyWriter<'b> {
    base: &'b Url,
    pending: String,
    blocks: Vec<ContentBlock>,
}

impl BodyWriter<'_> {
    fn flush(&mut self) {
        let text = compact_lines(&self.pending);
        self.pending.clear();
        if !text.is_empty() {
            self.blocks.push(ContentBlock::Text { text });
        }
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                match child_element.value().name() {
                    "script" | "style" => {}
                    "br" => self.pending.push('\n'),
                    "img" => {
                        let src = child_element.value().attr("src").unwrap_or_default();
                        if let Some(url) = absolute_url(self.base, src) {
                            self.flush();
                            self.blocks.push(ContentBlock::Image(ImageRef::remote(&url)));
                        }
                    }
                    "p" | "div" => {
                        self.walk(child_element);
                        self.pending.push('\n');
                    }
                    _ => self.walk(child_element),
                }
            } else if let Node::Text(text) = child.value() {
                self.pending.push_str(text);
            }
        }
    }
}

/// Ordered text and image blocks from an article body.
pub fn body_blocks(body: ElementRef<'_>, base: &Url) -> Vec<ContentBlock> {
    let mut writer = BodyWriter {
        base,
        pending: String::new(),
        blocks: Vec::new(),
    };
    writer.walk(body);
    writer.flush();
    writer.blocks
}

/// One post from its detail page. A page without an article body is a
/// structural failure.
pub fn parse_post(id: u64, html: &str, base: &Url, source_url: &str) -> Result<Post> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let body = first(root, "div.box-article")?
        .ok_or_else(|| MirrorError::structure("article body (div.box-article)", source_url))?;

    let title = first(root, "h1.title")?
        .map(element_text)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| format!("blog-{id}"));
    let member = first(root, "p.name")?.map(element_text).unwrap_or_default();
    let date = match first(root, "div.blog-foot p.date.wf-a")? {
        Some(found) => Some(found),
        None => first(root, "p.date.wf-a")?,
    }
    .and_then(|found| post_date(&element_text(found)))
    .unwrap_or_else(|| FALLBACK_DATE.to_string());

    let content_blocks = body_blocks(body, base);

    let mut post = Post {
        id,
        title,
        date,
        tags: Vec::new(),
        content_blocks,
        source_url: source_url.to_string(),
    };

    post.push_tag(&member.split_whitespace().collect::<String>());
    if post.date != FALLBACK_DATE {
        let month = post.date[..7].to_string();
        post.push_tag(&month);
    }
    let text = post
        .content_blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Image(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    for tag in hashtags(&text, HASHTAG_LIMIT) {
        post.push_tag(&tag);
    }

    Ok(post)
}

fn image_in(root: ElementRef<'_>, css: &str, base: &Url) -> Result<Option<ImageRef>> {
    Ok(first(root, css)?
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| absolute_url(base, src))
        .map(|url| ImageRef::remote(&url)))
}

/// The member profile page. Images are returned as remote references; the
/// caller archives them.
pub fn parse_member(
    html: &str,
    base: &Url,
    source_url: &str,
    greeting_list_url: &str,
) -> Result<MemberProfile> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name = first(root, "p.name")?
        .map(element_text)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| MirrorError::structure("member name (p.name)", source_url))?;
    let kana = first(root, "p.kana")?.map(element_text).unwrap_or_default();

    let mut attributes = Vec::new();
    let mut label: Option<String> = None;
    for cell in root.select(&selector("dl dt, dl dd")?) {
        let text = element_text(cell);
        match cell.value().name() {
            "dt" => label = Some(text),
            _ => {
                if let Some(label) = label.take().filter(|l| !l.is_empty()) {
                    attributes.push(MemberAttribute {
                        label,
                        value: text.replace('\n', " "),
                    });
                }
            }
        }
    }

    let images = MemberImages {
        profile: match image_in(root, "div.prof-elem p.ph img", base)? {
            Some(found) => Some(found),
            None => image_in(root, "p.ph img", base)?,
        },
        greeting_card: image_in(root, "p.part-card img", base)?,
        greeting_photo: image_in(root, "p.part-cimg img", base)?,
    };

    Ok(MemberProfile {
        name,
        kana,
        attributes,
        images,
        source_url: source_url.to_string(),
        greeting_list_url: greeting_list_url.to_string(),
        ..MemberProfile::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://sakurazaka46.com").expect("base")
    }

    const LISTING: &str = r#"
        <ul class="com-blog-part box3 fxpc">
          <li class="box"><a href="/s/s46/diary/detail/101?ima=0000&amp;cd=blog">a</a></li>
          <li class="box"><a href="/s/s46/diary/detail/100?ima=0000&amp;cd=blog">b</a></li>
          <li class="box"><a href="/s/s46/diary/detail/101?ima=0000&amp;cd=blog">dup</a></li>
        </ul>
        <ul class="com-blog-part sidebar">
          <li><a href="/s/s46/diary/detail/7?ima=0000&amp;cd=blog">other member</a></li>
        </ul>"#;

    const DETAIL: &str = r#"
        <html><body>
        <h1 class="title"> 春ですね </h1>
        <div class="blog-head"><p class="name">小島 凪紗</p></div>
        <div class="box-article">
          <div>こんにちは&amp;こんばんは<br>今日は<br><br><br>#さくら #休日 #さくら</div>
          <div><img src="/files/14/s46/photo1.jpg"></div>
          <p>またね</p>
          <img src="//cdn.example.com/photo2.png">
          <script>var x = 1;</script>
        </div>
        <div class="blog-foot"><p class="date wf-a">2024/02/02 21:05</p></div>
        </body></html>"#;

    const MEMBER: &str = r#"
        <div class="prof-elem">
          <p class="ph">
            <img src="/images/14/180/606c2dc266ddd3747e7e21558556c/1000_1000_102400.jpg">
          </p>
          <p class="kana">こじま なぎさ</p>
          <p class="name">小島 凪紗</p>
        </div>
        <dl><dt>生年月日</dt><dd>2006年7月7日</dd><dt>星座</dt><dd>かに座</dd></dl>
        <p class="part-card"><img src="https://sakurazaka46.com/images/14/0af/card.jpg"></p>
        <p class="part-cimg"><img src="/images/14/0af/card-01/1000.jpg"></p>"#;

    #[test]
    fn listing_reads_only_the_main_list_in_order() {
        assert_eq!(listing_ids(LISTING).expect("ids"), vec![101, 100]);
        assert!(listing_ids("<html><p>nothing</p></html>").expect("ids").is_empty());
    }

    #[test]
    fn detail_page_becomes_ordered_blocks_and_tags() {
        let source = "https://sakurazaka46.com/s/s46/diary/detail/101?ima=0000&cd=blog";
        let post = parse_post(101, DETAIL, &base(), source).expect("post");

        assert_eq!(post.title, "春ですね");
        assert_eq!(post.date, "2024-02-02");
        assert_eq!(post.tags, vec!["小島凪紗", "2024-02", "さくら", "休日"]);
        assert_eq!(
            post.content_blocks,
            vec![
                ContentBlock::Text {
                    text: "こんにちは&こんばんは\n今日は\n\n#さくら #休日 #さくら".into()
                },
                ContentBlock::Image(ImageRef::remote(
                    "https://sakurazaka46.com/files/14/s46/photo1.jpg"
                )),
                ContentBlock::Text {
                    text: "またね".into()
                },
                ContentBlock::Image(ImageRef::remote("https://cdn.example.com/photo2.png")),
            ]
        );
    }

    #[test]
    fn detail_without_body_is_structural_failure() {
        let err = parse_post(5, "<h1 class=\"title\">x</h1>", &base(), "u").expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<MirrorError>(),
            Some(MirrorError::Structure { .. })
        ));
    }

    #[test]
    fn detail_defaults_fill_missing_title_and_date() {
        let post =
            parse_post(9, "<div class=\"box-article\">hi</div>", &base(), "u").expect("post");
        assert_eq!(post.title, "blog-9");
        assert_eq!(post.date, FALLBACK_DATE);
        assert!(post.tags.is_empty());
    }

    #[test]
    fn hashtags_are_capped_and_unique() {
        let tags = hashtags("#a #b ＃c #a #d #e #f #g #_", HASHTAG_LIMIT);
        assert_eq!(tags, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn text_lines_are_trimmed_and_blank_runs_collapse() {
        let raw = "  first\r\n\r\n \u{FFFC}\n\n  second  \r\n\n\n";
        assert_eq!(compact_lines(raw), "first\n\nsecond");
        assert_eq!(compact_lines("\r\n \n"), "");
    }

    #[test]
    fn post_dates_normalize() {
        assert_eq!(post_date("2025/8/7 20:39").as_deref(), Some("2025-08-07"));
        assert_eq!(post_date("2025/02/30"), None);
        assert_eq!(post_date(""), None);
    }

    #[test]
    fn member_page_fields_and_images() {
        let profile = parse_member(
            MEMBER,
            &base(),
            "https://sakurazaka46.com/s/s46/artist/62?ima=0000",
            "https://sakurazaka46.com/s/s46/page/greeting?ima=0000",
        )
        .expect("profile");

        assert_eq!(profile.name, "小島 凪紗");
        assert_eq!(profile.kana, "こじま なぎさ");
        assert_eq!(profile.attributes.len(), 2);
        assert_eq!(profile.attributes[1].label, "星座");
        assert_eq!(profile.attributes[1].value, "かに座");
        assert_eq!(
            profile.images.remote_url(crate::mirror::model::ImageSlot::Profile),
            Some(concat!(
                "https://sakurazaka46.com/images/14/180/",
                "606c2dc266ddd3747e7e21558556c/1000_1000_102400.jpg"
            ))
        );
        assert_eq!(
            profile.images.greeting_photo.as_ref().map(|i| i.original_src.as_str()),
            Some("https://sakurazaka46.com/images/14/0af/card-01/1000.jpg")
        );
    }

    #[test]
    fn member_page_without_name_is_structural_failure() {
        let err = parse_member("<p class=\"kana\">x</p>", &base(), "u", "g")
            .expect_err("must fail");
        assert!(err.to_string().contains("member name"));
    }
}
