//! Page-content features.
//!
//! The target page is fetched once per request by a [`PageSource`]; every
//! content extractor here is a pure function over the fetched [`Page`].

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use super::{ExtractFailure, Extracted, Feature, Target};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/103.0.5060.134 Safari/537.36";

static HREF_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// A fetched page, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a successful response; non-2xx is a failure.
    fn success_body(&self) -> Result<&str, ExtractFailure> {
        if self.is_success() {
            Ok(&self.body)
        } else {
            Err(ExtractFailure::HttpStatus(self.status))
        }
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, ExtractFailure>;
}

pub struct HttpPageSource {
    client: Client,
    timeout: Duration,
}

impl HttpPageSource {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<Page, ExtractFailure> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(fetch_failure)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(fetch_failure)?;
        Ok(Page { status, body })
    }
}

fn fetch_failure(err: reqwest::Error) -> ExtractFailure {
    if err.is_timeout() {
        ExtractFailure::Timeout
    } else {
        ExtractFailure::Transport(err.to_string())
    }
}

pub fn extract(feature: Feature, page: &Page, target: &Target) -> Extracted {
    match feature {
        Feature::NbHyperlinks => nb_hyperlinks(page),
        Feature::NbExtCss => nb_ext_css(page),
        Feature::RatioExtHyperlinks | Feature::RatioExtRedirection => {
            ratio_ext_hyperlinks(page, target)
        }
        Feature::LinksInTags => links_in_tags(page),
        Feature::DomainInTitle => domain_in_title(page, target),
        Feature::AvgWordsRaw => avg_words_raw(page, target),
        Feature::RatioIntMedia => media_ratio(page, target, MediaSide::Internal),
        Feature::RatioExtMedia => media_ratio(page, target, MediaSide::External),
        Feature::DomainWithCopyright => text_contains(page, |text| text.contains('©')),
        Feature::DomainInBrand => text_contains(page, |text| text.to_lowercase().contains("brand")),
        _ => Err(ExtractFailure::Malformed("not a page feature")),
    }
}

fn selector(css: &str) -> Result<Selector, ExtractFailure> {
    Selector::parse(css).map_err(|_| ExtractFailure::Malformed("invalid selector"))
}

/// Anchor tags with an `href`, counted over the raw markup.
pub fn nb_hyperlinks(page: &Page) -> Extracted {
    let re = HREF_RE
        .get_or_init(|| Regex::new(r#"<a\s+[^>]*href=["']([^"']+)["']"#).ok())
        .as_ref()
        .ok_or(ExtractFailure::Malformed("invalid built-in pattern"))?;
    Ok(re.find_iter(&page.body).count() as f64)
}

/// `<link>` elements whose `href` ends in `.css`.
pub fn nb_ext_css(page: &Page) -> Extracted {
    let links = selector("link[href]")?;
    let document = Html::parse_document(&page.body);
    let count = document
        .select(&links)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| href.ends_with(".css"))
        .count();
    Ok(count as f64)
}

pub fn ratio_ext_hyperlinks(page: &Page, target: &Target) -> Extracted {
    let body = page.success_body()?;
    let anchors = selector("a[href]")?;
    let document = Html::parse_document(body);
    let own_domain = target.parts.domain().to_lowercase();

    let hrefs: Vec<&str> = document
        .select(&anchors)
        .filter_map(|el| el.value().attr("href"))
        .collect();
    let external = hrefs
        .iter()
        .filter(|href| href.starts_with("http") && !href.contains(own_domain.as_str()))
        .count();
    Ok(external as f64 / hrefs.len().max(1) as f64)
}

pub fn links_in_tags(page: &Page) -> Extracted {
    let body = page.success_body()?;
    let anchors = selector("a")?;
    Ok(Html::parse_document(body).select(&anchors).count() as f64)
}

pub fn domain_in_title(page: &Page, target: &Target) -> Extracted {
    let body = page.success_body()?;
    let title_selector = selector("title")?;
    let document = Html::parse_document(body);
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().to_lowercase())
        .unwrap_or_default();

    let found = target
        .parts
        .domain_labels()
        .iter()
        .any(|label| title.contains(label.to_lowercase().as_str()));
    Ok(if found { 1.0 } else { 0.0 })
}

/// Words of the body per `/`-separated path part (empty parts included).
pub fn avg_words_raw(page: &Page, target: &Target) -> Extracted {
    let body = page.success_body()?;
    let words = body.split_whitespace().count();
    let parts = target.parts.path.split('/').count();
    Ok(words as f64 / parts.max(1) as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaSide {
    Internal,
    External,
}

fn same_origin_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Share of `img`, `video` and `audio` elements on one side of the host boundary.
///
/// A missing `src` resolves to the page itself, so it counts as internal and
/// never as external.
fn media_ratio(page: &Page, target: &Target, side: MediaSide) -> Extracted {
    let body = page.success_body()?;
    let base = Url::parse(&target.url).map_err(|_| ExtractFailure::Malformed("unparseable page URL"))?;
    let media = selector("img, video, audio")?;
    let document = Html::parse_document(body);

    let mut total = 0usize;
    let mut matching = 0usize;
    for element in document.select(&media) {
        total += 1;
        let src = element.value().attr("src").unwrap_or("");
        let resolved = base.join(src).ok();
        let internal = resolved
            .as_ref()
            .map(|u| same_origin_host(u, &base))
            .unwrap_or(false);
        let hit = match side {
            MediaSide::Internal => internal,
            MediaSide::External => !src.is_empty() && resolved.is_some() && !internal,
        };
        if hit {
            matching += 1;
        }
    }

    if total == 0 {
        return Ok(0.0);
    }
    Ok(matching as f64 / total as f64)
}

fn text_contains(page: &Page, predicate: impl Fn(&str) -> bool) -> Extracted {
    let body = page.success_body()?;
    let document = Html::parse_document(body);
    let text: String = document.root_element().text().collect();
    Ok(if predicate(&text) { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"<!doctype html>
<html>
<head>
  <title>Example Bank - Sign in</title>
  <link rel="stylesheet" href="/static/site.css">
  <link rel="stylesheet" href="https://cdn.other.net/theme.css">
  <link rel="icon" href="/favicon.ico">
</head>
<body>
  <a href="/login">Sign in</a>
  <a href="https://www.example.com/help">Help</a>
  <a href="https://evil.net/collect">Offer</a>
  <a name="top">Top</a>
  <img src="/logo.png">
  <img src="https://cdn.other.net/banner.png">
  <video></video>
  <p>Our brand &copy; 2024</p>
</body>
</html>"#;

    fn ok_page() -> Page {
        Page {
            status: 200,
            body: BODY.to_string(),
        }
    }

    fn value(feature: Feature, page: &Page) -> Extracted {
        extract(feature, page, &Target::new("https://www.example.com/account/login"))
    }

    #[test]
    fn anchor_counts() {
        let page = ok_page();
        assert_eq!(value(Feature::NbHyperlinks, &page), Ok(3.0));
        assert_eq!(value(Feature::LinksInTags, &page), Ok(4.0));
        assert_eq!(value(Feature::RatioExtHyperlinks, &page), Ok(1.0 / 3.0));
        assert_eq!(value(Feature::RatioExtRedirection, &page), Ok(1.0 / 3.0));
    }

    #[test]
    fn media_split_by_host() {
        let page = ok_page();
        assert_eq!(value(Feature::RatioIntMedia, &page), Ok(2.0 / 3.0));
        assert_eq!(value(Feature::RatioExtMedia, &page), Ok(1.0 / 3.0));

        let bare = Page {
            status: 200,
            body: "<p>no media</p>".into(),
        };
        assert_eq!(value(Feature::RatioIntMedia, &bare), Ok(0.0));
        assert_eq!(value(Feature::RatioExtMedia, &bare), Ok(0.0));
    }

    #[test]
    fn document_text_flags() {
        let page = ok_page();
        assert_eq!(value(Feature::DomainInTitle, &page), Ok(1.0));
        assert_eq!(value(Feature::DomainWithCopyright, &page), Ok(1.0));
        assert_eq!(value(Feature::DomainInBrand, &page), Ok(1.0));
        assert_eq!(value(Feature::NbExtCss, &page), Ok(2.0));
    }

    #[test]
    fn words_per_path_part() {
        let page = Page {
            status: 200,
            body: "one two three four five six".into(),
        };
        // "/account/login" splits into three parts
        assert_eq!(value(Feature::AvgWordsRaw, &page), Ok(2.0));
    }

    #[test]
    fn error_status_only_spares_raw_counters() {
        let page = Page {
            status: 404,
            body: BODY.to_string(),
        };
        assert_eq!(value(Feature::NbHyperlinks, &page), Ok(3.0));
        assert_eq!(value(Feature::NbExtCss, &page), Ok(2.0));
        for feature in [
            Feature::RatioExtHyperlinks,
            Feature::LinksInTags,
            Feature::DomainInTitle,
            Feature::AvgWordsRaw,
            Feature::RatioIntMedia,
            Feature::DomainWithCopyright,
            Feature::DomainInBrand,
        ] {
            assert_eq!(value(feature, &page), Err(ExtractFailure::HttpStatus(404)));
        }
    }

    #[test]
    fn rejects_non_page_features() {
        assert!(value(Feature::LengthUrl, &ok_page()).is_err());
    }
}
