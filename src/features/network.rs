//! Network features: one external lookup each.
//!
//! Every remote concern sits behind a small trait so the assembler can be
//! driven by stubs in tests. The concrete implementations own their own
//! timeout and never retry.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use super::whois::WhoisSource;
use super::{ExtractFailure, Extracted, Feature, Target};

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0.2 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 11; Pixel 5 Build/RQ1A.211205.012) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.1 Mobile/15E148 Safari/604.1",
];

/// Days assumed when a WHOIS record lacks either date.
pub const DEFAULT_REGISTRATION_DAYS: f64 = 365.0;

static IPV4_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn is_ipv4_literal(host: &str) -> bool {
    IPV4_RE
        .get_or_init(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").ok())
        .as_ref()
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

/// Whether `feature` is settled from the URL alone, without contacting anything.
pub fn answered_locally(feature: Feature, target: &Target) -> bool {
    match feature {
        Feature::Ip => is_ipv4_literal(target.parts.domain()),
        Feature::DomainAge => target.parts.hostname() == "localhost",
        _ => false,
    }
}

fn transport(err: reqwest::Error) -> ExtractFailure {
    if err.is_timeout() {
        ExtractFailure::Timeout
    } else if let Some(status) = err.status() {
        ExtractFailure::HttpStatus(status.as_u16())
    } else {
        ExtractFailure::Transport(err.to_string())
    }
}

/// Whether a search engine knows the target's host.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn indexed(&self, target: &Target) -> Extracted;
}

/// Site traffic estimate for a domain.
#[async_trait]
pub trait TrafficRank: Send + Sync {
    async fn total_visits(&self, domain: &str) -> Extracted;
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<(), ExtractFailure>;
}

/// `site:` search against a Google-compatible results page.
pub struct GoogleSearch {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl GoogleSearch {
    pub fn new(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchIndex for GoogleSearch {
    async fn indexed(&self, target: &Target) -> Extracted {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let query = format!("site:{}", target.parts.netloc);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query.as_str())])
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ExtractFailure::HttpStatus(status.as_u16()));
        }
        let body = response.text().await.map_err(transport)?;
        Ok(if body.contains(&target.url) { 1.0 } else { 0.0 })
    }
}

/// Scrapes the visit estimate from a SimilarWeb-style site profile page.
pub struct SimilarWebTraffic {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl SimilarWebTraffic {
    pub fn new(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

/// Reads `span.totalVisits` as an integer; `Ok(0)` when the element is absent.
pub fn parse_total_visits(html: &str) -> Extracted {
    let selector = Selector::parse("span.totalVisits")
        .map_err(|_| ExtractFailure::Malformed("invalid selector"))?;
    let document = Html::parse_document(html);
    let Some(element) = document.select(&selector).next() else {
        return Ok(0.0);
    };
    let text: String = element.text().collect::<String>().trim().replace(',', "");
    text.parse::<i64>()
        .map(|visits| visits as f64)
        .map_err(|_| ExtractFailure::Malformed("traffic figure is not an integer"))
}

#[async_trait]
impl TrafficRank for SimilarWebTraffic {
    async fn total_visits(&self, domain: &str) -> Extracted {
        let url = format!("{}/{}/", self.endpoint.trim_end_matches('/'), domain);
        let body = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport)?
            .text()
            .await
            .map_err(transport)?;
        parse_total_visits(&body)
    }
}

/// System resolver, falling back to the default upstream configuration when
/// the system one cannot be read.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsResolver {
    pub fn new(timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!(error = %e, "system resolver config unavailable, using defaults");
            let mut opts = ResolverOpts::default();
            opts.timeout = timeout;
            opts.attempts = 1;
            TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
        });
        Self { resolver, timeout }
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<(), ExtractFailure> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.lookup_ip(host))
            .await
            .map_err(|_| ExtractFailure::Timeout)?
            .map_err(|e| ExtractFailure::Unresolved(format!("{host}: {e}")))?;
        if lookup.iter().next().is_none() {
            return Err(ExtractFailure::Unresolved(host.to_string()));
        }
        Ok(())
    }
}

fn ascii_host(target: &Target) -> Result<String, ExtractFailure> {
    let host = target.parts.hostname();
    if host.is_empty() {
        return Err(ExtractFailure::Malformed("empty host"));
    }
    idna::domain_to_ascii(&host).map_err(|_| ExtractFailure::Malformed("host is not a valid domain name"))
}

pub async fn google_index(search: &dyn SearchIndex, target: &Target) -> Extracted {
    if !target.parts.is_http() {
        return Err(ExtractFailure::Malformed("scheme is not http(s)"));
    }
    search.indexed(target).await
}

pub async fn web_traffic(traffic: &dyn TrafficRank, target: &Target) -> Extracted {
    let host = ascii_host(target)?;
    traffic.total_visits(&host).await
}

/// 1 for an IPv4 literal host, 0 for a resolvable name.
pub async fn ip(resolver: &dyn HostResolver, target: &Target) -> Extracted {
    if answered_locally(Feature::Ip, target) {
        return Ok(1.0);
    }
    let host = ascii_host(target)?;
    resolver.resolve(&host).await?;
    Ok(0.0)
}

pub async fn domain_age(whois: &dyn WhoisSource, target: &Target) -> Extracted {
    if answered_locally(Feature::DomainAge, target) {
        return Ok(0.0);
    }
    registration_days(whois, target).await
}

pub async fn domain_registration_length(whois: &dyn WhoisSource, target: &Target) -> Extracted {
    registration_days(whois, target).await
}

async fn registration_days(whois: &dyn WhoisSource, target: &Target) -> Extracted {
    let host = target.parts.hostname();
    if host.is_empty() {
        return Err(ExtractFailure::Malformed("empty host"));
    }
    let record = whois.lookup(&host).await?;
    Ok(record
        .registration_days()
        .map(|days| days as f64)
        .unwrap_or(DEFAULT_REGISTRATION_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::whois::WhoisRecord;
    use chrono::NaiveDate;

    struct FixedWhois(Result<WhoisRecord, ExtractFailure>);

    #[async_trait]
    impl WhoisSource for FixedWhois {
        async fn lookup(&self, _host: &str) -> Result<WhoisRecord, ExtractFailure> {
            self.0.clone()
        }
    }

    struct FixedResolver(bool);

    #[async_trait]
    impl HostResolver for FixedResolver {
        async fn resolve(&self, host: &str) -> Result<(), ExtractFailure> {
            if self.0 {
                Ok(())
            } else {
                Err(ExtractFailure::Unresolved(host.to_string()))
            }
        }
    }

    struct PanicSearch;

    #[async_trait]
    impl SearchIndex for PanicSearch {
        async fn indexed(&self, _target: &Target) -> Extracted {
            panic!("search must not be queried for non-http schemes");
        }
    }

    fn dated(created: (i32, u32, u32), expires: (i32, u32, u32)) -> WhoisRecord {
        let at = |(y, m, d): (i32, u32, u32)| {
            NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(0, 0, 0))
        };
        WhoisRecord {
            creation: at(created),
            expiration: at(expires),
        }
    }

    #[tokio::test]
    async fn whois_features_share_day_delta() {
        let whois = FixedWhois(Ok(dated((2020, 1, 1), (2021, 1, 1))));
        let target = Target::new("https://shop.example.com/");
        assert_eq!(domain_age(&whois, &target).await, Ok(366.0));
        assert_eq!(domain_registration_length(&whois, &target).await, Ok(366.0));
    }

    #[tokio::test]
    async fn whois_missing_dates_default_to_a_year() {
        let whois = FixedWhois(Ok(WhoisRecord::default()));
        let target = Target::new("https://example.com/");
        assert_eq!(domain_age(&whois, &target).await, Ok(365.0));
        assert_eq!(domain_registration_length(&whois, &target).await, Ok(365.0));
    }

    #[tokio::test]
    async fn whois_failure_surfaces_as_error() {
        let whois = FixedWhois(Err(ExtractFailure::Whois("refused".into())));
        let target = Target::new("https://example.com/");
        assert!(domain_age(&whois, &target).await.is_err());
        assert!(domain_registration_length(&whois, &target).await.is_err());

        let localhost = Target::new("http://localhost:8080/");
        assert_eq!(domain_age(&whois, &localhost).await, Ok(0.0));
    }

    #[tokio::test]
    async fn ip_feature() {
        let up = FixedResolver(true);
        let down = FixedResolver(false);
        assert_eq!(ip(&down, &Target::new("http://10.0.0.1/x")).await, Ok(1.0));
        assert_eq!(ip(&down, &Target::new("http://10.0.0.1:8080/x")).await, Ok(1.0));
        assert_eq!(ip(&up, &Target::new("http://example.com")).await, Ok(0.0));
        assert!(ip(&down, &Target::new("http://nope.invalid")).await.is_err());
        assert!(ip(&up, &Target::new("not a url")).await.is_err());
    }

    #[tokio::test]
    async fn google_index_rejects_other_schemes() {
        let target = Target::new("ftp://example.com/file");
        assert!(google_index(&PanicSearch, &target).await.is_err());
    }

    #[test]
    fn local_answers() {
        assert!(answered_locally(Feature::Ip, &Target::new("http://192.168.1.1/")));
        assert!(!answered_locally(Feature::Ip, &Target::new("http://example.com/")));
        assert!(answered_locally(Feature::DomainAge, &Target::new("http://localhost:8080/")));
        assert!(!answered_locally(Feature::WebTraffic, &Target::new("http://localhost/")));
    }

    #[test]
    fn traffic_markup() {
        assert_eq!(
            parse_total_visits("<html><span class=\"totalVisits\"> 1,234,567 </span></html>"),
            Ok(1_234_567.0)
        );
        assert_eq!(parse_total_visits("<html><body>nothing</body></html>"), Ok(0.0));
        assert!(parse_total_visits("<span class=\"totalVisits\">12.5M</span>").is_err());
    }
}
