#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use phishscope_engine::config::ArtifactConfig;
use phishscope_engine::engine::PhishEngine;
use phishscope_engine::features::network::{HostResolver, SearchIndex, TrafficRank};
use phishscope_engine::features::page::{Page, PageSource};
use phishscope_engine::features::whois::{WhoisRecord, WhoisSource};
use phishscope_engine::features::{ExtractFailure, Extracted, FeatureAssembler, Probes, Target};
use phishscope_engine::labels::{DatasetStore, LabelCollector};
use phishscope_engine::models::ScoringContext;

pub const LOGIN_PAGE: &str = r#"<html>
<head>
  <title>Secure Login</title>
  <link rel="stylesheet" href="/static/site.css">
</head>
<body>
  <a href="http://evil.example/collect">Continue</a>
  <a href="/reset">Forgot password?</a>
  <img src="/logo.png">
  <p>Sign in to verify your account</p>
</body>
</html>"#;

pub struct FixedSearch(pub Extracted);

#[async_trait]
impl SearchIndex for FixedSearch {
    async fn indexed(&self, _target: &Target) -> Extracted {
        self.0.clone()
    }
}

pub struct FixedTraffic(pub Extracted);

#[async_trait]
impl TrafficRank for FixedTraffic {
    async fn total_visits(&self, _domain: &str) -> Extracted {
        self.0.clone()
    }
}

pub struct FixedResolver(pub bool);

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

pub struct FixedWhois(pub Result<WhoisRecord, ExtractFailure>);

#[async_trait]
impl WhoisSource for FixedWhois {
    async fn lookup(&self, _host: &str) -> Result<WhoisRecord, ExtractFailure> {
        self.0.clone()
    }
}

pub struct FixedPages(pub Result<Page, ExtractFailure>);

#[async_trait]
impl PageSource for FixedPages {
    async fn fetch(&self, _url: &str) -> Result<Page, ExtractFailure> {
        self.0.clone()
    }
}

pub fn year_long_record() -> WhoisRecord {
    let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(0, 0, 0));
    WhoisRecord {
        creation: day(2020, 1, 1),
        expiration: day(2021, 1, 1),
    }
}

/// Every probe answers from memory.
pub fn healthy_probes() -> Probes {
    Probes {
        search: Arc::new(FixedSearch(Ok(1.0))),
        traffic: Arc::new(FixedTraffic(Ok(5000.0))),
        resolver: Arc::new(FixedResolver(true)),
        whois: Arc::new(FixedWhois(Ok(year_long_record()))),
        pages: Arc::new(FixedPages(Ok(Page {
            status: 200,
            body: LOGIN_PAGE.to_string(),
        }))),
    }
}

/// Every network and page probe fails.
pub fn dead_probes() -> Probes {
    Probes {
        search: Arc::new(FixedSearch(Err(ExtractFailure::HttpStatus(429)))),
        traffic: Arc::new(FixedTraffic(Err(ExtractFailure::Timeout))),
        resolver: Arc::new(FixedResolver(false)),
        whois: Arc::new(FixedWhois(Err(ExtractFailure::Whois("refused".into())))),
        pages: Arc::new(FixedPages(Err(ExtractFailure::Transport("connection refused".into())))),
    }
}

pub fn engine(probes: Probes, dataset: &Path) -> PhishEngine {
    let scoring = ScoringContext::load(&ArtifactConfig::default()).expect("bundled artifacts load");
    let assembler = FeatureAssembler::new(probes, 8, Duration::from_secs(5));
    let labels = LabelCollector::new(DatasetStore::open(dataset).expect("dataset opens"), None, 100);
    PhishEngine::from_parts(Arc::new(scoring), assembler, labels, None)
}
