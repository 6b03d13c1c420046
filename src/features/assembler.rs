use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::network::{
    self, DnsResolver, GoogleSearch, HostResolver, SearchIndex, SimilarWebTraffic, TrafficRank,
};
use super::page::{self, HttpPageSource, Page, PageSource};
use super::whois::{TcpWhois, WhoisSource};
use super::{
    lexical, ExtractFailure, Extracted, Feature, FeatureVector, Source, Target, FEATURE_COUNT,
};
use crate::config::ExtractionConfig;

type SharedPage = Arc<OnceCell<Result<Page, ExtractFailure>>>;

/// External collaborators of the network and page extractors.
#[derive(Clone)]
pub struct Probes {
    pub search: Arc<dyn SearchIndex>,
    pub traffic: Arc<dyn TrafficRank>,
    pub resolver: Arc<dyn HostResolver>,
    pub whois: Arc<dyn WhoisSource>,
    pub pages: Arc<dyn PageSource>,
}

impl Probes {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        let lookup_timeout = config.request_timeout();

        Ok(Self {
            search: Arc::new(GoogleSearch::new(
                client.clone(),
                config.search_url.clone(),
                lookup_timeout,
            )),
            traffic: Arc::new(SimilarWebTraffic::new(
                client.clone(),
                config.traffic_url.clone(),
                lookup_timeout,
            )),
            resolver: Arc::new(DnsResolver::new(lookup_timeout)),
            whois: Arc::new(TcpWhois::new(lookup_timeout)),
            pages: Arc::new(HttpPageSource::new(client, config.page_timeout())),
        })
    }
}

/// Why a vector collapsed to the uniform sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    /// An extractor task panicked or produced a non-finite value.
    Fatal,
    /// Not a single network or page extractor succeeded.
    NoExternalSignal,
}

impl Collapse {
    fn as_str(self) -> &'static str {
        match self {
            Collapse::Fatal => "fatal",
            Collapse::NoExternalSignal => "no_external_signal",
        }
    }
}

/// Runs every extractor for one URL and assembles the fixed-order vector.
#[derive(Clone)]
pub struct FeatureAssembler {
    probes: Probes,
    max_parallelism: usize,
    deadline: Duration,
}

impl FeatureAssembler {
    pub fn new(probes: Probes, max_parallelism: usize, deadline: Duration) -> Self {
        Self {
            probes,
            max_parallelism: max_parallelism.max(1),
            deadline,
        }
    }

    pub fn from_config(probes: Probes, config: &ExtractionConfig) -> Self {
        Self::new(probes, config.max_parallelism, config.overall_deadline())
    }

    pub async fn assemble(&self, url: &str) -> FeatureVector {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let target = Arc::new(Target::new(url));
        let page: SharedPage = Arc::new(OnceCell::new());
        let permits = Arc::new(Semaphore::new(self.max_parallelism));

        let mut tasks = JoinSet::new();
        for &feature in Feature::ALL {
            let target = Arc::clone(&target);
            let page = Arc::clone(&page);
            let probes = self.probes.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let value = run_extractor(feature, &target, &probes, &page).await;
                (feature, value)
            });
        }

        let mut results: Vec<Option<Extracted>> = vec![None; FEATURE_COUNT];
        let mut collapse = None;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((feature, value)))) => results[feature.index()] = Some(value),
                Ok(Some(Err(err))) => {
                    warn!(url = %target.url, error = %err, "extractor task failed");
                    if err.is_panic() {
                        collapse = Some(Collapse::Fatal);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        url = %target.url,
                        pending = tasks.len(),
                        "extraction deadline reached, abandoning pending extractors"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let (vector, outcome) = finish(&results, collapse, &target);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("extraction_duration_ms").record(elapsed_ms);

        match outcome {
            Some(reason) => {
                metrics::counter!("extraction_fallback_total", "reason" => reason.as_str())
                    .increment(1);
                warn!(url = %target.url, reason = reason.as_str(), "feature vector collapsed to fallback");
            }
            None => info!(url = %target.url, elapsed_ms, "features extracted"),
        }
        vector
    }
}

async fn run_extractor(
    feature: Feature,
    target: &Target,
    probes: &Probes,
    shared_page: &SharedPage,
) -> Extracted {
    let value = match feature.source() {
        Source::Lexical => lexical::extract(feature, target),
        Source::Network => run_network(feature, target, probes).await,
        Source::Page => {
            let fetched = shared_page
                .get_or_init(|| async {
                    if !target.parts.is_http() {
                        return Err(ExtractFailure::Malformed("scheme is not http(s)"));
                    }
                    probes.pages.fetch(&target.url).await
                })
                .await;
            match fetched {
                Ok(fetched_page) => page::extract(feature, fetched_page, target),
                Err(err) => Err(err.clone()),
            }
        }
    };
    if let Err(err) = &value {
        debug!(feature = feature.name(), error = %err, "extractor failed");
    }
    value
}

async fn run_network(feature: Feature, target: &Target, probes: &Probes) -> Extracted {
    match feature {
        Feature::GoogleIndex => network::google_index(probes.search.as_ref(), target).await,
        Feature::WebTraffic => network::web_traffic(probes.traffic.as_ref(), target).await,
        Feature::Ip => network::ip(probes.resolver.as_ref(), target).await,
        Feature::DomainAge => network::domain_age(probes.whois.as_ref(), target).await,
        Feature::DomainRegistrationLength => {
            network::domain_registration_length(probes.whois.as_ref(), target).await
        }
        _ => Err(ExtractFailure::Malformed("not a network feature")),
    }
}

/// Applies sentinels and the collapse rules to the collected results.
///
/// `None` in `results` is an extractor that never reported (deadline). Only a
/// success that came from an actual lookup or fetch counts as external signal.
fn finish(
    results: &[Option<Extracted>],
    mut collapse: Option<Collapse>,
    target: &Target,
) -> (FeatureVector, Option<Collapse>) {
    let mut values = [0.0; FEATURE_COUNT];
    let mut external_signal = false;

    for (&feature, result) in Feature::ALL.iter().zip(results) {
        let value = match result {
            Some(Ok(v)) if v.is_finite() => {
                if feature.source() != Source::Lexical
                    && !network::answered_locally(feature, target)
                {
                    external_signal = true;
                }
                *v
            }
            Some(Ok(v)) => {
                warn!(feature = feature.name(), value = %v, "non-finite feature value");
                collapse = Some(Collapse::Fatal);
                feature.sentinel()
            }
            Some(Err(_)) => feature.sentinel(),
            None => {
                debug!(feature = feature.name(), error = %ExtractFailure::Deadline, "extractor failed");
                feature.sentinel()
            }
        };
        values[feature.index()] = value;
    }

    if collapse.is_none() && !external_signal {
        collapse = Some(Collapse::NoExternalSignal);
    }
    match collapse {
        Some(reason) => (FeatureVector::fallback(), Some(reason)),
        None => (FeatureVector::from_values(values), None),
    }
}
