use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{validation_error, AppError},
    features::{FeatureAssembler, Probes},
    labels::{DatasetStore, LabelCollector, Resolution},
    models::ScoringContext,
    redis_client::ReviewQueue,
    types::*,
};

pub struct PhishEngine {
    scoring: Arc<ScoringContext>,
    assembler: FeatureAssembler,
    labels: LabelCollector,
    queue: Option<ReviewQueue>,
    start_time: Instant,
}

impl PhishEngine {
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        info!("Initializing PhishScope engine...");

        let scoring = Arc::new(ScoringContext::load(&config.artifacts)?);
        let probes = Probes::from_config(&config.extraction)?;
        let assembler = FeatureAssembler::from_config(probes, &config.extraction);
        let dataset = DatasetStore::open(&config.dataset.path)?;

        // The review mirror is optional; a dead Redis must not keep the service down.
        let queue = match &config.redis {
            Some(redis) => match ReviewQueue::connect(redis).await {
                Ok(queue) => Some(queue),
                Err(e) => {
                    warn!("Review queue unavailable, tickets stay in memory only: {}", e);
                    None
                }
            },
            None => None,
        };

        info!("PhishScope engine initialized successfully");
        let labels = LabelCollector::new(dataset, queue.clone(), config.dataset.max_pending);
        Ok(Self::from_parts(scoring, assembler, labels, queue))
    }

    pub fn from_parts(
        scoring: Arc<ScoringContext>,
        assembler: FeatureAssembler,
        labels: LabelCollector,
        queue: Option<ReviewQueue>,
    ) -> Self {
        Self {
            scoring,
            assembler,
            labels,
            queue,
            start_time: Instant::now(),
        }
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<PredictResponse, AppError> {
        let start = Instant::now();
        metrics::counter!("requests_total").increment(1);

        // Only emptiness is rejected; the URL is scored exactly as sent.
        let url = match request.url {
            Some(url) if !url.is_empty() => url,
            _ => return Err(validation_error("URL is required")),
        };
        info!("Received prediction request for {}", url);

        let assembler = self.assembler.clone();
        let target = url.clone();
        let vector = tokio::spawn(async move { assembler.assemble(&target).await })
            .await
            .map_err(|e| AppError::FeatureExtraction(e.to_string()))?;
        debug!("Features for {}: {:?}", url, vector.as_slice());

        let scored = self.scoring.score(&vector)?;
        for (name, probability) in &scored.probabilities {
            match probability {
                Some(p) => debug!("{} probability for {}: {:.4}", name, url, p),
                None => debug!("{} produced no probability for {}", name, url),
            }
        }

        let review_ticket = self.labels.submit(&url, vector, scored.aggregate);

        let latency = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("request_duration_ms").record(latency);
        info!("Prediction for {} completed in {:.1}ms", url, latency);

        Ok(PredictResponse {
            final_probability: scored.aggregate,
            shap_explanations: scored.explanation,
            review_ticket,
        })
    }

    pub async fn label(&self, request: LabelRequest) -> Result<LabelResponse, AppError> {
        let verdict = i8::try_from(request.actual)
            .map_err(|_| request.actual.to_string())
            .and_then(Verdict::try_from)
            .map_err(|_| validation_error("actual must be 0, 1 or -1"))?;

        let resolution = self.labels.resolve(request.ticket_id, verdict).await?;
        let (recorded, message) = match resolution {
            Resolution::Recorded => (true, "Label recorded".to_string()),
            Resolution::Duplicate => (false, "URL already present in dataset".to_string()),
        };
        Ok(LabelResponse {
            ticket_id: request.ticket_id,
            recorded,
            message,
        })
    }

    pub fn pending_reviews(&self) -> Vec<ReviewTicket> {
        self.labels.pending()
    }

    pub async fn health(&self) -> HealthResponse {
        let review_queue = match &self.queue {
            Some(queue) if queue.health_check().await => Some(queue.queue_name().to_string()),
            Some(_) => Some("unreachable".to_string()),
            None => None,
        };
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            models: self.scoring.model_names().into_iter().map(String::from).collect(),
            model_count: self.scoring.model_count(),
            pending_reviews: self.labels.pending_count(),
            review_queue,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
