use std::path::PathBuf;
use std::sync::Arc;

use crate::admission::AdmissionGuard;
use crate::cache::FingerprintCache;
use crate::channel::DeliveryChannel;
use crate::config::FetchConfig;
use crate::delivery::{Deliverer, HistoryLog};
use crate::extract::{AttemptConfig, ExtractionEngine};
use crate::media::{MediaTool, PostProcessor};
use crate::retry::RetryPolicy;
use crate::store::DocumentStore;

/// Everything a job needs, built once by the process entry point.
pub struct FetchContext {
    pub config: FetchConfig,
    pub admission: Arc<AdmissionGuard>,
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<FingerprintCache>,
    pub engine: Arc<dyn ExtractionEngine>,
    pub channel: Arc<dyn DeliveryChannel>,
    pub postprocessor: PostProcessor,
    pub deliverer: Deliverer,
    pub attempts: Vec<AttemptConfig>,
    /// Parent of every job workspace.
    pub work_root: PathBuf,
}

impl FetchContext {
    pub fn new(
        config: FetchConfig,
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn ExtractionEngine>,
        tool: Arc<dyn MediaTool>,
        channel: Arc<dyn DeliveryChannel>,
        work_root: PathBuf,
    ) -> Self {
        let cache = Arc::new(FingerprintCache::new(store.clone()));
        let deliverer = Deliverer::new(
            channel.clone(),
            config.audit_destination.clone(),
            HistoryLog::new(store.clone()),
            cache.clone(),
            RetryPolicy::from_config(&config.delivery_or_default()),
        );
        let postprocessor = PostProcessor::new(
            tool,
            config.max_artifact_bytes,
            config.accepted_containers.clone(),
            config.target_container.clone(),
        );
        let attempts = config.attempt_chain();
        Self {
            admission: Arc::new(AdmissionGuard::new()),
            store,
            cache,
            engine,
            channel,
            postprocessor,
            deliverer,
            attempts,
            work_root,
            config,
        }
    }
}
