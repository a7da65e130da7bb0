//! Startup state of a query service and its health report.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::assets::{load_retriever, AssetPaths};
use crate::embedder::Embedder;
use crate::error::ServeError;
use crate::generator::Generator;
use crate::pipeline::{Answer, AnswerStream, PipelineSettings, ServingContext};

/// Either a ready serving context or the reason there is none.
///
/// A failed asset load does not abort the process; every request is refused
/// until the assets are rebuilt and the service restarted.
#[derive(Clone)]
pub enum ServingState {
    /// Assets loaded and aligned.
    Ready(Arc<ServingContext>),
    /// Assets missing, corrupt or inconsistent.
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

impl ServingState {
    /// Loads the assets and builds the serving context.
    pub fn load(
        paths: &AssetPaths,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        match load_retriever(paths, embedder) {
            Ok(retriever) => {
                info!(
                    chunks = retriever.len(),
                    provider = generator.name(),
                    "serving context ready"
                );
                Self::Ready(Arc::new(ServingContext::new(retriever, generator, settings)))
            }
            Err(err) => {
                warn!(error = %err, "serving assets unavailable; requests will be refused");
                Self::Unavailable {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Current health.
    pub fn health(&self) -> HealthReport {
        match self {
            Self::Ready(context) => {
                let chunks = context.retriever().len();
                if chunks == 0 {
                    HealthReport {
                        status: HealthStatus::Unhealthy,
                        assets_loaded: true,
                        chunks,
                        reason: Some("the vector index is empty".to_string()),
                    }
                } else {
                    HealthReport {
                        status: HealthStatus::Healthy,
                        assets_loaded: true,
                        chunks,
                        reason: None,
                    }
                }
            }
            Self::Unavailable { reason } => HealthReport {
                status: HealthStatus::Unhealthy,
                assets_loaded: false,
                chunks: 0,
                reason: Some(reason.clone()),
            },
        }
    }

    /// The serving context, or the refusal every request receives.
    pub fn context(&self) -> Result<Arc<ServingContext>, ServeError> {
        match self {
            Self::Ready(context) => Ok(Arc::clone(context)),
            Self::Unavailable { reason } => Err(ServeError::AssetsUnavailable {
                reason: reason.clone(),
            }),
        }
    }

    /// [`ServingContext::answer`], refused when unavailable.
    pub async fn answer(&self, query: &str, top_k: Option<usize>) -> Result<Answer, ServeError> {
        Ok(self.context()?.answer(query, top_k).await?)
    }

    /// [`ServingContext::answer_stream`], refused when unavailable.
    pub async fn answer_stream(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<AnswerStream, ServeError> {
        Ok(self.context()?.answer_stream(query, top_k).await?)
    }
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Requests can be answered.
    Healthy,
    /// Requests will be refused.
    Unhealthy,
}

/// Health report printed by `docrag health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Verdict.
    pub status: HealthStatus,
    /// Whether both asset files loaded and aligned.
    pub assets_loaded: bool,
    /// Indexed chunk count.
    pub chunks: usize,
    /// Cause when unhealthy.
    pub reason: Option<String>,
}

impl HealthReport {
    /// True when requests can be answered.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unavailable_state_reports_and_refuses() {
        let state = ServingState::Unavailable {
            reason: "asset file assets/index.bin not found".into(),
        };
        let report = state.health();
        assert!(!report.is_healthy());
        assert_eq!(
            serde_json::to_value(&report).expect("json"),
            serde_json::json!({
                "status": "unhealthy",
                "assets_loaded": false,
                "chunks": 0,
                "reason": "asset file assets/index.bin not found"
            })
        );
        assert!(matches!(
            state.context(),
            Err(ServeError::AssetsUnavailable { .. })
        ));
    }
}
