use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LibError, Result};

const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Classifier output: an intent label plus whatever slots the model filled.
/// The label is matched against the known intent set downstream; an unknown
/// label degrades to the not-understood answer rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPrediction {
    pub intent: String,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL of the intent service, e.g. "http://localhost:5005".
    pub endpoint: String,
    pub enabled: bool,
}

/// Thin client for the external intent-classification service. The service is
/// optional: a disabled or unreachable classifier must never take chat down,
/// callers translate the error into a canned reply.
pub struct IntentClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    message: &'a str,
}

impl IntentClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CLASSIFY_TIMEOUT)
            .build()
            .map_err(|err| {
                LibError::unavailable("Chat assistant is unavailable", anyhow!(err))
            })?;
        Ok(Self { client, config })
    }

    /// A classifier that answers every request with the disabled error.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            config: ClassifierConfig {
                endpoint: String::new(),
                enabled: false,
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn classify(&self, message: &str) -> Result<IntentPrediction> {
        if !self.config.enabled {
            return Err(LibError::unavailable(
                "Chat assistant is not configured",
                anyhow!("intent classifier disabled"),
            ));
        }

        let url = format!("{}/classify", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&ClassifyRequest { message })
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "intent service request failed");
                LibError::unavailable("Chat assistant is unavailable", anyhow!(err))
            })?;
        let response = response.error_for_status().map_err(|err| {
            warn!(error = %err, "intent service returned an error status");
            LibError::unavailable("Chat assistant is unavailable", anyhow!(err))
        })?;

        let prediction: IntentPrediction = response.json().await.map_err(|err| {
            LibError::unavailable("Chat assistant is unavailable", anyhow!(err))
        })?;
        debug!(intent = %prediction.intent, "intent classified");
        Ok(prediction)
    }
}
