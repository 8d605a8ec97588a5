//! Collaborator interfaces the report stages delegate to.
//!
//! The orchestrator never interprets collaborator output beyond schema
//! checks; everything domain-specific (data retrieval, formulas, prompt
//! text, document templates) lives behind these traits. The in-tree
//! implementations are inert: they answer `NotConfigured` so the pipeline
//! can be exercised end-to-end without credentials, degrading instead of
//! refusing to run.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::errors::ErrorKind;
use crate::stage::StageError;

/// Failure reported by a collaborator, before stage-level classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("ticker `{ticker}` is not known to the data provider")]
    InvalidTicker { ticker: String },

    #[error("provider outage: {message}")]
    Outage { message: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("{what} is not configured")]
    NotConfigured { what: String },

    #[error("malformed collaborator output: {message}")]
    Malformed { message: String },
}

impl ProviderError {
    pub fn not_configured(what: impl Into<String>) -> Self {
        Self::NotConfigured { what: what.into() }
    }

    /// Classify into the stage contract. An unknown ticker invalidates the
    /// whole run; everything else degrades.
    pub fn into_stage_error(self) -> StageError {
        match self {
            Self::InvalidTicker { .. } => StageError::fatal(ErrorKind::Provider, self.to_string()),
            Self::NotConfigured { .. } => {
                StageError::recoverable(ErrorKind::NotConfigured, self.to_string())
            }
            Self::Malformed { .. } => {
                StageError::recoverable(ErrorKind::SchemaInvalid, self.to_string())
            }
            Self::Outage { .. } | Self::RateLimited { .. } => {
                StageError::recoverable(ErrorKind::Provider, self.to_string())
            }
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(err: ProviderError) -> Self {
        err.into_stage_error()
    }
}

/// Market/fundamentals data source.
#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    /// Financial statements for a ticker, as one JSON document.
    async fn fetch_statements(&self, ticker: &str) -> Result<Value, ProviderError>;

    /// Recent price/volume window anchoring valuation and narratives.
    async fn fetch_price_window(&self, ticker: &str) -> Result<Value, ProviderError>;
}

/// Numeric analysis over fetched data. Formula choice is this trait's
/// business, not the pipeline's.
#[async_trait]
pub trait AnalysisModel: Send + Sync {
    async fn quant_metrics(
        &self,
        financials: &Value,
        price_window: Option<&Value>,
    ) -> Result<Value, ProviderError>;

    async fn valuation(
        &self,
        metrics: &Value,
        qual_notes: Option<&Value>,
    ) -> Result<Value, ProviderError>;
}

/// Text generation and structured review.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-form section text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Structured review of a draft. Expected shape:
    /// `{"verdict": "accept"|"revise", "notes": [...]}`.
    async fn review(&self, prompt: &str) -> Result<Value, ProviderError>;
}

/// Final document assembly from the stage outputs visible to the render
/// stage. Output never feeds back into the graph.
pub trait Renderer: Send + Sync {
    fn render(&self, sections: &FxHashMap<String, Value>) -> Result<String, ProviderError>;
}

/// Placeholder fundamentals source used when no data credential is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredFundamentals;

#[async_trait]
impl FundamentalsProvider for UnconfiguredFundamentals {
    async fn fetch_statements(&self, _ticker: &str) -> Result<Value, ProviderError> {
        Err(ProviderError::not_configured("fundamentals provider"))
    }

    async fn fetch_price_window(&self, _ticker: &str) -> Result<Value, ProviderError> {
        Err(ProviderError::not_configured("fundamentals provider"))
    }
}

/// Placeholder analysis model used when no numeric backend is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredAnalysis;

#[async_trait]
impl AnalysisModel for UnconfiguredAnalysis {
    async fn quant_metrics(
        &self,
        _financials: &Value,
        _price_window: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::not_configured("analysis model"))
    }

    async fn valuation(
        &self,
        _metrics: &Value,
        _qual_notes: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::not_configured("analysis model"))
    }
}

/// Placeholder language model used when no LLM credential is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredLanguageModel;

#[async_trait]
impl LanguageModel for UnconfiguredLanguageModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::not_configured("language model"))
    }

    async fn review(&self, _prompt: &str) -> Result<Value, ProviderError> {
        Err(ProviderError::not_configured("language model"))
    }
}

/// Minimal renderer that lists each visible section under a heading.
/// Real template work is out of scope; this keeps degraded runs inspectable.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionListRenderer;

impl Renderer for SectionListRenderer {
    fn render(&self, sections: &FxHashMap<String, Value>) -> Result<String, ProviderError> {
        let mut keys: Vec<&String> = sections.keys().collect();
        keys.sort();
        let mut doc = String::from("# Report\n");
        for key in keys {
            doc.push_str(&format!("\n## {key}\n\n"));
            match &sections[key] {
                Value::String(text) => doc.push_str(text),
                other => doc.push_str(&other.to_string()),
            }
            doc.push('\n');
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ticker_classifies_fatal() {
        let err = ProviderError::InvalidTicker {
            ticker: "BOGUS".to_string(),
        };
        assert!(err.into_stage_error().is_fatal());
    }

    #[test]
    fn outage_and_missing_config_classify_recoverable() {
        for err in [
            ProviderError::Outage {
                message: "503".to_string(),
            },
            ProviderError::RateLimited {
                message: "slow down".to_string(),
            },
            ProviderError::not_configured("language model"),
            ProviderError::Malformed {
                message: "not json".to_string(),
            },
        ] {
            assert!(!err.into_stage_error().is_fatal());
        }
    }

    #[test]
    fn section_list_renderer_orders_sections() {
        let mut sections = FxHashMap::default();
        sections.insert("narrative".to_string(), serde_json::json!("strong quarter"));
        sections.insert("metrics".to_string(), serde_json::json!({"pe": 12}));
        let doc = SectionListRenderer.render(&sections).unwrap();
        let metrics_at = doc.find("## metrics").unwrap();
        let narrative_at = doc.find("## narrative").unwrap();
        assert!(metrics_at < narrative_at);
        assert!(doc.contains("strong quarter"));
    }
}
