//! The equity-research report stages.
//!
//! Each stage is a thin adapter: pull declared inputs, call a collaborator,
//! normalize failures into the stage contract, write declared outputs.
//! Prompt wording and numeric work stay behind the collaborator traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::keys;
use super::providers::{AnalysisModel, FundamentalsProvider, LanguageModel, Renderer};
use crate::errors::ErrorKind;
use crate::stage::{Stage, StageCtx, StageError, StageInput, StageUpdate};

/// Loads financial statements for the requested ticker. An unknown ticker is
/// fatal: nothing downstream can produce a meaningful report without it.
pub struct IngestFinancials {
    provider: Arc<dyn FundamentalsProvider>,
}

impl IngestFinancials {
    pub fn new(provider: Arc<dyn FundamentalsProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for IngestFinancials {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let ticker = input.required_str(keys::TICKER)?;
        let statements = self.provider.fetch_statements(ticker).await?;
        Ok(StageUpdate::new().with_value(keys::FINANCIALS, statements))
    }
}

/// Pulls a recent price/volume window to anchor valuation and narratives.
pub struct EnrichMarket {
    provider: Arc<dyn FundamentalsProvider>,
}

impl EnrichMarket {
    pub fn new(provider: Arc<dyn FundamentalsProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for EnrichMarket {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let ticker = input.required_str(keys::TICKER)?;
        let window = self.provider.fetch_price_window(ticker).await?;
        Ok(StageUpdate::new().with_value(keys::PRICE_WINDOW, window))
    }
}

/// Computes growth and ratio metrics. Runs even without a price window,
/// noting the gap so the run is classified degraded.
pub struct QuantMetrics {
    analysis: Arc<dyn AnalysisModel>,
}

impl QuantMetrics {
    pub fn new(analysis: Arc<dyn AnalysisModel>) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl Stage for QuantMetrics {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let financials = input.required(keys::FINANCIALS)?;
        let price_window = input.optional(keys::PRICE_WINDOW);
        let metrics = self.analysis.quant_metrics(financials, price_window).await?;

        let mut update = StageUpdate::new().with_value(keys::METRICS, metrics);
        if price_window.is_none() {
            update = update.with_note(
                ErrorKind::MissingInput,
                "missing_price_window: metrics computed without a market window",
            );
        }
        Ok(update)
    }
}

/// Summarizes recent news and catalysts for the company.
pub struct NewsDigest {
    language: Arc<dyn LanguageModel>,
}

impl NewsDigest {
    pub fn new(language: Arc<dyn LanguageModel>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Stage for NewsDigest {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let ticker = input.required_str(keys::TICKER)?;
        let company = input
            .optional(keys::COMPANY_NAME)
            .and_then(Value::as_str)
            .unwrap_or(ticker);
        let prompt = format!("Summarize recent news and catalysts for {company} ({ticker}).");
        let digest = self.language.generate(&prompt).await?;
        Ok(StageUpdate::new().with_value(keys::NEWS_DIGEST, json!(digest)))
    }
}

/// Industry, peer, and catalyst notes informed by the news digest.
pub struct QualResearch {
    language: Arc<dyn LanguageModel>,
}

impl QualResearch {
    pub fn new(language: Arc<dyn LanguageModel>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Stage for QualResearch {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let ticker = input.required_str(keys::TICKER)?;
        let mut prompt = format!("Write qualitative research notes for {ticker}.");
        if let Some(digest) = input.optional(keys::NEWS_DIGEST) {
            prompt.push_str(&format!(" Ground them in this news digest: {digest}"));
        }
        let notes = self.language.generate(&prompt).await?;
        Ok(StageUpdate::new().with_value(keys::QUAL_NOTES, json!(notes)))
    }
}

/// The join stage: folds both branches into fair-value bands.
pub struct Valuation {
    analysis: Arc<dyn AnalysisModel>,
}

impl Valuation {
    pub fn new(analysis: Arc<dyn AnalysisModel>) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl Stage for Valuation {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let metrics = input.required(keys::METRICS)?;
        let qual_notes = input.optional(keys::QUAL_NOTES);
        let valuation = self.analysis.valuation(metrics, qual_notes).await?;
        Ok(StageUpdate::new().with_value(keys::VALUATION, valuation))
    }
}

/// Generates the narrative sections. The revision target: on re-entry it
/// folds the reviewer's notes into the prompt.
pub struct Narrative {
    language: Arc<dyn LanguageModel>,
}

impl Narrative {
    pub fn new(language: Arc<dyn LanguageModel>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Stage for Narrative {
    async fn run(&self, input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let ticker = input.required_str(keys::TICKER)?;
        let mut prompt = format!("Write the company, industry, and growth narrative for {ticker}.");
        if let Some(valuation) = input.optional(keys::VALUATION) {
            prompt.push_str(&format!(" Valuation: {valuation}."));
        }
        if let Some(metrics) = input.optional(keys::METRICS) {
            prompt.push_str(&format!(" Metrics: {metrics}."));
        }
        if ctx.attempt > 1
            && let Some(notes) = input
                .optional(keys::REVIEW_VERDICT)
                .and_then(|verdict| verdict.get("notes"))
        {
            prompt.push_str(&format!(
                " This is revision {}, address the reviewer's notes: {notes}",
                ctx.attempt
            ));
        }
        let text = self.language.generate(&prompt).await?;
        Ok(StageUpdate::new().with_value(keys::NARRATIVE, json!(text)))
    }
}

/// Risk and catalyst section grounded on metrics and news.
pub struct RiskOutlook {
    language: Arc<dyn LanguageModel>,
}

impl RiskOutlook {
    pub fn new(language: Arc<dyn LanguageModel>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Stage for RiskOutlook {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let mut prompt = String::from("Write the risk and catalyst outlook.");
        for key in [keys::NARRATIVE, keys::NEWS_DIGEST, keys::METRICS] {
            if let Some(value) = input.optional(key) {
                prompt.push_str(&format!(" {key}: {value}."));
            }
        }
        let text = self.language.generate(&prompt).await?;
        Ok(StageUpdate::new().with_value(keys::RISK_OUTLOOK, json!(text)))
    }
}

/// Cross-checks the draft and emits the structured accept/revise verdict
/// that drives the revision loop.
pub struct Reviewer {
    language: Arc<dyn LanguageModel>,
}

impl Reviewer {
    pub fn new(language: Arc<dyn LanguageModel>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl Stage for Reviewer {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let narrative = input.required(keys::NARRATIVE)?;
        let mut prompt = format!(
            "Review this draft for consistency and respond as \
             {{\"verdict\": \"accept\"|\"revise\", \"notes\": [...]}}. Draft: {narrative}."
        );
        for key in [keys::RISK_OUTLOOK, keys::METRICS, keys::VALUATION] {
            if let Some(value) = input.optional(key) {
                prompt.push_str(&format!(" {key}: {value}."));
            }
        }

        let verdict = self.language.review(&prompt).await?;
        let label = verdict.get("verdict").and_then(Value::as_str);
        if !matches!(label, Some("accept") | Some("revise")) {
            return Err(StageError::recoverable(
                ErrorKind::SchemaInvalid,
                format!("reviewer output lacks an accept/revise verdict: {verdict}"),
            ));
        }
        Ok(StageUpdate::new().with_value(keys::REVIEW_VERDICT, verdict))
    }
}

/// Assembles the final document from every section the stage can see.
pub struct RenderReport {
    renderer: Arc<dyn Renderer>,
}

impl RenderReport {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Stage for RenderReport {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let document = self.renderer.render(input.values())?;
        Ok(StageUpdate::new().with_value(keys::REPORT_MARKDOWN, json!(document)))
    }
}

/// Finish node: verifies mandatory sections and writes an audit report.
/// Pure content logic; run classification stays with the engine summary.
#[derive(Clone, Copy, Debug, Default)]
pub struct QualityAudit;

/// Keys the audit treats as mandatory for a publishable report.
const CRITICAL_SECTIONS: &[&str] = &[
    keys::FINANCIALS,
    keys::METRICS,
    keys::VALUATION,
    keys::NARRATIVE,
    keys::RISK_OUTLOOK,
    keys::REPORT_MARKDOWN,
];

const OPTIONAL_SECTIONS: &[&str] = &[
    keys::PRICE_WINDOW,
    keys::NEWS_DIGEST,
    keys::QUAL_NOTES,
    keys::REVIEW_VERDICT,
];

#[async_trait]
impl Stage for QualityAudit {
    async fn run(&self, input: StageInput, _ctx: StageCtx) -> Result<StageUpdate, StageError> {
        let mut checks = Vec::new();
        let mut missing = Vec::new();
        for &key in CRITICAL_SECTIONS {
            let present = input.contains(key);
            checks.push(json!({"key": key, "critical": true, "status": status(present)}));
            if !present {
                missing.push(key);
            }
        }
        for &key in OPTIONAL_SECTIONS {
            checks.push(json!({
                "key": key,
                "critical": false,
                "status": status(input.contains(key)),
            }));
        }

        let audit = json!({
            "passed": missing.is_empty(),
            "checks": checks,
            "missing": missing,
        });
        Ok(StageUpdate::new().with_value(keys::AUDIT_REPORT, audit))
    }
}

fn status(present: bool) -> &'static str {
    if present { "ok" } else { "missing" }
}
