//! The shipped report pipeline: stage blueprint, context keys, and the
//! collaborator bundle the stages delegate to.
//!
//! The blueprint mirrors the shape the engine is built around: a shared
//! ingest prelude, a quantitative and a qualitative branch, a valuation
//! join, and a narrative → review tail with one sanctioned revision
//! back-edge.

pub mod providers;
pub mod stages;

use std::sync::Arc;

use tracing::warn;

use crate::graph::{GraphBuilder, StageSpec};
use crate::settings::Settings;
use providers::{
    AnalysisModel, FundamentalsProvider, LanguageModel, Renderer, SectionListRenderer,
    UnconfiguredAnalysis, UnconfiguredFundamentals, UnconfiguredLanguageModel,
};
use stages::{
    EnrichMarket, IngestFinancials, Narrative, NewsDigest, QualResearch, QualityAudit,
    QuantMetrics, RenderReport, Reviewer, RiskOutlook, Valuation,
};

/// Context key names shared between stages, the blueprint, and tests.
pub mod keys {
    // Seed keys, supplied by the caller.
    pub const TICKER: &str = "ticker";
    pub const COMPANY_NAME: &str = "company_name";
    pub const REPORT_DATE: &str = "report_date";

    // Stage outputs.
    pub const FINANCIALS: &str = "financials";
    pub const PRICE_WINDOW: &str = "price_window";
    pub const METRICS: &str = "metrics";
    pub const NEWS_DIGEST: &str = "news_digest";
    pub const QUAL_NOTES: &str = "qual_notes";
    pub const VALUATION: &str = "valuation";
    pub const NARRATIVE: &str = "narrative";
    pub const RISK_OUTLOOK: &str = "risk_outlook";
    pub const REVIEW_VERDICT: &str = "review_verdict";
    pub const REPORT_MARKDOWN: &str = "report_markdown";
    pub const AUDIT_REPORT: &str = "audit_report";
}

/// External services the pipeline depends on, bundled for injection.
#[derive(Clone)]
pub struct Collaborators {
    pub fundamentals: Arc<dyn FundamentalsProvider>,
    pub analysis: Arc<dyn AnalysisModel>,
    pub language: Arc<dyn LanguageModel>,
    pub renderer: Arc<dyn Renderer>,
}

impl Collaborators {
    /// Everything inert: every provider-backed stage records a recoverable
    /// "not configured" failure and the run degrades.
    pub fn unconfigured() -> Self {
        Self {
            fundamentals: Arc::new(UnconfiguredFundamentals),
            analysis: Arc::new(UnconfiguredAnalysis),
            language: Arc::new(UnconfiguredLanguageModel),
            renderer: Arc::new(SectionListRenderer),
        }
    }

    /// Resolve collaborators from settings. No network clients ship in this
    /// crate, so credentials only earn a warning today; embedders replace
    /// the bundle with real implementations.
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.data_api_key.is_some() {
            warn!("data credential set, but no bundled fundamentals client uses it");
        }
        if settings.llm_api_key.is_some() {
            warn!("llm credential set, but no bundled language-model client uses it");
        }
        Self::unconfigured()
    }
}

/// Build the report pipeline blueprint over the given collaborators.
/// The caller compiles it; compilation failure here is a programming error
/// surfaced by the blueprint test below.
pub fn report_graph(collab: &Collaborators) -> GraphBuilder {
    GraphBuilder::new()
        .with_seed_key(keys::TICKER)
        .with_seed_key(keys::COMPANY_NAME)
        .with_seed_key(keys::REPORT_DATE)
        .add_stage(
            StageSpec::new(
                "ingest_financials",
                IngestFinancials::new(Arc::clone(&collab.fundamentals)),
            )
            .reads(keys::TICKER)
            .writes(keys::FINANCIALS),
        )
        .add_stage(
            StageSpec::new(
                "enrich_market",
                EnrichMarket::new(Arc::clone(&collab.fundamentals)),
            )
            .depends_on("ingest_financials")
            .reads(keys::TICKER)
            .writes(keys::PRICE_WINDOW),
        )
        .add_stage(
            StageSpec::new("quant_metrics", QuantMetrics::new(Arc::clone(&collab.analysis)))
                .depends_on("enrich_market")
                .reads(keys::FINANCIALS)
                .reads_optional(keys::PRICE_WINDOW)
                .writes(keys::METRICS),
        )
        .add_stage(
            StageSpec::new("news_digest", NewsDigest::new(Arc::clone(&collab.language)))
                .depends_on("ingest_financials")
                .reads(keys::TICKER)
                .reads_optional(keys::COMPANY_NAME)
                .writes(keys::NEWS_DIGEST),
        )
        .add_stage(
            StageSpec::new("qual_research", QualResearch::new(Arc::clone(&collab.language)))
                .depends_on("news_digest")
                .reads(keys::TICKER)
                .reads_optional(keys::NEWS_DIGEST)
                .writes(keys::QUAL_NOTES),
        )
        .add_stage(
            StageSpec::new("valuation", Valuation::new(Arc::clone(&collab.analysis)))
                .depends_on("quant_metrics")
                .depends_on_optional("qual_research")
                .reads(keys::METRICS)
                .reads_optional(keys::QUAL_NOTES)
                .writes(keys::VALUATION),
        )
        .add_stage(
            StageSpec::new("narrative", Narrative::new(Arc::clone(&collab.language)))
                .depends_on("valuation")
                .reads(keys::TICKER)
                .reads_optional(keys::VALUATION)
                .reads_optional(keys::METRICS)
                .reads_optional(keys::REVIEW_VERDICT)
                .writes(keys::NARRATIVE),
        )
        .add_stage(
            StageSpec::new("risk_outlook", RiskOutlook::new(Arc::clone(&collab.language)))
                .depends_on("narrative")
                .reads_optional(keys::NARRATIVE)
                .reads_optional(keys::NEWS_DIGEST)
                .reads_optional(keys::METRICS)
                .writes(keys::RISK_OUTLOOK),
        )
        .add_stage(
            StageSpec::new("reviewer", Reviewer::new(Arc::clone(&collab.language)))
                .depends_on("risk_outlook")
                .reads(keys::NARRATIVE)
                .reads_optional(keys::RISK_OUTLOOK)
                .reads_optional(keys::METRICS)
                .reads_optional(keys::VALUATION)
                .writes(keys::REVIEW_VERDICT),
        )
        .add_stage(
            StageSpec::new("render_report", RenderReport::new(Arc::clone(&collab.renderer)))
                .depends_on("reviewer")
                .reads_optional(keys::COMPANY_NAME)
                .reads_optional(keys::REPORT_DATE)
                .reads_optional(keys::FINANCIALS)
                .reads_optional(keys::METRICS)
                .reads_optional(keys::VALUATION)
                .reads_optional(keys::NARRATIVE)
                .reads_optional(keys::RISK_OUTLOOK)
                .reads_optional(keys::NEWS_DIGEST)
                .reads_optional(keys::QUAL_NOTES)
                .reads_optional(keys::REVIEW_VERDICT)
                .writes(keys::REPORT_MARKDOWN),
        )
        .add_stage(
            StageSpec::new("quality_audit", QualityAudit)
                .depends_on("render_report")
                .reads_optional(keys::FINANCIALS)
                .reads_optional(keys::PRICE_WINDOW)
                .reads_optional(keys::METRICS)
                .reads_optional(keys::NEWS_DIGEST)
                .reads_optional(keys::QUAL_NOTES)
                .reads_optional(keys::VALUATION)
                .reads_optional(keys::NARRATIVE)
                .reads_optional(keys::RISK_OUTLOOK)
                .reads_optional(keys::REVIEW_VERDICT)
                .reads_optional(keys::REPORT_MARKDOWN)
                .writes(keys::AUDIT_REPORT),
        )
        .with_revision_loop("reviewer", "narrative", keys::REVIEW_VERDICT)
}
