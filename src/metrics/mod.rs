//! Metrics collection for observability

use crate::context::budget::ContextBudget;
use crate::context::models::{AllocationPlan, PlanMode, PoolKind};
use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Planning
    pub plans: CounterVec,
    pub fallbacks: CounterVec,

    // Token usage
    pub tokens_used: Histogram,
    pub tokens_available: Histogram,
    pub pool_tokens: HistogramVec,

    // Degraded inputs
    pub tokenizer_fallbacks: Counter,
    pub skipped_units: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let token_buckets = exponential_buckets(32.0, 2.0, 12)?;

        let plans = register_counter_vec_with_registry!(
            Opts::new("context_plans_total", "Total turn plans produced"),
            &["mode"],
            registry
        )?;

        let fallbacks = register_counter_vec_with_registry!(
            Opts::new("context_fallbacks_total", "Total static plans by cause"),
            &["cause"],
            registry
        )?;

        let tokens_used = register_histogram_with_registry!(
            HistogramOpts::new("context_tokens_used", "Tokens selected per turn")
                .buckets(token_buckets.clone()),
            registry
        )?;

        let tokens_available = register_histogram_with_registry!(
            HistogramOpts::new(
                "context_tokens_available",
                "Tokens available for dynamic content per turn"
            )
            .buckets(token_buckets.clone()),
            registry
        )?;

        let pool_tokens = register_histogram_vec_with_registry!(
            HistogramOpts::new("context_pool_tokens", "Tokens selected per pool per turn")
                .buckets(token_buckets),
            &["pool"],
            registry
        )?;

        let tokenizer_fallbacks = register_counter_with_registry!(
            Opts::new(
                "context_tokenizer_fallbacks_total",
                "Exact tokenizer failures answered by the approximate counter"
            ),
            registry
        )?;

        let skipped_units = register_counter_vec_with_registry!(
            Opts::new(
                "context_skipped_units_total",
                "Unmeasurable content units skipped"
            ),
            &["pool"],
            registry
        )?;

        Ok(Self {
            registry,
            plans,
            fallbacks,
            tokens_used,
            tokens_available,
            pool_tokens,
            tokenizer_fallbacks,
            skipped_units,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished plan
    pub fn record_plan(&self, plan: &AllocationPlan, budget: &ContextBudget) {
        match &plan.mode {
            PlanMode::Dynamic => self.plans.with_label_values(&["dynamic"]).inc(),
            PlanMode::Static { cause } => {
                self.plans.with_label_values(&["static"]).inc();
                self.fallbacks.with_label_values(&[cause.as_label()]).inc();
            }
        }

        self.tokens_used.observe(plan.total_used as f64);
        self.tokens_available.observe(budget.available_tokens as f64);
        for kind in PoolKind::ALL {
            self.pool_tokens
                .with_label_values(&[kind.as_str()])
                .observe(plan.pool(kind).tokens as f64);
        }
    }

    pub fn record_tokenizer_fallback(&self) {
        self.tokenizer_fallbacks.inc();
    }

    pub fn record_skipped_unit(&self, kind: PoolKind) {
        self.skipped_units.with_label_values(&[kind.as_str()]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
