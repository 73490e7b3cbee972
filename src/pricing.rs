//! Per-model token pricing and cost calculation.
//!
//! Rates are expressed in US dollars per 1,000 tokens, split by direction.
//! The built-in table covers the models mimir ships prompts for; entries
//! can be added or overridden from the `[pricing]` config section. Unknown
//! models are priced at the table's default tier rather than rejected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Decimal places kept in computed costs.
pub const COST_PRECISION: i32 = 6;

/// Model identifier used when no model is configured, and the default pricing tier.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Economics of a single model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    /// Cost per 1,000 prompt tokens.
    pub input_per_1k: f64,
    /// Cost per 1,000 completion tokens.
    pub output_per_1k: f64,
}

impl PricingEntry {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

const BUILTIN_PRICING: &[(&str, PricingEntry)] = &[
    ("claude-3-5-sonnet", PricingEntry::new(0.003, 0.015)),
    ("claude-3-5-haiku", PricingEntry::new(0.001, 0.005)),
    ("claude-3-opus", PricingEntry::new(0.015, 0.075)),
    ("claude-3-sonnet", PricingEntry::new(0.003, 0.015)),
    ("claude-3-haiku", PricingEntry::new(0.00025, 0.00125)),
    ("gpt-4o", PricingEntry::new(0.0025, 0.01)),
    ("gpt-4o-mini", PricingEntry::new(0.00015, 0.0006)),
];

const DEFAULT_TIER: PricingEntry = PricingEntry::new(0.003, 0.015);

/// Static model → pricing lookup table.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, PricingEntry>,
    default_tier: PricingEntry,
}

impl PricingTable {
    /// Create a table holding the built-in entries.
    pub fn new() -> Self {
        Self {
            entries: BUILTIN_PRICING
                .iter()
                .map(|(model, entry)| (model.to_string(), *entry))
                .collect(),
            default_tier: DEFAULT_TIER,
        }
    }

    /// Add or replace the entry for a model.
    pub fn with_entry(mut self, model: impl Into<String>, entry: PricingEntry) -> Self {
        self.entries.insert(model.into(), entry);
        self
    }

    /// Replace the tier used for unknown models.
    pub fn with_default_tier(mut self, entry: PricingEntry) -> Self {
        self.default_tier = entry;
        self
    }

    /// Resolve the pricing for a model identifier.
    ///
    /// Matches exactly first, then by longest known prefix so dated
    /// snapshots (`claude-3-5-sonnet-20241022`) and routed names
    /// (`anthropic/claude-3-5-sonnet`) resolve to their family.
    pub fn lookup(&self, model: &str) -> PricingEntry {
        let bare = model.rsplit('/').next().unwrap_or(model);
        if let Some(entry) = self.entries.get(bare) {
            return *entry;
        }
        self.entries
            .iter()
            .filter(|(known, _)| bare.starts_with(known.as_str()))
            .max_by_key(|(known, _)| known.len())
            .map(|(_, entry)| *entry)
            .unwrap_or(self.default_tier)
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Round a monetary value to [`COST_PRECISION`] decimal places.
pub fn round_cost(value: f64) -> f64 {
    let scale = 10f64.powi(COST_PRECISION);
    (value * scale).round() / scale
}

/// Cost of a call given its token counts.
///
/// `prompt_tokens / 1000 * input_rate + completion_tokens / 1000 * output_rate`,
/// rounded to six decimal places.
pub fn calculate_cost(
    table: &PricingTable,
    model: &str,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> f64 {
    let entry = table.lookup(model);
    let raw = f64::from(prompt_tokens) / 1000.0 * entry.input_per_1k
        + f64::from(completion_tokens) / 1000.0 * entry.output_per_1k;
    round_cost(raw)
}
