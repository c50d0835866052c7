use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-million-token USD rates for one model (SPEC_FULL.md §3 `ModelPrice`).
/// Stored as rate-per-token internally so [`CostCalculator`] never divides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
    #[serde(default)]
    pub cache_create_per_million: Decimal,
    #[serde(default)]
    pub cache_read_per_million: Decimal,
}

/// Token counts for one completion, as reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Per-category cost breakdown plus total, both as fixed-precision decimals
/// (SPEC_FULL.md §4.1: internal cost representation must not be `f64`).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub cache_create_cost: Decimal,
    pub cache_read_cost: Decimal,
    pub total_cost: Decimal,
}

impl CostBreakdown {
    /// Six-fractional-digit USD string, e.g. `"$0.001234"`.
    pub fn formatted_total(&self) -> String {
        format!("${:.6}", self.total_cost)
    }
}

/// Price table loaded from disk and swapped atomically via `ArcSwap`
/// (SPEC_FULL.md §3, Open Question 2 resolution: one callable reload, no
/// background poller).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    models: HashMap<String, ModelPrice>,
    #[serde(default)]
    default_price: Option<ModelPrice>,
}

impl PriceTable {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table: PriceTable = serde_json::from_str(&raw)?;
        Ok(table)
    }

    pub fn price_for(&self, model: &str) -> Option<&ModelPrice> {
        self.models.get(model).or(self.default_price.as_ref())
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.models.insert(model.into(), price);
    }
}

/// Pure per-request cost function (SPEC_FULL.md §4.1, C3 CostCalculator).
/// Holds no state: every call is a deterministic function of its inputs.
/// A model with no price entry yields zero cost rather than an error, since
/// the request has already happened and must still be counted.
pub struct CostCalculator;

impl CostCalculator {
    pub fn cost(table: &PriceTable, model: &str, usage: TokenUsage) -> CostBreakdown {
        let Some(price) = table.price_for(model) else {
            tracing::warn!(model, "no price entry; charging zero");
            return CostBreakdown::default();
        };

        let million = Decimal::from(1_000_000u32);
        let input_cost = Decimal::from(usage.input_tokens) * price.input_per_million / million;
        let output_cost = Decimal::from(usage.output_tokens) * price.output_per_million / million;
        let cache_create_cost =
            Decimal::from(usage.cache_create_tokens) * price.cache_create_per_million / million;
        let cache_read_cost =
            Decimal::from(usage.cache_read_tokens) * price.cache_read_per_million / million;

        CostBreakdown {
            input_cost,
            output_cost,
            cache_create_cost,
            cache_read_cost,
            total_cost: input_cost + output_cost + cache_create_cost + cache_read_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> PriceTable {
        let mut table = PriceTable::default();
        table.insert(
            "claude-3-opus",
            ModelPrice {
                input_per_million: dec!(15.0),
                output_per_million: dec!(75.0),
                cache_create_per_million: dec!(18.75),
                cache_read_per_million: dec!(1.5),
            },
        );
        table
    }

    #[test]
    fn cost_scales_linearly_with_tokens() {
        let usage = TokenUsage { input_tokens: 1_000_000, output_tokens: 0, ..Default::default() };
        let cost = CostCalculator::cost(&table(), "claude-3-opus", usage);
        assert_eq!(cost.input_cost, dec!(15.0));
        assert_eq!(cost.total_cost, dec!(15.0));
    }

    #[test]
    fn cost_sums_all_categories() {
        let usage = TokenUsage {
            input_tokens: 1_000,
            output_tokens: 500,
            cache_create_tokens: 200,
            cache_read_tokens: 10_000,
        };
        let cost = CostCalculator::cost(&table(), "claude-3-opus", usage);
        let expected = cost.input_cost + cost.output_cost + cost.cache_create_cost + cost.cache_read_cost;
        assert_eq!(cost.total_cost, expected);
    }

    #[test]
    fn unknown_model_without_default_charges_zero() {
        let usage = TokenUsage { input_tokens: 1_000_000, ..Default::default() };
        let cost = CostCalculator::cost(&table(), "unknown-model", usage);
        assert_eq!(cost.total_cost, Decimal::ZERO);
    }

    #[test]
    fn default_price_covers_unlisted_models() {
        let mut table = table();
        table.default_price = Some(ModelPrice {
            input_per_million: dec!(1.0),
            output_per_million: dec!(2.0),
            cache_create_per_million: dec!(0),
            cache_read_per_million: dec!(0),
        });
        let usage = TokenUsage { input_tokens: 1_000_000, ..Default::default() };
        let cost = CostCalculator::cost(&table, "some-other-model", usage);
        assert_eq!(cost.input_cost, dec!(1.0));
    }

    #[test]
    fn formatted_total_has_six_fractional_digits() {
        let usage = TokenUsage { input_tokens: 1, ..Default::default() };
        let cost = CostCalculator::cost(&table(), "claude-3-opus", usage);
        let formatted = cost.formatted_total();
        assert!(formatted.starts_with('$'));
        assert_eq!(formatted.split('.').nth(1).unwrap().len(), 6);
    }
}
