// crates/core/src/pricing.rs
//! Per-model pricing for cost calculation.
//!
//! Tables are keyed by model-id prefix (longest prefix wins) with optional
//! tiers by prompt-token threshold. Unknown models return the `UNKNOWN_COST`
//! sentinel, surfaced downstream as "unknown cost" rather than zero.

/// Sentinel cost for models with no published pricing.
pub const UNKNOWN_COST: f64 = -1.0;

/// One pricing tier. Prices are USD per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct PriceTier {
    /// Inclusive prompt-token ceiling for this tier; `None` means unbounded.
    pub max_prompt_tokens: Option<i64>,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl PriceTier {
    const fn flat(input: f64, output: f64) -> Self {
        Self {
            max_prompt_tokens: None,
            input_cost_per_mtok: input,
            output_cost_per_mtok: output,
        }
    }

    const fn below(threshold: i64, input: f64, output: f64) -> Self {
        Self {
            max_prompt_tokens: Some(threshold),
            input_cost_per_mtok: input,
            output_cost_per_mtok: output,
        }
    }
}

/// Prefix-keyed pricing table for one provider.
#[derive(Debug)]
pub struct PricingTable {
    /// Sorted by prefix length descending so the most specific prefix wins.
    entries: Vec<(&'static str, Vec<PriceTier>)>,
}

impl PricingTable {
    pub fn new(mut entries: Vec<(&'static str, Vec<PriceTier>)>) -> Self {
        entries.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));
        Self { entries }
    }

    /// Cost in USD for one call, or `UNKNOWN_COST` when the model has no
    /// matching prefix. Tiers are selected by prompt-token count.
    pub fn cost(&self, model: &str, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        let tiers = match self
            .entries
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
        {
            Some((_, tiers)) => tiers,
            None => {
                tracing::warn!(model, "no pricing for model, reporting unknown cost");
                return UNKNOWN_COST;
            }
        };

        let tier = tiers
            .iter()
            .find(|t| t.max_prompt_tokens.is_none_or(|max| prompt_tokens <= max))
            .or_else(|| tiers.last());

        match tier {
            Some(t) => {
                prompt_tokens as f64 / 1_000_000.0 * t.input_cost_per_mtok
                    + completion_tokens as f64 / 1_000_000.0 * t.output_cost_per_mtok
            }
            None => UNKNOWN_COST,
        }
    }
}

/// Gemini pricing (USD per million tokens), tiered by prompt size where the
/// published rates split at a context threshold.
pub fn gemini_pricing() -> PricingTable {
    PricingTable::new(vec![
        (
            "gemini-2.5-pro",
            vec![
                PriceTier::below(200_000, 1.25, 10.00),
                PriceTier::flat(2.50, 15.00),
            ],
        ),
        ("gemini-2.5-flash-lite", vec![PriceTier::flat(0.10, 0.40)]),
        ("gemini-2.5-flash", vec![PriceTier::flat(0.30, 2.50)]),
        ("gemini-2.0-flash-lite", vec![PriceTier::flat(0.075, 0.30)]),
        ("gemini-2.0-flash", vec![PriceTier::flat(0.10, 0.40)]),
        (
            "gemini-1.5-pro",
            vec![
                PriceTier::below(128_000, 1.25, 5.00),
                PriceTier::flat(2.50, 10.00),
            ],
        ),
        (
            "gemini-1.5-flash-8b",
            vec![
                PriceTier::below(128_000, 0.0375, 0.15),
                PriceTier::flat(0.075, 0.30),
            ],
        ),
        (
            "gemini-1.5-flash",
            vec![
                PriceTier::below(128_000, 0.075, 0.30),
                PriceTier::flat(0.15, 0.60),
            ],
        ),
        ("gemma", vec![PriceTier::flat(0.0, 0.0)]),
    ])
}

/// DeepSeek pricing (USD per million tokens).
pub fn deepseek_pricing() -> PricingTable {
    PricingTable::new(vec![
        ("deepseek-coder", vec![PriceTier::flat(0.14, 0.14)]),
        ("deepseek-chat", vec![PriceTier::flat(0.14, 0.28)]),
    ])
}
