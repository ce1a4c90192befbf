use serde::{Deserialize, Serialize};

use super::entities::CostEntry;

const EXCELLENT_MARGIN: f64 = 30.0;
const NORMAL_MARGIN: f64 = 15.0;

/// Derived figures for one cost entry. Never stored; recomputed on every edit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilitySummary {
    pub total_cost: f64,
    pub profit: f64,
    pub margin_percent: f64,
    pub tier: MarginTier,
}

impl ProfitabilitySummary {
    pub fn is_loss(&self) -> bool {
        self.profit < 0.0
    }
}

/// Qualitative bucket for a margin. Lower bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginTier {
    Excellent,
    Normal,
    Low,
    Loss,
}

impl MarginTier {
    pub fn from_margin(margin_percent: f64) -> Self {
        if margin_percent >= EXCELLENT_MARGIN {
            Self::Excellent
        } else if margin_percent >= NORMAL_MARGIN {
            Self::Normal
        } else if margin_percent >= 0.0 {
            Self::Low
        } else {
            Self::Loss
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Normal => "Normal",
            Self::Low => "Low",
            Self::Loss => "Loss",
        }
    }
}

/// Totals, profit, margin and tier for a cost entry.
///
/// Pure and infallible: non-finite amounts count as zero and a zero sale price
/// yields a zero margin.
pub fn compute_summary(entry: &CostEntry) -> ProfitabilitySummary {
    let entry = entry.normalized();
    let total_cost: f64 = entry.components().iter().sum();
    let profit = entry.sale_price - total_cost;
    let margin_percent = if entry.sale_price > 0.0 {
        (profit / entry.sale_price) * 100.0
    } else {
        0.0
    };

    ProfitabilitySummary {
        total_cost,
        profit,
        margin_percent,
        tier: MarginTier::from_margin(margin_percent),
    }
}

/// A cost entry together with its computed summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Costing {
    pub entry: CostEntry,
    pub summary: ProfitabilitySummary,
}

impl Costing {
    pub fn new(entry: CostEntry) -> Self {
        let summary = compute_summary(&entry);
        Self { entry, summary }
    }
}

impl From<CostEntry> for Costing {
    fn from(entry: CostEntry) -> Self {
        Self::new(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(material: f64, trim: f64, thread: f64, labor: f64, misc: f64, sale: f64) -> CostEntry {
        CostEntry {
            material_cost: material,
            trim_cost: trim,
            thread_cost: thread,
            labor_cost: labor,
            misc_cost: misc,
            sale_price: sale,
            ..CostEntry::new("1")
        }
    }

    #[test]
    fn excellent_example() {
        let summary = compute_summary(&entry(100.0, 20.0, 5.0, 50.0, 0.0, 250.0));
        assert_eq!(summary.total_cost, 175.0);
        assert_eq!(summary.profit, 75.0);
        assert!((summary.margin_percent - 30.0).abs() < 1e-9);
        assert_eq!(summary.tier, MarginTier::Excellent);
    }

    #[test]
    fn loss_example() {
        let summary = compute_summary(&entry(120.0, 0.0, 0.0, 0.0, 0.0, 100.0));
        assert_eq!(summary.total_cost, 120.0);
        assert_eq!(summary.profit, -20.0);
        assert!((summary.margin_percent + 20.0).abs() < 1e-9);
        assert_eq!(summary.tier, MarginTier::Loss);
        assert!(summary.is_loss());
    }

    #[test]
    fn zero_sale_price_has_zero_margin() {
        let summary = compute_summary(&entry(10.0, 20.0, 30.0, 0.0, 5.0, 0.0));
        assert_eq!(summary.margin_percent, 0.0);
        assert_eq!(summary.profit, -65.0);
        assert_eq!(summary.tier, MarginTier::Low);
    }

    #[test]
    fn missing_fields_never_produce_nan() {
        let summary = compute_summary(&CostEntry::new("empty"));
        assert_eq!(summary.total_cost, 0.0);
        assert_eq!(summary.profit, 0.0);
        assert_eq!(summary.margin_percent, 0.0);
        assert_eq!(summary.tier, MarginTier::Low);

        let poisoned = entry(f64::NAN, 1.0, f64::NEG_INFINITY, 0.0, 0.0, f64::NAN);
        let summary = compute_summary(&poisoned);
        assert_eq!(summary.total_cost, 1.0);
        assert!(!summary.margin_percent.is_nan());
    }

    #[test]
    fn profit_and_cost_add_back_to_sale_price() {
        let samples = [
            entry(12.35, 0.4, 3.3, 17.0, 1.1, 99.99),
            entry(0.0, 0.0, 0.0, 0.0, 0.0, 10.0),
            entry(500.0, 250.25, 10.5, 75.0, 3.0, 120.0),
        ];
        for sample in samples {
            let summary = compute_summary(&sample);
            let expected: f64 = sample.components().iter().sum();
            assert_eq!(summary.total_cost, expected);
            assert!((summary.profit + summary.total_cost - sample.sale_price).abs() < 1e-9);
        }
    }

    #[test]
    fn tier_boundaries_are_inclusive_at_lower_edge() {
        assert_eq!(MarginTier::from_margin(30.0), MarginTier::Excellent);
        assert_eq!(MarginTier::from_margin(29.99), MarginTier::Normal);
        assert_eq!(MarginTier::from_margin(15.0), MarginTier::Normal);
        assert_eq!(MarginTier::from_margin(14.99), MarginTier::Low);
        assert_eq!(MarginTier::from_margin(0.0), MarginTier::Low);
        assert_eq!(MarginTier::from_margin(-0.01), MarginTier::Loss);
    }

    #[test]
    fn summary_is_idempotent() {
        let sample = entry(40.0, 2.0, 1.0, 12.0, 0.0, 80.0);
        assert_eq!(compute_summary(&sample), compute_summary(&sample));
        assert_eq!(Costing::new(sample.clone()).summary, compute_summary(&sample));
    }

    #[test]
    fn tier_serializes_as_screaming_case() {
        assert_eq!(
            serde_json::to_string(&MarginTier::Excellent).unwrap(),
            "\"EXCELLENT\""
        );
    }
}
