//! Period profitability reporting.

use std::{cmp::Ordering, num::NonZeroUsize};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, Month};

use super::entities::{normalize_amount, CostEntry, OrderId, OrderInfo};
use super::evaluation::Costing;

pub const DEFAULT_TOP_N: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(value) => value,
    None => unreachable!(),
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("invalid report range: start {start} is after end {end}")]
    InvalidRange { start: Date, end: Date },
}

/// One order in a reporting period. `costing` is `None` when no cost entry was
/// ever registered for the order, which is different from an all-zero entry.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodRow {
    pub order: OrderInfo,
    pub costing: Option<Costing>,
}

impl PeriodRow {
    pub fn new(order: OrderInfo, entry: Option<CostEntry>) -> Self {
        Self {
            order,
            costing: entry.map(Costing::new),
        }
    }
}

/// An order listed in a report ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportLine {
    pub order_id: OrderId,
    pub folio: Option<String>,
    pub client_name: Option<String>,
    pub costing: Costing,
}

impl ReportLine {
    pub fn profit(&self) -> f64 {
        self.costing.summary.profit
    }

    pub fn label(&self) -> String {
        self.folio
            .clone()
            .unwrap_or_else(|| format!("#{}", self.order_id))
    }

    fn from_row(order: &OrderInfo, costing: &Costing) -> Self {
        Self {
            order_id: order.order_id.clone(),
            folio: order.folio.clone(),
            client_name: order.client_name.clone(),
            costing: costing.clone(),
        }
    }
}

/// Aggregate profitability over every order dated within `[start, end]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub start: Date,
    pub end: Date,
    pub total_sales: f64,
    pub total_costs: f64,
    pub total_profit: f64,
    /// Mean margin over orders with cost data and a positive sale price.
    pub average_margin: f64,
    pub total_orders: usize,
    pub profitable_count: usize,
    pub loss_count: usize,
    pub no_cost_data_count: usize,
    pub top_profitable: Vec<ReportLine>,
    pub loss_list: Vec<ReportLine>,
    pub highest_profit: f64,
    pub worst_loss: f64,
    pub highest_margin: f64,
}

impl PeriodReport {
    pub fn empty(start: Date, end: Date) -> Self {
        Self {
            start,
            end,
            total_sales: 0.0,
            total_costs: 0.0,
            total_profit: 0.0,
            average_margin: 0.0,
            total_orders: 0,
            profitable_count: 0,
            loss_count: 0,
            no_cost_data_count: 0,
            top_profitable: Vec::new(),
            loss_list: Vec::new(),
            highest_profit: 0.0,
            worst_loss: 0.0,
            highest_margin: 0.0,
        }
    }

    /// Share of the period's orders that broke even or better, in percent.
    pub fn profitable_share(&self) -> f64 {
        if self.total_orders == 0 {
            0.0
        } else {
            self.profitable_count as f64 / self.total_orders as f64 * 100.0
        }
    }
}

/// Builds the report for `[start, end]` from joined order/cost rows.
///
/// Rows outside the range are ignored. Orders with a profit of exactly zero
/// count as profitable so the three counters always partition the period.
pub fn aggregate_report(
    rows: &[PeriodRow],
    start: Date,
    end: Date,
    top_n: NonZeroUsize,
) -> Result<PeriodReport, ReportError> {
    if start > end {
        return Err(ReportError::InvalidRange { start, end });
    }

    let mut report = PeriodReport::empty(start, end);
    let mut lines = Vec::new();
    let mut margin_sum = 0.0;
    let mut margin_count = 0_usize;
    let mut highest_profit: Option<f64> = None;
    let mut worst_loss: Option<f64> = None;
    let mut highest_margin: Option<f64> = None;

    for row in rows
        .iter()
        .filter(|row| row.order.order_date >= start && row.order.order_date <= end)
    {
        report.total_orders += 1;

        let Some(costing) = row.costing.as_ref() else {
            report.no_cost_data_count += 1;
            continue;
        };

        let summary = &costing.summary;
        let sale_price = normalize_amount(costing.entry.sale_price);
        report.total_sales += sale_price;
        report.total_costs += summary.total_cost;
        report.total_profit += summary.profit;

        if sale_price > 0.0 {
            margin_sum += summary.margin_percent;
            margin_count += 1;
        }

        if summary.is_loss() {
            report.loss_count += 1;
            worst_loss = Some(worst_loss.map_or(summary.profit, |w| w.min(summary.profit)));
        } else {
            report.profitable_count += 1;
        }

        highest_profit = Some(highest_profit.map_or(summary.profit, |h| h.max(summary.profit)));
        highest_margin = Some(
            highest_margin.map_or(summary.margin_percent, |h| h.max(summary.margin_percent)),
        );

        lines.push(ReportLine::from_row(&row.order, costing));
    }

    if margin_count > 0 {
        report.average_margin = margin_sum / margin_count as f64;
    }
    report.highest_profit = highest_profit.unwrap_or(0.0);
    report.worst_loss = worst_loss.unwrap_or(0.0);
    report.highest_margin = highest_margin.unwrap_or(0.0);

    report.loss_list = lines
        .iter()
        .filter(|line| line.costing.summary.is_loss())
        .cloned()
        .collect();
    rank_by_loss(&mut report.loss_list);

    rank_by_profit(&mut lines);
    lines.truncate(top_n.get());
    report.top_profitable = lines;

    Ok(report)
}

/// Highest profit first; ties broken by ascending order id.
pub fn rank_by_profit(lines: &mut [ReportLine]) {
    lines.sort_by(by_profit_descending);
}

/// Largest loss first; ties broken by ascending order id.
pub fn rank_by_loss(lines: &mut [ReportLine]) {
    lines.sort_by(by_profit_ascending);
}

fn by_profit_descending(a: &ReportLine, b: &ReportLine) -> Ordering {
    b.profit()
        .total_cmp(&a.profit())
        .then_with(|| a.order_id.cmp(&b.order_id))
}

fn by_profit_ascending(a: &ReportLine, b: &ReportLine) -> Ordering {
    a.profit()
        .total_cmp(&b.profit())
        .then_with(|| a.order_id.cmp(&b.order_id))
}

/// Reporting period presets offered by the profitability dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportPeriod {
    CurrentMonth,
    PreviousMonth,
    /// Three months back from today, through today.
    LastQuarter,
    Custom { start: Date, end: Date },
}

impl ReportPeriod {
    /// Inclusive `(start, end)` of this period relative to `today`.
    pub fn range(&self, today: Date) -> (Date, Date) {
        match *self {
            Self::CurrentMonth => month_bounds(today),
            Self::PreviousMonth => month_bounds(sub_months(today, 1)),
            Self::LastQuarter => (sub_months(today, 3), today),
            Self::Custom { start, end } => (start, end),
        }
    }
}

fn month_bounds(date: Date) -> (Date, Date) {
    let first = date.replace_day(1).unwrap_or(date);
    let last_day = time::util::days_in_year_month(date.year(), date.month());
    let last = date.replace_day(last_day).unwrap_or(date);
    (first, last)
}

/// Calendar month subtraction, clamping the day to the target month's length.
fn sub_months(date: Date, months: u8) -> Date {
    let mut year = date.year();
    let mut month = date.month();
    for _ in 0..months {
        if month == Month::January {
            year -= 1;
        }
        month = month.previous();
    }
    let day = date
        .day()
        .min(time::util::days_in_year_month(year, month));
    Date::from_calendar_date(year, month, day).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn top(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn row(id: &str, day: Date, cost: Option<(f64, f64)>) -> PeriodRow {
        let entry = cost.map(|(total_cost, sale_price)| CostEntry {
            material_cost: total_cost,
            sale_price,
            ..CostEntry::new(id)
        });
        PeriodRow::new(OrderInfo::new(id, day), entry)
    }

    fn profits(lines: &[ReportLine]) -> Vec<f64> {
        lines.iter().map(ReportLine::profit).collect()
    }

    #[test]
    fn empty_input_yields_zeroed_report() {
        let report = aggregate_report(&[], date!(2026 - 01 - 01), date!(2026 - 01 - 31), DEFAULT_TOP_N)
            .unwrap();
        assert_eq!(report, PeriodReport::empty(date!(2026 - 01 - 01), date!(2026 - 01 - 31)));
        assert_eq!(report.profitable_share(), 0.0);
    }

    #[test]
    fn rejects_inverted_range() {
        let err = aggregate_report(&[], date!(2026 - 02 - 01), date!(2026 - 01 - 01), DEFAULT_TOP_N)
            .unwrap_err();
        assert_eq!(
            err,
            ReportError::InvalidRange {
                start: date!(2026 - 02 - 01),
                end: date!(2026 - 01 - 01),
            }
        );
    }

    #[test]
    fn top_profitable_is_sorted_and_truncated() {
        let day = date!(2026 - 03 - 10);
        let rows = vec![
            row("1", day, Some((50.0, 100.0))),
            row("2", day, Some((100.0, 300.0))),
            row("3", day, Some((25.0, 100.0))),
        ];
        let report = aggregate_report(&rows, day, day, top(2)).unwrap();
        assert_eq!(profits(&report.top_profitable), [200.0, 75.0]);
        assert_eq!(report.profitable_count, 3);
        assert!(report.loss_list.is_empty());
    }

    #[test]
    fn ties_break_by_order_id() {
        let day = date!(2026 - 03 - 10);
        let rows = vec![
            row("12", day, Some((0.0, 10.0))),
            row("3", day, Some((0.0, 10.0))),
            row("7", day, Some((0.0, 10.0))),
        ];
        let report = aggregate_report(&rows, day, day, DEFAULT_TOP_N).unwrap();
        let ids: Vec<&str> = report
            .top_profitable
            .iter()
            .map(|line| line.order_id.as_str())
            .collect();
        assert_eq!(ids, ["3", "7", "12"]);
    }

    #[test]
    fn loss_list_runs_worst_first_without_truncation() {
        let day = date!(2026 - 04 - 02);
        let rows = vec![
            row("1", day, Some((110.0, 100.0))),
            row("2", day, Some((400.0, 100.0))),
            row("3", day, Some((150.0, 100.0))),
            row("4", day, Some((10.0, 100.0))),
        ];
        let report = aggregate_report(&rows, day, day, top(1)).unwrap();
        assert_eq!(profits(&report.loss_list), [-300.0, -50.0, -10.0]);
        assert_eq!(report.loss_count, 3);
        assert_eq!(report.worst_loss, -300.0);
        assert_eq!(profits(&report.top_profitable), [90.0]);
    }

    #[test]
    fn filters_by_inclusive_date_range() {
        let rows = vec![
            row("1", date!(2025 - 12 - 31), Some((10.0, 20.0))),
            row("2", date!(2026 - 01 - 01), Some((10.0, 20.0))),
            row("3", date!(2026 - 01 - 31), Some((10.0, 40.0))),
            row("4", date!(2026 - 02 - 01), Some((10.0, 20.0))),
        ];
        let report =
            aggregate_report(&rows, date!(2026 - 01 - 01), date!(2026 - 01 - 31), DEFAULT_TOP_N)
                .unwrap();
        assert_eq!(report.total_orders, 2);
        assert_eq!(report.total_sales, 60.0);
        assert_eq!(report.total_costs, 20.0);
        assert_eq!(report.total_profit, 40.0);
    }

    #[test]
    fn counters_partition_the_period() {
        let day = date!(2026 - 05 - 05);
        let rows = vec![
            row("1", day, Some((10.0, 20.0))),
            row("2", day, Some((30.0, 20.0))),
            row("3", day, None),
            row("4", day, Some((0.0, 0.0))),
            row("5", day, Some((20.0, 20.0))),
            row("6", day, None),
            row("7", date!(2026 - 06 - 01), None),
        ];
        let report = aggregate_report(&rows, day, day, DEFAULT_TOP_N).unwrap();
        assert_eq!(report.total_orders, 6);
        assert_eq!(report.no_cost_data_count, 2);
        assert_eq!(report.loss_count, 1);
        assert_eq!(report.profitable_count, 3);
        assert_eq!(
            report.profitable_count + report.loss_count + report.no_cost_data_count,
            report.total_orders
        );
        assert_eq!(report.profitable_share(), 50.0);
    }

    #[test]
    fn counters_partition_generated_periods() {
        let (start, end) = (date!(2026 - 03 - 01), date!(2026 - 03 - 31));
        let days = [
            date!(2026 - 02 - 28),
            start,
            date!(2026 - 03 - 15),
            end,
            date!(2026 - 04 - 01),
        ];
        // (total cost, sale price): profit, zero, loss, zero sale, all zero
        let costs = [
            Some((40.0, 100.0)),
            Some((100.0, 100.0)),
            Some((130.0, 100.0)),
            Some((25.0, 0.0)),
            Some((0.0, 0.0)),
            None,
        ];

        let mut seed: u64 = 0x5eed;
        for size in 0..120_usize {
            let mut rows = Vec::with_capacity(size);
            let mut expected = (0_usize, 0_usize, 0_usize, 0_usize);
            for i in 0..size {
                seed = seed
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let day = days[(seed >> 33) as usize % days.len()];
                let cost = costs[(seed >> 17) as usize % costs.len()];
                if day >= start && day <= end {
                    expected.0 += 1;
                    match cost {
                        None => expected.3 += 1,
                        Some((total, sale)) if sale - total < 0.0 => expected.2 += 1,
                        Some(_) => expected.1 += 1,
                    }
                }
                rows.push(row(&i.to_string(), day, cost));
            }

            let report = aggregate_report(&rows, start, end, top(3)).unwrap();
            assert_eq!(
                report.profitable_count + report.loss_count + report.no_cost_data_count,
                report.total_orders,
                "size {size}"
            );
            assert_eq!(
                (
                    report.total_orders,
                    report.profitable_count,
                    report.loss_count,
                    report.no_cost_data_count
                ),
                expected,
                "size {size}"
            );
            assert_eq!(report.loss_list.len(), report.loss_count);
            assert!(report.top_profitable.len() <= 3);
        }
    }

    #[test]
    fn average_margin_skips_zero_sale_price() {
        let day = date!(2026 - 05 - 05);
        let rows = vec![
            row("1", day, Some((50.0, 100.0))),
            row("2", day, Some((75.0, 100.0))),
            row("3", day, Some((40.0, 0.0))),
            row("4", day, None),
        ];
        let report = aggregate_report(&rows, day, day, DEFAULT_TOP_N).unwrap();
        assert!((report.average_margin - 37.5).abs() < 1e-9);
        assert_eq!(report.highest_margin, 50.0);
        assert_eq!(report.highest_profit, 50.0);
        assert_eq!(report.worst_loss, -40.0);
    }

    #[test]
    fn month_presets() {
        let today = date!(2026 - 03 - 31);
        assert_eq!(
            ReportPeriod::CurrentMonth.range(today),
            (date!(2026 - 03 - 01), date!(2026 - 03 - 31))
        );
        assert_eq!(
            ReportPeriod::PreviousMonth.range(today),
            (date!(2026 - 02 - 01), date!(2026 - 02 - 28))
        );
        assert_eq!(
            ReportPeriod::LastQuarter.range(today),
            (date!(2025 - 12 - 31), today)
        );
    }

    #[test]
    fn previous_month_wraps_the_year() {
        let today = date!(2026 - 01 - 15);
        assert_eq!(
            ReportPeriod::PreviousMonth.range(today),
            (date!(2025 - 12 - 01), date!(2025 - 12 - 31))
        );
        let custom = ReportPeriod::Custom {
            start: date!(2026 - 01 - 02),
            end: date!(2026 - 01 - 09),
        };
        assert_eq!(custom.range(today), (date!(2026 - 01 - 02), date!(2026 - 01 - 09)));
    }
}
