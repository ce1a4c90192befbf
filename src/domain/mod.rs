//! Costing and profitability logic lives here.

pub mod entities;
pub mod evaluation;
pub mod report;
pub mod session;

pub use entities::{normalize_amount, CostEntry, OrderId, OrderInfo};
pub use evaluation::{compute_summary, Costing, MarginTier, ProfitabilitySummary};
pub use report::{
    aggregate_report, rank_by_loss, rank_by_profit, PeriodReport, PeriodRow, ReportError,
    ReportLine, ReportPeriod, DEFAULT_TOP_N,
};
pub use session::{authorize, AccessError, Capability, Role, Session, UserProfile};
