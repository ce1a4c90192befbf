use std::num::NonZeroUsize;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use time::{macros::format_description, Date, OffsetDateTime};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use order_costing::config::Settings;
use order_costing::domain::{
    authorize, compute_summary, rank_by_loss, rank_by_profit, AccessError, Capability, CostEntry,
    OrderId, PeriodReport, ProfitabilitySummary, ReportLine, ReportPeriod, Session,
};
use order_costing::infra::{CacheStatus, ErpClient};
use order_costing::util::format::{format_currency, format_percent};
use order_costing::util::persistence;
use order_costing::util::version::version_label;

const DEFAULT_LOG_FILTER: &str = "order_costing=info";

#[derive(Parser, Debug)]
#[command(name = "order-costing", version, about = "Order costing and profitability for the Herrera ERP")]
struct Cli {
    /// REST API base URL; overrides ERP_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Orders listed in rankings; overrides ERP_TOP_N.
    #[arg(long, global = true)]
    top_n: Option<NonZeroUsize>,
    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session.
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Close the session on the server and forget it locally.
    Logout,
    /// Show the signed-in user and whether the token is still valid.
    Whoami,
    /// Compute a profitability summary without contacting the server.
    Calc {
        #[command(flatten)]
        amounts: Amounts,
    },
    /// Show the cost entry of an order.
    Show { order_id: String },
    /// Create or update the cost entry of an order. Omitted amounts keep their
    /// stored value (zero for a new entry).
    SetCosts {
        order_id: String,
        #[command(flatten)]
        amounts: Amounts,
    },
    /// Delete the cost entry of an order.
    Delete { order_id: String },
    /// Profitability report for a period, built from the period's orders and
    /// cost entries.
    Report {
        #[command(flatten)]
        period: PeriodArgs,
    },
    /// Most profitable orders.
    Top {
        #[arg(long)]
        limit: Option<NonZeroUsize>,
    },
    /// Orders sold below cost.
    Losses,
}

impl Command {
    fn capability(&self) -> Option<Capability> {
        match self {
            Command::Login { .. } | Command::Logout | Command::Whoami | Command::Calc { .. } => {
                None
            }
            Command::Show { .. } | Command::Top { .. } | Command::Losses => {
                Some(Capability::ViewCosts)
            }
            Command::SetCosts { .. } | Command::Delete { .. } => Some(Capability::EditCosts),
            Command::Report { .. } => Some(Capability::ViewReports),
        }
    }
}

#[derive(Args, Debug)]
struct Amounts {
    #[arg(long)]
    material: Option<f64>,
    #[arg(long)]
    trim: Option<f64>,
    #[arg(long)]
    thread: Option<f64>,
    #[arg(long)]
    labor: Option<f64>,
    #[arg(long)]
    misc: Option<f64>,
    #[arg(long)]
    sale: Option<f64>,
    #[arg(long)]
    notes: Option<String>,
}

impl Amounts {
    fn apply(self, entry: &mut CostEntry) {
        let fields = [
            (self.material, &mut entry.material_cost),
            (self.trim, &mut entry.trim_cost),
            (self.thread, &mut entry.thread_cost),
            (self.labor, &mut entry.labor_cost),
            (self.misc, &mut entry.misc_cost),
            (self.sale, &mut entry.sale_price),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if self.notes.is_some() {
            entry.notes = self.notes;
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PeriodPreset {
    CurrentMonth,
    PreviousMonth,
    LastQuarter,
}

#[derive(Args, Debug)]
struct PeriodArgs {
    #[arg(long, value_enum, default_value_t = PeriodPreset::CurrentMonth, conflicts_with_all = ["from", "to"])]
    period: PeriodPreset,
    /// First day of a custom period (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date, requires = "to")]
    from: Option<Date>,
    /// Last day of a custom period, inclusive.
    #[arg(long, value_parser = parse_date, requires = "from")]
    to: Option<Date>,
}

impl PeriodArgs {
    fn period(&self) -> ReportPeriod {
        match (self.from, self.to) {
            (Some(start), Some(end)) => ReportPeriod::Custom { start, end },
            _ => match self.period {
                PeriodPreset::CurrentMonth => ReportPeriod::CurrentMonth,
                PeriodPreset::PreviousMonth => ReportPeriod::PreviousMonth,
                PeriodPreset::LastQuarter => ReportPeriod::LastQuarter,
            },
        }
    }
}

fn parse_date(raw: &str) -> Result<Date, String> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    debug!(version = %version_label(), "starting");

    let mut settings = Settings::from_env().context("invalid configuration")?;
    if let Some(url) = cli.api_url.as_deref() {
        settings = settings.with_api_url(url)?;
    }
    if let Some(top_n) = cli.top_n {
        settings.default_top_n = top_n;
    }

    let out = Output { json: cli.json };
    let client = ErpClient::new(&settings).context("failed to build API client")?;
    let stored = persistence::load_session();

    let session = match cli.command.capability() {
        Some(capability) => Some(authorize(stored.as_ref(), capability)?),
        None => None,
    };
    let client = match session {
        Some(session) => client.with_session(session),
        None => client,
    };

    match cli.command {
        Command::Login { username, password } => {
            let session = client
                .login(&username, &password)
                .await
                .context("login failed")?;
            persistence::save_session(&session).context("could not store session")?;
            out.emit(&session.user, || {
                println!(
                    "Signed in as {} ({})",
                    session.user.full_name.as_deref().unwrap_or(&session.user.username),
                    session.user.role
                );
            })
        }
        Command::Logout => {
            if let Some(session) = stored.as_ref() {
                if let Err(err) = client.clone().with_session(session).logout().await {
                    warn!(%err, "server logout failed; forgetting session anyway");
                }
            }
            persistence::clear_session().context("could not remove session")?;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => {
            let session = stored.as_ref().ok_or(AccessError::NotLoggedIn)?;
            let valid = client.validate_token(&session.token).await?;
            out.emit(&serde_json::json!({ "user": session.user, "valid": valid }), || {
                print_user(session, valid);
            })
        }
        Command::Calc { amounts } => {
            let mut entry = CostEntry::default();
            amounts.apply(&mut entry);
            let summary = compute_summary(&entry);
            out.emit(&summary, || print_summary(&entry, &summary))
        }
        Command::Show { order_id } => {
            let order_id = OrderId::new(order_id);
            match client.get_cost_entry(&order_id).await? {
                Some(record) => {
                    let line = record.to_report_line();
                    out.emit(&line, || {
                        println!("Order {}", line.label());
                        if let Some(client_name) = line.client_name.as_deref() {
                            println!("Client     {client_name}");
                        }
                        print_summary(&line.costing.entry, &line.costing.summary);
                    })
                }
                None => bail!("order {order_id} has no cost entry"),
            }
        }
        Command::SetCosts { order_id, amounts } => {
            let order_id = OrderId::new(order_id);
            let existing = if client.has_cost_entry(&order_id).await? {
                client.get_cost_entry(&order_id).await?
            } else {
                None
            };

            let record = match existing {
                Some(record) => {
                    let mut entry = record.entry.clone();
                    amounts.apply(&mut entry);
                    client.update_cost_entry(record.id, &entry).await?
                }
                None => {
                    let mut entry = CostEntry::new(order_id);
                    amounts.apply(&mut entry);
                    client.save_cost_entry(&entry).await?
                }
            };
            let line = record.to_report_line();
            out.emit(&line, || {
                println!("Saved costs for order {}", line.label());
                print_summary(&line.costing.entry, &line.costing.summary);
            })
        }
        Command::Delete { order_id } => {
            let order_id = OrderId::new(order_id);
            let Some(record) = client.get_cost_entry(&order_id).await? else {
                bail!("order {order_id} has no cost entry");
            };
            client.delete_cost_entry(record.id).await?;
            println!("Deleted cost entry of order {order_id}");
            Ok(())
        }
        Command::Report { period } => {
            if let Some(session) = session {
                session.require(Capability::ViewOrders)?;
            }
            let today = OffsetDateTime::now_utc().date();
            let (start, end) = period.period().range(today);

            let payload = client
                .fetch_report(start, end, settings.default_top_n)
                .await?;
            if payload.status == CacheStatus::Stale {
                warn!("server unreachable; showing the last report built for this period");
            }
            let report = payload.data;
            info!(%start, %end, orders = report.total_orders, "report ready");
            out.emit(&report, || print_report(&report))
        }
        Command::Top { limit } => {
            let limit = limit.unwrap_or(settings.default_top_n);
            let mut lines: Vec<ReportLine> = client
                .top_profitable(limit.get())
                .await?
                .iter()
                .map(|record| record.to_report_line())
                .collect();
            rank_by_profit(&mut lines);
            lines.truncate(limit.get());
            out.emit(&lines, || print_lines("Most profitable orders", &lines))
        }
        Command::Losses => {
            let mut lines: Vec<ReportLine> = client
                .loss_orders()
                .await?
                .iter()
                .map(|record| record.to_report_line())
                .filter(|line| line.costing.summary.is_loss())
                .collect();
            rank_by_loss(&mut lines);
            out.emit(&lines, || print_lines("Orders with losses", &lines))
        }
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

fn print_user(session: &Session, valid: bool) {
    let user = &session.user;
    println!("User       {}", user.username);
    if let Some(name) = user.full_name.as_deref() {
        println!("Name       {name}");
    }
    println!("Role       {}", user.role);
    if !user.permissions.is_empty() {
        println!("Modules    {}", user.permissions.join(", "));
    }
    println!("Token      {}", if valid { "valid" } else { "expired" });
}

fn print_summary(entry: &CostEntry, summary: &ProfitabilitySummary) {
    println!("Material   {:>14}", format_currency(entry.material_cost));
    println!("Vinyl      {:>14}", format_currency(entry.trim_cost));
    println!("Thread     {:>14}", format_currency(entry.thread_cost));
    println!("Labor      {:>14}", format_currency(entry.labor_cost));
    println!("Misc       {:>14}", format_currency(entry.misc_cost));
    println!("Total cost {:>14}", format_currency(summary.total_cost));
    println!("Sale price {:>14}", format_currency(entry.sale_price));
    println!("Profit     {:>14}", format_currency(summary.profit));
    println!(
        "Margin     {:>14}  {}",
        format_percent(summary.margin_percent),
        summary.tier.label()
    );
    if let Some(notes) = entry.notes.as_deref() {
        println!("Notes      {notes}");
    }
}

fn print_lines(title: &str, lines: &[ReportLine]) {
    println!("{title}");
    if lines.is_empty() {
        println!("  (none)");
        return;
    }
    for line in lines {
        println!(
            "  {:<14} {:<24} {:>14} {:>9}",
            line.label(),
            line.client_name.as_deref().unwrap_or("-"),
            format_currency(line.profit()),
            format_percent(line.costing.summary.margin_percent)
        );
    }
}

fn print_report(report: &PeriodReport) {
    println!("Period {} .. {}", report.start, report.end);
    println!("Sales          {:>14}", format_currency(report.total_sales));
    println!("Costs          {:>14}", format_currency(report.total_costs));
    println!("Profit         {:>14}", format_currency(report.total_profit));
    println!("Average margin {:>14}", format_percent(report.average_margin));
    println!(
        "Orders {} | profitable {} ({}) | losses {} | without costs {}",
        report.total_orders,
        report.profitable_count,
        format_percent(report.profitable_share()),
        report.loss_count,
        report.no_cost_data_count
    );
    println!(
        "Best profit {} | worst loss {} | best margin {}",
        format_currency(report.highest_profit),
        format_currency(report.worst_loss),
        format_percent(report.highest_margin)
    );
    println!();
    print_lines("Most profitable orders", &report.top_profitable);
    println!();
    print_lines("Orders with losses", &report.loss_list);
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn parse(args: &[&str]) -> Command {
        let argv = std::iter::once("order-costing").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().command
    }

    fn period_of(args: &[&str]) -> ReportPeriod {
        match parse(args) {
            Command::Report { period } => period.period(),
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn set_costs_keeps_omitted_amounts() {
        let mut stored = CostEntry::new("9");
        stored.material_cost = 100.0;
        stored.trim_cost = 20.0;
        stored.labor_cost = 50.0;
        stored.sale_price = 250.0;
        stored.notes = Some("first run".to_string());

        let Command::SetCosts { order_id, amounts } =
            parse(&["set-costs", "9", "--trim", "35", "--sale", "300.5"])
        else {
            panic!("expected set-costs");
        };
        assert_eq!(order_id, "9");
        amounts.apply(&mut stored);

        assert_eq!(stored.material_cost, 100.0);
        assert_eq!(stored.trim_cost, 35.0);
        assert_eq!(stored.thread_cost, 0.0);
        assert_eq!(stored.labor_cost, 50.0);
        assert_eq!(stored.sale_price, 300.5);
        assert_eq!(stored.notes.as_deref(), Some("first run"));
    }

    #[test]
    fn set_costs_replaces_notes_when_given() {
        let mut stored = CostEntry::new("9");
        stored.notes = Some("old".to_string());
        let Command::SetCosts { amounts, .. } = parse(&["set-costs", "9", "--notes", "new"]) else {
            panic!("expected set-costs");
        };
        amounts.apply(&mut stored);
        assert_eq!(stored.notes.as_deref(), Some("new"));
    }

    #[test]
    fn report_period_defaults_to_current_month() {
        assert_eq!(period_of(&["report"]), ReportPeriod::CurrentMonth);
        assert_eq!(
            period_of(&["report", "--period", "previous-month"]),
            ReportPeriod::PreviousMonth
        );
        assert_eq!(
            period_of(&["report", "--period", "last-quarter"]),
            ReportPeriod::LastQuarter
        );
    }

    #[test]
    fn explicit_dates_make_a_custom_period() {
        assert_eq!(
            period_of(&["report", "--from", "2026-01-01", "--to", "2026-01-31"]),
            ReportPeriod::Custom {
                start: date!(2026 - 01 - 01),
                end: date!(2026 - 01 - 31),
            }
        );
    }

    #[test]
    fn period_flags_are_validated() {
        let parse_err = |args: &[&str]| {
            let argv = std::iter::once("order-costing").chain(args.iter().copied());
            Cli::try_parse_from(argv).is_err()
        };
        assert!(parse_err(&["report", "--from", "2026-01-01"]));
        assert!(parse_err(&["report", "--from", "01/01/2026", "--to", "2026-01-31"]));
        assert!(parse_err(&[
            "report", "--period", "last-quarter", "--from", "2026-01-01", "--to", "2026-01-31",
        ]));
    }

    #[test]
    fn commands_require_their_capability() {
        let cases = [
            (vec!["login", "ana", "--password", "x"], None),
            (vec!["logout"], None),
            (vec!["whoami"], None),
            (vec!["calc", "--sale", "10"], None),
            (vec!["show", "1"], Some(Capability::ViewCosts)),
            (vec!["top"], Some(Capability::ViewCosts)),
            (vec!["losses"], Some(Capability::ViewCosts)),
            (vec!["set-costs", "1"], Some(Capability::EditCosts)),
            (vec!["delete", "1"], Some(Capability::EditCosts)),
            (vec!["report"], Some(Capability::ViewReports)),
        ];
        for (args, expected) in cases {
            assert_eq!(parse(&args).capability(), expected, "{args:?}");
        }
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from(["order-costing", "top", "--top-n", "3", "--json"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.top_n.map(NonZeroUsize::get), Some(3));
        assert!(Cli::try_parse_from(["order-costing", "--top-n", "0", "top"]).is_err());
    }
}
