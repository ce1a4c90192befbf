//! Display helpers for amounts and percentages.

/// Money with a `$` sign, thousands separators and two decimals,
/// e.g. `-$1,234.50`.
pub fn format_currency(amount: f64) -> String {
    let amount = crate::domain::normalize_amount(amount);
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${whole}.{:02}", cents % 100)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", crate::domain::normalize_amount(value))
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
