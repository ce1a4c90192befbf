use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, PrimitiveDateTime};

/// Identifier of an order in the ERP backend.
///
/// The backend uses numeric ids but the calculator treats them as opaque, so
/// both JSON numbers and strings are accepted. Ordering puts numeric ids first,
/// by value, then everything else lexically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        string_from_json(deserializer).map(Self)
    }
}

impl OrderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for OrderId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(left), Ok(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for OrderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Cost breakdown of a single order.
///
/// Every amount is normalised to `0.0` when the source value is missing, null,
/// non-numeric or non-finite. Deserialisation never fails on a bad amount.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    #[serde(rename = "pedidoId")]
    pub order_id: OrderId,
    #[serde(rename = "costoTela", default, deserialize_with = "amount_from_json")]
    pub material_cost: f64,
    #[serde(rename = "costoVinil", default, deserialize_with = "amount_from_json")]
    pub trim_cost: f64,
    #[serde(rename = "costoHilo", default, deserialize_with = "amount_from_json")]
    pub thread_cost: f64,
    #[serde(rename = "costoMaquila", default, deserialize_with = "amount_from_json")]
    pub labor_cost: f64,
    #[serde(rename = "costoVarios", default, deserialize_with = "amount_from_json")]
    pub misc_cost: f64,
    #[serde(rename = "precioVenta", default, deserialize_with = "amount_from_json")]
    pub sale_price: f64,
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CostEntry {
    /// Entry with every amount at zero.
    pub fn new(order_id: impl Into<OrderId>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Self::default()
        }
    }

    /// Copy of the entry with every amount passed through [`normalize_amount`].
    ///
    /// Entries built in code can still carry NaN or infinities; the calculator
    /// runs on the normalised copy.
    pub fn normalized(&self) -> Self {
        Self {
            order_id: self.order_id.clone(),
            material_cost: normalize_amount(self.material_cost),
            trim_cost: normalize_amount(self.trim_cost),
            thread_cost: normalize_amount(self.thread_cost),
            labor_cost: normalize_amount(self.labor_cost),
            misc_cost: normalize_amount(self.misc_cost),
            sale_price: normalize_amount(self.sale_price),
            notes: self.notes.clone(),
        }
    }

    pub fn components(&self) -> [f64; 5] {
        [
            self.material_cost,
            self.trim_cost,
            self.thread_cost,
            self.labor_cost,
            self.misc_cost,
        ]
    }
}

/// Order metadata needed to place a cost entry in a reporting period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: OrderId,
    pub folio: Option<String>,
    pub name: Option<String>,
    pub client_name: Option<String>,
    pub order_date: Date,
}

impl OrderInfo {
    pub fn new(order_id: impl Into<OrderId>, order_date: Date) -> Self {
        Self {
            order_id: order_id.into(),
            folio: None,
            name: None,
            client_name: None,
            order_date,
        }
    }

    /// Folio when the backend assigned one, otherwise the raw id.
    pub fn label(&self) -> String {
        self.folio
            .clone()
            .unwrap_or_else(|| format!("#{}", self.order_id))
    }
}

pub fn normalize_amount(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Accepts JSON numbers, numeric strings and null. Anything unparsable is `0.0`.
pub(crate) fn amount_from_json<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct LenientAmount;

    impl<'de> serde::de::Visitor<'de> for LenientAmount {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an amount")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(normalize_amount(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value
                .trim()
                .parse::<f64>()
                .map(normalize_amount)
                .unwrap_or(0.0))
        }

        fn visit_bool<E>(self, _value: bool) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0.0)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0.0)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0.0)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            while seq.next_element::<serde::de::IgnoredAny>()?.is_some() {}
            Ok(0.0)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            while map
                .next_entry::<serde::de::IgnoredAny, serde::de::IgnoredAny>()?
                .is_some()
            {}
            Ok(0.0)
        }
    }

    deserializer.deserialize_any(LenientAmount)
}

pub(crate) fn string_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> serde::de::Visitor<'de> for StringOrNumber {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

/// Backend `LocalDateTime` (`2026-01-05T10:30:00`, optionally with fractional
/// seconds). Missing or unparsable values become `None`.
pub(crate) fn timestamp_from_json<'de, D>(deserializer: D) -> Result<Option<PrimitiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<PrimitiveDateTime> {
    let raw = raw.trim();
    PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .ok()
}
