//! Asynchronous client for the ERP REST API.
//!
//! - Typed accessors for authentication, cost entries, orders and reports.
//! - Period reports are cached in memory with a stale fallback on failure.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, SystemTime},
};

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use time::{Date, PrimitiveDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::domain::entities::{amount_from_json, timestamp_from_json};
use crate::domain::{
    aggregate_report, compute_summary, CostEntry, Costing, OrderId, OrderInfo, PeriodReport,
    PeriodRow, ReportError, ReportLine, Role, Session, UserProfile,
};
use crate::util::version::user_agent;

/// Page size used when walking every cost page for client-side aggregation.
const LIST_PAGE_SIZE: u32 = 100;

/// Largest difference between two money totals still treated as equal.
const AMOUNT_TOLERANCE: f64 = 0.005;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API base URL cannot carry paths: {0}")]
    InvalidBaseUrl(String),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl ApiError {
    fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|err| err.message.or(err.error))
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body.trim().to_string()
                }
            });

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
            StatusCode::FORBIDDEN => ApiError::Forbidden(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            _ => ApiError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Cached,
    Stale,
}

#[derive(Clone, Debug)]
pub struct CachedPayload<T> {
    pub data: T,
    pub fetched_at: SystemTime,
    pub status: CacheStatus,
}

impl<T> CachedPayload<T> {
    fn new(data: T, fetched_at: SystemTime, status: CacheStatus) -> Self {
        Self {
            data,
            fetched_at,
            status,
        }
    }
}

/// A cost entry as stored by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct CostRecord {
    pub id: u64,
    pub entry: CostEntry,
    pub folio: Option<String>,
    pub order_name: Option<String>,
    pub client_name: Option<String>,
    /// Alert level string computed by the server; informational only.
    pub alert_level: Option<String>,
    pub created_at: Option<PrimitiveDateTime>,
    pub updated_at: Option<PrimitiveDateTime>,
}

impl CostRecord {
    /// Summary recomputed locally from the stored amounts.
    pub fn costing(&self) -> Costing {
        Costing::new(self.entry.clone())
    }

    pub fn to_report_line(&self) -> ReportLine {
        ReportLine {
            order_id: self.entry.order_id.clone(),
            folio: self.folio.clone(),
            client_name: self.client_name.clone(),
            costing: self.costing(),
        }
    }
}

/// One page of a paginated listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub last: bool,
}

/// Period-scoped figures of the backend's own report.
///
/// Only these fields are limited to the requested dates on the server; its
/// counters and rankings cover every order, so they are not read.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerTotals {
    pub total_sales: f64,
    pub total_costs: f64,
    pub total_profit: f64,
    pub total_orders: usize,
    pub no_cost_data_count: usize,
}

impl ServerTotals {
    /// Names of the figures that disagree with a locally aggregated report.
    pub fn mismatches(&self, report: &PeriodReport) -> Vec<&'static str> {
        let amounts = [
            ("total_sales", self.total_sales, report.total_sales),
            ("total_costs", self.total_costs, report.total_costs),
            ("total_profit", self.total_profit, report.total_profit),
        ];
        let counts = [
            ("total_orders", self.total_orders, report.total_orders),
            (
                "no_cost_data_count",
                self.no_cost_data_count,
                report.no_cost_data_count,
            ),
        ];

        amounts
            .into_iter()
            .filter(|(_, server, local)| (server - local).abs() > AMOUNT_TOLERANCE)
            .map(|(name, _, _)| name)
            .chain(
                counts
                    .into_iter()
                    .filter(|(_, server, local)| server != local)
                    .map(|(name, _, _)| name),
            )
            .collect()
    }
}

type ReportKey = (Date, Date, NonZeroUsize);

#[derive(Default)]
struct ReportCache {
    reports: HashMap<ReportKey, Cached<PeriodReport>>,
}

#[derive(Clone)]
pub struct ErpClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    cache: Arc<Mutex<ReportCache>>,
    ttl: Duration,
}

impl ErpClient {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        if settings.api_base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(settings.api_base_url.to_string()));
        }
        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: settings.api_base_url.clone(),
            token: None,
            cache: Arc::new(Mutex::new(ReportCache::default())),
            ttl: settings.report_cache_ttl,
        })
    }

    /// Client that sends the session's bearer token on every request.
    pub fn with_session(mut self, session: &Session) -> Self {
        self.token = Some(session.token.clone());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let url = self.endpoint(&["auth", "login"])?;
        let body = LoginRequestDto { username, password };
        let response: LoginResponseDto = self.send(self.http.post(url).json(&body)).await?;
        info!(username = %response.username, role = ?response.role, "logged in");
        Ok(Session::from(response))
    }

    pub async fn validate_token(&self, token: &str) -> Result<bool, ApiError> {
        let url = self.endpoint(&["auth", "validate"])?;
        let response: ValidateResponseDto = self
            .send(self.http.post(url).json(&ValidateRequestDto { token }))
            .await?;
        Ok(response.valid)
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.endpoint(&["auth", "logout"])?;
        self.send_discarding(self.http.post(url)).await
    }

    /// Cost entry of an order, or `None` when none was registered.
    pub async fn get_cost_entry(&self, order_id: &OrderId) -> Result<Option<CostRecord>, ApiError> {
        let url = self.endpoint(&["costos", "pedido", order_id.as_str()])?;
        match self.send::<CostRecordDto>(self.http.get(url)).await {
            Ok(dto) => Ok(Some(dto.into())),
            Err(ApiError::NotFound(message)) => {
                debug!(order = %order_id, %message, "no cost entry");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn has_cost_entry(&self, order_id: &OrderId) -> Result<bool, ApiError> {
        let url = self.endpoint(&["costos", "existe", "pedido", order_id.as_str()])?;
        self.send(self.http.get(url)).await
    }

    pub async fn list_cost_entries(&self, page: u32, size: u32) -> Result<Page<CostRecord>, ApiError> {
        let mut url = self.endpoint(&["costos"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("size", &size.to_string());
        let dto: PageDto<CostRecordDto> = self.send(self.http.get(url)).await?;
        Ok(dto.into_page())
    }

    /// Every stored cost entry, walking the pages in order.
    pub async fn list_all_cost_entries(&self) -> Result<Vec<CostRecord>, ApiError> {
        let mut records = Vec::new();
        let mut page = 0;
        loop {
            let current = self.list_cost_entries(page, LIST_PAGE_SIZE).await?;
            let done = current.last || current.items.is_empty() || page + 1 >= current.total_pages;
            records.extend(current.items);
            if done {
                break;
            }
            page += 1;
        }
        debug!(count = records.len(), "listed cost entries");
        Ok(records)
    }

    /// Create or update the cost entry of `entry.order_id`.
    pub async fn save_cost_entry(&self, entry: &CostEntry) -> Result<CostRecord, ApiError> {
        let url = self.endpoint(&["costos"])?;
        let summary = compute_summary(entry);
        info!(
            order = %entry.order_id,
            profit = summary.profit,
            margin = summary.margin_percent,
            "saving cost entry"
        );
        let dto: CostRecordDto = self
            .send(self.http.post(url).json(&entry.normalized()))
            .await?;
        self.clear_cache().await;
        Ok(dto.into())
    }

    pub async fn update_cost_entry(
        &self,
        record_id: u64,
        entry: &CostEntry,
    ) -> Result<CostRecord, ApiError> {
        let url = self.endpoint(&["costos", &record_id.to_string()])?;
        info!(record = record_id, order = %entry.order_id, "updating cost entry");
        let dto: CostRecordDto = self
            .send(self.http.put(url).json(&entry.normalized()))
            .await?;
        self.clear_cache().await;
        Ok(dto.into())
    }

    pub async fn delete_cost_entry(&self, record_id: u64) -> Result<(), ApiError> {
        let url = self.endpoint(&["costos", &record_id.to_string()])?;
        info!(record = record_id, "deleting cost entry");
        self.send_discarding(self.http.delete(url)).await?;
        self.clear_cache().await;
        Ok(())
    }

    pub async fn top_profitable(&self, limit: usize) -> Result<Vec<CostRecord>, ApiError> {
        let mut url = self.endpoint(&["costos", "top-rentables"])?;
        url.query_pairs_mut()
            .append_pair("limite", &limit.to_string());
        let dtos: Vec<CostRecordDto> = self.send(self.http.get(url)).await?;
        Ok(dtos.into_iter().map(CostRecord::from).collect())
    }

    pub async fn loss_orders(&self) -> Result<Vec<CostRecord>, ApiError> {
        let url = self.endpoint(&["costos", "con-perdida"])?;
        let dtos: Vec<CostRecordDto> = self.send(self.http.get(url)).await?;
        Ok(dtos.into_iter().map(CostRecord::from).collect())
    }

    pub async fn list_orders(&self) -> Result<Vec<OrderInfo>, ApiError> {
        let url = self.endpoint(&["pedidos"])?;
        let dtos: Vec<OrderDto> = self.send(self.http.get(url)).await?;
        Ok(dtos.into_iter().map(OrderInfo::from).collect())
    }

    /// Orders dated within `[start, end]` joined with their cost entries,
    /// ready for client-side aggregation.
    pub async fn collect_period_rows(&self, start: Date, end: Date) -> Result<Vec<PeriodRow>, ApiError> {
        let orders = self.list_orders().await?;
        let mut entries: HashMap<OrderId, CostEntry> = self
            .list_all_cost_entries()
            .await?
            .into_iter()
            .map(|record| (record.entry.order_id.clone(), record.entry))
            .collect();

        let rows: Vec<PeriodRow> = orders
            .into_iter()
            .filter(|order| order.order_date >= start && order.order_date <= end)
            .map(|order| {
                let entry = entries.remove(&order.order_id);
                PeriodRow::new(order, entry)
            })
            .collect();

        debug!(%start, %end, rows = rows.len(), "collected period rows");
        Ok(rows)
    }

    /// Report for `[start, end]` aggregated from the period's orders and cost
    /// entries, served from cache while fresh. The backend's period totals are
    /// fetched alongside and any disagreement is logged.
    pub async fn fetch_report(
        &self,
        start: Date,
        end: Date,
        top_n: NonZeroUsize,
    ) -> Result<CachedPayload<PeriodReport>, ApiError> {
        if start > end {
            return Err(ReportError::InvalidRange { start, end }.into());
        }

        let key = (start, end, top_n);
        if let Some(payload) = self.cached_report(&key).await {
            debug!(%start, %end, "serving cached report");
            return Ok(payload);
        }

        match self.build_report(start, end, top_n).await {
            Ok(report) => Ok(self.store_report(key, report).await),
            Err(error) => {
                if let Some(stale) = self.cached_report_stale(&key).await {
                    warn!(%start, %end, %error, "report request failed; serving stale copy");
                    return Ok(stale);
                }
                Err(error)
            }
        }
    }

    /// Period totals as computed by the backend's `/costos/reporte`.
    pub async fn fetch_server_totals(&self, start: Date, end: Date) -> Result<ServerTotals, ApiError> {
        let mut url = self.endpoint(&["costos", "reporte"])?;
        url.query_pairs_mut()
            .append_pair("fechaInicio", &start.to_string())
            .append_pair("fechaFin", &end.to_string());
        let dto: ReportTotalsDto = self.send(self.http.get(url)).await?;
        Ok(dto.into())
    }

    async fn build_report(
        &self,
        start: Date,
        end: Date,
        top_n: NonZeroUsize,
    ) -> Result<PeriodReport, ApiError> {
        let rows = self.collect_period_rows(start, end).await?;
        let report = aggregate_report(&rows, start, end, top_n)?;

        match self.fetch_server_totals(start, end).await {
            Ok(totals) => {
                let mismatches = totals.mismatches(&report);
                if !mismatches.is_empty() {
                    warn!(
                        %start,
                        %end,
                        fields = ?mismatches,
                        "server totals disagree with the period's orders; using local figures"
                    );
                }
            }
            Err(error) => debug!(%error, "server totals unavailable; skipping cross-check"),
        }

        Ok(report)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.reports.clear();
    }

    async fn cached_report(&self, key: &ReportKey) -> Option<CachedPayload<PeriodReport>> {
        let cache = self.cache.lock().await;
        cache
            .reports
            .get(key)
            .and_then(|entry| entry.if_fresh(self.ttl))
    }

    async fn cached_report_stale(&self, key: &ReportKey) -> Option<CachedPayload<PeriodReport>> {
        let cache = self.cache.lock().await;
        cache.reports.get(key).map(Cached::stale)
    }

    async fn store_report(&self, key: ReportKey, report: PeriodReport) -> CachedPayload<PeriodReport> {
        let fetched_at = SystemTime::now();
        let payload = CachedPayload::new(report.clone(), fetched_at, CacheStatus::Fresh);
        let mut cache = self.cache.lock().await;
        cache.reports.insert(key, Cached::new(report, fetched_at));
        payload
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T>(&self, builder: RequestBuilder) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await?;
        Err(ApiError::from_response(status, &body))
    }

    async fn send_discarding(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(ApiError::from_response(status, &body))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

struct Cached<T> {
    value: T,
    fetched_at: SystemTime,
}

impl<T: Clone> Cached<T> {
    fn new(value: T, fetched_at: SystemTime) -> Self {
        Self { value, fetched_at }
    }

    fn if_fresh(&self, ttl: Duration) -> Option<CachedPayload<T>> {
        if self
            .fetched_at
            .elapsed()
            .map(|elapsed| elapsed <= ttl)
            .unwrap_or(false)
        {
            Some(CachedPayload::new(
                self.value.clone(),
                self.fetched_at,
                CacheStatus::Cached,
            ))
        } else {
            None
        }
    }

    fn stale(&self) -> CachedPayload<T> {
        CachedPayload::new(self.value.clone(), self.fetched_at, CacheStatus::Stale)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct LoginRequestDto<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ValidateRequestDto<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponseDto {
    #[serde(default)]
    valid: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponseDto {
    token: String,
    #[serde(default)]
    usuario_id: Option<u64>,
    username: String,
    #[serde(default)]
    nombre_completo: Option<String>,
    #[serde(rename = "rol")]
    role: String,
    #[serde(default)]
    permisos: Vec<String>,
}

impl From<LoginResponseDto> for Session {
    fn from(dto: LoginResponseDto) -> Self {
        Self {
            token: dto.token,
            user: UserProfile {
                user_id: dto.usuario_id,
                username: dto.username,
                full_name: dto.nombre_completo,
                role: Role::from(dto.role),
                permissions: dto.permisos,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CostRecordDto {
    id: u64,
    #[serde(flatten)]
    entry: CostEntry,
    #[serde(default)]
    folio_pedido: Option<String>,
    #[serde(default)]
    nombre_pedido: Option<String>,
    #[serde(default)]
    cliente_nombre: Option<String>,
    #[serde(default)]
    nivel_alerta: Option<String>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    created_at: Option<PrimitiveDateTime>,
    #[serde(default, deserialize_with = "timestamp_from_json")]
    updated_at: Option<PrimitiveDateTime>,
}

impl From<CostRecordDto> for CostRecord {
    fn from(dto: CostRecordDto) -> Self {
        Self {
            id: dto.id,
            entry: dto.entry,
            folio: dto.folio_pedido,
            order_name: dto.nombre_pedido,
            client_name: dto.cliente_nombre,
            alert_level: dto.nivel_alerta,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDto<T> {
    #[serde(default = "Vec::new")]
    content: Vec<T>,
    #[serde(default)]
    number: u32,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    total_elements: u64,
    #[serde(default)]
    last: bool,
}

impl PageDto<CostRecordDto> {
    fn into_page(self) -> Page<CostRecord> {
        Page {
            items: self.content.into_iter().map(CostRecord::from).collect(),
            number: self.number,
            total_pages: self.total_pages,
            total_items: self.total_elements,
            last: self.last,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    id: OrderId,
    #[serde(default)]
    folio: Option<String>,
    #[serde(default)]
    nombre_pedido: Option<String>,
    #[serde(default)]
    cliente_nombre: Option<String>,
    fecha_pedido: Date,
}

impl From<OrderDto> for OrderInfo {
    fn from(dto: OrderDto) -> Self {
        Self {
            order_id: dto.id,
            folio: dto.folio,
            name: dto.nombre_pedido,
            client_name: dto.cliente_nombre,
            order_date: dto.fecha_pedido,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportTotalsDto {
    #[serde(default, deserialize_with = "amount_from_json")]
    total_ventas: f64,
    #[serde(default, deserialize_with = "amount_from_json")]
    total_costos: f64,
    #[serde(default, deserialize_with = "amount_from_json")]
    utilidad_total: f64,
    #[serde(default)]
    total_pedidos: usize,
    #[serde(default)]
    pedidos_sin_costos: usize,
}

impl From<ReportTotalsDto> for ServerTotals {
    fn from(dto: ReportTotalsDto) -> Self {
        Self {
            total_sales: dto.total_ventas,
            total_costs: dto.total_costos,
            total_profit: dto.utilidad_total,
            total_orders: dto.total_pedidos,
            no_cost_data_count: dto.pedidos_sin_costos,
        }
    }
}
