//! Local collaborators: an in-memory event catalog, a generic
//! Reasenberg–Jones forecast engine, and an outbox publisher.
//!
//! They back the `aafs` binary when no remote services are configured, and
//! every scenario test. The catalog and publisher can be told to fail the
//! next N calls.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use aafs_core::region::RegionShape;
use aafs_core::{AafsError, Rupture, DAY_MS};
use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::publish::{Product, PublicationChannel, PublicationError};
use crate::timeline::ForecastSummary;
use crate::upstream::{EngineError, EventQuery, EventSource, ForecastEngine, ForecastInput, UpstreamError};

/// Decrement a failure budget; true if this call should fail.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ─── Event catalog ────────────────────────────────────────────

/// Event catalog held in memory.
#[derive(Default)]
pub struct MemoryEventSource {
    events: RwLock<Vec<Rupture>>,
    failures: AtomicUsize,
}

impl MemoryEventSource {
    pub fn new(events: Vec<Rupture>) -> Self {
        Self {
            events: RwLock::new(events),
            failures: AtomicUsize::new(0),
        }
    }

    /// Load a JSON array of ruptures.
    pub fn from_json_file(path: &Path) -> aafs_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let events: Vec<Rupture> = serde_json::from_str(&content)
            .map_err(|e| AafsError::Config(format!("catalog {}: {e}", path.display())))?;
        tracing::info!("🌍 Loaded {} events from {}", events.len(), path.display());
        Ok(Self::new(events))
    }

    pub fn insert(&self, rupture: Rupture) {
        if let Ok(mut events) = self.events.write() {
            events.retain(|e| e.event_id != rupture.event_id);
            events.push(rupture);
        }
    }

    pub fn remove(&self, event_id: &str) {
        if let Ok(mut events) = self.events.write() {
            events.retain(|e| !e.has_id(event_id));
        }
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), UpstreamError> {
        if take_failure(&self.failures) {
            return Err(UpstreamError::Transient("simulated catalog outage".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Rupture>>, UpstreamError> {
        self.events
            .read()
            .map_err(|_| UpstreamError::Transient("catalog lock poisoned".into()))
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn fetch_event(&self, event_id: &str) -> Result<Option<Rupture>, UpstreamError> {
        self.check()?;
        Ok(self.read()?.iter().find(|e| e.has_id(event_id)).cloned())
    }

    async fn fetch_event_list(&self, query: &EventQuery) -> Result<Vec<Rupture>, UpstreamError> {
        self.check()?;
        let mut found: Vec<_> = self.read()?.iter().filter(|e| query.matches(e)).cloned().collect();
        found.sort_by_key(|e| e.time);
        Ok(found)
    }
}

// ─── Forecast engine ──────────────────────────────────────────

/// Generic Reasenberg–Jones parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RjParams {
    pub a: f64,
    pub b: f64,
    pub p: f64,
    /// Days.
    pub c: f64,
}

impl Default for RjParams {
    fn default() -> Self {
        // Generic California values.
        Self {
            a: -1.67,
            b: 0.91,
            p: 1.08,
            c: 0.05,
        }
    }
}

impl RjParams {
    fn with_overrides(mut self, params: Option<&serde_json::Value>) -> Self {
        if let Some(params) = params {
            let get = |key: &str| params.get(key).and_then(serde_json::Value::as_f64);
            self.a = get("a").unwrap_or(self.a);
            self.b = get("b").unwrap_or(self.b);
            self.p = get("p").unwrap_or(self.p);
            self.c = get("c").unwrap_or(self.c);
        }
        self
    }

    /// Integral of (t + c)^-p over [t1, t2] days.
    fn time_integral(&self, t1: f64, t2: f64) -> f64 {
        if (self.p - 1.0).abs() < 1e-9 {
            ((t2 + self.c) / (t1 + self.c)).ln()
        } else {
            let q = 1.0 - self.p;
            ((t2 + self.c).powf(q) - (t1 + self.c).powf(q)) / q
        }
    }

    /// Expected number of aftershocks of magnitude >= `mag` in [t1, t2] days.
    pub fn expected_count(&self, mainshock_mag: f64, mag: f64, t1: f64, t2: f64) -> f64 {
        10f64.powf(self.a + self.b * (mainshock_mag - mag)) * self.time_integral(t1, t2)
    }
}

/// Reasenberg–Jones engine with generic parameters.
#[derive(Debug, Clone)]
pub struct GenericRjEngine {
    pub params: RjParams,
    /// Completeness magnitude of the aftershock catalog.
    pub catalog_min_mag: f64,
    pub magnitudes: Vec<f64>,
}

impl Default for GenericRjEngine {
    fn default() -> Self {
        Self {
            params: RjParams::default(),
            catalog_min_mag: 2.5,
            magnitudes: vec![3.0, 5.0, 6.0, 7.0],
        }
    }
}

const WINDOWS: [(&str, i64); 4] = [
    ("1 Day", DAY_MS),
    ("1 Week", 7 * DAY_MS),
    ("1 Month", 30 * DAY_MS),
    ("1 Year", 365 * DAY_MS),
];

fn ms_to_days(ms: i64) -> f64 {
    ms as f64 / DAY_MS as f64
}

impl ForecastEngine for GenericRjEngine {
    fn aftershock_query(&self, mainshock: &Rupture, lag: i64) -> EventQuery {
        // Wells & Coppersmith subsurface rupture length.
        let radius_km = 10f64.powf(-2.44 + 0.59 * mainshock.mag).max(10.0);
        EventQuery {
            region: RegionShape::Circle {
                lat: mainshock.lat,
                lon: mainshock.lon,
                radius_km,
            },
            start_time: mainshock.time,
            end_time: mainshock.time + lag,
            min_depth: -5.0,
            max_depth: 700.0,
            min_mag: self.catalog_min_mag,
        }
    }

    fn compute(&self, input: &ForecastInput<'_>) -> Result<serde_json::Value, EngineError> {
        if input.lag <= 0 {
            return Err(EngineError(format!("forecast lag {} must be positive", input.lag)));
        }
        let mut params = self.params.with_overrides(input.analyst_params);
        let mag = input.mainshock.mag;
        let elapsed = ms_to_days(input.lag);

        if input.sequence_specific {
            let observed = input
                .aftershocks
                .iter()
                .filter(|r| !r.has_id(&input.mainshock.event_id) && r.mag >= self.catalog_min_mag)
                .count();
            if observed > 0 {
                let generic = params.expected_count(mag, self.catalog_min_mag, 0.0, elapsed);
                if generic > 0.0 {
                    params.a += (observed as f64 / generic).log10();
                }
            }
        }

        let forecasts: Vec<_> = WINDOWS
            .iter()
            .map(|(label, span)| {
                let t2 = elapsed + ms_to_days(*span);
                let rows: Vec<_> = self
                    .magnitudes
                    .iter()
                    .map(|&m| {
                        let expected = params.expected_count(mag, m, elapsed, t2);
                        serde_json::json!({
                            "mag": m,
                            "expected": expected,
                            "probability": 1.0 - (-expected).exp(),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "label": label,
                    "start": input.mainshock.time + input.lag,
                    "end": input.mainshock.time + input.lag + span,
                    "rows": rows,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "model": if input.sequence_specific { "rj-sequence-specific" } else { "rj-generic" },
            "a": params.a,
            "b": params.b,
            "p": params.p,
            "c": params.c,
            "forecasts": forecasts,
        }))
    }
}

// ─── Publication ──────────────────────────────────────────────

type HmacSha256 = Hmac<Sha256>;

/// Signs products with HMAC-SHA256 and drops them into an outbox.
pub struct OutboxPublisher {
    key: Vec<u8>,
    outbox: Option<PathBuf>,
    sent: Mutex<Vec<Product>>,
    failures: AtomicUsize,
}

impl OutboxPublisher {
    /// Keep sent products in memory only.
    pub fn in_memory(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            outbox: None,
            sent: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Also write each product as a JSON file under `dir`.
    pub fn with_outbox(key: impl Into<Vec<u8>>, dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox: Some(dir.into()),
            ..Self::in_memory(key)
        }
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Product> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn mac(&self, product: &Product) -> Result<HmacSha256, PublicationError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| PublicationError::Sign(e.to_string()))?;
        let body = serde_json::to_vec(&product.body).map_err(|e| PublicationError::Sign(e.to_string()))?;
        mac.update(product.event_code.as_bytes());
        mac.update(&product.lag.to_be_bytes());
        mac.update(&[u8::from(product.is_reviewed)]);
        mac.update(&body);
        Ok(mac)
    }

    /// Check a product's signature against this publisher's key.
    pub fn verify(&self, product: &Product) -> bool {
        let Some(signature) = &product.signature else {
            return false;
        };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(signature) else {
            return false;
        };
        self.mac(product).is_ok_and(|mac| mac.verify_slice(&bytes).is_ok())
    }
}

#[async_trait]
impl PublicationChannel for OutboxPublisher {
    fn build_product(
        &self,
        forecast: &ForecastSummary,
        event_code: &str,
        is_reviewed: bool,
    ) -> Result<Product, PublicationError> {
        if event_code.is_empty() {
            return Err(PublicationError::Build("empty event code".into()));
        }
        Ok(Product {
            event_code: event_code.to_string(),
            lag: forecast.lag,
            is_reviewed,
            body: serde_json::json!({
                "mainshock": forecast.mainshock,
                "aftershock_count": forecast.aftershock_count,
                "max_aftershock_mag": forecast.max_aftershock_mag,
                "model": forecast.model,
            }),
            signature: None,
        })
    }

    fn sign(&self, product: &mut Product) -> Result<(), PublicationError> {
        let tag = self.mac(product)?.finalize().into_bytes();
        product.signature = Some(base64::engine::general_purpose::STANDARD.encode(tag));
        Ok(())
    }

    async fn send(&self, product: &Product) -> Result<(), PublicationError> {
        if take_failure(&self.failures) {
            return Err(PublicationError::Send("simulated publication outage".into()));
        }
        if let Some(dir) = &self.outbox {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PublicationError::Send(e.to_string()))?;
            let name = format!("{}-{}-{}.json", product.event_code, product.lag, uuid::Uuid::new_v4().simple());
            let json = serde_json::to_vec_pretty(product).map_err(|e| PublicationError::Send(e.to_string()))?;
            tokio::fs::write(dir.join(&name), json)
                .await
                .map_err(|e| PublicationError::Send(e.to_string()))?;
            tracing::info!("📤 Product written: {}", name);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(product.clone());
        }
        Ok(())
    }
}
