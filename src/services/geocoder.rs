//! Geocoding resolver: rate-limited Nominatim queries with tiered fallback.
//!
//! Resolution tiers, tried in order for each address:
//!
//! 1. full address — `"<street>, <neighborhood>, Niterói, RJ, Brasil"`
//! 2. normalized street without neighborhood (only when abbreviation
//!    expansion changed the street text)
//! 3. neighborhood — `"<neighborhood>, Niterói, RJ, Brasil"`
//! 4. fixed neighborhood centroid (no network call)
//!
//! Whatever tier answers is cached under the *original* full-address key,
//! so repeated runs short-circuit before any network traffic. An address
//! that fails every tier is returned as unresolved and retried next run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{
    GEOCODE_MIN_INTERVAL_MS, HTTP_TIMEOUT_SECS, NOMINATIM_URL, NOMINATIM_USER_AGENT,
};
use crate::services::centroids::centroid_for;
use crate::services::geocache::{AddressCache, CacheEntry};
use crate::types::{GeocodedRecord, Precision, TransactionRecord};

/// Geocoding backend errors. All of these are recoverable at the batch
/// level: they trigger tier fallback, never a crash.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend error {0}: {1}")]
    Api(u16, String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// An external address-resolution service. `Ok(None)` means the backend
/// answered but found nothing; errors are transport or protocol failures.
pub trait GeocodeBackend {
    fn search(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Option<(f64, f64)>, GeoError>> + Send;
}

/// Shared minimum-interval gate for outbound calls. Pending calls queue on
/// the mutex and sleep out the remainder of the interval; throttling alone
/// never produces an error.
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait until the minimum interval since the previous call has elapsed.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim (OpenStreetMap) search backend.
pub struct NominatimBackend {
    http_client: reqwest::Client,
}

impl NominatimBackend {
    pub fn new() -> Result<Self, GeoError> {
        let http_client = reqwest::Client::builder()
            .user_agent(NOMINATIM_USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| GeoError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }
}

impl GeocodeBackend for NominatimBackend {
    async fn search(&self, query: &str) -> Result<Option<(f64, f64)>, GeoError> {
        debug!(query = %query, "querying Nominatim");

        let response = self
            .http_client
            .get(NOMINATIM_URL)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeoError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeoError::Api(status.as_u16(), body));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| GeoError::Parse(e.to_string()))?;

        match places.first() {
            None => Ok(None),
            Some(place) => {
                let lat: f64 = place
                    .lat
                    .parse()
                    .map_err(|_| GeoError::Parse(format!("bad latitude '{}'", place.lat)))?;
                let lon: f64 = place
                    .lon
                    .parse()
                    .map_err(|_| GeoError::Parse(format!("bad longitude '{}'", place.lon)))?;
                Ok(Some((lat, lon)))
            }
        }
    }
}

/// The ordered fallback chain. Each tier knows how to build its query (or
/// table lookup) from the address context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolutionTier {
    FullAddress,
    NormalizedStreet,
    Neighborhood,
    Centroid,
}

const TIER_CHAIN: &[ResolutionTier] = &[
    ResolutionTier::FullAddress,
    ResolutionTier::NormalizedStreet,
    ResolutionTier::Neighborhood,
    ResolutionTier::Centroid,
];

impl ResolutionTier {
    fn precision(&self) -> Precision {
        match self {
            ResolutionTier::FullAddress | ResolutionTier::NormalizedStreet => Precision::Address,
            ResolutionTier::Neighborhood => Precision::Neighborhood,
            ResolutionTier::Centroid => Precision::Centroid,
        }
    }
}

/// Per-run resolution counters, logged at the end of a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolutionStats {
    pub cache_hits: usize,
    pub by_address: usize,
    pub by_neighborhood: usize,
    pub by_centroid: usize,
    pub unresolved: usize,
}

/// Tiered geocoding resolver with cache-first lookups.
pub struct GeocodeResolver<B: GeocodeBackend> {
    backend: B,
    cache: AddressCache,
    limiter: Arc<RateLimiter>,
    stats: ResolutionStats,
}

impl<B: GeocodeBackend> GeocodeResolver<B> {
    pub fn new(backend: B, cache: AddressCache) -> Self {
        Self {
            backend,
            cache,
            limiter: Arc::new(RateLimiter::new(GEOCODE_MIN_INTERVAL_MS)),
            stats: ResolutionStats::default(),
        }
    }

    /// Same as [`new`](Self::new) with an explicit rate-limit interval.
    /// Mock backends in tests run with a zero interval.
    pub fn with_interval(backend: B, cache: AddressCache, interval_ms: u64) -> Self {
        Self {
            backend,
            cache,
            limiter: Arc::new(RateLimiter::new(interval_ms)),
            stats: ResolutionStats::default(),
        }
    }

    pub fn stats(&self) -> &ResolutionStats {
        &self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Resolve one street + neighborhood pair. Returns `Ok(None)` when every
    /// tier failed; only cache persistence errors propagate.
    pub async fn resolve(
        &mut self,
        street: &str,
        neighborhood: &str,
    ) -> crate::error::Result<Option<(f64, f64, Precision)>> {
        let key = full_address(street, neighborhood);

        if let Some(hit) = self.cache.lookup(&key) {
            self.stats.cache_hits += 1;
            return Ok(Some((hit.latitude, hit.longitude, hit.precision)));
        }

        for tier in TIER_CHAIN {
            let outcome = match tier {
                ResolutionTier::FullAddress => self.query(&key).await,
                ResolutionTier::NormalizedStreet => {
                    let normalized = normalize_street(street);
                    // Only worth a second call when normalization actually
                    // changed the text.
                    if normalized.trim().is_empty() || normalized.trim() == street.trim() {
                        continue;
                    }
                    let query = format!("{normalized}, Niterói, RJ, Brasil");
                    self.query(&query).await
                }
                ResolutionTier::Neighborhood => {
                    if neighborhood.trim().is_empty() {
                        continue;
                    }
                    let query = neighborhood_address(neighborhood);
                    self.query(&query).await
                }
                ResolutionTier::Centroid => centroid_for(neighborhood),
            };

            if let Some((lat, lon)) = outcome {
                let precision = tier.precision();
                match precision {
                    Precision::Address => self.stats.by_address += 1,
                    Precision::Neighborhood => {
                        info!(address = %key, "fallback to neighborhood tier");
                        self.stats.by_neighborhood += 1;
                    }
                    Precision::Centroid => {
                        info!(address = %key, neighborhood = %neighborhood, "fallback to fixed centroid");
                        self.stats.by_centroid += 1;
                    }
                }
                // Key by the original address, not the winning query, so the
                // next run short-circuits regardless of which tier answered.
                self.cache.record(
                    &key,
                    CacheEntry {
                        latitude: lat,
                        longitude: lon,
                        precision,
                        resolved_at: chrono::Utc::now(),
                    },
                )?;
                return Ok(Some((lat, lon, precision)));
            }
        }

        warn!(address = %key, "unresolved address — all tiers failed");
        self.stats.unresolved += 1;
        Ok(None)
    }

    /// Rate-limited backend query; transport and protocol errors degrade to
    /// a miss so the next tier gets its chance.
    async fn query(&self, query: &str) -> Option<(f64, f64)> {
        self.limiter.wait().await;
        match self.backend.search(query).await {
            Ok(found) => found,
            Err(e) => {
                warn!(query = %query, error = %e, "geocoding query failed, falling back a tier");
                None
            }
        }
    }

    /// Geocode a batch of consolidated records, consulting the cache first
    /// for each unique address. Resolution failures become records with
    /// absent coordinates; the batch always completes.
    pub async fn geocode_records(
        &mut self,
        records: Vec<TransactionRecord>,
        limit: Option<usize>,
    ) -> crate::error::Result<Vec<GeocodedRecord>> {
        let mut out = Vec::with_capacity(records.len());
        let mut fresh = 0usize;

        for record in records {
            let key = full_address(&record.street, &record.neighborhood);
            let cached = self.cache.lookup(&key).map(|e| (e.latitude, e.longitude, e.precision));

            let resolved = match cached {
                Some((lat, lon, precision)) => {
                    self.stats.cache_hits += 1;
                    Some((lat, lon, precision))
                }
                None => {
                    if let Some(max) = limit {
                        if fresh >= max {
                            out.push(GeocodedRecord::unresolved(record));
                            continue;
                        }
                    }
                    fresh += 1;
                    self.resolve(&record.street, &record.neighborhood).await?
                }
            };

            out.push(match resolved {
                Some((lat, lon, precision)) => GeocodedRecord {
                    record,
                    latitude: Some(lat),
                    longitude: Some(lon),
                    precision: Some(precision),
                },
                None => GeocodedRecord::unresolved(record),
            });
        }

        info!(
            cache_hits = self.stats.cache_hits,
            by_address = self.stats.by_address,
            by_neighborhood = self.stats.by_neighborhood,
            by_centroid = self.stats.by_centroid,
            unresolved = self.stats.unresolved,
            "geocoding batch finished"
        );
        Ok(out)
    }
}

/// The full-address cache key and tier-1 query string.
pub fn full_address(street: &str, neighborhood: &str) -> String {
    format!(
        "{}, {}, Niterói, RJ, Brasil",
        collapse_whitespace(street),
        collapse_whitespace(neighborhood)
    )
}

fn neighborhood_address(neighborhood: &str) -> String {
    format!("{}, Niterói, RJ, Brasil", collapse_whitespace(neighborhood))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bav\.?\b", "avenida"),
        (r"\br\.?\b", "rua"),
        (r"\btrav\.?\b", "travessa"),
        (r"\brod\.?\b", "rodovia"),
        (r"\bestr\.?\b", "estrada"),
        (r"\bal\.?\b", "alameda"),
        (r"\bpca\.?\b", "praca"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (Regex::new(pattern).unwrap_or_else(|e| panic!("bad abbreviation regex: {e}")), replacement)
    })
    .collect()
});

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.;:_\-]+").unwrap_or_else(|e| panic!("bad regex: {e}")));

/// Expand common street-type abbreviations (`Av.` → `Avenida`) to improve
/// backend matching. Accents are stripped and the result is title-cased.
pub fn normalize_street(street: &str) -> String {
    if street.trim().is_empty() {
        return String::new();
    }
    let mut text = strip_accents(street).to_lowercase();
    text = PUNCTUATION.replace_all(&text, " ").into_owned();
    text = collapse_whitespace(&text);
    for (pattern, replacement) in ABBREVIATIONS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    title_case(&collapse_whitespace(&text))
}

/// Replace accented Latin characters with their ASCII base.
pub fn strip_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

pub(crate) fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
