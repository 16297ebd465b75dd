/// Ridership query service client
///
/// The backend exposes two side-effect-free read endpoints keyed by
/// `(day, station?, direction, months)`:
///
/// - `GET {base}/ridership-by-station` → `[{station_id, hour, ridership}]`
/// - `GET {base}/total-ridership`      → `[{station_id, hour, total_ridership}]`
///
/// Errors arrive as an HTTP status plus a JSON error body and are mapped onto
/// `FetchError::NetworkFailure` / `FetchError::ValidationFailure`.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::Weekday;
use reqwest::Url;
use serde::{Deserialize, Deserializer};

use crate::logging::{self, Component};
use crate::model::{Direction, FetchError, StationId};
use crate::selection::day_param;

pub const RIDERSHIP_BY_STATION_PATH: &str = "ridership-by-station";
pub const TOTAL_RIDERSHIP_PATH: &str = "total-ridership";

// ============================================================================
// Query and row types
// ============================================================================

/// Parameters shared by both endpoints. `station` is omitted for the
/// total-ridership query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RidershipQuery {
    pub day: Weekday,
    pub station: Option<StationId>,
    pub direction: Direction,
    pub months: BTreeSet<u8>,
}

/// One `{station_id, hour, count}` row from either endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StationHourCount {
    pub station_id: StationId,
    pub hour: u8,
    pub count: f64,
}

#[derive(Debug, Deserialize)]
struct RidershipRow {
    #[serde(deserialize_with = "string_or_number")]
    station_id: String,
    hour: u8,
    ridership: f64,
}

#[derive(Debug, Deserialize)]
struct TotalRidershipRow {
    #[serde(deserialize_with = "string_or_number")]
    station_id: String,
    hour: u8,
    total_ridership: f64,
}

/// Some deployments emit numeric station ids; the catalog keys are strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

// ============================================================================
// Backend trait
// ============================================================================

/// The two read operations the refresh pipeline consumes. Implemented over
/// HTTP by `HttpBackend`, and in-process by test doubles.
pub trait RidershipBackend: Send + Sync {
    fn ridership_by_station(
        &self,
        query: &RidershipQuery,
    ) -> impl Future<Output = Result<Vec<StationHourCount>, FetchError>> + Send;

    fn total_ridership(
        &self,
        query: &RidershipQuery,
    ) -> impl Future<Output = Result<Vec<StationHourCount>, FetchError>> + Send;
}

// ============================================================================
// URL construction and response parsing
// ============================================================================

fn query_params(query: &RidershipQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("day", day_param(query.day).to_string())];
    if let Some(station) = &query.station {
        params.push(("station", station.clone()));
    }
    params.push(("direction", query.direction.as_param().to_string()));
    let months: Vec<String> = query.months.iter().map(|m| m.to_string()).collect();
    params.push(("months", months.join(",")));
    params
}

fn build_url(base_url: &str, path: &str, query: &RidershipQuery) -> Result<Url, FetchError> {
    let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), path);
    Url::parse_with_params(&endpoint, query_params(query))
        .map_err(|e| FetchError::ValidationFailure(format!("bad backend URL {}: {}", endpoint, e)))
}

/// Builds the ridership-by-station URL for `query`.
pub fn build_ridership_url(base_url: &str, query: &RidershipQuery) -> Result<Url, FetchError> {
    build_url(base_url, RIDERSHIP_BY_STATION_PATH, query)
}

/// Builds the total-ridership URL for `query` (station is ignored by the
/// endpoint and normally absent).
pub fn build_totals_url(base_url: &str, query: &RidershipQuery) -> Result<Url, FetchError> {
    build_url(base_url, TOTAL_RIDERSHIP_PATH, query)
}

pub fn parse_ridership_response(body: &str) -> Result<Vec<StationHourCount>, FetchError> {
    let rows: Vec<RidershipRow> = serde_json::from_str(body)
        .map_err(|e| FetchError::NetworkFailure(format!("Parse error: {}", e)))?;
    Ok(rows
        .into_iter()
        .map(|r| StationHourCount {
            station_id: r.station_id,
            hour: r.hour,
            count: r.ridership,
        })
        .collect())
}

pub fn parse_totals_response(body: &str) -> Result<Vec<StationHourCount>, FetchError> {
    let rows: Vec<TotalRidershipRow> = serde_json::from_str(body)
        .map_err(|e| FetchError::NetworkFailure(format!("Parse error: {}", e)))?;
    Ok(rows
        .into_iter()
        .map(|r| StationHourCount {
            station_id: r.station_id,
            hour: r.hour,
            count: r.total_ridership,
        })
        .collect())
}

/// Map a non-2xx status and its body onto the fetch error taxonomy.
/// 4xx means the filter itself was rejected; everything else is treated as
/// a backend or transport problem.
pub fn map_error_response(status: u16, body: &str) -> FetchError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message).or(b.detail))
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    if (400..500).contains(&status) {
        FetchError::ValidationFailure(format!("HTTP {}: {}", status, detail))
    } else {
        FetchError::NetworkFailure(format!("HTTP {}: {}", status, detail))
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::NetworkFailure("request timed out".to_string())
    } else {
        FetchError::NetworkFailure(format!("Request failed: {}", e))
    }
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// `timeout` of `None` lets a request run until the server answers.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(map_transport_error)?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    async fn get_text(&self, url: Url) -> Result<String, FetchError> {
        logging::debug(Component::Http, None, &format!("GET {}", url));

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(map_error_response(status.as_u16(), &body));
        }
        Ok(body)
    }
}

impl RidershipBackend for HttpBackend {
    async fn ridership_by_station(
        &self,
        query: &RidershipQuery,
    ) -> Result<Vec<StationHourCount>, FetchError> {
        let url = build_ridership_url(&self.base_url, query)?;
        let body = self.get_text(url).await?;
        parse_ridership_response(&body)
    }

    async fn total_ridership(
        &self,
        query: &RidershipQuery,
    ) -> Result<Vec<StationHourCount>, FetchError> {
        let url = build_totals_url(&self.base_url, query)?;
        let body = self.get_text(url).await?;
        parse_totals_response(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> RidershipQuery {
        RidershipQuery {
            day: Weekday::Mon,
            station: Some("127".to_string()),
            direction: Direction::GoingTo,
            months: [0, 1, 11].into_iter().collect(),
        }
    }

    #[test]
    fn test_ridership_url_carries_all_params() {
        let url = build_ridership_url("http://localhost:8000/api/", &query()).unwrap();
        assert_eq!(url.path(), "/api/ridership-by-station");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("day".to_string(), "Monday".to_string()),
                ("station".to_string(), "127".to_string()),
                ("direction".to_string(), "goingTo".to_string()),
                ("months".to_string(), "0,1,11".to_string()),
            ]
        );
    }

    #[test]
    fn test_totals_url_omits_station_when_absent() {
        let mut q = query();
        q.station = None;
        let url = build_totals_url("http://localhost:8000/api", &q).unwrap();
        assert_eq!(url.path(), "/api/total-ridership");
        assert!(url.query_pairs().all(|(k, _)| k != "station"));
    }

    #[test]
    fn test_bad_base_url_is_rejected() {
        assert!(build_ridership_url("not a url", &query()).is_err());
    }

    #[test]
    fn test_parse_ridership_rows() {
        let body = r#"[
            {"station_id": "635", "hour": 8, "ridership": 412.0},
            {"station_id": 610, "hour": 9, "ridership": 97}
        ]"#;
        let rows = parse_ridership_response(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].station_id, "635");
        assert_eq!(rows[0].count, 412.0);
        assert_eq!(rows[1].station_id, "610");
        assert_eq!(rows[1].hour, 9);
    }

    #[test]
    fn test_parse_totals_rows() {
        let body = r#"[{"station_id": "127", "hour": 8, "total_ridership": 15000}]"#;
        let rows = parse_totals_response(body).unwrap();
        assert_eq!(rows[0].count, 15000.0);
    }

    #[test]
    fn test_unparseable_body_is_network_failure() {
        match parse_ridership_response("<html>gateway</html>") {
            Err(FetchError::NetworkFailure(msg)) => assert!(msg.starts_with("Parse error")),
            other => panic!("expected network failure, got {:?}", other),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let bad_request = map_error_response(422, r#"{"error": "months must not be empty"}"#);
        assert_eq!(
            bad_request,
            FetchError::ValidationFailure("HTTP 422: months must not be empty".to_string())
        );

        let outage = map_error_response(503, r#"{"message": "warming up"}"#);
        assert_eq!(
            outage,
            FetchError::NetworkFailure("HTTP 503: warming up".to_string())
        );

        let plain = map_error_response(500, "internal error");
        assert_eq!(
            plain,
            FetchError::NetworkFailure("HTTP 500: internal error".to_string())
        );
    }

    #[tokio::test]
    #[ignore] // Don't run in CI - depends on a running ridership backend
    async fn live_backend_answers_both_endpoints() {
        dotenv::dotenv().ok();
        let base = std::env::var("RIDERSHIP_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api".to_string());
        let backend = HttpBackend::new(&base, None).unwrap();

        let rows = backend.ridership_by_station(&query()).await.unwrap();
        assert!(rows.iter().all(|r| r.hour < 24 && r.count >= 0.0));

        let mut totals_query = query();
        totals_query.station = None;
        let totals = backend.total_ridership(&totals_query).await.unwrap();
        assert!(!totals.is_empty(), "totals endpoint returned no rows");
    }
}
