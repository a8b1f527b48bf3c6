//! Paged photo search around a pin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::capabilities::{HttpClient, HttpRequest, ValidatedUrl};
use crate::config::SearchConfig;
use crate::model::LatLon;
use crate::PhotoSetError;

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    /// The page that was requested.
    pub page: u32,
    pub urls: Vec<String>,
    pub total_pages: u32,
}

impl SearchPage {
    /// The search succeeded but there is nothing at this location.
    pub fn is_no_results(&self) -> bool {
        self.urls.is_empty() && self.total_pages == 0
    }
}

/// Remote photo search. One call is one network round trip; implementations
/// never retry.
#[async_trait]
pub trait PhotoSearch: Send + Sync + 'static {
    async fn search(&self, pin: LatLon, page: u32) -> Result<SearchPage, PhotoSetError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Box of the given half extents centred on `center`, clamped to valid
    /// latitude and longitude ranges.
    pub fn around(center: LatLon, half_width: f64, half_height: f64) -> Self {
        Self {
            min_lon: (center.lon() - half_width).max(-180.0),
            min_lat: (center.lat() - half_height).max(-90.0),
            max_lon: (center.lon() + half_width).min(180.0),
            max_lat: (center.lat() + half_height).min(90.0),
        }
    }
}

/// `minLon,minLat,maxLon,maxLat`, the order the search API expects.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

pub struct SearchClient<H: HttpClient> {
    http: Arc<H>,
    config: SearchConfig,
}

impl<H: HttpClient> SearchClient<H> {
    pub fn new(http: Arc<H>, config: SearchConfig) -> Result<Self, PhotoSetError> {
        config.validate()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn build_request(&self, pin: LatLon, page: u32) -> Result<HttpRequest, PhotoSetError> {
        if page == 0 {
            return Err(PhotoSetError::invalid_input("page numbers start at 1"));
        }

        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| PhotoSetError::invalid_input(format!("search endpoint: {e}")))?;
        let bbox = BoundingBox::around(
            pin,
            self.config.bbox_half_width,
            self.config.bbox_half_height,
        );
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("method", &self.config.method)
                .append_pair("api_key", &self.config.api_key)
                .append_pair("bbox", &bbox.to_string())
                .append_pair("extras", "url_m")
                .append_pair("format", "json")
                .append_pair("nojsoncallback", "1")
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &self.config.per_page.to_string());
            if self.config.safe_search {
                query.append_pair("safe_search", "1");
            }
        }

        let request = HttpRequest::new(ValidatedUrl::from_url(url)?)
            .with_header("Accept", "application/json")?
            .with_timeout_ms(self.config.timeout_ms)?;
        Ok(request)
    }
}

#[async_trait]
impl<H: HttpClient> PhotoSearch for SearchClient<H> {
    // The request URL carries the API key, so it is never logged.
    #[instrument(skip(self), fields(pin = %pin))]
    async fn search(&self, pin: LatLon, page: u32) -> Result<SearchPage, PhotoSetError> {
        let request = self.build_request(pin, page)?;
        let request_id = request.request_id().to_string();

        let response = self.http.send(request).await.map_err(|e| {
            warn!(%request_id, error = %e, "photo search failed");
            PhotoSetError::from(e)
        })?;

        if !response.is_success() {
            warn!(%request_id, status = response.status(), "photo search rejected");
            return Err(PhotoSetError::HttpStatus {
                status: response.status(),
            });
        }

        let (urls, total_pages) = parse_response(response.body())?;
        info!(
            %request_id,
            photos = urls.len(),
            total_pages,
            "photo search page received"
        );
        Ok(SearchPage {
            page,
            urls,
            total_pages,
        })
    }
}

/// Extracts the usable photo URLs and the total page count.
///
/// Entries without a valid absolute http(s) `url_m` are skipped.
pub fn parse_response(body: &[u8]) -> Result<(Vec<String>, u32), PhotoSetError> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| PhotoSetError::parse(format!("response is not JSON: {e}")))?;

    if json["stat"].as_str() == Some("fail") {
        let message = json["message"].as_str().unwrap_or("no message");
        return Err(PhotoSetError::parse(format!(
            "search service reported failure: {message}"
        )));
    }

    let photos = &json["photos"];
    let Some(entries) = photos["photo"].as_array() else {
        return Err(PhotoSetError::parse("missing photos.photo list"));
    };
    let Some(total_pages) = photos["pages"].as_u64() else {
        return Err(PhotoSetError::parse("missing photos.pages count"));
    };
    let total_pages = u32::try_from(total_pages)
        .map_err(|_| PhotoSetError::parse(format!("page count out of range: {total_pages}")))?;

    let urls: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry["url_m"].as_str())
        .map(str::trim)
        .filter(|url| ValidatedUrl::new(url).is_ok())
        .map(str::to_string)
        .collect();

    let skipped = entries.len() - urls.len();
    if skipped > 0 {
        debug!(skipped, "skipped search results without a usable image URL");
    }
    Ok((urls, total_pages))
}
