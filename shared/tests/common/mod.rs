#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

use pin_photos::{
    HttpClient, HttpError, HttpRequest, HttpResponse, LatLon, PhotoSetManager, PhotoStore,
    SearchClient, SearchConfig, StoreBackend,
};

pub const SEARCH_HOST: &str = "api.flickr.com";

pub type Manager<B> = PhotoSetManager<SearchClient<FakeNetwork>, B>;

pub fn coord(lat: f64, lon: f64) -> LatLon {
    LatLon::new(lat, lon).unwrap()
}

/// A search response body in the photo service's JSON shape.
pub fn search_body(urls: &[&str], total_pages: u32) -> String {
    let photos: Vec<_> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| json!({ "id": i.to_string(), "title": "", "url_m": url }))
        .collect();
    json!({
        "photos": {
            "page": 1,
            "pages": total_pages,
            "perpage": 21,
            "total": urls.len(),
            "photo": photos,
        },
        "stat": "ok",
    })
    .to_string()
}

#[derive(Clone)]
enum Reply {
    Body(u16, Bytes),
    Fail(HttpError),
}

/// Plays the photo service (by requested page) and the image hosts (by URL).
#[derive(Default)]
pub struct FakeNetwork {
    pages: Mutex<HashMap<u32, Reply>>,
    images: Mutex<HashMap<String, Reply>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
    searches: Mutex<Vec<HttpRequest>>,
    image_requests: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve_page(&self, page: u32, urls: &[&str], total_pages: u32) {
        let body = Bytes::from(search_body(urls, total_pages));
        self.pages
            .lock()
            .unwrap()
            .insert(page, Reply::Body(200, body));
    }

    pub fn serve_raw_page(&self, page: u32, status: u16, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(page, Reply::Body(status, Bytes::from(body.to_string())));
    }

    pub fn fail_page(&self, page: u32, error: HttpError) {
        self.pages.lock().unwrap().insert(page, Reply::Fail(error));
    }

    pub fn serve_image(&self, url: &str, bytes: &'static [u8]) {
        self.images
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Body(200, Bytes::from_static(bytes)));
    }

    /// Image requests for `url` wait until the gate gets a permit.
    pub fn hold_image(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.held
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    /// Page numbers of every search request, in order.
    pub fn searched_pages(&self) -> Vec<u32> {
        self.searches
            .lock()
            .unwrap()
            .iter()
            .map(|request| query_param(request, "page").parse().unwrap())
            .collect()
    }

    pub fn search_requests(&self) -> Vec<HttpRequest> {
        self.searches.lock().unwrap().clone()
    }

    pub fn image_requests(&self) -> Vec<String> {
        self.image_requests.lock().unwrap().clone()
    }
}

pub fn query_param(request: &HttpRequest, key: &str) -> String {
    Url::parse(request.url().as_str())
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn unreachable(request: &HttpRequest) -> HttpError {
    HttpError::ConnectionError {
        host: request.url().host().to_string(),
        message: "no fake reply configured".into(),
    }
}

#[async_trait]
impl HttpClient for FakeNetwork {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let reply = if request.url().host() == SEARCH_HOST {
            self.searches.lock().unwrap().push(request.clone());
            let page: u32 = query_param(&request, "page").parse().unwrap_or(0);
            self.pages.lock().unwrap().get(&page).cloned()
        } else {
            let url = request.url().as_str().to_string();
            self.image_requests.lock().unwrap().push(url.clone());
            let gate = self.held.lock().unwrap().get(&url).cloned();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.images.lock().unwrap().get(&url).cloned()
        };

        match reply {
            Some(Reply::Body(status, body)) => Ok(HttpResponse::for_request(&request, status, body)),
            Some(Reply::Fail(error)) => Err(error),
            None => Err(unreachable(&request)),
        }
    }
}

pub fn manager<B: StoreBackend>(network: &Arc<FakeNetwork>, backend: B) -> Manager<B> {
    let search = SearchClient::new(network.clone(), SearchConfig::with_api_key("integration-key"))
        .unwrap();
    let store = PhotoStore::open(backend).unwrap();
    PhotoSetManager::new(Arc::new(search), store)
}
