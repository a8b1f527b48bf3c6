//! Scripted ports for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::capabilities::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::model::LatLon;
use crate::search::{PhotoSearch, SearchPage};
use crate::PhotoSetError;

fn no_reply(request_id: &str) -> HttpError {
    HttpError::ConnectionError {
        host: "test".into(),
        message: format!("no scripted reply for {request_id}"),
    }
}

/// Answers requests in order from a queue.
#[derive(Default)]
pub(crate) struct ScriptedHttp {
    replies: Mutex<VecDeque<Result<(u16, Bytes), HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, status: u16, body: impl Into<Bytes>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok((status, body.into())));
    }

    pub fn push_err(&self, error: HttpError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok((status, body))) => Ok(HttpResponse::for_request(&request, status, body)),
            Some(Err(e)) => Err(e),
            None => Err(no_reply(request.request_id())),
        }
    }
}

#[derive(Clone)]
struct Route {
    reply: Result<(u16, Bytes), HttpError>,
    gate: Option<Arc<Semaphore>>,
}

/// Answers by exact URL. A held route blocks until its gate gets a permit.
#[derive(Default)]
pub(crate) struct RoutedHttp {
    routes: Mutex<HashMap<String, Route>>,
    requested: Mutex<Vec<String>>,
}

impl RoutedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                reply: Ok((status, body.into())),
                gate: None,
            },
        );
    }

    pub fn route_err(&self, url: &str, error: HttpError) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                reply: Err(error),
                gate: None,
            },
        );
    }

    /// Makes requests for `url` wait; add a permit to the returned gate to
    /// let one through.
    pub fn hold(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        if let Some(route) = self.routes.lock().unwrap().get_mut(url) {
            route.gate = Some(gate.clone());
        }
        gate
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for RoutedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url().as_str().to_string();
        self.requested.lock().unwrap().push(url.clone());
        let route = self.routes.lock().unwrap().get(&url).cloned();
        let Some(route) = route else {
            return Err(no_reply(request.request_id()));
        };
        if let Some(gate) = route.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        route
            .reply
            .map(|(status, body)| HttpResponse::for_request(&request, status, body))
    }
}

/// Search double returning queued pages and recording every call.
#[derive(Default)]
pub(crate) struct ScriptedSearch {
    replies: Mutex<VecDeque<Result<(Vec<String>, u32), PhotoSetError>>>,
    calls: Mutex<Vec<(LatLon, u32)>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, urls: &[&str], total_pages: u32) {
        let urls = urls.iter().map(|u| (*u).to_string()).collect();
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok((urls, total_pages)));
    }

    pub fn push_err(&self, error: PhotoSetError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<(LatLon, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhotoSearch for ScriptedSearch {
    async fn search(&self, pin: LatLon, page: u32) -> Result<SearchPage, PhotoSetError> {
        self.calls.lock().unwrap().push((pin, page));
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok((urls, total_pages))) => Ok(SearchPage {
                page,
                urls,
                total_pages,
            }),
            Some(Err(e)) => Err(e),
            None => Err(PhotoSetError::Network(no_reply("search"))),
        }
    }
}
