//! Scripted in-memory transport for driving [`crate::XalClient`] in tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use url::Url;

use crate::{error::Error, extensions::ResponseUrl, transport::HttpTransport};

/// Request as seen by [`MockTransport`]
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: http::Method,
    pub url: Url,
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Route key, `host` + `path`
    pub fn route(&self) -> String {
        format!("{}{}", self.url.host_str().unwrap_or_default(), self.url.path())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Request body is not JSON")
    }

    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }
}

#[derive(Debug, Clone)]
struct CannedResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

/// Answers requests from per-route queues of canned responses
///
/// The last response of a route is repeated once its queue is drained,
/// unknown routes answer `404`.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<CannedResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `route` (e.g. `sisu.xboxlive.com/authorize`)
    pub fn respond(self, route: &str, status: u16, body: &[u8]) -> Self {
        self.respond_with_headers(route, status, &[], body)
    }

    pub fn respond_with_headers(
        self,
        route: &str,
        status: u16,
        headers: &[(&'static str, &str)],
        body: &[u8],
    ) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(route.to_owned())
            .or_default()
            .push_back(CannedResponse {
                status,
                headers: headers.iter().map(|(k, v)| (*k, v.to_string())).collect(),
                body: body.to_vec(),
            });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, route: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route() == route)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, Error> {
        let (parts, body) = request.into_parts();
        let recorded = RecordedRequest {
            method: parts.method,
            url: Url::parse(&parts.uri.to_string())?,
            headers: parts.headers,
            body,
        };
        let route = recorded.route();
        let url = recorded.url.clone();
        self.requests.lock().unwrap().push(recorded);

        let canned = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&route) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        }
        .unwrap_or(CannedResponse {
            status: 404,
            headers: vec![],
            body: vec![],
        });

        let mut builder = http::Response::builder().status(canned.status);
        for (name, value) in canned.headers {
            builder = builder.header(name, value);
        }
        let mut response = builder.body(canned.body)?;
        response.extensions_mut().insert(ResponseUrl(url));
        Ok(response)
    }
}
