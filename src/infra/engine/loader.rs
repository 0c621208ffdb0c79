//! Page network stack: fetches referenced images and stylesheets.
//!
//! Every load reports through the page's event channel the way a browser
//! reports network activity: requested, response start, response end or
//! failure. Bodies are cached per page for the rasterizer.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use tokio::task::JoinSet;
use tracing::debug;
use url::Url;

use crate::application::engine::{EngineEvent, EventSink, ResponseStage};

pub type BodyCache = Arc<Mutex<HashMap<String, Arc<Vec<u8>>>>>;

pub struct ResourceLoader {
    client: reqwest::Client,
    events: EventSink,
    cache: BodyCache,
    requested: HashSet<String>,
    tasks: JoinSet<()>,
}

impl ResourceLoader {
    pub fn new(client: reqwest::Client, events: EventSink) -> Self {
        Self {
            client,
            events,
            cache: Arc::default(),
            requested: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Start loading `url` unless this page already asked for it.
    pub fn request(&mut self, url: &str) {
        if url.starts_with("data:") || !self.requested.insert(url.to_string()) {
            return;
        }

        let _ = self.events.send(EngineEvent::ResourceRequested {
            url: url.to_string(),
        });

        let parsed = match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
            Ok(parsed) => {
                self.fail(url, format!("unsupported scheme `{}`", parsed.scheme()));
                return;
            }
            Err(err) => {
                self.fail(url, format!("not an absolute URL: {err}"));
                return;
            }
        };

        let client = self.client.clone();
        let events = self.events.clone();
        let cache = Arc::clone(&self.cache);
        let url = url.to_string();
        self.tasks
            .spawn(async move { fetch(client, parsed, url, events, cache).await });
    }

    pub fn body(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(url).cloned())
    }

    /// Snapshot of every body fetched so far.
    pub fn bodies(&self) -> HashMap<String, Arc<Vec<u8>>> {
        self.cache
            .lock()
            .map(|cache| cache.clone())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every load still running.
    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
    }

    fn fail(&self, url: &str, reason: String) {
        debug!(
            target = "chartexport::engine::network",
            url,
            reason = %reason,
            "resource not loadable"
        );
        let _ = self.events.send(EngineEvent::ResourceFailed {
            url: url.to_string(),
            reason,
        });
    }
}

async fn fetch(
    client: reqwest::Client,
    target: Url,
    url: String,
    events: EventSink,
    cache: BodyCache,
) {
    let response = match client.get(target).send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = events.send(EngineEvent::ResourceFailed {
                url,
                reason: err.to_string(),
            });
            return;
        }
    };

    let _ = events.send(EngineEvent::ResourceReceived {
        url: url.clone(),
        stage: ResponseStage::Start,
    });

    let status = response.status();
    if !status.is_success() {
        let _ = events.send(EngineEvent::ResourceFailed {
            url,
            reason: format!("HTTP {status}"),
        });
        return;
    }

    match response.bytes().await {
        Ok(body) => {
            if let Ok(mut cache) = cache.lock() {
                cache.insert(url.clone(), Arc::new(body.to_vec()));
            }
            let _ = events.send(EngineEvent::ResourceReceived {
                url,
                stage: ResponseStage::End,
            });
        }
        Err(err) => {
            let _ = events.send(EngineEvent::ResourceFailed {
                url,
                reason: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::get};
    use tokio::net::TcpListener;

    use super::*;
    use crate::application::engine::event_channel;

    async fn serve_png() -> String {
        let app = Router::new()
            .route("/ok.png", get(|| async { vec![0x89u8, b'P', b'N', b'G'] }))
            .route(
                "/missing.png",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn data_urls_are_silent() {
        let (sink, mut events) = event_channel();
        let mut loader = ResourceLoader::new(reqwest::Client::new(), sink);
        loader.request("data:image/png;base64,AAAA");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn relative_and_foreign_schemes_fail_immediately() {
        let (sink, mut events) = event_channel();
        let mut loader = ResourceLoader::new(reqwest::Client::new(), sink);
        loader.request("images/logo.png");
        loader.request("ftp://example.com/a.png");

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[1], EngineEvent::ResourceFailed { .. }));
        assert!(matches!(seen[3], EngineEvent::ResourceFailed { .. }));
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test]
    async fn fetches_report_start_and_end_and_cache_the_body() {
        let base = serve_png().await;
        let (sink, mut events) = event_channel();
        let mut loader = ResourceLoader::new(reqwest::Client::new(), sink);
        let url = format!("{base}/ok.png");
        loader.request(&url);
        loader.request(&url);

        let mut stages = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::ResourceRequested { .. } => stages.push("requested"),
                EngineEvent::ResourceReceived { stage, .. } => {
                    stages.push(if stage == ResponseStage::End { "end" } else { "start" });
                    if stage == ResponseStage::End {
                        break;
                    }
                }
                EngineEvent::ResourceFailed { reason, .. } => panic!("load failed: {reason}"),
                _ => {}
            }
        }

        assert_eq!(stages, vec!["requested", "start", "end"]);
        assert_eq!(
            loader.body(&url).as_deref().map(Vec::as_slice),
            Some(&[0x89u8, b'P', b'N', b'G'][..])
        );
    }

    #[tokio::test]
    async fn http_errors_resolve_as_failures() {
        let base = serve_png().await;
        let (sink, mut events) = event_channel();
        let mut loader = ResourceLoader::new(reqwest::Client::new(), sink);
        loader.request(&format!("{base}/missing.png"));

        loop {
            match events.recv().await.expect("event") {
                EngineEvent::ResourceFailed { reason, .. } => {
                    assert_eq!(reason, "HTTP 404 Not Found");
                    break;
                }
                EngineEvent::ResourceReceived { stage, .. } => {
                    assert_eq!(stage, ResponseStage::Start)
                }
                _ => {}
            }
        }
        assert!(loader.body(&format!("{base}/missing.png")).is_none());
    }
}
