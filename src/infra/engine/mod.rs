//! Built-in rendering engine.
//!
//! A self-contained implementation of the engine contract: a markup document
//! per page, a `reqwest` network stack for referenced images and stylesheets,
//! a basic chart library and a `resvg` rasterizer. Fonts are loaded once per
//! process and shared by every page.

pub mod charts;
pub mod data;
pub mod literal;
pub mod loader;
mod page;
pub mod pdf;
pub mod raster;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;
use usvg::fontdb;

pub use page::{BuiltinPage, import_urls};

use crate::{
    application::engine::{Engine, EngineError, EngineEvents, EnginePage, event_channel},
    infra::error::InfraError,
};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BuiltinEngine {
    client: reqwest::Client,
    fontdb: Arc<fontdb::Database>,
}

impl BuiltinEngine {
    pub fn new(fetch_timeout: Duration) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("chartexport/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::configuration(format!("http client: {err}")))?;

        let mut fontdb = fontdb::Database::new();
        fontdb.load_system_fonts();
        info!(
            target = "chartexport::engine",
            faces = fontdb.len(),
            fetch_timeout_ms = fetch_timeout.as_millis() as u64,
            "engine ready"
        );

        Ok(Self::with_parts(client, Arc::new(fontdb)))
    }

    pub fn with_parts(client: reqwest::Client, fontdb: Arc<fontdb::Database>) -> Self {
        Self { client, fontdb }
    }
}

#[async_trait]
impl Engine for BuiltinEngine {
    async fn open_page(&self) -> Result<(Box<dyn EnginePage>, EngineEvents), EngineError> {
        let (sink, events) = event_channel();
        let page = BuiltinPage::new(self.client.clone(), Arc::clone(&self.fontdb), sink);
        Ok((Box::new(page), events))
    }
}
