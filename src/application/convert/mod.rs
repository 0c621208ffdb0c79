//! The conversion pipeline.
//!
//! One request opens one engine page. The [`DocumentBuilder`] drives the page
//! until it holds a finished chart, the [`CompletionGate`] waits for external
//! images when the output is rasterized, the geometry plan sizes the output,
//! the [`Serializer`] produces the artifact and the [`OutputSink`] delivers it.
//! The page is closed on every path out of the pipeline.

mod builder;
mod gate;
mod markup;
mod monitor;
mod options;
mod serializer;
mod signals;
mod sink;
mod tracker;

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{info, warn};

pub use builder::{Bindings, DocumentBuilder};
pub use gate::{CompletionGate, GateOutcome, POLL_INTERVAL, RESOURCE_DEADLINE};
pub use markup::{
    append_defs_styles, escape_text, image_urls, inject_root_styles, lift_stroke_opacity,
    parse_length, repair_foreign_objects, root_geometry,
};
pub use monitor::PageMonitor;
pub use options::{apply_dimensions, empty_series, merge, merge_data};
pub use serializer::{SVG_DOCTYPE, Serializer, fix_namespaces, serialize_svg};
pub use signals::SignalTable;
pub use sink::{OutputSink, SinkMode};
pub use tracker::{ResourceState, ResourceTracker};

use crate::{
    application::{
        engine::{Engine, EnginePage},
        error::ConversionError,
    },
    domain::{
        artifact::Delivery,
        geometry::{DEFAULT_DPI_CORRECTION, GeometryPlan},
        request::{ConversionRequest, OutputFormat},
    },
};

pub const DEFAULT_CONSTRUCTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-process knobs of the pipeline. Nothing here is mutated by a request.
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub library_path: PathBuf,
    pub tmp_dir: Option<PathBuf>,
    pub dpi_correction: f64,
    pub construction_timeout: Duration,
    pub gate: CompletionGate,
    pub sink_mode: SinkMode,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("."),
            tmp_dir: None,
            dpi_correction: DEFAULT_DPI_CORRECTION,
            construction_timeout: DEFAULT_CONSTRUCTION_TIMEOUT,
            gate: CompletionGate::default(),
            sink_mode: SinkMode::Command,
        }
    }
}

#[derive(Clone)]
pub struct ConversionService {
    engine: Arc<dyn Engine>,
    settings: Arc<ConversionSettings>,
}

impl ConversionService {
    pub fn new(engine: Arc<dyn Engine>, settings: ConversionSettings) -> Self {
        Self {
            engine,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    /// Run one request against a fresh page and deliver its artifact.
    pub async fn convert(&self, request: ConversionRequest) -> Result<Delivery, ConversionError> {
        let started = Instant::now();
        let format = request.format;
        let (mut page, events) = self.engine.open_page().await?;
        let mut monitor = PageMonitor::new(events);

        let result = self.run(&request, page.as_mut(), &mut monitor).await;
        page.close().await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(delivery) => info!(
                target = "chartexport::convert",
                op = "convert",
                result = "ok",
                format = format.as_str(),
                to_file = matches!(delivery, Delivery::File(_)),
                elapsed_ms,
                "conversion finished"
            ),
            Err(error) => warn!(
                target = "chartexport::convert",
                op = "convert",
                result = "error",
                format = format.as_str(),
                kind = error.kind(),
                error = %error,
                elapsed_ms,
                "conversion failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        page: &mut dyn EnginePage,
        monitor: &mut PageMonitor,
    ) -> Result<Delivery, ConversionError> {
        page.open_blank().await?;

        let document = DocumentBuilder::new(&self.settings)
            .build(request, page, monitor)
            .await?;

        if request.format != OutputFormat::Svg && document.has_images() {
            if let GateOutcome::TimedOut(pending) = self.settings.gate.wait(monitor).await {
                return Err(ConversionError::ResourceTimeout { pending });
            }
        }
        monitor.check_script_error()?;

        let plan = GeometryPlan::plan(
            &document,
            request.format,
            request.width,
            request.scale,
            self.settings.dpi_correction,
        );
        let artifact = Serializer
            .serialize(&document, &plan, request.format, page)
            .await?;

        OutputSink::new(self.settings.sink_mode, self.settings.tmp_dir.clone())
            .deliver(artifact, request.destination.as_deref())
            .await
    }
}
