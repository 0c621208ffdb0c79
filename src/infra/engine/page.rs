use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use usvg::fontdb;
use uuid::Uuid;

use crate::{
    application::{
        convert::{image_urls, merge},
        engine::{
            BoundPayload, CHART_LOADED_SIGNAL, ChartInstantiation, EngineError, EngineEvent,
            EnginePage, EventSink, PageSnapshot, ScriptSource, TraceFrame,
        },
    },
    domain::{
        document::RenderDocument,
        geometry::GeometryPlan,
        request::{BindingName, OutputFormat},
    },
};

use super::{charts, data, literal, loader::ResourceLoader, raster::RasterJob};

/// One isolated page of the built-in engine.
pub struct BuiltinPage {
    id: Uuid,
    events: EventSink,
    loader: ResourceLoader,
    client: reqwest::Client,
    fontdb: Arc<fontdb::Database>,
    viewport: (f64, f64),
    markup: String,
    svg_css: Vec<String>,
    page_css: Vec<String>,
    closed: bool,
}

impl BuiltinPage {
    pub fn new(client: reqwest::Client, fontdb: Arc<fontdb::Database>, events: EventSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            loader: ResourceLoader::new(client.clone(), events.clone()),
            events,
            client,
            fontdb,
            viewport: (0.0, 0.0),
            markup: String::new(),
            svg_css: Vec::new(),
            page_css: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn viewport(&self) -> (f64, f64) {
        self.viewport
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn console(&self, message: impl Into<String>) {
        let _ = self.events.send(EngineEvent::Console(message.into()));
    }

    fn script_error(&self, message: impl Into<String>, function: &str) {
        let _ = self.events.send(EngineEvent::ScriptError {
            message: message.into(),
            trace: vec![TraceFrame {
                file: "chart-library".into(),
                line: 1,
                function: Some(function.to_string()),
            }],
        });
    }

    /// Ask the network stack for every image the current markup references.
    fn load_images(&mut self) -> Result<(), EngineError> {
        let urls = image_urls(&self.markup).map_err(|err| EngineError::render(err.to_string()))?;
        for url in urls {
            self.loader.request(&url);
        }
        Ok(())
    }
}

#[async_trait]
impl EnginePage for BuiltinPage {
    async fn open_blank(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.markup.clear();
        self.svg_css.clear();
        self.page_css.clear();
        debug!(target = "chartexport::engine", page = %self.id, "blank page ready");
        Ok(())
    }

    fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport = (width, height);
    }

    async fn inject_script(&mut self, script: ScriptSource) -> Result<(), EngineError> {
        self.ensure_open()?;
        match script {
            ScriptSource::File(path) => {
                let source = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|err| EngineError::resource(path.display().to_string(), err))?;
                debug!(
                    target = "chartexport::engine",
                    page = %self.id,
                    file = %path.display(),
                    bytes = source.len(),
                    "script injected"
                );
            }
            ScriptSource::Inline(source) => debug!(
                target = "chartexport::engine",
                page = %self.id,
                bytes = source.len(),
                "inline script injected"
            ),
        }
        Ok(())
    }

    async fn append_style(&mut self, css: &str, svg_output: bool) -> Result<(), EngineError> {
        self.ensure_open()?;
        if svg_output {
            self.svg_css.push(css.to_string());
            return Ok(());
        }

        for url in import_urls(css) {
            self.loader.request(&url);
        }
        self.page_css.push(css.to_string());
        Ok(())
    }

    async fn set_content(
        &mut self,
        markup: &str,
        format: OutputFormat,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.markup = markup.to_string();
        if format != OutputFormat::Svg {
            self.load_images()?;
        }
        Ok(())
    }

    async fn bind(
        &mut self,
        name: BindingName,
        text: &str,
    ) -> Result<Option<BoundPayload>, EngineError> {
        self.ensure_open()?;
        let payload = match name {
            BindingName::Options
            | BindingName::GlobalOptions
            | BindingName::ThemeOptions
            | BindingName::DataOptions => match literal::parse(text) {
                Ok(value) if value.is_object() => Some(BoundPayload::Json(value)),
                Ok(_) => None,
                Err(err) => {
                    debug!(
                        target = "chartexport::engine",
                        binding = name.as_str(),
                        error = %err,
                        "binding did not parse"
                    );
                    None
                }
            },
            BindingName::Callback => literal::is_function_source(text)
                .then(|| BoundPayload::Script(text.trim().to_string())),
            BindingName::CustomCode => literal::is_balanced_script(text)
                .then(|| BoundPayload::Script(text.trim().to_string())),
        };

        if payload.is_some() {
            self.console(name.signal());
        }
        Ok(payload)
    }

    async fn parse_data(&mut self, data_options: &Value) -> Result<Value, EngineError> {
        self.ensure_open()?;
        data::parse(data_options, &self.client).await
    }

    async fn apply_custom_code(
        &mut self,
        code: &str,
        options: Value,
    ) -> Result<Value, EngineError> {
        self.ensure_open()?;
        debug!(
            target = "chartexport::engine",
            page = %self.id,
            bytes = code.len(),
            "custom code accepted without a script runtime"
        );
        Ok(options)
    }

    async fn instantiate(&mut self, chart: ChartInstantiation) -> Result<(), EngineError> {
        self.ensure_open()?;
        if chart.constructor != charts::CONSTRUCTOR {
            self.script_error(
                format!("TypeError: '{}' is not a constructor", chart.constructor),
                "instantiate",
            );
            return Ok(());
        }

        let options = match chart.global_options {
            Some(global) => merge(global, chart.options),
            None => chart.options,
        };
        match charts::render(&options) {
            Ok(svg) => {
                self.markup = svg;
                self.load_images()?;
                if chart.callback.is_some() {
                    debug!(
                        target = "chartexport::engine",
                        page = %self.id,
                        "chart callback accepted without a script runtime"
                    );
                }
                self.console(CHART_LOADED_SIGNAL);
            }
            Err(message) => self.script_error(message, "render"),
        }
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError> {
        self.ensure_open()?;
        Ok(PageSnapshot {
            markup: self.markup.clone(),
            css_strings: self.svg_css.clone(),
        })
    }

    async fn render(
        &mut self,
        document: &RenderDocument,
        format: OutputFormat,
        plan: &GeometryPlan,
    ) -> Result<Vec<u8>, EngineError> {
        self.ensure_open()?;
        let job = RasterJob {
            markup: document.markup().to_string(),
            page_css: self.page_css.clone(),
            bodies: self.loader.bodies(),
            plan: *plan,
            format,
        };
        let fontdb = Arc::clone(&self.fontdb);
        tokio::task::spawn_blocking(move || job.run(fontdb))
            .await
            .map_err(|err| EngineError::render(format!("rasterizer task failed: {err}")))?
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.loader.shutdown();
        debug!(target = "chartexport::engine", page = %self.id, "page closed");
    }
}

/// URLs of `@import 'x';`, `@import "x";` and `@import url(x);` rules.
pub fn import_urls(css: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = css;
    while let Some(at) = rest.find("@import") {
        rest = rest[at + "@import".len()..].trim_start();
        let (url, tail) = if let Some(inner) = rest.strip_prefix("url(") {
            match inner.find(')') {
                Some(end) => (&inner[..end], &inner[end + 1..]),
                None => break,
            }
        } else if let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let inner = &rest[1..];
            match inner.find(quote) {
                Some(end) => (&inner[..end], &inner[end + 1..]),
                None => break,
            }
        } else {
            continue;
        };

        let url = url.trim().trim_matches(['\'', '"']);
        if !url.is_empty() {
            urls.push(url.to_string());
        }
        rest = tail;
    }
    urls
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::engine::{EngineEvents, event_channel};

    fn page() -> (BuiltinPage, EngineEvents) {
        let (sink, events) = event_channel();
        (
            BuiltinPage::new(reqwest::Client::new(), Arc::new(fontdb::Database::new()), sink),
            events,
        )
    }

    fn drain(events: &mut EngineEvents) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[test]
    fn import_rules_are_found_in_all_forms() {
        let css = "@import 'a.css'; @import \"b.css\";\n@import url(https://f.example/c.css);\ntext { fill: red }";
        assert_eq!(
            import_urls(css),
            vec!["a.css", "b.css", "https://f.example/c.css"]
        );
    }

    #[tokio::test]
    async fn successful_bindings_signal_on_the_console() {
        let (mut page, mut events) = page();
        let bound = page
            .bind(BindingName::Options, "{series: [{data: [1, 2]}]}")
            .await
            .expect("bind");
        assert!(matches!(bound, Some(BoundPayload::Json(_))));
        assert_eq!(
            drain(&mut events),
            vec![EngineEvent::Console("binding:options:parsed".into())]
        );

        let broken = page
            .bind(BindingName::Callback, "function (chart) {")
            .await
            .expect("bind");
        assert!(broken.is_none());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn unknown_constructor_reports_a_script_error() {
        let (mut page, mut events) = page();
        page.instantiate(ChartInstantiation {
            constructor: "StockChart".into(),
            options: json!({}),
            global_options: None,
            callback: None,
        })
        .await
        .expect("instantiate");

        match drain(&mut events).as_slice() {
            [EngineEvent::ScriptError { message, .. }] => {
                assert!(message.contains("StockChart"))
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn charts_apply_global_options_per_instantiation() {
        let (mut page, mut events) = page();
        page.instantiate(ChartInstantiation {
            constructor: "Chart".into(),
            options: json!({"series": [{"data": [1]}]}),
            global_options: Some(json!({"title": {"text": "Global"}, "chart": {"width": 320}})),
            callback: None,
        })
        .await
        .expect("instantiate");

        let snapshot = page.snapshot().await.expect("snapshot");
        assert!(snapshot.markup.contains(">Global</text>"));
        assert!(snapshot.markup.contains("width=\"320\""));
        assert!(
            drain(&mut events)
                .contains(&EngineEvent::Console(CHART_LOADED_SIGNAL.to_string()))
        );
    }

    #[tokio::test]
    async fn styles_split_between_vector_and_raster_output() {
        let (mut page, mut events) = page();
        page.append_style("text { fill: red }", true)
            .await
            .expect("svg style");
        page.append_style("@import 'fonts.css';", false)
            .await
            .expect("page style");

        let snapshot = page.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.css_strings, vec!["text { fill: red }".to_string()]);

        let events = drain(&mut events);
        assert_eq!(
            events.first(),
            Some(&EngineEvent::ResourceRequested {
                url: "fonts.css".into()
            })
        );
    }

    #[tokio::test]
    async fn closed_pages_refuse_work() {
        let (mut page, _events) = page();
        page.close().await;
        assert!(matches!(
            page.open_blank().await,
            Err(EngineError::Closed)
        ));
    }
}
