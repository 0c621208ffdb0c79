#![allow(dead_code)]

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{Value, json};

use chartexport::{
    application::{
        convert::{ConversionService, ConversionSettings, image_urls},
        engine::{
            BoundPayload, CHART_LOADED_SIGNAL, ChartInstantiation, Engine, EngineError,
            EngineEvent, EngineEvents, EnginePage, EventSink, PageSnapshot, ResponseStage,
            ScriptSource, TraceFrame, event_channel,
        },
    },
    domain::{
        document::RenderDocument,
        geometry::GeometryPlan,
        request::{BindingName, OutputFormat},
    },
};

pub const CHART_MARKUP: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="600" height="400"><rect width="600" height="400" fill="#fff"/><path d="M 10 10 L 50 50" stroke="#2f7ed8" stroke-opacity="0.5"/></svg>"##;

pub const RASTER_BYTES: &[u8] = b"\x89PNG fake raster";

/// How the scripted page reacts to each call.
#[derive(Debug, Clone)]
pub struct Script {
    pub chart_markup: String,
    pub unbindable: HashSet<BindingName>,
    pub stall_images: bool,
    pub data_fails: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            chart_markup: CHART_MARKUP.to_string(),
            unbindable: HashSet::new(),
            stall_images: false,
            data_fails: false,
        }
    }
}

/// An engine whose pages follow a [`Script`] and record every call they receive.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn bound(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("bind:"))
            .collect()
    }

    pub fn service(&self, settings: ConversionSettings) -> ConversionService {
        ConversionService::new(Arc::new(self.clone()), settings)
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn open_page(&self) -> Result<(Box<dyn EnginePage>, EngineEvents), EngineError> {
        let (sink, events) = event_channel();
        self.calls.lock().expect("calls lock").push("open".into());
        Ok((
            Box::new(ScriptedPage {
                script: Arc::clone(&self.script),
                calls: Arc::clone(&self.calls),
                sink,
                markup: String::new(),
                css: Vec::new(),
            }),
            events,
        ))
    }
}

struct ScriptedPage {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<String>>>,
    sink: EventSink,
    markup: String,
    css: Vec<String>,
}

impl ScriptedPage {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("calls lock").push(call.into());
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.sink.send(event);
    }

    fn load_images(&self) {
        let urls = image_urls(&self.markup).expect("image urls");
        for url in urls {
            self.emit(EngineEvent::ResourceRequested { url: url.clone() });
            if !self.script.stall_images {
                self.emit(EngineEvent::ResourceReceived {
                    url,
                    stage: ResponseStage::End,
                });
            }
        }
    }
}

#[async_trait]
impl EnginePage for ScriptedPage {
    async fn open_blank(&mut self) -> Result<(), EngineError> {
        self.record("open_blank");
        Ok(())
    }

    fn set_viewport(&mut self, width: f64, height: f64) {
        self.record(format!("viewport:{width}x{height}"));
    }

    async fn inject_script(&mut self, script: ScriptSource) -> Result<(), EngineError> {
        match script {
            ScriptSource::File(path) => self.record(format!("script_file:{}", path.display())),
            ScriptSource::Inline(source) => self.record(format!("script_inline:{source}")),
        }
        Ok(())
    }

    async fn append_style(&mut self, css: &str, svg_output: bool) -> Result<(), EngineError> {
        self.record(format!("style:{css}"));
        if svg_output {
            self.css.push(css.to_string());
        }
        Ok(())
    }

    async fn set_content(
        &mut self,
        markup: &str,
        format: OutputFormat,
    ) -> Result<(), EngineError> {
        self.record("set_content");
        self.markup = markup.to_string();
        if format != OutputFormat::Svg {
            self.load_images();
        }
        Ok(())
    }

    async fn bind(
        &mut self,
        name: BindingName,
        text: &str,
    ) -> Result<Option<BoundPayload>, EngineError> {
        self.record(format!("bind:{name}"));
        if self.script.unbindable.contains(&name) {
            return Ok(None);
        }

        let payload = match name {
            BindingName::Callback | BindingName::CustomCode => {
                Some(BoundPayload::Script(text.to_string()))
            }
            _ => serde_json::from_str::<Value>(text)
                .ok()
                .filter(Value::is_object)
                .map(BoundPayload::Json),
        };
        if payload.is_some() {
            self.emit(EngineEvent::Console(name.signal()));
        }
        Ok(payload)
    }

    async fn parse_data(&mut self, _data_options: &Value) -> Result<Value, EngineError> {
        self.record("parse_data");
        if self.script.data_fails {
            return Err(EngineError::script("no data source"));
        }
        Ok(json!({"series": [{"name": "parsed", "data": [1, 2, 3]}]}))
    }

    async fn apply_custom_code(
        &mut self,
        _code: &str,
        options: Value,
    ) -> Result<Value, EngineError> {
        self.record("custom_code");
        Ok(options)
    }

    async fn instantiate(&mut self, chart: ChartInstantiation) -> Result<(), EngineError> {
        self.record(format!("instantiate:{}:{}", chart.constructor, chart.options));
        if chart.constructor != "Chart" {
            self.emit(EngineEvent::ScriptError {
                message: format!("TypeError: '{}' is not a constructor", chart.constructor),
                trace: vec![TraceFrame {
                    file: "chart.js".into(),
                    line: 7,
                    function: Some("create".into()),
                }],
            });
            return Ok(());
        }

        self.markup = self.script.chart_markup.clone();
        self.load_images();
        self.emit(EngineEvent::Console(CHART_LOADED_SIGNAL.to_string()));
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError> {
        Ok(PageSnapshot {
            markup: self.markup.clone(),
            css_strings: self.css.clone(),
        })
    }

    async fn render(
        &mut self,
        _document: &RenderDocument,
        format: OutputFormat,
        plan: &GeometryPlan,
    ) -> Result<Vec<u8>, EngineError> {
        self.record(format!(
            "render:{}:{}x{}",
            format.as_str(),
            plan.clip_width,
            plan.clip_height
        ));
        Ok(RASTER_BYTES.to_vec())
    }

    async fn close(&mut self) {
        self.record("close");
    }
}

/// Settings writing output under `tmp_dir` and loading resources from `library_path`.
pub fn settings(tmp_dir: PathBuf, library_path: PathBuf) -> ConversionSettings {
    ConversionSettings {
        library_path,
        tmp_dir: Some(tmp_dir),
        ..ConversionSettings::default()
    }
}
