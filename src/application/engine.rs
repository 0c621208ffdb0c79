//! Rendering engine contract.
//!
//! The engine owns the document model, the network stack and the rasterizer.
//! The conversion pipeline only talks to it through [`Engine`] and
//! [`EnginePage`], and observes its asynchronous side channels through the
//! per-page [`EngineEvents`] receiver.

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    document::RenderDocument,
    geometry::GeometryPlan,
    request::{BindingName, OutputFormat},
};

/// Console message emitted once the chart reports its load lifecycle.
pub const CHART_LOADED_SIGNAL: &str = "chart:load:called";

/// Stage of a network response as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStage {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub file: String,
    pub line: u32,
    pub function: Option<String>,
}

/// One-way notifications pushed by an engine page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Console(String),
    ResourceRequested {
        url: String,
    },
    ResourceReceived {
        url: String,
        stage: ResponseStage,
    },
    ResourceFailed {
        url: String,
        reason: String,
    },
    ScriptError {
        message: String,
        trace: Vec<TraceFrame>,
    },
}

pub type EventSink = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EventSink, EngineEvents) {
    mpsc::unbounded_channel()
}

/// Render a script error the way it is reported to callers.
pub fn describe_script_error(message: &str, trace: &[TraceFrame]) -> String {
    let mut out = String::from(message);
    if !trace.is_empty() {
        out.push_str("\nTRACE:");
        for frame in trace {
            out.push_str(&format!("\n -> {}: {}", frame.file, frame.line));
            if let Some(function) = frame.function.as_deref() {
                out.push_str(&format!(" (in function \"{function}\")"));
            }
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Script(String),
    #[error("could not load `{locator}`: {reason}")]
    Resource { locator: String, reason: String },
    #[error("{0}")]
    Render(String),
    #[error("engine page is closed")]
    Closed,
}

impl EngineError {
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn resource(locator: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Resource {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

/// A structured payload produced by a successful binding.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundPayload {
    /// Object-valued bindings: options, global, theme and data options.
    Json(Value),
    /// Code-valued bindings: callback and custom code, kept as opaque text.
    Script(String),
}

impl BoundPayload {
    pub fn into_json(self) -> Option<Value> {
        match self {
            BoundPayload::Json(value) => Some(value),
            BoundPayload::Script(_) => None,
        }
    }

    pub fn into_script(self) -> Option<String> {
        match self {
            BoundPayload::Script(code) => Some(code),
            BoundPayload::Json(_) => None,
        }
    }
}

/// A script resource handed to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline(String),
}

/// Everything the chart constructor receives.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartInstantiation {
    pub constructor: String,
    pub options: Value,
    pub global_options: Option<Value>,
    pub callback: Option<String>,
}

/// What the pipeline reads back from a constructed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub markup: String,
    /// Stylesheets captured out of band for vector output.
    pub css_strings: Vec<String>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Open an isolated page. The receiver carries only this page's events.
    async fn open_page(&self) -> Result<(Box<dyn EnginePage>, EngineEvents), EngineError>;
}

#[async_trait]
pub trait EnginePage: Send {
    async fn open_blank(&mut self) -> Result<(), EngineError>;

    fn set_viewport(&mut self, width: f64, height: f64);

    async fn inject_script(&mut self, script: ScriptSource) -> Result<(), EngineError>;

    async fn append_style(&mut self, css: &str, svg_output: bool) -> Result<(), EngineError>;

    /// Ingest finished markup as the document body.
    async fn set_content(&mut self, markup: &str, format: OutputFormat)
    -> Result<(), EngineError>;

    /// Establish a named binding. `None` means the payload did not bind.
    async fn bind(
        &mut self,
        name: BindingName,
        text: &str,
    ) -> Result<Option<BoundPayload>, EngineError>;

    /// Fetch and parse a data source description into partial chart options.
    async fn parse_data(&mut self, data_options: &Value) -> Result<Value, EngineError>;

    /// Run custom code against the options, returning the options to instantiate with.
    async fn apply_custom_code(
        &mut self,
        code: &str,
        options: Value,
    ) -> Result<Value, EngineError>;

    async fn instantiate(&mut self, chart: ChartInstantiation) -> Result<(), EngineError>;

    async fn snapshot(&mut self) -> Result<PageSnapshot, EngineError>;

    /// Rasterize the finished document under the given geometry.
    async fn render(
        &mut self,
        document: &RenderDocument,
        format: OutputFormat,
        plan: &GeometryPlan,
    ) -> Result<Vec<u8>, EngineError>;

    async fn close(&mut self);
}
