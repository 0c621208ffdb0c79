use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Instant,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    application::{
        engine::{
            BoundPayload, CHART_LOADED_SIGNAL, ChartInstantiation, EnginePage, ScriptSource,
        },
        error::ConversionError,
    },
    domain::{
        document::RenderDocument,
        manifest::{ResourceKind, ResourceManifest},
        request::{BindingName, ChartSource, ConversionRequest, OutputFormat},
    },
};

use super::{
    ConversionSettings,
    markup::{image_urls, lift_stroke_opacity, repair_foreign_objects, root_geometry},
    monitor::PageMonitor,
    options::{apply_dimensions, empty_series, merge, merge_data},
};

const RESOURCES_FILE: &str = "resources.json";

/// Payloads that confirmed their binding, in injection order.
#[derive(Debug, Default)]
pub struct Bindings {
    bound: Vec<BindingName>,
    options: Option<Value>,
    callback: Option<String>,
    global_options: Option<Value>,
    theme_options: Option<Value>,
    data_options: Option<Value>,
    custom_code: Option<String>,
}

impl Bindings {
    pub fn bound(&self) -> &[BindingName] {
        &self.bound
    }

    fn store(&mut self, name: BindingName, payload: BoundPayload) {
        match name {
            BindingName::Options => self.options = payload.into_json(),
            BindingName::Callback => self.callback = payload.into_script(),
            BindingName::GlobalOptions => self.global_options = payload.into_json(),
            BindingName::ThemeOptions => self.theme_options = payload.into_json(),
            BindingName::DataOptions => self.data_options = payload.into_json(),
            BindingName::CustomCode => self.custom_code = payload.into_script(),
        }
        self.bound.push(name);
    }
}

/// Drives an engine page until it holds a finished chart document.
pub struct DocumentBuilder<'a> {
    settings: &'a ConversionSettings,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(settings: &'a ConversionSettings) -> Self {
        Self { settings }
    }

    pub async fn build(
        &self,
        request: &ConversionRequest,
        page: &mut dyn EnginePage,
        monitor: &mut PageMonitor,
    ) -> Result<RenderDocument, ConversionError> {
        let started = Instant::now();
        let result = match &request.source {
            ChartSource::Markup(markup) => {
                self.build_from_markup(markup, request.format, page, monitor)
                    .await
            }
            ChartSource::Spec(input) => {
                let limit = self.settings.construction_timeout;
                tokio::time::timeout(limit, self.build_from_spec(input, request, page, monitor))
                    .await
                    .map_err(|_| {
                        ConversionError::render_failure(format!(
                            "Timed out after {} s while constructing the chart",
                            limit.as_secs()
                        ))
                    })
                    .and_then(|built| built)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(document) => debug!(
                target = "chartexport::convert::builder",
                op = "build",
                result = "ok",
                width = document.width(),
                height = document.height(),
                images = document.image_urls().len(),
                elapsed_ms,
                "document built"
            ),
            Err(error) => debug!(
                target = "chartexport::convert::builder",
                op = "build",
                result = "error",
                kind = error.kind(),
                elapsed_ms,
                "document build failed"
            ),
        }
        result
    }

    async fn build_from_markup(
        &self,
        markup: &str,
        format: OutputFormat,
        page: &mut dyn EnginePage,
        monitor: &mut PageMonitor,
    ) -> Result<RenderDocument, ConversionError> {
        page.set_content(markup, format).await?;
        monitor.check_script_error()?;

        let snapshot = page.snapshot().await?;
        let repaired = repair_foreign_objects(&snapshot.markup)?;
        let markup = lift_stroke_opacity(&repaired)?;
        let urls = image_urls(&markup)?;
        let (width, height) = root_geometry(&markup)?.ok_or_else(|| {
            ConversionError::parse("the markup does not declare a width and height")
        })?;

        page.set_viewport(width, height);
        Ok(RenderDocument::new(
            markup,
            width,
            height,
            urls,
            snapshot.css_strings,
        )?)
    }

    async fn build_from_spec(
        &self,
        input: &str,
        request: &ConversionRequest,
        page: &mut dyn EnginePage,
        monitor: &mut PageMonitor,
    ) -> Result<RenderDocument, ConversionError> {
        let svg_output = request.format == OutputFormat::Svg;
        let manifest = self.resolve_manifest(request.resources.as_ref()).await;
        self.inject_resources(&manifest, svg_output, page).await;

        let bindings = self.bind_payloads(input, request, page, monitor).await?;
        let Bindings {
            options,
            callback,
            global_options,
            theme_options,
            data_options,
            custom_code,
            ..
        } = bindings;
        let mut options = options.unwrap_or_else(|| Value::Object(Default::default()));

        if let Some(theme) = theme_options {
            options = merge(theme, options);
        }
        let (width, height) = apply_dimensions(&mut options);

        if let Some(data_options) = data_options {
            let parsed = match page.parse_data(&data_options).await {
                Ok(parsed) if parsed.is_object() => parsed,
                Ok(_) => empty_series(),
                Err(error) => {
                    warn!(
                        target = "chartexport::convert::builder",
                        error = %error,
                        "data options could not be parsed, using an empty series"
                    );
                    empty_series()
                }
            };
            options = merge_data(parsed, options);
        }

        if let Some(code) = custom_code.as_deref() {
            options = page.apply_custom_code(code, options).await?;
        }
        monitor.check_script_error()?;

        page.instantiate(ChartInstantiation {
            constructor: request.constructor.clone(),
            options,
            global_options,
            callback,
        })
        .await?;
        monitor
            .wait_for_signal(CHART_LOADED_SIGNAL, self.settings.construction_timeout)
            .await?;

        let snapshot = page.snapshot().await?;
        if snapshot.markup.trim().is_empty() {
            return Err(ConversionError::render_failure(
                "failed to render chart in page, svg is null.",
            ));
        }
        let markup = lift_stroke_opacity(&snapshot.markup)?;
        let urls = image_urls(&markup)?;

        page.set_viewport(width, height);
        Ok(RenderDocument::new(
            markup,
            width,
            height,
            urls,
            snapshot.css_strings,
        )?)
    }

    /// Bind every supplied payload in order and verify the mandatory ones confirmed.
    pub async fn bind_payloads(
        &self,
        input: &str,
        request: &ConversionRequest,
        page: &mut dyn EnginePage,
        monitor: &mut PageMonitor,
    ) -> Result<Bindings, ConversionError> {
        let mut bindings = Bindings::default();

        for name in BindingName::ORDER {
            let text = match name {
                BindingName::Options => Some(input),
                other => request.payloads.get(other),
            };
            let Some(text) = text else {
                continue;
            };

            let payload = page.bind(name, text).await?;
            monitor.pump();
            match payload {
                Some(payload) if monitor.signals().binding_observed(name) => {
                    bindings.store(name, payload);
                }
                _ => debug!(
                    target = "chartexport::convert::builder",
                    binding = name.as_str(),
                    "payload did not bind"
                ),
            }
        }

        if !monitor.signals().binding_observed(BindingName::Options)
            || bindings.options.is_none()
        {
            return Err(ConversionError::parse(format!(
                "the options variable was not available or couldn't be parsed, does the infile contain an syntax error? Input used:{input}"
            )));
        }
        if let Some(callback) = request.payloads.callback.as_deref()
            && bindings.callback.is_none()
        {
            return Err(ConversionError::parse(format!(
                "the callback variable was not available, does the callback contain an syntax error? Callback used: {callback}"
            )));
        }

        debug!(
            target = "chartexport::convert::builder",
            bindings = ?bindings.bound(),
            "payloads bound"
        );
        Ok(bindings)
    }

    /// The library's `resources.json` overlaid with the request's manifest.
    pub async fn resolve_manifest(&self, requested: Option<&ResourceManifest>) -> ResourceManifest {
        let path = self.settings.library_path.join(RESOURCES_FILE);
        let defaults = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<ResourceManifest>(&raw).unwrap_or_else(|err| {
                warn!(
                    target = "chartexport::convert::resources",
                    path = %path.display(),
                    error = %err,
                    "Cannot parse the local resources file"
                );
                ResourceManifest::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => ResourceManifest::default(),
            Err(err) => {
                warn!(
                    target = "chartexport::convert::resources",
                    path = %path.display(),
                    error = %err,
                    "Cannot read the local resources file"
                );
                ResourceManifest::default()
            }
        };

        match requested {
            Some(requested) => defaults.extend(requested.clone()),
            None => defaults,
        }
    }

    async fn inject_resources(
        &self,
        manifest: &ResourceManifest,
        svg_output: bool,
        page: &mut dyn EnginePage,
    ) {
        for entry in manifest.entries() {
            let outcome = match entry.kind {
                ResourceKind::File => self.inject_file(&entry.locator, svg_output, page).await,
                ResourceKind::InlineCss => page
                    .append_style(&entry.locator, svg_output)
                    .await
                    .map_err(|err| err.to_string()),
                ResourceKind::InlineJs => page
                    .inject_script(ScriptSource::Inline(entry.locator.clone()))
                    .await
                    .map_err(|err| err.to_string()),
            };
            if let Err(reason) = outcome {
                warn!(
                    target = "chartexport::convert::resources",
                    kind = ?entry.kind,
                    error = %reason,
                    "resource skipped"
                );
            }
        }
    }

    async fn inject_file(
        &self,
        locator: &str,
        svg_output: bool,
        page: &mut dyn EnginePage,
    ) -> Result<(), String> {
        let Some(path) = self.locate(locator).await else {
            warn!(
                target = "chartexport::convert::resources",
                file = locator,
                "resource file not found in the working directory or library path"
            );
            return Ok(());
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("js") => page
                .inject_script(ScriptSource::File(path))
                .await
                .map_err(|err| err.to_string()),
            Some("css") => {
                let css = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|err| format!("{}: {err}", path.display()))?;
                page.append_style(&css, svg_output)
                    .await
                    .map_err(|err| err.to_string())
            }
            _ => {
                debug!(
                    target = "chartexport::convert::resources",
                    file = %path.display(),
                    "ignoring resource file with unknown extension"
                );
                Ok(())
            }
        }
    }

    /// The working directory first, then the library path.
    pub async fn locate(&self, locator: &str) -> Option<PathBuf> {
        let direct = Path::new(locator);
        if tokio::fs::try_exists(direct).await.unwrap_or(false) {
            return Some(direct.to_path_buf());
        }
        let fallback = self.settings.library_path.join(locator);
        tokio::fs::try_exists(&fallback)
            .await
            .unwrap_or(false)
            .then_some(fallback)
    }
}
