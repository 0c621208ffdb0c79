//! Conversion requests and the parameter surface shared by the command line and the server.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{error::DomainError, manifest::ResourceManifest};

const DEFAULT_CONSTRUCTOR: &str = "Chart";
const DEFAULT_OUTPUT_TYPE: &str = "png";
const MARKUP_PROLOGUES: [&str; 3] = ["<svg", "<?xml", "<!doctype"];

/// Output formats understood by the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    Png,
    Jpeg,
    Pdf,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Pdf => "pdf",
        }
    }

    /// Raster formats are returned base64-encoded when no destination is set.
    pub fn is_raster(self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::Jpeg)
    }

    pub fn is_paginated(self) -> bool {
        matches!(self, OutputFormat::Pdf)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(DomainError::validation(format!(
                "unsupported output type `{other}`"
            ))),
        }
    }
}

/// What the caller handed in: finished vector markup or a chart options payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    Markup(String),
    Spec(String),
}

impl ChartSource {
    /// Choose the construction mode by sniffing for a markup prologue.
    pub fn sniff(input: impl Into<String>) -> Self {
        let input = input.into();
        if is_markup(&input) {
            ChartSource::Markup(input)
        } else {
            ChartSource::Spec(input)
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ChartSource::Markup(text) | ChartSource::Spec(text) => text,
        }
    }
}

/// Case-insensitive prefix match against `<svg`, `<?xml` and `<!doctype`.
pub fn is_markup(input: &str) -> bool {
    let head = input.trim_start();
    MARKUP_PROLOGUES.iter().any(|prologue| {
        head.get(..prologue.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(prologue))
    })
}

/// Named bindings established in spec-driven mode, in their fixed injection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingName {
    Options,
    Callback,
    GlobalOptions,
    ThemeOptions,
    DataOptions,
    CustomCode,
}

impl BindingName {
    pub const ORDER: [BindingName; 6] = [
        BindingName::Options,
        BindingName::Callback,
        BindingName::GlobalOptions,
        BindingName::ThemeOptions,
        BindingName::DataOptions,
        BindingName::CustomCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BindingName::Options => "options",
            BindingName::Callback => "callback",
            BindingName::GlobalOptions => "globalOptions",
            BindingName::ThemeOptions => "themeOptions",
            BindingName::DataOptions => "dataOptions",
            BindingName::CustomCode => "customCode",
        }
    }

    /// Console message an engine emits once the binding is established.
    pub fn signal(self) -> String {
        format!("binding:{}:parsed", self.as_str())
    }
}

impl fmt::Display for BindingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional code payloads that accompany a chart options payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartPayloads {
    pub callback: Option<String>,
    pub global_options: Option<String>,
    pub theme_options: Option<String>,
    pub data_options: Option<String>,
    pub custom_code: Option<String>,
}

impl ChartPayloads {
    /// Payload text for a binding; `options` itself lives on the request source.
    pub fn get(&self, name: BindingName) -> Option<&str> {
        match name {
            BindingName::Options => None,
            BindingName::Callback => self.callback.as_deref(),
            BindingName::GlobalOptions => self.global_options.as_deref(),
            BindingName::ThemeOptions => self.theme_options.as_deref(),
            BindingName::DataOptions => self.data_options.as_deref(),
            BindingName::CustomCode => self.custom_code.as_deref(),
        }
    }
}

/// A fully validated conversion request. Owned by exactly one pipeline run.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: ChartSource,
    pub format: OutputFormat,
    pub width: Option<f64>,
    pub scale: Option<f64>,
    pub constructor: String,
    pub payloads: ChartPayloads,
    pub resources: Option<ResourceManifest>,
    pub destination: Option<PathBuf>,
}

impl ConversionRequest {
    pub fn new(source: ChartSource, format: OutputFormat) -> Self {
        Self {
            source,
            format,
            width: None,
            scale: None,
            constructor: DEFAULT_CONSTRUCTOR.to_string(),
            payloads: ChartPayloads::default(),
            resources: None,
            destination: None,
        }
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_payloads(mut self, payloads: ChartPayloads) -> Self {
        self.payloads = payloads;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Validate raw parameters into a request.
    pub fn from_params(params: RequestParams) -> Result<Self, DomainError> {
        let input = pick([params.infile.as_deref(), params.options.as_deref()])
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                DomainError::validation("Insufficient or wrong parameters for rendering")
            })?;

        let format = match params.outfile.as_deref() {
            Some(outfile) => {
                let extension = outfile.rsplit_once('.').map(|(_, ext)| ext);
                pick([extension]).unwrap_or(DEFAULT_OUTPUT_TYPE).parse()?
            }
            None => pick([params.output_type.as_deref()])
                .unwrap_or(DEFAULT_OUTPUT_TYPE)
                .parse()?,
        };

        let width = parse_number("width", params.width.as_deref())?;
        let scale = parse_number("scale", params.scale.as_deref())?;
        let constructor = pick([params.constr.as_deref()])
            .unwrap_or(DEFAULT_CONSTRUCTOR)
            .to_string();

        Ok(Self {
            source: ChartSource::sniff(input),
            format,
            width,
            scale,
            constructor,
            payloads: ChartPayloads {
                callback: params.callback,
                global_options: params.globaloptions,
                theme_options: params.themeoptions,
                data_options: params.dataoptions,
                custom_code: params.customcode,
            },
            resources: params
                .resources
                .as_deref()
                .map(ResourceManifest::from_request_value),
            destination: params.outfile.map(PathBuf::from),
        })
    }
}

/// Raw request keys. File-valued keys already carry file contents by the time they land here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    #[serde(deserialize_with = "lenient_text")]
    pub infile: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub options: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub outfile: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    pub output_type: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub scale: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub width: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub constr: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub callback: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub globaloptions: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub themeoptions: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub dataoptions: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub customcode: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub resources: Option<String>,
}

/// Accept strings, numbers, booleans and nested JSON for any text-valued key.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// First candidate that is set and not one of the placeholder strings `null` or `0`.
fn pick<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| *value != "null" && *value != "0")
}

fn parse_number(key: &str, raw: Option<&str>) -> Result<Option<f64>, DomainError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if raw == "null" {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| DomainError::validation(format!("`{key}` must be a number, got `{raw}`")))?;
    if !value.is_finite() {
        return Err(DomainError::validation(format!("`{key}` must be finite")));
    }
    Ok(Some(value))
}
