use std::path::{Component, Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::{
    application::error::ConversionError,
    domain::{
        artifact::{Delivery, OutputArtifact},
        request::OutputFormat,
    },
};

/// Who is asking: the command line writes raster output to disk by default, the server returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Command,
    Server,
}

#[derive(Debug, Clone)]
pub struct OutputSink {
    mode: SinkMode,
    tmp_dir: Option<PathBuf>,
}

impl OutputSink {
    pub fn new(mode: SinkMode, tmp_dir: Option<PathBuf>) -> Self {
        Self { mode, tmp_dir }
    }

    /// File name the artifact is written to, if it goes to disk at all.
    ///
    /// With a `tmp_dir`, and always in server mode, the destination is kept relative:
    /// root and drive prefixes are dropped and parent components are refused.
    pub fn target(
        &self,
        format: OutputFormat,
        destination: Option<&Path>,
    ) -> Result<Option<PathBuf>, ConversionError> {
        let name = match destination {
            Some(destination) if self.confined() => confine(destination)?,
            Some(destination) => destination.to_path_buf(),
            None if format == OutputFormat::Pdf
                || (self.mode == SinkMode::Command && format != OutputFormat::Svg) =>
            {
                self.default_name(format)
            }
            None => return Ok(None),
        };

        Ok(Some(match self.tmp_dir.as_deref() {
            Some(tmp_dir) => tmp_dir.join(name),
            None => name,
        }))
    }

    fn confined(&self) -> bool {
        self.tmp_dir.is_some() || self.mode == SinkMode::Server
    }

    /// Server requests run concurrently, so each gets its own default file.
    fn default_name(&self, format: OutputFormat) -> PathBuf {
        match self.mode {
            SinkMode::Command => PathBuf::from(format!("chart.{}", format.as_str())),
            SinkMode::Server => {
                PathBuf::from(format!("chart-{}.{}", Uuid::new_v4(), format.as_str()))
            }
        }
    }

    pub async fn deliver(
        &self,
        artifact: OutputArtifact,
        destination: Option<&Path>,
    ) -> Result<Delivery, ConversionError> {
        let Some(path) = self.target(artifact.format, destination)? else {
            return Ok(Delivery::Inline(artifact.encoded_payload()));
        };

        tokio::fs::write(&path, artifact.as_bytes())
            .await
            .map_err(|err| {
                ConversionError::io(format!("could not write {}: {err}", path.display()), err)
            })?;
        debug!(
            target = "chartexport::convert::sink",
            path = %path.display(),
            bytes = artifact.as_bytes().len(),
            "artifact written"
        );
        Ok(Delivery::File(path))
    }
}

fn confine(destination: &Path) -> Result<PathBuf, ConversionError> {
    let mut relative = PathBuf::new();
    for component in destination.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(ConversionError::invalid_request(format!(
                    "outfile `{}` must not leave the output directory",
                    destination.display()
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ConversionError::invalid_request(format!(
            "outfile `{}` does not name a file",
            destination.display()
        )));
    }
    Ok(relative)
}
