//! Output sizing: zoom factor, clip rectangle and paper size.

use super::{document::RenderDocument, request::OutputFormat};

/// Screen-to-print correction applied to paper sizes by default.
#[cfg(windows)]
pub const DEFAULT_DPI_CORRECTION: f64 = 72.0 / 96.0;
#[cfg(not(windows))]
pub const DEFAULT_DPI_CORRECTION: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryPlan {
    pub zoom_factor: f64,
    pub clip_width: f64,
    pub clip_height: f64,
    pub paper: Option<PaperSize>,
}

impl GeometryPlan {
    /// An integral, non-zero `width` wins over `scale`; otherwise `scale` applies when `width` is unset.
    pub fn plan(
        document: &RenderDocument,
        format: OutputFormat,
        width: Option<f64>,
        scale: Option<f64>,
        dpi_correction: f64,
    ) -> Self {
        let zoom_factor = zoom_factor(document.width(), width, scale);
        let clip_width = document.width() * zoom_factor;
        let clip_height = document.height() * zoom_factor;
        let paper = format.is_paginated().then(|| PaperSize {
            width: clip_width * dpi_correction,
            height: clip_height * dpi_correction,
        });

        Self {
            zoom_factor,
            clip_width,
            clip_height,
            paper,
        }
    }

    /// Pixel dimensions of the raster surface.
    pub fn pixel_size(&self) -> (u32, u32) {
        (to_pixels(self.clip_width), to_pixels(self.clip_height))
    }
}

fn zoom_factor(document_width: f64, width: Option<f64>, scale: Option<f64>) -> f64 {
    match (width, scale) {
        (Some(width), _) if width != 0.0 && width.fract() == 0.0 => {
            if document_width > 0.0 {
                width / document_width
            } else {
                1.0
            }
        }
        (None, Some(scale)) if scale != 0.0 => scale,
        _ => 1.0,
    }
}

fn to_pixels(value: f64) -> u32 {
    value.ceil().clamp(1.0, u32::MAX as f64) as u32
}
