use std::collections::BTreeSet;

use super::error::DomainError;

/// A fully built chart document, ready for serialization.
///
/// Once constructed the document is never mutated; serializers read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderDocument {
    markup: String,
    width: f64,
    height: f64,
    image_urls: BTreeSet<String>,
    css_fragments: Vec<String>,
}

impl RenderDocument {
    pub fn new(
        markup: String,
        width: f64,
        height: f64,
        image_urls: BTreeSet<String>,
        css_fragments: Vec<String>,
    ) -> Result<Self, DomainError> {
        if !width.is_finite() || !height.is_finite() {
            return Err(DomainError::invariant(format!(
                "document dimensions must be finite, got {width}x{height}"
            )));
        }
        if width < 0.0 || height < 0.0 {
            return Err(DomainError::invariant(format!(
                "document dimensions must not be negative, got {width}x{height}"
            )));
        }
        Ok(Self {
            markup,
            width,
            height,
            image_urls,
            css_fragments,
        })
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// External image references the raster path has to wait for.
    pub fn image_urls(&self) -> &BTreeSet<String> {
        &self.image_urls
    }

    pub fn has_images(&self) -> bool {
        !self.image_urls.is_empty()
    }

    pub fn css_fragments(&self) -> &[String] {
        &self.css_fragments
    }
}
