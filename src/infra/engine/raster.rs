//! Rasterizer: snapshot markup to PNG, JPEG or PDF bytes through resvg.

use std::{collections::HashMap, io::Cursor, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use lol_html::{RewriteStrSettings, element, rewrite_str};
use resvg::tiny_skia::{Pixmap, Transform};
use usvg::fontdb;

use crate::{
    application::{
        convert::{fix_namespaces, inject_root_styles},
        engine::EngineError,
    },
    domain::{geometry::GeometryPlan, request::OutputFormat},
};

use super::pdf;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const JPEG_QUALITY: u8 = 90;

/// Everything a render needs, owned so it can move onto a blocking thread.
pub struct RasterJob {
    pub markup: String,
    pub page_css: Vec<String>,
    pub bodies: HashMap<String, Arc<Vec<u8>>>,
    pub plan: GeometryPlan,
    pub format: OutputFormat,
}

impl RasterJob {
    pub fn run(self, fontdb: Arc<fontdb::Database>) -> Result<Vec<u8>, EngineError> {
        let svg = prepare(&self.markup, &self.page_css, &self.bodies)?;
        let pixmap = rasterize(&svg, fontdb, &self.plan)?;

        match self.format {
            OutputFormat::Png => encode_png(&pixmap),
            OutputFormat::Jpeg => encode_jpeg(&pixmap),
            OutputFormat::Pdf => {
                let paper = self.plan.paper.ok_or_else(|| {
                    EngineError::render("paginated output requires a paper size")
                })?;
                pdf::package(&flatten_on_white(&pixmap), paper)
            }
            OutputFormat::Svg => Err(EngineError::render(
                "vector output is serialized without the rasterizer",
            )),
        }
    }
}

/// Standalone SVG the rasterizer can parse: namespaces, page styles and fetched images inlined.
pub fn prepare(
    markup: &str,
    page_css: &[String],
    bodies: &HashMap<String, Arc<Vec<u8>>>,
) -> Result<String, EngineError> {
    let fixed = fix_namespaces(markup)
        .ok_or_else(|| EngineError::render("the document has no <svg> root"))?;
    let styled = inject_root_styles(&fixed, page_css)
        .map_err(|err| EngineError::render(err.to_string()))?;

    rewrite_str(
        &styled,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("svg", |el| {
                    if !el.has_attribute("xmlns") {
                        el.set_attribute("xmlns", SVG_NAMESPACE)?;
                    }
                    Ok(())
                }),
                element!("image", |el| {
                    for name in ["xlink:href", "href"] {
                        let Some(url) = el.get_attribute(name) else {
                            continue;
                        };
                        if let Some(body) = bodies.get(&url) {
                            el.set_attribute(name, &data_url(body))?;
                        }
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| EngineError::render(format!("could not prepare the document: {err}")))
}

fn data_url(body: &[u8]) -> String {
    let mime = match image::guess_format(body) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        _ if body.trim_ascii_start().starts_with(b"<") => "image/svg+xml",
        _ => "application/octet-stream",
    };
    format!("data:{mime};base64,{}", STANDARD.encode(body))
}

/// Render `svg` scaled by the zoom factor into a pixmap of the clip size.
pub fn rasterize(
    svg: &str,
    fontdb: Arc<fontdb::Database>,
    plan: &GeometryPlan,
) -> Result<Pixmap, EngineError> {
    let options = usvg::Options {
        fontdb,
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(svg.as_bytes(), &options)
        .map_err(|err| EngineError::render(format!("could not parse the chart markup: {err}")))?;

    let (width, height) = plan.pixel_size();
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| EngineError::render(format!("failed to allocate a {width}x{height} pixmap")))?;

    let zoom = plan.zoom_factor as f32;
    resvg::render(&tree, Transform::from_scale(zoom, zoom), &mut pixmap.as_mut());
    Ok(pixmap)
}

fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, EngineError> {
    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    let image = RgbaImage::from_raw(pixmap.width(), pixmap.height(), rgba)
        .ok_or_else(|| EngineError::render("pixel buffer does not match the pixmap size"))?;
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

fn encode_jpeg(pixmap: &Pixmap) -> Result<Vec<u8>, EngineError> {
    let image = flatten_on_white(pixmap);
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&image)
        .map_err(|err| EngineError::render(format!("could not encode jpeg: {err}")))?;
    Ok(buf)
}

/// Composite premultiplied pixels over an opaque white background.
pub fn flatten_on_white(pixmap: &Pixmap) -> RgbImage {
    let mut rgb = Vec::with_capacity(pixmap.pixels().len() * 3);
    for pixel in pixmap.pixels() {
        let cover = 255 - pixel.alpha();
        rgb.extend_from_slice(&[
            pixel.red().saturating_add(cover),
            pixel.green().saturating_add(cover),
            pixel.blue().saturating_add(cover),
        ]);
    }
    RgbImage::from_raw(pixmap.width(), pixmap.height(), rgb)
        .unwrap_or_else(|| RgbImage::new(pixmap.width(), pixmap.height()))
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, EngineError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|err| EngineError::render(format!("could not encode {format:?}: {err}")))?;
    Ok(buf)
}
