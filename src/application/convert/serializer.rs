use crate::{
    application::{engine::EnginePage, error::ConversionError},
    domain::{
        artifact::OutputArtifact, document::RenderDocument, geometry::GeometryPlan,
        request::OutputFormat,
    },
};

use super::markup::append_defs_styles;

/// Prolog every SVG artifact starts with, byte for byte.
pub const SVG_DOCTYPE: &str = "<?xml version=\"1.0\" standalone=\"no\"?><!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd\">";

pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

const SVG_CLOSE: &str = "</svg>";

#[derive(Debug, Default, Clone, Copy)]
pub struct Serializer;

impl Serializer {
    pub async fn serialize(
        &self,
        document: &RenderDocument,
        plan: &GeometryPlan,
        format: OutputFormat,
        page: &mut dyn EnginePage,
    ) -> Result<OutputArtifact, ConversionError> {
        let artifact = match format {
            OutputFormat::Svg => serialize_svg(document).map(|svg| OutputArtifact::text(format, svg)),
            OutputFormat::Png | OutputFormat::Jpeg | OutputFormat::Pdf => {
                page.set_viewport(plan.clip_width, plan.clip_height);
                page.render(document, format, plan)
                    .await
                    .map(|bytes| OutputArtifact::binary(format, bytes))
                    .map_err(ConversionError::from)
            }
        };

        artifact.map_err(|err| ConversionError::render_failure(format!("While rendering, {err}")))
    }
}

/// Standalone SVG text: namespace fix, captured stylesheets, DOCTYPE prolog.
pub fn serialize_svg(document: &RenderDocument) -> Result<String, ConversionError> {
    let fixed = fix_namespaces(document.markup())
        .ok_or_else(|| ConversionError::render_failure("the document has no <svg> root"))?;
    let styled = append_defs_styles(&fixed, document.css_fragments())?;

    let mut out = String::with_capacity(SVG_DOCTYPE.len() + styled.len());
    out.push_str(SVG_DOCTYPE);
    out.push_str(&styled);
    Ok(out)
}

/// Declare `xmlns:xlink` on the root once, qualify bare `href`s and drop anything after the first `</svg>`.
///
/// Starts the output at the root element. Returns `None` when there is no `<svg>` element.
pub fn fix_namespaces(markup: &str) -> Option<String> {
    let start = find_root(markup)?;
    let mut svg = markup[start..].to_string();

    let tag_end = svg.find('>').unwrap_or(svg.len());
    if !svg[..tag_end].contains("xmlns:xlink") {
        svg.insert_str(4, &format!(" xmlns:xlink=\"{XLINK_NAMESPACE}\""));
    }

    let mut svg = svg.replace(" href=", " xlink:href=");
    if let Some(close) = svg.find(SVG_CLOSE) {
        svg.truncate(close + SVG_CLOSE.len());
    }
    Some(svg)
}

fn find_root(markup: &str) -> Option<usize> {
    let lower = markup.to_ascii_lowercase();
    let mut offset = 0;
    while let Some(found) = lower[offset..].find("<svg") {
        let at = offset + found;
        match lower.as_bytes().get(at + 4) {
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/') | None => return Some(at),
            _ => offset = at + 4,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn document(markup: &str, css: Vec<String>) -> RenderDocument {
        RenderDocument::new(markup.to_string(), 10.0, 10.0, BTreeSet::new(), css)
            .expect("valid document")
    }

    #[test]
    fn declares_xlink_and_rewrites_href() {
        let fixed = fix_namespaces("<svg width=\"10\"><image href=\"a.png\"/></svg>").expect("root");
        assert_eq!(
            fixed,
            "<svg xmlns:xlink=\"http://www.w3.org/1999/xlink\" width=\"10\"><image xlink:href=\"a.png\"/></svg>"
        );
    }

    #[test]
    fn namespace_fix_is_idempotent() {
        let once = fix_namespaces("<svg xmlns=\"http://www.w3.org/2000/svg\"><image href=\"x\"/></svg>trailing")
            .expect("root");
        let twice = fix_namespaces(&once).expect("root");
        assert_eq!(once, twice);
        assert_eq!(once.matches("xmlns:xlink").count(), 1);
    }

    #[test]
    fn existing_xlink_declaration_is_kept() {
        let markup = "<svg xmlns:xlink=\"http://www.w3.org/1999/xlink\"><g/></svg>";
        assert_eq!(fix_namespaces(markup).expect("root"), markup);
    }

    #[test]
    fn trailing_content_is_dropped() {
        let fixed = fix_namespaces("<svg><g/></svg><div>tooltip</div>").expect("root");
        assert!(fixed.ends_with("</svg>"));
        assert!(!fixed.contains("tooltip"));
    }

    #[test]
    fn leading_prolog_is_replaced_by_doctype() {
        let svg = serialize_svg(&document(
            "<?xml version=\"1.0\"?>\n<svg width=\"10\" height=\"10\"></svg>",
            Vec::new(),
        ))
        .expect("svg");
        assert!(svg.starts_with(&format!("{SVG_DOCTYPE}<svg xmlns:xlink=")));
    }

    #[test]
    fn captured_styles_land_in_defs() {
        let svg = serialize_svg(&document(
            "<svg><defs></defs><g/></svg>",
            vec!["@import url(fonts.css); text { fill: red; }".to_string()],
        ))
        .expect("svg");
        assert!(svg.contains(
            "<defs><style xmlns=\"http://www.w3.org/1999/xhtml\">@import url(fonts.css); text { fill: red; }</style></defs>"
        ));
    }

    #[test]
    fn markup_without_root_is_a_render_failure() {
        let err = serialize_svg(&document("<svgx></svgx>", Vec::new())).expect_err("no root");
        assert!(matches!(err, ConversionError::RenderFailure(_)));
    }
}
