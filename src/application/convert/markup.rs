//! Streaming rewrites over chart markup.

use std::{cell::RefCell, collections::BTreeSet, rc::Rc};

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

use crate::application::error::ConversionError;

pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

fn rewrite_failure(err: impl std::fmt::Display) -> ConversionError {
    ConversionError::render_failure(format!("could not rewrite chart markup: {err}"))
}

/// Re-wrap the content of any foreignObject that has lost its `<body>` element.
pub fn repair_foreign_objects(markup: &str) -> Result<String, ConversionError> {
    #[derive(Default)]
    struct Scan {
        seen: usize,
        with_body: BTreeSet<usize>,
    }

    let scan = Rc::new(RefCell::new(Scan::default()));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("foreignObject", {
                    let scan = Rc::clone(&scan);
                    move |_| {
                        scan.borrow_mut().seen += 1;
                        Ok(())
                    }
                }),
                element!("foreignObject body", {
                    let scan = Rc::clone(&scan);
                    move |_| {
                        let mut scan = scan.borrow_mut();
                        if let Some(current) = scan.seen.checked_sub(1) {
                            scan.with_body.insert(current);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)?;

    let (seen, with_body) = {
        let scan = scan.borrow();
        (scan.seen, scan.with_body.clone())
    };
    if seen == with_body.len() {
        return Ok(markup.to_string());
    }

    let index = Rc::new(RefCell::new(0usize));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("foreignObject", {
                let index = Rc::clone(&index);
                move |el| {
                    let current = {
                        let mut index = index.borrow_mut();
                        let current = *index;
                        *index += 1;
                        current
                    };
                    if with_body.contains(&current) {
                        return Ok(());
                    }
                    let open = format!("<body xmlns=\"{XHTML_NAMESPACE}\">");
                    if el.is_self_closing() {
                        let tag = el.tag_name();
                        let attributes: String = el
                            .attributes()
                            .iter()
                            .map(|attr| format!(" {}=\"{}\"", attr.name(), attr.value()))
                            .collect();
                        el.replace(
                            &format!("<{tag}{attributes}>{open}</body></{tag}>"),
                            ContentType::Html,
                        );
                    } else {
                        el.prepend(&open, ContentType::Html);
                        el.append("</body>", ContentType::Html);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)
}

/// Move every `stroke-opacity` attribute into `opacity`.
pub fn lift_stroke_opacity(markup: &str) -> Result<String, ConversionError> {
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("[stroke-opacity]", |el| {
                if let Some(opacity) = el.get_attribute("stroke-opacity") {
                    el.remove_attribute("stroke-opacity");
                    el.set_attribute("opacity", &opacity)?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)
}

/// Every image reference in document order, deduplicated.
pub fn image_urls(markup: &str) -> Result<BTreeSet<String>, ConversionError> {
    let urls = Rc::new(RefCell::new(BTreeSet::new()));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("image", {
                let urls = Rc::clone(&urls);
                move |el| {
                    let href = el
                        .get_attribute("href")
                        .or_else(|| el.get_attribute("xlink:href"));
                    if let Some(href) = href.map(|href| href.trim().to_string())
                        && !href.is_empty()
                    {
                        urls.borrow_mut().insert(href);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)?;

    Ok(urls.take())
}

/// Width and height of the first `<svg>` element, falling back to its viewBox.
pub fn root_geometry(markup: &str) -> Result<Option<(f64, f64)>, ConversionError> {
    let geometry = Rc::new(RefCell::new(None));
    let seen = Rc::new(RefCell::new(false));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("svg", {
                let geometry = Rc::clone(&geometry);
                let seen = Rc::clone(&seen);
                move |el| {
                    if seen.replace(true) {
                        return Ok(());
                    }
                    let width = el.get_attribute("width").and_then(|w| parse_length(&w));
                    let height = el.get_attribute("height").and_then(|h| parse_length(&h));
                    let view_box = el.get_attribute("viewBox").and_then(|v| parse_view_box(&v));
                    let resolved = match (width, height, view_box) {
                        (Some(w), Some(h), _) => Some((w, h)),
                        (w, h, Some((vw, vh))) => Some((w.unwrap_or(vw), h.unwrap_or(vh))),
                        _ => None,
                    };
                    *geometry.borrow_mut() = resolved;
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)?;

    Ok(geometry.take())
}

/// Insert `<style>` elements at the start of the root `<svg>`.
pub fn inject_root_styles(markup: &str, css: &[String]) -> Result<String, ConversionError> {
    if css.is_empty() {
        return Ok(markup.to_string());
    }
    let block: String = css
        .iter()
        .map(|fragment| format!("<style type=\"text/css\">{}</style>", escape_text(fragment)))
        .collect();
    let done = Rc::new(RefCell::new(false));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("svg", {
                let done = Rc::clone(&done);
                move |el| {
                    if !done.replace(true) && !el.is_self_closing() {
                        el.prepend(&block, ContentType::Html);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)
}

/// Append each stylesheet as an XHTML `<style>` inside the first `<defs>`, creating one if absent.
pub fn append_defs_styles(markup: &str, css: &[String]) -> Result<String, ConversionError> {
    if css.is_empty() {
        return Ok(markup.to_string());
    }
    let styles: String = css
        .iter()
        .map(|fragment| {
            format!(
                "<style xmlns=\"{XHTML_NAMESPACE}\">{}</style>",
                escape_text(fragment)
            )
        })
        .collect();

    let has_defs = Rc::new(RefCell::new(false));
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("defs", {
                let has_defs = Rc::clone(&has_defs);
                move |_| {
                    *has_defs.borrow_mut() = true;
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)?;
    let has_defs = *has_defs.borrow();

    let done = Rc::new(RefCell::new(false));
    let selector = if has_defs { "defs" } else { "svg" };
    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, {
                let done = Rc::clone(&done);
                move |el| {
                    if done.replace(true) {
                        return Ok(());
                    }
                    match (has_defs, el.is_self_closing()) {
                        (true, true) => el.replace(&format!("<defs>{styles}</defs>"), ContentType::Html),
                        (true, false) => el.append(&styles, ContentType::Html),
                        (false, _) => {
                            el.prepend(&format!("<defs>{styles}</defs>"), ContentType::Html)
                        }
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(rewrite_failure)
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Parse `600`, `600px` or `600.5` into pixels.
pub fn parse_length(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let numeric = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
    numeric.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_view_box(value: &str) -> Option<(f64, f64)> {
    let parts: Vec<f64> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [_, _, width, height] => Some((*width, *height)),
        _ => None,
    }
}
