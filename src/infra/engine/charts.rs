//! Basic chart library behind the `Chart` constructor.
//!
//! Draws cartesian `line`, `spline`, `area`, `column` and `bar` series with
//! title, subtitle, axes, legend and an optional plot background image. There
//! is no animation: the markup is final as soon as [`render`] returns.

use std::fmt::Write as _;

use serde_json::Value;

use crate::application::convert::escape_text;

pub const CONSTRUCTOR: &str = "Chart";

const PALETTE: [&str; 10] = [
    "#2caffe", "#544fc5", "#00e272", "#fe6a35", "#6b8abc", "#d568fb", "#2ee0ca", "#fa4b42",
    "#feb56a", "#91e8e1",
];
const FONT_FAMILY: &str = "Helvetica, Arial, sans-serif";
const DEFAULT_WIDTH: f64 = 600.0;
const DEFAULT_HEIGHT: f64 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesKind {
    Line,
    Spline,
    Area,
    Column,
}

impl SeriesKind {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "line" => Ok(Self::Line),
            "spline" => Ok(Self::Spline),
            "area" => Ok(Self::Area),
            "column" | "bar" => Ok(Self::Column),
            other => Err(format!("Error: unsupported series type `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
struct Series {
    name: String,
    kind: SeriesKind,
    color: String,
    markers: bool,
    points: Vec<Option<(f64, f64)>>,
}

/// Draw `options` into a standalone SVG document.
pub fn render(options: &Value) -> Result<String, String> {
    let chart = options.get("chart").cloned().unwrap_or(Value::Null);
    let width = positive(chart.get("width")).unwrap_or(DEFAULT_WIDTH);
    let height = positive(chart.get("height")).unwrap_or(DEFAULT_HEIGHT);
    let chart_type = text(chart.get("type")).unwrap_or("line");
    let inverted = chart_type == "bar" || chart.get("inverted") == Some(&Value::Bool(true));

    let categories: Vec<String> = options
        .pointer("/xAxis/categories")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(label_of).collect())
        .unwrap_or_default();
    let series = read_series(options, chart_type)?;

    let title_disabled = options.pointer("/title").is_some_and(Value::is_null);
    let title = match text(options.pointer("/title/text")) {
        Some(title) => Some(title.to_string()),
        None if title_disabled => None,
        None => Some("Chart title".to_string()),
    }
    .filter(|title| !title.is_empty());
    let subtitle = text(options.pointer("/subtitle/text")).filter(|text| !text.is_empty());
    let legend =
        options.pointer("/legend/enabled") != Some(&Value::Bool(false)) && !series.is_empty();

    let mut top = 15.0;
    if title.is_some() {
        top += 30.0;
    }
    if subtitle.is_some() {
        top += 18.0;
    }
    let bottom = 40.0 + if legend { 30.0 } else { 0.0 };
    let axis_title = text(options.pointer("/yAxis/title/text")).unwrap_or("Values");
    let left = 60.0 + if axis_title.is_empty() { 0.0 } else { 20.0 };
    let right = 20.0;

    let plot = Plot {
        left,
        top,
        width: (width - left - right).max(1.0),
        height: (height - top - bottom).max(1.0),
        inverted,
        x: XScale::from_series(&series, categories.len()),
        y: ValueScale::from_series(
            &series,
            number(options.pointer("/yAxis/min")),
            number(options.pointer("/yAxis/max")),
        ),
    };

    let mut svg = String::new();
    let _ = write!(
        svg,
        "<svg version=\"1.1\" class=\"chart-root\" xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\" style=\"font-family:{FONT_FAMILY};font-size:12px;\">",
        px(width),
        px(height),
        px(width),
        px(height)
    );
    svg.push_str("<desc>Created with chartexport</desc><defs></defs>");

    let background = text(chart.get("backgroundColor")).unwrap_or("#ffffff");
    let _ = write!(
        svg,
        "<rect class=\"chart-background\" x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"{}\"/>",
        px(width),
        px(height),
        attr(background)
    );
    if let Some(color) = text(chart.get("plotBackgroundColor")) {
        let _ = write!(
            svg,
            "<rect class=\"chart-plot-background\" x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\"/>",
            px(plot.left),
            px(plot.top),
            px(plot.width),
            px(plot.height),
            attr(color)
        );
    }
    if let Some(image) = text(chart.get("plotBackgroundImage")) {
        let _ = write!(
            svg,
            "<image preserveAspectRatio=\"none\" x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" href=\"{}\"/>",
            px(plot.left),
            px(plot.top),
            px(plot.width),
            px(plot.height),
            attr(image)
        );
    }

    draw_axes(&mut svg, &plot, &categories, axis_title);
    draw_series(&mut svg, &plot, &series);

    if let Some(title) = title.as_deref() {
        let _ = write!(
            svg,
            "<text class=\"chart-title\" x=\"{}\" y=\"30\" text-anchor=\"middle\" style=\"font-size:18px;fill:#333333;\">{}</text>",
            px(width / 2.0),
            escape_text(title)
        );
    }
    if let Some(subtitle) = subtitle {
        let y = if title.is_some() { 50.0 } else { 30.0 };
        let _ = write!(
            svg,
            "<text class=\"chart-subtitle\" x=\"{}\" y=\"{}\" text-anchor=\"middle\" style=\"fill:#666666;\">{}</text>",
            px(width / 2.0),
            px(y),
            escape_text(subtitle)
        );
    }
    if legend {
        draw_legend(&mut svg, &series, width, height);
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn read_series(options: &Value, chart_type: &str) -> Result<Vec<Series>, String> {
    let palette: Vec<String> = options
        .get("colors")
        .and_then(Value::as_array)
        .map(|colors| {
            colors
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .filter(|colors: &Vec<String>| !colors.is_empty())
        .unwrap_or_else(|| PALETTE.iter().map(|color| color.to_string()).collect());

    let Some(entries) = options.get("series").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let kind = SeriesKind::parse(text(entry.get("type")).unwrap_or(chart_type))?;
            let points = entry
                .get("data")
                .and_then(Value::as_array)
                .map(|data| {
                    data.iter()
                        .enumerate()
                        .map(|(position, point)| read_point(position, point))
                        .collect()
                })
                .unwrap_or_default();

            Ok(Series {
                name: text(entry.get("name"))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Series {}", index + 1)),
                kind,
                color: text(entry.get("color"))
                    .map(str::to_string)
                    .unwrap_or_else(|| palette[index % palette.len()].clone()),
                markers: entry.pointer("/marker/enabled") != Some(&Value::Bool(false)),
                points,
            })
        })
        .collect()
}

fn read_point(position: usize, point: &Value) -> Option<(f64, f64)> {
    match point {
        Value::Number(y) => y.as_f64().map(|y| (position as f64, y)),
        Value::Array(pair) if pair.len() >= 2 => Some((pair[0].as_f64()?, pair[1].as_f64()?)),
        Value::Object(_) => {
            let y = point.get("y").and_then(Value::as_f64)?;
            let x = point
                .get("x")
                .and_then(Value::as_f64)
                .unwrap_or(position as f64);
            Some((x, y))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum XScale {
    Category { count: usize },
    Linear { min: f64, max: f64 },
}

impl XScale {
    fn from_series(series: &[Series], categories: usize) -> Self {
        let longest = series.iter().map(|s| s.points.len()).max().unwrap_or(0);
        let xs = series
            .iter()
            .flat_map(|s| s.points.iter().flatten().map(|(x, _)| *x));
        let integral = series
            .iter()
            .flat_map(|s| s.points.iter().enumerate())
            .all(|(position, point)| point.is_none_or(|(x, _)| x == position as f64));

        if categories > 0 || integral {
            return XScale::Category {
                count: categories.max(longest).max(1),
            };
        }

        let (min, max) = xs.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        });
        if min.is_finite() && max > min {
            XScale::Linear { min, max }
        } else {
            XScale::Category { count: 1 }
        }
    }

    fn fraction(&self, x: f64) -> f64 {
        match *self {
            XScale::Category { count } => (x + 0.5) / count as f64,
            XScale::Linear { min, max } => (x - min) / (max - min),
        }
    }

    fn band(&self) -> f64 {
        match *self {
            XScale::Category { count } => 1.0 / count as f64,
            XScale::Linear { .. } => 0.05,
        }
    }
}

#[derive(Debug, Clone)]
struct ValueScale {
    min: f64,
    max: f64,
    ticks: Vec<f64>,
}

impl ValueScale {
    fn from_series(series: &[Series], min: Option<f64>, max: Option<f64>) -> Self {
        let values = series
            .iter()
            .flat_map(|s| s.points.iter().flatten().map(|(_, y)| *y));
        let (mut lo, mut hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(y), hi.max(y))
        });
        if !lo.is_finite() {
            (lo, hi) = (0.0, 1.0);
        }
        if series
            .iter()
            .any(|s| matches!(s.kind, SeriesKind::Column | SeriesKind::Area))
        {
            lo = lo.min(0.0);
            hi = hi.max(0.0);
        }
        if hi <= lo {
            hi = lo + 1.0;
        }

        let step = nice_step((hi - lo) / 5.0);
        let mut lo = min.unwrap_or((lo / step).floor() * step);
        let mut hi = max.unwrap_or((hi / step).ceil() * step);
        if hi <= lo {
            (lo, hi) = (lo.min(hi), lo.max(hi) + step);
        }

        let mut ticks = Vec::new();
        let mut tick = (lo / step).ceil() * step;
        while tick <= hi + step * 1e-9 && ticks.len() < 50 {
            ticks.push(tick);
            tick += step;
        }
        Self {
            min: lo,
            max: hi,
            ticks,
        }
    }

    fn fraction(&self, y: f64) -> f64 {
        (y - self.min) / (self.max - self.min)
    }

    fn baseline(&self) -> f64 {
        0.0_f64.clamp(self.min, self.max)
    }
}

fn nice_step(raw: f64) -> f64 {
    if raw <= 0.0 || !raw.is_finite() {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    let normalized = raw / magnitude;
    let nice = [1.0, 2.0, 2.5, 5.0, 10.0]
        .into_iter()
        .find(|candidate| normalized <= *candidate)
        .unwrap_or(10.0);
    nice * magnitude
}

struct Plot {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    inverted: bool,
    x: XScale,
    y: ValueScale,
}

impl Plot {
    /// Pixel position of a category-axis fraction and a value.
    fn place(&self, along: f64, value: f64) -> (f64, f64) {
        let across = self.y.fraction(value);
        if self.inverted {
            (self.left + across * self.width, self.top + along * self.height)
        } else {
            (
                self.left + along * self.width,
                self.top + self.height - across * self.height,
            )
        }
    }

    fn point(&self, (x, y): (f64, f64)) -> (f64, f64) {
        self.place(self.x.fraction(x), y)
    }

    fn right(&self) -> f64 {
        self.left + self.width
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

fn draw_axes(svg: &mut String, plot: &Plot, categories: &[String], axis_title: &str) {
    svg.push_str("<g class=\"chart-grid\">");
    for tick in &plot.y.ticks {
        let (x1, y1) = plot.place(0.0, *tick);
        let (x2, y2) = plot.place(1.0, *tick);
        let _ = write!(
            svg,
            "<path d=\"M {} {} L {} {}\" stroke=\"#e6e6e6\" stroke-width=\"1\" fill=\"none\"/>",
            px(x1),
            px(y1),
            px(x2),
            px(y2)
        );
    }
    svg.push_str("</g><g class=\"chart-axis-labels\">");

    for tick in &plot.y.ticks {
        let (x, y) = plot.place(0.0, *tick);
        let (x, y, anchor) = if plot.inverted {
            (x, plot.bottom() + 16.0, "middle")
        } else {
            (plot.left - 8.0, y + 4.0, "end")
        };
        let _ = write!(
            svg,
            "<text x=\"{}\" y=\"{}\" text-anchor=\"{anchor}\" style=\"fill:#666666;font-size:11px;\">{}</text>",
            px(x),
            px(y),
            label_number(*tick)
        );
    }

    if let XScale::Category { count } = plot.x {
        for index in 0..count {
            let label = categories
                .get(index)
                .cloned()
                .unwrap_or_else(|| index.to_string());
            let along = (index as f64 + 0.5) / count as f64;
            let (x, y, anchor) = if plot.inverted {
                (plot.left - 8.0, plot.top + along * plot.height + 4.0, "end")
            } else {
                (plot.left + along * plot.width, plot.bottom() + 16.0, "middle")
            };
            let _ = write!(
                svg,
                "<text x=\"{}\" y=\"{}\" text-anchor=\"{anchor}\" style=\"fill:#666666;font-size:11px;\">{}</text>",
                px(x),
                px(y),
                escape_text(&label)
            );
        }
    }
    svg.push_str("</g>");

    let (line_start, line_end) = if plot.inverted {
        ((plot.left, plot.top), (plot.left, plot.bottom()))
    } else {
        ((plot.left, plot.bottom()), (plot.right(), plot.bottom()))
    };
    let _ = write!(
        svg,
        "<path class=\"chart-axis-line\" d=\"M {} {} L {} {}\" stroke=\"#333333\" stroke-width=\"1\"/>",
        px(line_start.0),
        px(line_start.1),
        px(line_end.0),
        px(line_end.1)
    );

    if !axis_title.is_empty() {
        let (x, y, rotate) = if plot.inverted {
            (plot.left + plot.width / 2.0, plot.bottom() + 32.0, String::new())
        } else {
            let x = plot.left - 52.0;
            let y = plot.top + plot.height / 2.0;
            (x, y, format!(" transform=\"rotate(270 {} {})\"", px(x), px(y)))
        };
        let _ = write!(
            svg,
            "<text class=\"chart-axis-title\" x=\"{}\" y=\"{}\" text-anchor=\"middle\"{rotate} style=\"fill:#666666;\">{}</text>",
            px(x),
            px(y),
            escape_text(axis_title)
        );
    }
}

fn draw_series(svg: &mut String, plot: &Plot, series: &[Series]) {
    let columns: Vec<&Series> = series
        .iter()
        .filter(|s| s.kind == SeriesKind::Column)
        .collect();
    let band = plot.x.band();
    let slot = band * 0.8 / columns.len().max(1) as f64;

    for (index, current) in series.iter().enumerate() {
        let _ = write!(
            svg,
            "<g class=\"chart-series chart-series-{index}\" data-name=\"{}\">",
            attr(&current.name)
        );
        match current.kind {
            SeriesKind::Column => {
                let column = columns
                    .iter()
                    .position(|s| std::ptr::eq(*s, current))
                    .unwrap_or(0);
                for (x, y) in current.points.iter().flatten() {
                    let start = plot.x.fraction(*x) - band * 0.4 + slot * column as f64;
                    let (x1, y1) = plot.place(start, plot.y.baseline());
                    let (x2, y2) = plot.place(start + slot, *y);
                    let _ = write!(
                        svg,
                        "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\"/>",
                        px(x1.min(x2)),
                        px(y1.min(y2)),
                        px((x2 - x1).abs()),
                        px((y2 - y1).abs()),
                        attr(&current.color)
                    );
                }
            }
            SeriesKind::Line | SeriesKind::Spline | SeriesKind::Area => {
                let segments = segments(plot, &current.points);
                let smooth = current.kind == SeriesKind::Spline;
                let path: String = segments
                    .iter()
                    .map(|segment| path_data(segment, smooth))
                    .collect::<Vec<_>>()
                    .join(" ");

                if current.kind == SeriesKind::Area {
                    for segment in &segments {
                        if let (Some(first), Some(last)) = (segment.first(), segment.last()) {
                            let base_last = baseline_point(plot, *last);
                            let base_first = baseline_point(plot, *first);
                            let _ = write!(
                                svg,
                                "<path d=\"{} L {} {} L {} {} Z\" fill=\"{}\" fill-opacity=\"0.75\" stroke=\"none\"/>",
                                path_data(segment, false),
                                px(base_last.0),
                                px(base_last.1),
                                px(base_first.0),
                                px(base_first.1),
                                attr(&current.color)
                            );
                        }
                    }
                }

                if !path.is_empty() {
                    let _ = write!(
                        svg,
                        "<path d=\"{path}\" fill=\"none\" stroke=\"{}\" stroke-width=\"2\" stroke-linejoin=\"round\" stroke-linecap=\"round\"/>",
                        attr(&current.color)
                    );
                    let _ = write!(
                        svg,
                        "<path class=\"chart-tracker\" d=\"{path}\" fill=\"none\" stroke=\"rgb(192,192,192)\" stroke-opacity=\"0.0001\" stroke-width=\"22\"/>"
                    );
                }

                if current.markers {
                    for (x, y) in segments.iter().flatten() {
                        let _ = write!(
                            svg,
                            "<circle cx=\"{}\" cy=\"{}\" r=\"4\" fill=\"{}\"/>",
                            px(*x),
                            px(*y),
                            attr(&current.color)
                        );
                    }
                }
            }
        }
        svg.push_str("</g>");
    }
}

/// Pixel coordinates of each unbroken run of points.
fn segments(plot: &Plot, points: &[Option<(f64, f64)>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for point in points {
        match point {
            Some(point) => current.push(plot.point(*point)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn baseline_point(plot: &Plot, (x, y): (f64, f64)) -> (f64, f64) {
    let base = plot.place(0.0, plot.y.baseline());
    if plot.inverted { (base.0, y) } else { (x, base.1) }
}

fn path_data(points: &[(f64, f64)], smooth: bool) -> String {
    let Some((first, rest)) = points.split_first() else {
        return String::new();
    };
    let mut d = format!("M {} {}", px(first.0), px(first.1));
    if !smooth || points.len() < 3 {
        for (x, y) in rest {
            let _ = write!(d, " L {} {}", px(*x), px(*y));
        }
        return d;
    }

    // Catmull-Rom through every point, expressed as cubic Béziers.
    for index in 0..points.len() - 1 {
        let p0 = points[index.saturating_sub(1)];
        let p1 = points[index];
        let p2 = points[index + 1];
        let p3 = points[(index + 2).min(points.len() - 1)];
        let c1 = (p1.0 + (p2.0 - p0.0) / 6.0, p1.1 + (p2.1 - p0.1) / 6.0);
        let c2 = (p2.0 - (p3.0 - p1.0) / 6.0, p2.1 - (p3.1 - p1.1) / 6.0);
        let _ = write!(
            d,
            " C {} {} {} {} {} {}",
            px(c1.0),
            px(c1.1),
            px(c2.0),
            px(c2.1),
            px(p2.0),
            px(p2.1)
        );
    }
    d
}

fn draw_legend(svg: &mut String, series: &[Series], width: f64, height: f64) {
    let widths: Vec<f64> = series
        .iter()
        .map(|s| 24.0 + s.name.chars().count() as f64 * 7.0)
        .collect();
    let total: f64 = widths.iter().sum();
    let mut x = ((width - total) / 2.0).max(8.0);
    let y = height - 16.0;

    svg.push_str("<g class=\"chart-legend\">");
    for (entry, item_width) in series.iter().zip(widths) {
        let _ = write!(
            svg,
            "<rect x=\"{}\" y=\"{}\" width=\"10\" height=\"10\" fill=\"{}\"/><text x=\"{}\" y=\"{}\" style=\"fill:#333333;font-weight:bold;\">{}</text>",
            px(x),
            px(y - 9.0),
            attr(&entry.color),
            px(x + 14.0),
            px(y),
            escape_text(&entry.name)
        );
        x += item_width;
    }
    svg.push_str("</g>");
}

fn text(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn positive(value: Option<&Value>) -> Option<f64> {
    number(value).filter(|n| *n > 0.0)
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn label_number(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        let text = format!("{value:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn px(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

fn attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
