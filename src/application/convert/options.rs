//! Chart option merging.

use serde_json::{Map, Value};

pub const DEFAULT_CHART_WIDTH: f64 = 600.0;
pub const DEFAULT_CHART_HEIGHT: f64 = 400.0;

/// Deep-merge `overlay` onto `base`: objects merge key by key, everything else is replaced.
pub fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Merge parsed data options under the request options.
///
/// Each request series first absorbs the parsed series at the same index, then
/// the request options are merged over the parsed options.
pub fn merge_data(parsed: Value, mut options: Value) -> Value {
    let parsed_series = parsed.get("series").and_then(Value::as_array).cloned();
    if let Some(series) = options.get_mut("series").and_then(Value::as_array_mut) {
        for (index, entry) in series.iter_mut().enumerate() {
            let overlay = parsed_series
                .as_ref()
                .and_then(|parsed| parsed.get(index))
                .cloned();
            if let Some(overlay) = overlay {
                *entry = merge(entry.take(), overlay);
            }
        }
    }
    merge(parsed, options)
}

/// The fallback used when a data source cannot be parsed.
pub fn empty_series() -> Value {
    serde_json::json!({ "series": [{}] })
}

/// Fill `chart.width` and `chart.height`: export overrides first, then explicit chart values, then defaults.
pub fn apply_dimensions(options: &mut Value) -> (f64, f64) {
    if !options.is_object() {
        *options = Value::Object(Map::new());
    }
    let source_width = lookup(options, &["exporting", "sourceWidth"]);
    let source_height = lookup(options, &["exporting", "sourceHeight"]);
    let chart_width = lookup(options, &["chart", "width"]);
    let chart_height = lookup(options, &["chart", "height"]);

    let width = source_width.or(chart_width).unwrap_or(DEFAULT_CHART_WIDTH);
    let height = source_height
        .or(chart_height)
        .unwrap_or(DEFAULT_CHART_HEIGHT);

    if let Some(root) = options.as_object_mut() {
        let chart = root
            .entry("chart")
            .or_insert_with(|| Value::Object(Map::new()));
        if !chart.is_object() {
            *chart = Value::Object(Map::new());
        }
        if let Some(chart) = chart.as_object_mut() {
            chart.insert("width".to_string(), number(width));
            chart.insert("height".to_string(), number(height));
        }
    }
    (width, height)
}

/// Numeric option at `path`; zero, empty and non-numeric values count as unset.
fn lookup(options: &Value, path: &[&str]) -> Option<f64> {
    let mut current = options;
    for key in path {
        current = current.get(key)?;
    }
    let value = match current {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => super::markup::parse_length(text),
        _ => None,
    }?;
    (value.is_finite() && value > 0.0).then_some(value)
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn overlay_wins_and_objects_merge_recursively() {
        let theme = json!({"chart": {"backgroundColor": "#000", "type": "line"}, "colors": ["#111"]});
        let options = json!({"chart": {"type": "column"}, "colors": ["#222", "#333"]});

        assert_eq!(
            merge(theme, options),
            json!({"chart": {"backgroundColor": "#000", "type": "column"}, "colors": ["#222", "#333"]})
        );
    }

    #[test]
    fn dimensions_prefer_export_overrides() {
        let mut options = json!({"chart": {"width": 800}, "exporting": {"sourceWidth": 1000}});
        assert_eq!(apply_dimensions(&mut options), (1000.0, 400.0));
        assert_eq!(options["chart"]["width"], json!(1000));
        assert_eq!(options["chart"]["height"], json!(400));
    }

    #[test]
    fn dimensions_fall_back_to_defaults_for_falsy_values() {
        let mut options = json!({"chart": {"width": 0, "height": null}});
        assert_eq!(apply_dimensions(&mut options), (600.0, 400.0));
    }

    #[test]
    fn data_series_fill_request_series_by_index() {
        let parsed = json!({
            "xAxis": {"categories": ["a", "b"]},
            "series": [{"name": "csv", "data": [1, 2]}, {"name": "second", "data": [3, 4]}]
        });
        let options = json!({"series": [{"name": "mine", "type": "column"}], "title": {"text": "t"}});

        let merged = merge_data(parsed, options);
        assert_eq!(
            merged["series"],
            json!([{"name": "csv", "type": "column", "data": [1, 2]}])
        );
        assert_eq!(merged["xAxis"]["categories"], json!(["a", "b"]));
        assert_eq!(merged["title"]["text"], json!("t"));
    }

    #[test]
    fn parsed_series_survive_when_request_has_none() {
        let parsed = json!({"series": [{"data": [1]}, {"data": [2]}]});
        let merged = merge_data(parsed, json!({"chart": {"type": "line"}}));
        assert_eq!(merged["series"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn fallback_is_a_single_empty_series() {
        assert_eq!(empty_series(), json!({"series": [{}]}));
    }
}
