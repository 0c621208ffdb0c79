//! Data module: turns `dataOptions` into partial chart options.
//!
//! Supported sources are `csv` (inline text), `csvURL` (fetched), `columns`
//! and `rows`. The first column holds categories (or x values when numeric),
//! every further column becomes a series named after its header cell.

use serde_json::{Map, Value, json};

use crate::application::engine::EngineError;

pub async fn parse(data_options: &Value, client: &reqwest::Client) -> Result<Value, EngineError> {
    if let Some(csv) = data_options.get("csv").and_then(Value::as_str) {
        return from_csv(csv, delimiter(data_options));
    }

    if let Some(url) = data_options.get("csvURL").and_then(Value::as_str) {
        let text = fetch_text(client, url).await?;
        return from_csv(&text, delimiter(data_options));
    }

    if let Some(columns) = data_options.get("columns").and_then(Value::as_array) {
        let columns = columns
            .iter()
            .map(|column| column.as_array().cloned().unwrap_or_default())
            .collect();
        return from_columns(columns);
    }

    if let Some(rows) = data_options.get("rows").and_then(Value::as_array) {
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| row.as_array().cloned().unwrap_or_default())
            .collect();
        return from_columns(transpose(rows));
    }

    Err(EngineError::script(
        "dataOptions names no csv, csvURL, columns or rows source",
    ))
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, EngineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| EngineError::resource(url, err))?;
    if !response.status().is_success() {
        return Err(EngineError::resource(url, response.status()));
    }
    response
        .text()
        .await
        .map_err(|err| EngineError::resource(url, err))
}

fn delimiter(data_options: &Value) -> char {
    data_options
        .get("itemDelimiter")
        .and_then(Value::as_str)
        .and_then(|text| text.chars().next())
        .unwrap_or(',')
}

fn from_csv(text: &str, delimiter: char) -> Result<Value, EngineError> {
    let rows: Vec<Vec<Value>> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            split_record(line, delimiter)
                .iter()
                .map(String::as_str)
                .map(cell)
                .collect()
        })
        .collect();
    from_columns(transpose(rows))
}

/// Splits one CSV line; delimiters inside double quotes are literal and `""` is an escaped quote.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ch if ch == delimiter && !quoted => fields.push(std::mem::take(&mut field)),
            ch => field.push(ch),
        }
    }
    fields.push(field);
    fields
}

fn cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(trimmed.to_string()))
}

fn transpose(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|index| {
            rows.iter()
                .map(|row| row.get(index).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

fn from_columns(columns: Vec<Vec<Value>>) -> Result<Value, EngineError> {
    let mut columns = columns.into_iter();
    let Some(first) = columns.next() else {
        return Err(EngineError::script("data source is empty"));
    };
    let points: Vec<Value> = first.into_iter().skip(1).collect();
    if points.is_empty() {
        return Err(EngineError::script("data source has no data rows"));
    }
    let numeric_x = points.iter().all(Value::is_number);

    let series: Vec<Value> = columns
        .map(|column| {
            let mut column = column.into_iter();
            let name = column.next().unwrap_or(Value::Null);
            let data: Vec<Value> = points
                .iter()
                .zip(column)
                .map(|(x, y)| {
                    if numeric_x {
                        json!([x, y])
                    } else {
                        y
                    }
                })
                .collect();

            let mut entry = Map::new();
            match name {
                Value::String(name) => {
                    entry.insert("name".into(), Value::String(name));
                }
                Value::Number(number) => {
                    entry.insert("name".into(), Value::String(number.to_string()));
                }
                _ => {}
            }
            entry.insert("data".into(), Value::Array(data));
            Value::Object(entry)
        })
        .collect();

    if series.is_empty() {
        return Err(EngineError::script("data source has no value columns"));
    }

    let mut options = json!({ "series": series });
    if !numeric_x {
        let categories: Vec<Value> = points
            .into_iter()
            .map(|point| match point {
                Value::String(text) => Value::String(text),
                other => Value::String(other.to_string()),
            })
            .collect();
        options["xAxis"] = json!({ "categories": categories });
    }
    Ok(options)
}
