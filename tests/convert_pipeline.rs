mod common;

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use chartexport::{
    application::{
        convert::{CompletionGate, SVG_DOCTYPE},
        error::ConversionError,
    },
    domain::{
        artifact::Delivery,
        request::{BindingName, ConversionRequest, RequestParams},
    },
};
use tempfile::TempDir;

use common::{RASTER_BYTES, Script, ScriptedEngine, settings};

const OPTIONS: &str = r#"{"title": {"text": "Sales"}, "series": [{"data": [1, 3, 2]}]}"#;

fn request(params: RequestParams) -> ConversionRequest {
    ConversionRequest::from_params(params).expect("valid request")
}

fn dirs() -> (TempDir, TempDir) {
    (
        tempfile::tempdir().expect("tmp dir"),
        tempfile::tempdir().expect("library dir"),
    )
}

#[tokio::test]
async fn options_and_custom_code_bind_exactly_two_payloads() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            customcode: Some("options.chart = { type: 'bar' };".into()),
            output_type: Some("svg".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert_eq!(engine.bound(), vec!["bind:options", "bind:customCode"]);
    assert!(engine.calls().contains(&"custom_code".to_string()));

    let Delivery::Inline(svg) = delivery else {
        panic!("svg without outfile is returned inline");
    };
    assert!(svg.starts_with(&format!("{SVG_DOCTYPE}<svg")));
    assert!(svg.contains("xmlns:xlink=\"http://www.w3.org/1999/xlink\""));
    assert!(svg.contains("opacity=\"0.5\""));
    assert_eq!(engine.calls().last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn options_that_never_bind_fail_with_a_parse_error() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        unbindable: [BindingName::Options].into(),
        ..Script::default()
    });
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let error = service
        .convert(request(RequestParams {
            options: Some("{ series: [".into()),
            ..Default::default()
        }))
        .await
        .expect_err("options withheld");

    assert!(matches!(error, ConversionError::Parse(_)));
    assert!(error.to_string().contains("{ series: ["));
    assert!(!engine.calls().iter().any(|call| call.starts_with("instantiate")));
    assert_eq!(engine.calls().last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn callback_that_never_binds_fails_with_a_parse_error() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        unbindable: [BindingName::Callback].into(),
        ..Script::default()
    });
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let error = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            callback: Some("function (chart) {".into()),
            ..Default::default()
        }))
        .await
        .expect_err("callback withheld");

    match error {
        ConversionError::Parse(message) => assert!(message.contains("callback")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn resource_files_fall_back_to_the_library_path() {
    let (tmp, library) = dirs();
    let script = library.path().join("chartexport-theme-fallback.js");
    tokio::fs::write(&script, "var theme = {};")
        .await
        .expect("write theme");

    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            output_type: Some("svg".into()),
            resources: Some(
                r#"{"files": "chartexport-theme-fallback.js", "css": "text { fill: red }"}"#
                    .into(),
            ),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    let calls = engine.calls();
    let file_call = format!("script_file:{}", script.display());
    let file_at = calls.iter().position(|call| *call == file_call);
    let style_at = calls
        .iter()
        .position(|call| call == "style:text { fill: red }");
    assert!(file_at.is_some(), "calls: {calls:?}");
    assert!(file_at < style_at, "files are injected before inline css");

    let svg = delivery.into_response_text();
    assert!(svg.contains("text { fill: red }"));
}

#[tokio::test]
async fn library_resources_file_is_overlaid_by_the_request() {
    let (tmp, library) = dirs();
    tokio::fs::write(
        library.path().join("resources.json"),
        r#"{"js": "var fromLibrary = 1;", "css": "g { stroke: blue }"}"#,
    )
    .await
    .expect("write resources");

    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            output_type: Some("svg".into()),
            resources: Some(r#"{"css": "g { stroke: red }"}"#.into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    let calls = engine.calls();
    assert!(calls.contains(&"script_inline:var fromLibrary = 1;".to_string()));
    assert!(calls.contains(&"style:g { stroke: red }".to_string()));
    assert!(!calls.contains(&"style:g { stroke: blue }".to_string()));
}

#[tokio::test]
async fn stalled_images_time_out_and_close_the_page() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        chart_markup: r#"<svg xmlns="http://www.w3.org/2000/svg" width="600" height="400"><image href="http://img.example/bg.png" width="600" height="400"/></svg>"#.into(),
        stall_images: true,
        ..Script::default()
    });
    let mut settings = settings(tmp.path().into(), library.path().into());
    settings.gate = CompletionGate::new(Duration::from_millis(10), Duration::from_millis(100));
    let service = engine.service(settings);

    let error = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            output_type: Some("png".into()),
            ..Default::default()
        }))
        .await
        .expect_err("gate deadline");

    match &error {
        ConversionError::ResourceTimeout { pending } => assert_eq!(
            pending,
            &BTreeSet::from(["http://img.example/bg.png".to_string()])
        ),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        error
            .artifact_message()
            .starts_with("ERROR: Timeout reached while downloading external resources.")
    );
    let calls = engine.calls();
    assert!(!calls.iter().any(|call| call.starts_with("render:")));
    assert_eq!(calls.last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn loaded_images_pass_the_gate() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        chart_markup: r#"<svg xmlns="http://www.w3.org/2000/svg" width="600" height="400"><image href="http://img.example/bg.png" width="600" height="400"/></svg>"#.into(),
        ..Script::default()
    });
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            outfile: Some("with-image.png".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert_eq!(delivery, Delivery::File(tmp.path().join("with-image.png")));
}

#[tokio::test]
async fn raster_output_is_written_under_the_tmp_dir() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            outfile: Some("wide.png".into()),
            width: Some("1200".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    let path = tmp.path().join("wide.png");
    assert_eq!(delivery, Delivery::File(path.clone()));
    assert_eq!(tokio::fs::read(&path).await.expect("output"), RASTER_BYTES);
    assert!(engine.calls().contains(&"render:png:1200x800".to_string()));
}

#[tokio::test]
async fn command_mode_writes_raster_without_outfile_to_a_default_name() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            output_type: Some("jpeg".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert_eq!(delivery, Delivery::File(tmp.path().join("chart.jpeg")));
}

#[tokio::test]
async fn svg_markup_input_skips_bindings() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let delivery = service
        .convert(request(RequestParams {
            infile: Some(
                r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100"><a href="#x"><rect width="10" height="10"/></a></svg><!-- trailing -->"##
                    .into(),
            ),
            output_type: Some("svg".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert!(engine.bound().is_empty());
    let svg = delivery.into_response_text();
    assert!(svg.starts_with(SVG_DOCTYPE));
    assert!(svg.contains("xlink:href=\"#x\""));
    assert!(svg.ends_with("</svg>"));
}

#[tokio::test]
async fn unknown_constructor_surfaces_the_script_trace() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    let error = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            constr: Some("StockChart".into()),
            output_type: Some("svg".into()),
            ..Default::default()
        }))
        .await
        .expect_err("script error");

    match error {
        ConversionError::RenderFailure(message) => {
            assert!(message.contains("'StockChart' is not a constructor"));
            assert!(message.contains("TRACE:\n -> chart.js: 7 (in function \"create\")"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_data_options_fall_back_to_an_empty_series() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        data_fails: true,
        ..Script::default()
    });
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    service
        .convert(request(RequestParams {
            options: Some(r#"{"title": {"text": "No data"}}"#.into()),
            dataoptions: Some(r#"{"csv": "broken"}"#.into()),
            output_type: Some("svg".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    let calls = engine.calls();
    let instantiate = calls
        .iter()
        .find(|call| call.starts_with("instantiate:Chart:"))
        .expect("chart instantiated");
    assert!(instantiate.contains(r#""series":[{}]"#), "{instantiate}");
    assert!(instantiate.contains(r#""text":"No data""#));
}

#[tokio::test]
async fn resource_files_found_nowhere_are_skipped() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let service = engine.service(settings(tmp.path().into(), library.path().into()));

    service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            output_type: Some("svg".into()),
            resources: Some(
                r#"{"files": "chartexport-absent-theme.js,chartexport-absent.css"}"#.into(),
            ),
            ..Default::default()
        }))
        .await
        .expect("missing resource files are not fatal");

    let calls = engine.calls();
    assert!(
        !calls
            .iter()
            .any(|call| call.starts_with("script_file:") || call.starts_with("style:")),
        "calls: {calls:?}"
    );
    assert!(calls.iter().any(|call| call.starts_with("instantiate:Chart:")));
}

#[tokio::test]
async fn raster_without_images_never_waits_on_the_gate() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::default();
    let mut settings = settings(tmp.path().into(), library.path().into());
    settings.gate = CompletionGate::new(Duration::from_secs(5), Duration::from_secs(30));
    let service = engine.service(settings);

    let started = Instant::now();
    service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            outfile: Some("no-images.png".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "gate polled: {:?}",
        started.elapsed()
    );
    assert!(engine.calls().iter().any(|call| call.starts_with("render:png:")));
}

#[tokio::test]
async fn data_url_images_pass_the_gate_on_the_first_tick() {
    let (tmp, library) = dirs();
    let engine = ScriptedEngine::new(Script {
        chart_markup: r#"<svg xmlns="http://www.w3.org/2000/svg" width="600" height="400"><image href="data:image/png;base64,iVBORw0KGgo=" width="10" height="10"/></svg>"#.into(),
        ..Script::default()
    });
    let mut settings = settings(tmp.path().into(), library.path().into());
    settings.gate = CompletionGate::new(Duration::from_millis(20), Duration::from_secs(30));
    let service = engine.service(settings);

    let started = Instant::now();
    let delivery = service
        .convert(request(RequestParams {
            options: Some(OPTIONS.into()),
            outfile: Some("inline-image.png".into()),
            ..Default::default()
        }))
        .await
        .expect("conversion");

    assert_eq!(delivery, Delivery::File(tmp.path().join("inline-image.png")));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "gate ran to its deadline: {:?}",
        started.elapsed()
    );
}
