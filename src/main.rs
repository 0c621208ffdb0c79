use std::{future::IntoFuture, path::Path, process, sync::Arc};

use chartexport::{
    application::{
        convert::{CompletionGate, ConversionService, ConversionSettings, SinkMode},
        engine::Engine,
        error::{AppError, ConversionError},
    },
    config::{self, ConvertArgs},
    domain::request::{ConversionRequest, RequestParams},
    infra::{
        engine::BuiltinEngine,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        println!("{}", error.exit_message());
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    ensure_tmp_dir(settings.engine.tmp_dir.as_deref()).await;

    match cli_args.command {
        config::Command::Convert(args) => run_convert(settings, *args).await,
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_convert(settings: config::Settings, args: ConvertArgs) -> Result<(), AppError> {
    let service = build_service(&settings, SinkMode::Command)?;
    let params = read_params(args).await?;
    let request = ConversionRequest::from_params(params).map_err(ConversionError::from)?;

    let delivery = service.convert(request).await?;
    println!("{}", delivery.into_response_text());
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let service = build_service(&settings, SinkMode::Server)?;
    let state = HttpState::new(
        service,
        settings.server.max_concurrent_renders.get() as usize,
        settings.server.request_timeout,
    );
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "chartexport::serve",
        addr = %settings.server.addr,
        max_concurrent_renders = settings.server.max_concurrent_renders.get(),
        "OK, server is ready."
    );

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown({
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.notified().await }
    })
    .into_future();
    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async {
        wait_for_ctrl_c().await;
        info!(target = "chartexport::serve", "shutdown requested");
        shutdown.notify_one();
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result
            .map_err(|err| AppError::from(InfraError::server(err.to_string())))?,
        _ = drain_deadline => warn!(
            target = "chartexport::serve",
            grace_seconds = grace.as_secs(),
            "graceful shutdown timed out"
        ),
    }
    Ok(())
}

fn build_service(
    settings: &config::Settings,
    sink_mode: SinkMode,
) -> Result<ConversionService, AppError> {
    let engine: Arc<dyn Engine> = Arc::new(BuiltinEngine::new(settings.engine.fetch_timeout)?);
    let conversion = ConversionSettings {
        library_path: settings.engine.library_path.clone(),
        tmp_dir: settings.engine.tmp_dir.clone(),
        dpi_correction: settings.engine.dpi_correction,
        construction_timeout: settings.engine.construction_timeout,
        gate: CompletionGate::default(),
        sink_mode,
    };
    Ok(ConversionService::new(engine, conversion))
}

async fn ensure_tmp_dir(tmp_dir: Option<&Path>) {
    let Some(tmp_dir) = tmp_dir else {
        return;
    };
    if let Err(err) = tokio::fs::create_dir_all(tmp_dir).await {
        warn!(
            target = "chartexport::startup",
            path = %tmp_dir.display(),
            error = %err,
            "could not create tmp dir"
        );
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "chartexport::serve", error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Command-line request keys; file-valued keys are replaced by the file contents.
async fn read_params(args: ConvertArgs) -> Result<RequestParams, AppError> {
    Ok(RequestParams {
        infile: read_file_value(args.infile.as_deref()).await?,
        options: args.options,
        outfile: args.outfile,
        output_type: args.output_type,
        scale: args.scale,
        width: args.width,
        constr: args.constr,
        callback: read_file_value(args.callback.as_deref()).await?,
        globaloptions: read_file_value(args.globaloptions.as_deref()).await?,
        themeoptions: read_file_value(args.themeoptions.as_deref()).await?,
        dataoptions: read_file_value(args.dataoptions.as_deref()).await?,
        customcode: read_file_value(args.customcode.as_deref()).await?,
        resources: args.resources,
    })
}

async fn read_file_value(path: Option<&Path>) -> Result<Option<String>, AppError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = tokio::fs::read_to_string(path).await.map_err(|err| {
        ConversionError::io(format!("could not read {}: {err}", path.display()), err)
    })?;
    Ok(Some(text.trim_start().to_string()))
}
