use std::{process, sync::Arc};

use texrender::{
    application::{
        error::AppError,
        render::{
            FieldValue, FormulaRenderer, RawRenderOptions, RenderPipelineConfig, RenderService,
        },
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{fs, signal, sync::oneshot};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
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

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let renderer = build_renderer(&settings)?;

    match command {
        config::Command::Serve(_) => serve_http(&settings, renderer).await,
        config::Command::Render(args) => run_render(renderer, *args).await,
    }
}

fn build_renderer(settings: &config::Settings) -> Result<Arc<FormulaRenderer>, AppError> {
    let renderer = FormulaRenderer::new(RenderPipelineConfig::from(&settings.render))
        .map_err(|err| AppError::from(InfraError::toolchain(err.to_string())))?;
    Ok(Arc::new(renderer))
}

async fn run_render(
    renderer: Arc<FormulaRenderer>,
    args: config::RenderArgs,
) -> Result<(), AppError> {
    let raw = RawRenderOptions {
        dpi: args.dpi.map(|dpi| FieldValue::Integer(dpi.into())),
        color: args.color.map(FieldValue::Text),
        background_color: args.background.map(FieldValue::Text),
        font_size: args.font_size.map(|size| FieldValue::Integer(size.into())),
        display: Some(FieldValue::Bool(!args.inline)),
        width: args.width.map(|width| FieldValue::Integer(width.into())),
        height: args.height.map(|height| FieldValue::Integer(height.into())),
        padding: args.padding.map(|padding| FieldValue::Integer(padding.into())),
        scale: args.scale.map(FieldValue::Float),
    };
    let options = raw.normalize()?;

    let output = renderer.render(&args.formula, &options).await?;
    if output
        .size_estimate
        .is_some_and(|estimate| estimate.is_placeholder())
    {
        warn!(
            target = "texrender::render",
            task_id = %output.task_id,
            "Document size could not be measured; image dimensions are approximate"
        );
    }

    fs::write(&args.output, &output.content)
        .await
        .map_err(|err| AppError::from(InfraError::output(&args.output, err)))?;
    info!(
        target = "texrender::render",
        task_id = %output.task_id,
        path = output.path.as_str(),
        dpi = output.dpi,
        bytes = output.content.len(),
        output = %args.output.display(),
        "Formula written"
    );
    Ok(())
}

async fn serve_http(
    settings: &config::Settings,
    renderer: Arc<FormulaRenderer>,
) -> Result<(), AppError> {
    let max_body_bytes = usize::try_from(settings.server.max_body_bytes.get()).map_err(|_| {
        AppError::from(InfraError::configuration("server.max_body_bytes is too large"))
    })?;
    let router = http::build_router(HttpState::new(renderer), max_body_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;
    info!(
        target = "texrender::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        },
    );
    let mut server = tokio::spawn(async move { server.await });

    let drain_deadline = async {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        joined = &mut server => {
            joined
                .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
                .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline => {
            warn!(
                target = "texrender::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; aborting in-flight requests"
            );
            server.abort();
        }
    }

    info!(target = "texrender::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "texrender::serve", "Shutdown signal received");
}
