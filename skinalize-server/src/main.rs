use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use burn::backend::NdArray;
use clap::Parser;
use serde::Deserialize;
use skinalize_core::{BackboneType, Classifier, Prediction};
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;
mod pages;
mod utils;

use error::AppError;
use pages::ClassifyView;

type Backend = NdArray<f32>;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the classifier checkpoint
    #[arg(short, long, default_value = "models/skin_classifier")]
    checkpoint: PathBuf,
    /// Backbone the checkpoint was trained with
    #[arg(short, long, default_value = BackboneType::default())]
    model: BackboneType,
    /// Port to listen on (the PORT environment variable wins)
    #[arg(short, long, default_value = "8080")]
    port: u16,
}

struct AppState {
    classifier: Classifier<Backend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skinalize_server=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let port = env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(args.port);

    let classifier =
        Classifier::load(args.model.clone(), args.checkpoint.clone(), Default::default())?;
    info!(checkpoint = %args.checkpoint.display(), "classifier loaded");

    let state = Arc::new(AppState { classifier });

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { "OK" }))
        .route("/classify", post(classify))
        .route("/api/classify", post(classify_api))
        .fallback(|| async { (StatusCode::NOT_FOUND, "404 Not Found") })
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let mut addr = "[::]:8080".parse::<SocketAddr>()?; // This listens on IPv6 and IPv4
    addr.set_port(port);
    info!("Listening on http://localhost:{port}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
}

async fn index(Query(query): Query<PageQuery>) -> Html<String> {
    Html(match query.page.as_deref() {
        Some("features") => pages::features(),
        Some("faq") => pages::faq(),
        Some("contact") => pages::contact(),
        _ => pages::home(None),
    })
}

async fn classify(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let upload = utils::read_image_field(multipart).await?;
    let prediction = state.classifier.classify(&upload.image);
    info!(label = %prediction.label, confidence = prediction.confidence, "image classified");
    let view = ClassifyView {
        image_data_uri: upload.data_uri(),
        prediction,
    };
    Ok(Html(pages::home(Some(&view))))
}

async fn classify_api(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Prediction>, AppError> {
    let upload = utils::read_image_field(multipart).await?;
    Ok(Json(state.classifier.classify(&upload.image)))
}
