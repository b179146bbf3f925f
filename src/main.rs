use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plant_diagnosis::classifier::OnnxClassifier;
use plant_diagnosis::config::Settings;
use plant_diagnosis::{configure, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plant_diagnosis=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let classifier = OnnxClassifier::load(&settings.model_dir)
        .with_context(|| format!("loading model from {}", settings.model_dir.display()))?;

    let state = web::Data::new(AppState {
        classifier: Arc::new(classifier),
        max_upload_bytes: settings.max_upload_bytes,
    });

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure)
    });
    if let Some(workers) = settings.workers {
        server = server.workers(workers.get());
    }

    let (host, port) = settings.bind_addr();
    tracing::info!("Server running at http://{}:{}", host, port);

    server
        .bind((host.as_str(), port))
        .with_context(|| format!("binding {}:{}", host, port))?
        .run()
        .await?;

    Ok(())
}
