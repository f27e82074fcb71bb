//! HTTP wrapper around the batch pipeline.
//!
//! The model is loaded once before the listener is bound and shared read-only
//! by every request. Each request works on files named after its own UUID.

mod error;
mod routes;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;

use pcd_classifier::TrainedModel;
use pcd_core::{classes::ClassScheme, Error};
use pcd_exporter::plot::{register_text_font, ScatterStyle};

use crate::{
    cli::ServeArgs,
    error::{AppError, Result},
};

pub use error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDirs {
    pub uploads: PathBuf,
    pub classified: PathBuf,
    pub images: PathBuf,
}

impl ServiceDirs {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            uploads: work_dir.join("download_data"),
            classified: work_dir.join("classified_data"),
            images: work_dir.join("images"),
        }
    }

    fn create_all(&self) -> pcd_core::Result<()> {
        for dir in [&self.uploads, &self.classified, &self.images] {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        Ok(())
    }
}

/// State shared by all request handlers.
#[derive(Clone)]
pub struct ServiceContext {
    model: Option<Arc<TrainedModel>>,
    dirs: Arc<ServiceDirs>,
    scheme: Arc<ClassScheme>,
    style: ScatterStyle,
}

impl ServiceContext {
    /// Loads the model and prepares the working directories. Any failure here
    /// keeps the service from starting.
    pub fn load(model_path: &Path, work_dir: &Path, style: ScatterStyle) -> pcd_core::Result<Self> {
        let dirs = ServiceDirs::new(work_dir);
        dirs.create_all()?;
        let model = TrainedModel::load(model_path)?;
        log::info!(
            "loaded {} model from {} (classes {:?})",
            model.estimator_name(),
            model_path.display(),
            model.classes()
        );
        Ok(Self {
            model: Some(Arc::new(model)),
            dirs: Arc::new(dirs),
            scheme: Arc::new(ClassScheme::land_cover()),
            style,
        })
    }

    /// Context without a loaded model; every classification request fails
    /// with `ModelUnavailable`.
    #[cfg(test)]
    pub fn without_model(work_dir: &Path, style: ScatterStyle) -> pcd_core::Result<Self> {
        let dirs = ServiceDirs::new(work_dir);
        dirs.create_all()?;
        Ok(Self {
            model: None,
            dirs: Arc::new(dirs),
            scheme: Arc::new(ClassScheme::land_cover()),
            style,
        })
    }

    #[cfg(test)]
    pub fn with_model(model: TrainedModel, work_dir: &Path, style: ScatterStyle) -> pcd_core::Result<Self> {
        let mut context = Self::without_model(work_dir, style)?;
        context.model = Some(Arc::new(model));
        Ok(context)
    }

    pub fn model(&self) -> pcd_core::Result<Arc<TrainedModel>> {
        self.model.clone().ok_or(Error::ModelUnavailable)
    }

    pub fn dirs(&self) -> &ServiceDirs {
        &self.dirs
    }
}

pub fn router(context: ServiceContext, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/process", post(routes::process))
        .route("/image/:filename", get(routes::download_image))
        .route("/data/:filename", get(routes::download_data))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(context)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("shutdown requested"),
        Err(e) => {
            log::error!("cannot listen for Ctrl-C, stop the process to shut down: {e}");
            std::future::pending::<()>().await;
        }
    }
}

pub async fn serve(context: ServiceContext, bind: SocketAddr, max_upload_bytes: usize) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| AppError::Bind { addr: bind, source })?;
    log::info!("listening on {bind}");

    axum::serve(listener, router(context, max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Server)?;

    log::info!("server stopped");
    Ok(())
}

/// The `serve` command.
pub fn run(args: &ServeArgs) -> Result<()> {
    if let Some(font) = &args.font {
        register_text_font(font)?;
    }
    let context = ServiceContext::load(&args.model, &args.work_dir, ScatterStyle::default())?;
    let max_upload_bytes = args.max_upload_mb.saturating_mul(1024 * 1024);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Server)?;
    runtime.block_on(serve(context, args.bind, max_upload_bytes))
}
