use std::path::Path;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path as UrlPath, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::batch::{classify_file, ArtifactPaths, BatchOptions, EvaluationMode};

use super::{ApiError, ServiceContext};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub message: &'static str,
    pub classified_data: String,
    pub image1: String,
}

/// `POST /process`: classifies the uploaded point cloud and returns the names
/// of the artifacts to fetch from `/data` and `/image`.
pub async fn process(
    State(context): State<ServiceContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }
    let upload = upload
        .ok_or_else(|| ApiError::BadRequest(format!("missing multipart field '{UPLOAD_FIELD}'")))?;

    let model = context.model()?;
    let id = Uuid::new_v4();
    let dirs = context.dirs();
    let input = dirs.uploads.join(format!("{id}.xyz"));
    tokio::fs::write(&input, &upload)
        .await
        .map_err(|e| pcd_core::Error::io(&input, e))?;
    log::info!("request {id}: received {} bytes", upload.len());

    let classified_name = format!("{id}.xyz");
    let image_name = format!("{id}_view1.jpg");
    let paths = ArtifactPaths {
        cloud: dirs.classified.join(&classified_name),
        image: Some(dirs.images.join(&image_name)),
        report: None,
    };
    let options = BatchOptions {
        scheme: (*context.scheme).clone(),
        style: context.style,
        render_image: true,
        evaluation: EvaluationMode::Skip,
        report_image: false,
    };

    let upload_path = input.clone();
    let outcome =
        tokio::task::spawn_blocking(move || classify_file(&model, &input, paths, &options)).await;
    // the upload is only needed while classifying
    if let Err(e) = tokio::fs::remove_file(&upload_path).await {
        log::warn!("request {id}: cannot remove {}: {e}", upload_path.display());
    }
    let classified =
        outcome.map_err(|e| ApiError::Internal(format!("classification task failed: {e}")))??;
    log::info!("request {id}: classified {} points", classified.n_points);

    Ok(Json(ProcessResponse {
        message: "Processing completed successfully",
        classified_data: classified_name,
        image1: image_name,
    }))
}

/// `GET /image/:filename`
pub async fn download_image(
    State(context): State<ServiceContext>,
    UrlPath(filename): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    send_file(&context.dirs().images, &filename, "image/jpeg").await
}

/// `GET /data/:filename`
pub async fn download_data(
    State(context): State<ServiceContext>,
    UrlPath(filename): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    send_file(&context.dirs().classified, &filename, "text/plain").await
}

async fn send_file(
    dir: &Path,
    filename: &str,
    content_type: &str,
) -> Result<impl IntoResponse, ApiError> {
    // plain file names only; nothing outside `dir` is served
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(ApiError::NotFound);
    }

    let path = dir.join(filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(pcd_core::Error::io(&path, e).into()),
    };

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, bytes))
}
