use crate::capture::{self, CaptureError, CroppedImage, RawFrame};
use crate::config::Config;
use crate::db;
use crate::ocr::OcrClient;
use crate::plate::{self, Plate};
use crate::types::{HistorySummary, Visit};
use bytes::BufMut;
use failure::Error;
use futures::StreamExt;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;
const OCR_TEXT_PREVIEW_CHARS: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ocr: OcrClient,
    pub db: Arc<Mutex<Connection>>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> ApiError {
        ApiError {
            status,
            message: message.to_string(),
        }
    }

    fn bad_request(message: impl ToString) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl ToString) -> ApiError {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CaptureError> for ApiError {
    fn from(e: CaptureError) -> ApiError {
        match e {
            CaptureError::Encode(_) => ApiError::internal(e),
            _ => ApiError::bad_request(e),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanResponse {
    plate: Option<Plate>,
    detected: bool,
    ocr_text: String,
    capture_id: Option<String>,
    history: Vec<Visit>,
    summary: Option<HistorySummary>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    plate: Plate,
    history: Vec<Visit>,
    summary: Option<HistorySummary>,
}

pub async fn run(state: AppState) {
    let port = state.config.port;
    info!("Listening on port {}", port);
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let with_state = warp::any().map(move || state.clone());
    let scan = warp::path!("scan")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_state.clone())
        .and_then(|form, state| async move {
            handle_scan(form, state)
                .await
                .map(|response| warp::reply::json(&response))
                .map_err(warp::reject::custom)
        });
    let history = warp::path!("history" / String)
        .and(warp::get())
        .and(with_state)
        .and_then(|plate, state| async move {
            handle_history(plate, state)
                .await
                .map(|response| warp::reply::json(&response))
                .map_err(warp::reject::custom)
        });
    scan.or(history)
        .recover(handle_rejection)
        .with(warp::log("plate_scanner"))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ApiError>() {
        (e.status, e.message.clone())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, format!("{:?}", err))
    };
    let body = warp::reply::json(&serde_json::json!({
        "error": message,
        "status": status.as_u16(),
    }));
    Ok(warp::reply::with_status(body, status))
}

async fn handle_scan(form: FormData, state: AppState) -> Result<ScanResponse, ApiError> {
    let frame = read_frame(form).await.map_err(|e| {
        warn!("Rejecting scan upload: {}", e);
        ApiError::bad_request(e)
    })?;
    debug!("Read {}x{} frame", frame.width(), frame.height());
    let cropped = capture::capture(&frame, &state.config.crop).map_err(|e| {
        warn!("Unable to capture frame: {}", e);
        ApiError::from(e)
    })?;
    drop(frame);

    let capture_id = match &state.config.capture_dir {
        Some(dir) => save_capture(dir, &cropped),
        None => None,
    };

    let text = state.ocr.recognize(&cropped).await.map_err(|e| {
        error!("OCR request failed: {}", e);
        ApiError::new(StatusCode::BAD_GATEWAY, format!("OCR service error: {}", e))
    })?;
    let ocr_text: String = text.chars().take(OCR_TEXT_PREVIEW_CHARS).collect();

    let plate = match plate::extract(&text) {
        Some(plate) => plate,
        None => {
            info!("No plate detected in OCR text {:?}", ocr_text);
            return Ok(ScanResponse {
                plate: None,
                detected: false,
                ocr_text,
                capture_id,
                history: vec![],
                summary: None,
            });
        }
    };
    info!("Detected plate {}", plate);

    let history = lookup_history(&state, &plate).await?;
    Ok(ScanResponse {
        summary: HistorySummary::from_visits(&history),
        plate: Some(plate),
        detected: true,
        ocr_text,
        capture_id,
        history,
    })
}

async fn handle_history(plate: String, state: AppState) -> Result<HistoryResponse, ApiError> {
    let plate = plate::normalize(&plate)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid plate {:?}", plate)))?;
    let history = lookup_history(&state, &plate).await?;
    Ok(HistoryResponse {
        summary: HistorySummary::from_visits(&history),
        plate,
        history,
    })
}

async fn lookup_history(state: &AppState, plate: &Plate) -> Result<Vec<Visit>, ApiError> {
    let conn = state.db.lock().await;
    let history = db::service_history(&conn, plate.as_str()).map_err(|e| {
        error!("Error reading service history for {}: {:?}", plate, e);
        ApiError::internal("Unable to read service history")
    })?;
    debug!("Found {} visits for {}", history.len(), plate);
    Ok(history)
}

/// Reads either an encoded `image` part or raw RGBA `width`/`height`/`pixels`
/// parts from the upload.
async fn read_frame(mut form: FormData) -> Result<RawFrame, Error> {
    let mut image: Option<Vec<u8>> = None;
    let mut pixels: Option<Vec<u8>> = None;
    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;

    while let Some(part) = form.next().await {
        let part = part?;
        let name = part.name().to_string();
        debug!("Got part {}", name);
        match name.as_str() {
            "image" => image = Some(read_part(part).await?),
            "pixels" => pixels = Some(read_part(part).await?),
            "width" | "height" => {
                let data = read_part(part).await?;
                let value = std::str::from_utf8(&data)?
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format_err!("Invalid {} field", name))?;
                if name == "width" {
                    width = Some(value);
                } else {
                    height = Some(value);
                }
            }
            _ => warn!("Ignoring part {}", name),
        }
    }

    if let Some(data) = image {
        return Ok(RawFrame::decode(&data)?);
    }
    match (width, height, pixels) {
        (Some(width), Some(height), Some(pixels)) => {
            Ok(RawFrame::from_rgba(width, height, pixels)?)
        }
        _ => Err(format_err!(
            "Upload needs an image part, or width, height and pixels parts"
        )),
    }
}

async fn read_part(part: warp::multipart::Part) -> Result<Vec<u8>, Error> {
    let mut data: Vec<u8> = vec![];
    let stream = part.stream();
    futures::pin_mut!(stream);
    while let Some(buf) = stream.next().await {
        data.put(buf?);
    }
    Ok(data)
}

/// Keeps a copy of the crop; failures are logged and otherwise ignored.
fn save_capture(dir: &Path, image: &CroppedImage) -> Option<String> {
    let id = Uuid::new_v4().simple().to_string();
    let path = dir.join(format!("{}.jpeg", id));
    match std::fs::write(&path, &image.bytes) {
        Ok(_) => Some(id),
        Err(e) => {
            warn!("Error saving capture to {:?}: {:?}", path, e);
            None
        }
    }
}
