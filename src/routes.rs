use axum::{Json, Router, extract::{State, rejection::JsonRejection}, http::{HeaderMap, StatusCode, header::AUTHORIZATION}, routing::post};
use std::{io::Cursor, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use chrono::Utc;

use crate::{
    clock::Clock,
    imagen::{generate_many, ImageGenerator, ImagenClient, RateLimitedGenerator},
    models::{AdminGenerateRequest, AdminGenerateResponse, GeneratedImage, ImageSize},
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    storage::decode_data_url,
};

pub const GENERATE_PATH: &str = "/admin/api/vertex-ai/image/generate";

#[derive(Clone)]
pub struct AppState {
    pub imagen: ImagenClient,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub clock: Arc<dyn Clock>,
    pub admin_token: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate_image))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == token)
}

fn image_size(data_url: &str) -> Option<ImageSize> {
    let (_, bytes) = decode_data_url(data_url).ok()?;
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some(ImageSize { width, height })
}

pub async fn generate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AdminGenerateRequest>, JsonRejection>,
) -> (StatusCode, Json<AdminGenerateResponse>) {
    if !authorized(&headers, &state.admin_token) {
        return (StatusCode::UNAUTHORIZED, Json(AdminGenerateResponse::err("Unauthorized")));
    }
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::warn!("⚠️ Rejected admin request body: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, Json(AdminGenerateResponse::err(rejection.body_text())));
        }
    };
    let Some(prompt) = body.prompt.filter(|p| !p.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(AdminGenerateResponse::err("Prompt is required")));
    };

    let client = match body.model {
        Some(model) => state.imagen.with_model(model),
        None => state.imagen.clone(),
    };
    let generator = RateLimitedGenerator::new(client, state.limiter.clone(), state.retry, state.clock.clone());
    let model = generator.model().to_string();
    let samples = body.samples.unwrap_or(1);

    tracing::info!("🎯 Admin generation request: {} sample(s) with {}", samples, model);
    match generate_many(&generator, &prompt, samples, &body.options).await {
        Ok(images) if !images.is_empty() => {
            let first = &images[0];
            let data = GeneratedImage {
                id: Uuid::new_v4(),
                uri: first.image_url.clone(),
                prompt,
                model,
                timestamp: Utc::now(),
                enhanced_prompt: first.enhanced_prompt.clone(),
                size: image_size(&first.image_url),
                images: (images.len() > 1).then(|| images.iter().map(|i| i.image_url.clone()).collect()),
            };
            (StatusCode::OK, Json(AdminGenerateResponse::ok(data)))
        }
        Ok(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(AdminGenerateResponse::err("no images were generated"))),
        Err(e) => {
            tracing::error!("❌ Admin generation failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(AdminGenerateResponse::err(e.to_string())))
        }
    }
}
