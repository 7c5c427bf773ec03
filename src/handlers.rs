use actix_web::{web, HttpResponse};
use base64::Engine;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::image_store::ImageStore;
use crate::models::{
    validated, ArtUpdatePayload, ImageUploadPayload, ImageUploadResponse, PurchasePayload,
    QuoteQuery, QuoteResponse,
};
use crate::purchase::NodePurchaseService;
use crate::reservation::Rect;

// Purchase a region: the orchestrator contract over HTTP.
pub async fn purchase(
    service: web::Data<Arc<NodePurchaseService>>,
    payload: web::Json<PurchasePayload>,
) -> Result<HttpResponse, ApiError> {
    validated(&*payload)?;
    let receipt = service
        .purchase(payload.rect(), payload.image_ref.clone(), payload.link.clone())
        .await?;
    Ok(HttpResponse::Ok().json(receipt))
}

// Quote the price of a region without committing.
pub async fn quote(
    service: web::Data<Arc<NodePurchaseService>>,
    query: web::Query<QuoteQuery>,
) -> Result<HttpResponse, ApiError> {
    let rect = Rect::new(query.x, query.y, query.width, query.height);
    rect.validate()?;
    Ok(HttpResponse::Ok().json(QuoteResponse {
        price_lamports: service.price_lamports(&rect),
        already_reserved: service.reservations().find_conflict(&rect).is_some(),
    }))
}

// All reservations; the render source for the canvas.
pub async fn grid(
    service: web::Data<Arc<NodePurchaseService>>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(service.reservations().list()))
}

// Payment attempt history, in append order.
pub async fn history(
    service: web::Data<Arc<NodePurchaseService>>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(service.history().list()?))
}

// Upload an image, get back its content-addressed reference.
pub async fn upload_image(
    images: web::Data<Arc<ImageStore>>,
    payload: web::Json<ImageUploadPayload>,
) -> Result<HttpResponse, ApiError> {
    validated(&*payload)?;
    let bytes = base64::prelude::BASE64_STANDARD
        .decode(&payload.data)
        .map_err(|e| ApiError::Validation(format!("data is not valid base64: {}", e)))?;
    let reference = images.put(&bytes)?;
    Ok(HttpResponse::Ok().json(ImageUploadResponse { reference }))
}

// Fetch stored image bytes.
pub async fn get_image(
    images: web::Data<Arc<ImageStore>>,
    reference: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let bytes = images.get(&reference)?;
    Ok(HttpResponse::Ok().body(bytes))
}

// Owner-gated update of a reservation's image and/or link.
pub async fn update_art(
    service: web::Data<Arc<NodePurchaseService>>,
    id: web::Path<Uuid>,
    payload: web::Json<ArtUpdatePayload>,
) -> Result<HttpResponse, ApiError> {
    validated(&*payload)?;
    let updated = service
        .reservations()
        .update_art(
            &id,
            &payload.wallet,
            payload.image_ref.clone(),
            payload.link.clone(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}
