/// This module defines data structures for API request payloads of the
/// pixel-grid marketplace node. It includes the purchase request, the image
/// upload body, and the owner-gated art update, with validation rules to
/// reject malformed input before it reaches the orchestrator.
use crate::error::ApiError;
use crate::reservation::Rect;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request payload for purchasing a region of the grid.
///
/// Coordinates are grid cells (each a 10x10 pixel block), not raw pixels.
/// Full geometry checks, including that the region stays inside the grid,
/// happen in `Rect::validate`; the ranges here just bound the fields.
#[derive(Debug, Deserialize, Validate)]
pub struct PurchasePayload {
    /// Left edge of the region, in cells.
    #[validate(range(max = 99, message = "x must be within the grid"))]
    pub x: u16,

    /// Top edge of the region, in cells.
    #[validate(range(max = 99, message = "y must be within the grid"))]
    pub y: u16,

    /// Width in cells.
    #[validate(range(min = 1, max = 100, message = "width must be between 1 and 100"))]
    pub width: u16,

    /// Height in cells.
    #[validate(range(min = 1, max = 100, message = "height must be between 1 and 100"))]
    pub height: u16,

    /// Optional link shown when the region is clicked.
    #[validate(url(message = "link must be a valid URL"))]
    pub link: Option<String>,

    /// Optional content-addressed reference from a prior image upload.
    pub image_ref: Option<String>,
}

impl PurchasePayload {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Query parameters for a price quote.
#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Price quote for a region, before committing to a purchase.
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub price_lamports: u64,
    pub already_reserved: bool,
}

/// Base64-encoded image upload body.
#[derive(Debug, Deserialize, Validate)]
pub struct ImageUploadPayload {
    /// Base64-encoded image bytes.
    #[validate(length(min = 1, message = "data cannot be empty"))]
    pub data: String,
}

/// Response to an image upload: the stable reference to attach to a purchase.
#[derive(Debug, Serialize)]
pub struct ImageUploadResponse {
    pub reference: String,
}

/// Owner-gated update of a reservation's image and/or link.
#[derive(Debug, Deserialize, Validate)]
pub struct ArtUpdatePayload {
    /// Wallet address of the caller; must match the reservation owner.
    #[validate(length(min = 1, message = "wallet cannot be empty"))]
    pub wallet: String,

    pub image_ref: Option<String>,

    #[validate(url(message = "link must be a valid URL"))]
    pub link: Option<String>,
}

/// Runs `validator` checks and maps failures onto the API taxonomy.
pub fn validated<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_payload_bounds_are_enforced() {
        let good = PurchasePayload {
            x: 10,
            y: 10,
            width: 2,
            height: 2,
            link: Some("https://example.com".into()),
            image_ref: None,
        };
        assert!(validated(&good).is_ok());

        let bad_link = PurchasePayload {
            link: Some("not a url".into()),
            ..good
        };
        assert!(matches!(validated(&bad_link), Err(ApiError::Validation(_))));

        let zero_width = PurchasePayload {
            x: 0,
            y: 0,
            width: 0,
            height: 1,
            link: None,
            image_ref: None,
        };
        assert!(matches!(validated(&zero_width), Err(ApiError::Validation(_))));

        let off_grid = PurchasePayload {
            x: 100,
            y: 0,
            width: 1,
            height: 1,
            link: None,
            image_ref: None,
        };
        assert!(matches!(validated(&off_grid), Err(ApiError::Validation(_))));
    }
}
