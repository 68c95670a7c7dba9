//! User-facing API surface over the automation stack.

pub mod api;

pub use api::{claim_response, health, preview, AccrualPreview, ClaimResponse, Health, TRY_AGAIN_MESSAGE};
