//! Image generation for illustrations and portraits.

pub mod client;
pub mod images;

pub use client::{decode_image, DiffusionClient};
pub use images::{DiffusionImageGenerator, ImageStore};
