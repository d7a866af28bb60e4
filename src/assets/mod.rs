//! Asset upload and download
//!
//! - `Uploader`: splits an incoming byte stream into chunks and finalizes it
//! - `Downloader`: replays a finalized asset chunk by chunk
//! - `AssetService`: request-level façade used by the HTTP routes
//! - `OrphanSweeper`: background removal of abandoned chunks

pub mod downloader;
pub mod service;
pub mod sweep;
pub mod uploader;

pub use downloader::{AssetStream, Downloader};
pub use service::{AssetService, UploadResponse};
pub use sweep::OrphanSweeper;
pub use uploader::{UploadRequest, Uploader};
