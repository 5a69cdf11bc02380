//! # Backend API access
//!
//! HTTP client, endpoint table and typed bodies for the management and
//! internal APIs of the services under test.

pub mod client;
pub mod endpoints;
pub mod models;

pub use client::{ApiClient, ApiResponse, ClientOptions, MultipartFile, RequestOptions};
pub use endpoints::{Service, ServiceUrls};
pub use models::*;
