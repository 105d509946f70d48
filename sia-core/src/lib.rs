mod client;

pub use client::{ApiErrorKind, RenterDownload, RenterFile, SiaClient, SiaError};
