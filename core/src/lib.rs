pub mod backends;
pub mod config;
pub mod errors;
pub mod facade;
pub mod files;
pub mod transfer;

pub use backends::RemoteBackend;
pub use errors::{Operation, TransferError};
pub use files::{RemoteFile, RemotePath, TransferOutcome, TransferResult};
pub use transfer::{download, list, Download, DownloadOptions, ListOptions};
