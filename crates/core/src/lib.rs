pub mod capture;
pub mod config;
pub mod error;
pub mod types;

pub use capture::{CaptureSession, CapturedRequest, RecordedCapture, SessionState, SessionSummary};
pub use config::AppConfig;
pub use error::{CaptureError, ConsolidationError, ScanError};
pub use types::*;
