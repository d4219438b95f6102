//! HTTP handlers.

pub mod conflicts;
pub mod notes;
pub mod sync;
pub mod ws;

use notevault_common::DeviceId;

use crate::error::ApiError;

/// Device used when a request does not name one.
pub const DEFAULT_DEVICE: &str = "default";

/// Parse an optional device id, falling back to [`DEFAULT_DEVICE`].
pub fn device_or_default(raw: Option<String>) -> Result<DeviceId, ApiError> {
    let raw = raw
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE.to_string());
    Ok(DeviceId::new(raw)?)
}
