//! Region label derivation
//!
//! Raw region identifiers (`cn-hangzhou`, `cn-hangzhou-finance`) are used to
//! build API endpoints. The exposed `region` label is the second `-`
//! separated part of that identifier.

use crate::error::RegionLabelError;

const REGION_DELIMITER: char = '-';

/// Extract the region label from a raw region identifier
pub fn region_label(raw: &str) -> Result<&str, RegionLabelError> {
    raw.split(REGION_DELIMITER)
        .nth(1)
        .ok_or_else(|| RegionLabelError::Malformed(raw.to_string()))
}
