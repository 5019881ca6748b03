//! REST Proxy API versions and the per-operation version gate.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation of the proxy's consumer protocol.
///
/// The two versions expose different operation sets: v1 reads per topic and
/// commits the whole instance, v2 uses a single subscription with explicit
/// offsets, assignments and positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum ApiVersion {
    #[default]
    V1,
    V2,
}

impl ApiVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            ApiVersion::V1 => 1,
            ApiVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for ApiVersion {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ApiVersion::V1),
            2 => Ok(ApiVersion::V2),
            other => Err(ClientError::Config(format!(
                "unknown API version {} (expected 1 or 2)",
                other
            ))),
        }
    }
}

impl From<ApiVersion> for u8 {
    fn from(v: ApiVersion) -> u8 {
        v.as_u8()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Check that `configured` is one of the versions an operation supports.
///
/// Pure: no I/O, no logging. Callers run it before building a request so a
/// mismatch never reaches the transport.
pub fn validate_version_support(supported: &[ApiVersion], configured: ApiVersion) -> Result<()> {
    if supported.contains(&configured) {
        return Ok(());
    }
    Err(ClientError::UnsupportedVersion {
        supported: supported.iter().map(|v| v.as_u8()).collect(),
        configured: configured.as_u8(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_version_passes() {
        assert!(validate_version_support(&[ApiVersion::V1], ApiVersion::V1).is_ok());
        assert!(validate_version_support(&[ApiVersion::V1, ApiVersion::V2], ApiVersion::V2).is_ok());
    }

    #[test]
    fn test_mismatch_carries_both_sides() {
        let err = validate_version_support(&[ApiVersion::V2], ApiVersion::V1).unwrap_err();
        match err {
            ClientError::UnsupportedVersion {
                supported,
                configured,
            } => {
                assert_eq!(supported, vec![2]);
                assert_eq!(configured, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_version_from_integer() {
        assert_eq!(ApiVersion::try_from(1).unwrap(), ApiVersion::V1);
        assert_eq!(ApiVersion::try_from(2).unwrap(), ApiVersion::V2);
        assert!(ApiVersion::try_from(3).is_err());
    }

    #[test]
    fn test_version_serde_as_number() {
        let json = serde_json::to_string(&ApiVersion::V2).unwrap();
        assert_eq!(json, "2");
        let v: ApiVersion = serde_json::from_str("1").unwrap();
        assert_eq!(v, ApiVersion::V1);
    }
}
