//! Create-request parameter map.
//!
//! A create request carries a small map of named values. Keys are an
//! external contract shared with management clients; unknown keys beyond a
//! category's maximum are ignored with a warning rather than rejected, so
//! newer clients can talk to older daemons.

use crate::error::{Error, Result};
use crate::originator::OriginatorType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter key selecting the dump sub-type for locally captured dumps.
pub const KEY_DUMP_TYPE: &str = "DumpType";
/// Parameter key carrying the requesting client's identity.
pub const KEY_ORIGINATOR_ID: &str = "OriginatorId";
/// Parameter key carrying the requesting client's kind.
pub const KEY_ORIGINATOR_TYPE: &str = "OriginatorType";
/// Parameter key with the resource selector forwarded to the host.
pub const KEY_RESOURCE_SELECTOR: &str = "ResourceSelector";
/// Parameter key with the host access password for resource dumps.
pub const KEY_PASSWORD: &str = "Password";
/// Parameter key carrying the fault payload for fault-log dumps.
pub const KEY_FAULT_DATA: &str = "FaultData";

/// A single request parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    U64(u64),
}

impl ParamValue {
    /// The string form, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            ParamValue::U64(_) => None,
        }
    }

    /// The integer form, if this value is an integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::U64(v) => Some(*v),
            ParamValue::Str(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::U64(v)
    }
}

/// The named-parameter map attached to a create request.
pub type DumpParams = BTreeMap<String, ParamValue>;

/// Extract originator identity and kind from a request map.
///
/// Both keys are optional: a missing id yields an empty string, a missing
/// type defaults to [`OriginatorType::Internal`]. A present-but-mistyped
/// value is an [`Error::InvalidArgument`] naming the key.
pub fn extract_originator(params: &DumpParams) -> Result<(String, OriginatorType)> {
    let originator_id = match params.get(KEY_ORIGINATOR_ID) {
        Some(v) => v
            .as_str()
            .ok_or_else(|| Error::invalid_argument(KEY_ORIGINATOR_ID, "not a string"))?
            .to_string(),
        None => String::new(),
    };

    let originator_type = match params.get(KEY_ORIGINATOR_TYPE) {
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| Error::invalid_argument(KEY_ORIGINATOR_TYPE, "not a string"))?;
            OriginatorType::parse(s).ok_or_else(|| Error::invalid_argument(KEY_ORIGINATOR_TYPE, s))?
        }
        None => OriginatorType::default(),
    };

    Ok((originator_id, originator_type))
}

/// Fetch an optional string parameter, failing only if it is mistyped.
pub fn optional_str<'a>(params: &'a DumpParams, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| Error::invalid_argument(key, "not a string")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> DumpParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn originator_defaults_when_absent() {
        let (id, ty) = extract_originator(&DumpParams::new()).unwrap();
        assert_eq!(id, "");
        assert_eq!(ty, OriginatorType::Internal);
    }

    #[test]
    fn originator_extracted_when_present() {
        let p = params(&[
            (KEY_ORIGINATOR_ID, ParamValue::from("redfish-session-7")),
            (KEY_ORIGINATOR_TYPE, ParamValue::from("client")),
        ]);
        let (id, ty) = extract_originator(&p).unwrap();
        assert_eq!(id, "redfish-session-7");
        assert_eq!(ty, OriginatorType::Client);
    }

    #[test]
    fn mistyped_originator_is_invalid_argument() {
        let p = params(&[(KEY_ORIGINATOR_ID, ParamValue::from(7u64))]);
        let err = extract_originator(&p).unwrap_err();
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn unknown_originator_type_is_invalid_argument() {
        let p = params(&[(KEY_ORIGINATOR_TYPE, ParamValue::from("wizard"))]);
        assert!(extract_originator(&p).is_err());
    }

    #[test]
    fn optional_str_distinguishes_absent_from_mistyped() {
        let p = params(&[(KEY_PASSWORD, ParamValue::from(1u64))]);
        assert_eq!(optional_str(&p, KEY_RESOURCE_SELECTOR).unwrap(), None);
        assert!(optional_str(&p, KEY_PASSWORD).is_err());
    }
}
