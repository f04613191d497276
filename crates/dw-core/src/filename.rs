//! Dump filename contracts.
//!
//! Filenames carry the metadata needed to rebuild an entry when no other
//! record exists, so their shape is a compatibility contract, not an
//! implementation detail. Contract v1, both forms:
//!
//! - Locally stored dumps: `<prefix>_<id>_<epochMicros>.<ext>` with a
//!   decimal id and a decimal Unix timestamp in microseconds
//!   (e.g. `obmcdump_7_1700000000000000.tar.xz`).
//! - Host system dumps: `SYSDUMP.<serial>.<idHex8>.<epochSecs>` with an
//!   eight-digit hex source id and a timestamp in whole seconds
//!   (e.g. `SYSDUMP.13F5D29.0000002A.1700000000`).
//!
//! A name that does not match is never adopted into an entry; callers log
//! and skip it.

use dw_common::SourceId;
use regex::Regex;
use std::sync::OnceLock;

/// Parsed form of a locally stored dump filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFileName {
    pub prefix: String,
    pub id: u32,
    pub timestamp_us: u64,
    pub extension: String,
}

/// Parsed form of a host system dump filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFileName {
    pub serial: String,
    pub source_id: SourceId,
    pub timestamp_us: u64,
}

fn stored_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9]+)_([0-9]+)_([0-9]+)\.([A-Za-z0-9.]+)$")
            .expect("stored filename pattern is valid")
    })
}

fn system_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^SYSDUMP\.([A-Za-z0-9]+)\.([0-9A-Fa-f]{8})\.([0-9]+)$")
            .expect("system filename pattern is valid")
    })
}

/// Parse a locally stored dump filename.
///
/// Returns `None` for any non-conforming name, including numeric fields
/// that overflow their types.
pub fn parse_stored(name: &str) -> Option<StoredFileName> {
    let caps = stored_re().captures(name)?;
    let id: u32 = caps[2].parse().ok()?;
    let timestamp_us: u64 = caps[3].parse().ok()?;
    Some(StoredFileName {
        prefix: caps[1].to_string(),
        id,
        timestamp_us,
        extension: caps[4].to_string(),
    })
}

/// Render a locally stored dump filename (contract v1).
pub fn format_stored(prefix: &str, id: u32, epoch_micros: u64, extension: &str) -> String {
    format!("{prefix}_{id}_{epoch_micros}.{extension}")
}

/// Parse a host system dump filename.
pub fn parse_system(name: &str) -> Option<SystemFileName> {
    let caps = system_re().captures(name)?;
    let source = u32::from_str_radix(&caps[2], 16).ok()?;
    let secs: u64 = caps[3].parse().ok()?;
    Some(SystemFileName {
        serial: caps[1].to_string(),
        source_id: SourceId(source),
        timestamp_us: secs.checked_mul(1_000_000)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stored_contract_parses() {
        let parsed = parse_stored("obmcdump_7_1700000000000000.tar.xz").unwrap();
        assert_eq!(parsed.prefix, "obmcdump");
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.timestamp_us, 1_700_000_000_000_000);
        assert_eq!(parsed.extension, "tar.xz");
    }

    #[test]
    fn stored_rejects_malformed_names() {
        for name in [
            "obmcdump_7.tar",
            "obmcdump_x_1700000000.tar",
            "obmcdump_7_17000000000000000000000.tar", // timestamp overflow
            "obmcdump_99999999999_1.tar",             // id overflow
            "notadump",
            "obmcdump_7_1700000000",
            "",
        ] {
            assert!(parse_stored(name).is_none(), "accepted {name:?}");
        }
    }

    #[test]
    fn stored_format_round_trips() {
        let name = format_stored("faultlog", 42, 1_700_000_001_000_000, "log");
        let parsed = parse_stored(&name).unwrap();
        assert_eq!(parsed.prefix, "faultlog");
        assert_eq!(parsed.id, 42);
        assert_eq!(parsed.timestamp_us, 1_700_000_001_000_000);
    }

    #[test]
    fn system_contract_parses() {
        let parsed = parse_system("SYSDUMP.13F5D29.0000002A.1700000000").unwrap();
        assert_eq!(parsed.serial, "13F5D29");
        assert_eq!(parsed.source_id, SourceId(42));
        assert_eq!(parsed.timestamp_us, 1_700_000_000_000_000);
    }

    #[test]
    fn system_requires_eight_hex_digits() {
        assert!(parse_system("SYSDUMP.SER.2A.1700000000").is_none());
        assert!(parse_system("SYSDUMP.SER.0000002G.1700000000").is_none());
        assert!(parse_system("sysdump.SER.0000002A.1700000000").is_none());
    }

    proptest! {
        // Arbitrary input never panics and never yields an id the name
        // does not literally contain.
        #[test]
        fn stored_parser_never_panics(name in ".*") {
            let _ = parse_stored(&name);
            let _ = parse_system(&name);
        }

        #[test]
        fn stored_round_trip(id in 0u32..=u32::MAX, micros in 0u64..=4_000_000_000_000_000u64) {
            let name = format_stored("obmcdump", id, micros, "tar");
            let parsed = parse_stored(&name).unwrap();
            prop_assert_eq!(parsed.id, id);
            prop_assert_eq!(parsed.timestamp_us, micros);
        }
    }
}
