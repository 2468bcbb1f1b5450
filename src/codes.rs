use diesel::{prelude::*, PgConnection};

use crate::{error::AppResult, schema::document_types};

/// Linear probe ceiling; the attempt after it switches to the time-derived
/// sequence so allocation always terminates.
pub const MAX_CODE_ATTEMPTS: u32 = 30;

/// Prefixes for the built-in types when no registry row overrides them.
const FALLBACK_PREFIXES: &[(&str, &str)] = &[
    ("SOP", "SOP"),
    ("POLICY", "POL"),
    ("WORK_INSTRUCTION", "WI"),
    ("FORM", "FRM"),
    ("MANUAL", "MAN"),
    ("RECORD", "REC"),
    ("PROCEDURE", "PRO"),
];

pub fn format_code(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{prefix}-{year}-{sequence:04}")
}

pub fn derive_prefix(document_type: &str) -> String {
    if let Some((_, prefix)) = FALLBACK_PREFIXES
        .iter()
        .find(|(ty, _)| *ty == document_type)
    {
        return (*prefix).to_string();
    }
    document_type.chars().take(3).collect::<String>().to_uppercase()
}

/// Registry prefix when an active DocumentType row exists, derived
/// prefix otherwise.
pub fn resolve_prefix(conn: &mut PgConnection, document_type: &str) -> AppResult<String> {
    let registered: Option<String> = document_types::table
        .filter(document_types::code.eq(document_type))
        .filter(document_types::active.eq(true))
        .select(document_types::prefix)
        .first(conn)
        .optional()?;

    Ok(registered.unwrap_or_else(|| derive_prefix(document_type)))
}

/// Candidate for one allocation attempt. Attempts below the ceiling walk
/// linearly from the seeded sequence; the final attempt derives the
/// sequence from the clock.
pub fn candidate_code(
    prefix: &str,
    year: i32,
    base_sequence: i64,
    attempt: u32,
    epoch_millis: i64,
) -> String {
    if attempt < MAX_CODE_ATTEMPTS {
        format_code(prefix, year, base_sequence + i64::from(attempt))
    } else {
        format_code(prefix, year, epoch_millis.rem_euclid(10_000))
    }
}
