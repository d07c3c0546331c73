//! `hips_parse_date`: parses `YYYY-MM-DDTHH:MMZ` into MJD (days since
//! 1858-11-17 UTC, §6/GLOSSARY). Any parse failure yields `0`, meaning
//! "unknown release date; no cache-busting" — this is deliberate, matching
//! §6's documented behavior rather than surfacing an error.

use chrono::NaiveDate;

fn mjd_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).expect("valid calendar date")
}

/// Returns the release date as an integer MJD, or `0` if `s` does not match
/// the expected format.
pub fn hips_parse_date(s: &str) -> i64 {
    match chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ") {
        Ok(dt) => (dt.date() - mjd_epoch()).num_days(),
        Err(_) => 0,
    }
}
