//! HiPS-list file parser (§6, §4.11 supplement): a sequence of survey
//! records in the same `key=value` grammar as the properties file
//! (`properties.rs`), each terminated by a blank line or EOF. Only emitted
//! when a record actually names a `hips_service_url` — a release date with
//! no service URL describes nothing.

use crate::date::hips_parse_date;
use crate::properties::parse_line;

#[derive(Debug, Clone, PartialEq)]
pub struct HipsListEntry {
    pub service_url: String,
    pub release_date_mjd: i64,
}

pub fn parse_hips_list(text: &str) -> Vec<HipsListEntry> {
    let mut entries = Vec::new();
    let mut service_url: Option<String> = None;
    let mut release_date_mjd = 0i64;

    for line in text.lines() {
        if line.trim().is_empty() {
            if let Some(url) = service_url.take() {
                entries.push(HipsListEntry {
                    service_url: url,
                    release_date_mjd,
                });
            }
            release_date_mjd = 0;
            continue;
        }
        if let Some((key, value)) = parse_line(line) {
            match key {
                "hips_service_url" => service_url = Some(value.to_string()),
                "hips_release_date" => release_date_mjd = hips_parse_date(value),
                _ => {}
            }
        }
    }
    if let Some(url) = service_url {
        entries.push(HipsListEntry {
            service_url: url,
            release_date_mjd,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_records_separated_by_blank_lines() {
        let text = "\
hips_service_url = http://a/survey1
hips_release_date = 2000-01-01T00:00Z

hips_service_url = http://b/survey2
";
        let entries = parse_hips_list(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service_url, "http://a/survey1");
        assert_eq!(entries[0].release_date_mjd, 51544);
        assert_eq!(entries[1].service_url, "http://b/survey2");
        assert_eq!(entries[1].release_date_mjd, 0);
    }

    #[test]
    fn record_with_no_service_url_is_dropped() {
        let text = "hips_release_date = 2000-01-01T00:00Z\n\nhips_service_url = http://a\n";
        let entries = parse_hips_list(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service_url, "http://a");
    }
}
