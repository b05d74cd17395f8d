//! Add/edit form for stations.
//!
//! Validation lives here, at the UI boundary, so the store only ever sees
//! records with a name and a homepage.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::station::StationRecord;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("station name is required")]
    MissingName,
    #[error("station url is required")]
    MissingUrl,
}

/// The five editable fields, as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tracklist_url: String,
    #[serde(default)]
    pub stream_url: String,
    #[serde(default)]
    pub domain: String,
}

impl StationForm {
    /// Pre-fill the form from an existing station (edit flow).
    pub fn from_record(record: &StationRecord) -> Self {
        Self {
            name: record.name.clone(),
            url: record.url.clone(),
            tracklist_url: record.tracklist_url.clone().unwrap_or_default(),
            stream_url: record.stream_url.clone().unwrap_or_default(),
            domain: record.domain.clone(),
        }
    }

    /// Validate and turn the form into a record carrying `id`.
    pub fn into_record(self, id: impl Into<String>) -> Result<StationRecord, FormError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(FormError::MissingName);
        }
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(FormError::MissingUrl);
        }
        let domain = match self.domain.trim() {
            "" => derive_domain(&url),
            d => d.to_string(),
        };

        Ok(StationRecord {
            id: id.into(),
            name,
            url,
            domain,
            tracklist_url: non_blank(&self.tracklist_url),
            stream_url: non_blank(&self.stream_url),
        })
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Host of `url` without a leading `www.`; the raw text when it doesn't parse.
pub fn derive_domain(url: &str) -> String {
    let parsed = reqwest::Url::parse(url).or_else(|_| reqwest::Url::parse(&format!("https://{}", url)));
    match parsed.ok().as_ref().and_then(|u| u.host_str()) {
        Some(host) => host.strip_prefix("www.").unwrap_or(host).to_string(),
        None => url.to_string(),
    }
}

/// Icon lookup URL for a station or bookmark domain.
pub fn favicon_url(domain: &str) -> String {
    format!("https://www.google.com/s2/favicons?domain={}&sz=64", domain)
}

/// Mint an id not used by any of `existing`: the current millisecond
/// timestamp, with a random suffix when that is already taken.
pub fn fresh_id(existing: &[StationRecord]) -> String {
    let base = chrono::Utc::now().timestamp_millis().to_string();
    let taken = |id: &str| existing.iter().any(|s| s.id == id);
    if !taken(&base) {
        return base;
    }
    let mut rng = rand::thread_rng();
    loop {
        let candidate = format!("{}-{:04x}", base, rng.gen::<u16>());
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::default_stations;

    #[test]
    fn test_into_record_trims_and_derives_domain() {
        let form = StationForm {
            name: "  Kiosk Radio ".into(),
            url: "https://www.kioskradio.com/".into(),
            tracklist_url: "   ".into(),
            stream_url: " https://kioskradio.out/stream ".into(),
            domain: String::new(),
        };
        let record = form.into_record("42").unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.name, "Kiosk Radio");
        assert_eq!(record.domain, "kioskradio.com");
        assert_eq!(record.tracklist_url, None);
        assert_eq!(record.stream_url.as_deref(), Some("https://kioskradio.out/stream"));
    }

    #[test]
    fn test_into_record_requires_name_and_url() {
        let form = StationForm {
            url: "https://a".into(),
            ..Default::default()
        };
        assert_eq!(form.into_record("1").unwrap_err(), FormError::MissingName);

        let form = StationForm {
            name: "A".into(),
            ..Default::default()
        };
        assert_eq!(form.into_record("1").unwrap_err(), FormError::MissingUrl);
    }

    #[test]
    fn test_explicit_domain_wins() {
        let form = StationForm {
            name: "NTS".into(),
            url: "https://www.nts.live".into(),
            domain: "nts.live".into(),
            ..Default::default()
        };
        assert_eq!(form.into_record("1").unwrap().domain, "nts.live");
    }

    #[test]
    fn test_from_record_round_trips() {
        let station = default_stations().remove(0);
        let again = StationForm::from_record(&station)
            .into_record(station.id.clone())
            .unwrap();
        assert_eq!(again, station);
    }

    #[test]
    fn test_derive_domain_without_scheme() {
        assert_eq!(derive_domain("www.rinse.fm/schedule"), "rinse.fm");
        assert_eq!(derive_domain("https://ra.co"), "ra.co");
    }

    #[test]
    fn test_fresh_id_avoids_existing() {
        let mut stations = default_stations();
        let id = fresh_id(&stations);
        assert!(stations.iter().all(|s| s.id != id));

        stations[0].id = id.clone();
        let next = fresh_id(&stations);
        assert_ne!(next, id);
        // Same millisecond: `<ms>-<hhhh>`.
        if let Some(suffix) = next.strip_prefix(&format!("{}-", id)) {
            assert_eq!(suffix.len(), 4);
            assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_favicon_url() {
        assert!(favicon_url("nts.live").contains("domain=nts.live"));
    }
}
