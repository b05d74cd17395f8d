use serde::{Deserialize, Serialize};

/// One radio station as the user sees and edits it.
///
/// Field names serialise in camelCase so the persisted array keeps the same
/// shape the start page has always stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    /// Station homepage
    pub url: String,
    /// Display label, also the favicon lookup key (e.g. "nts.live")
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracklist_url: Option<String>,
    /// Playable audio source.  `None` or blank means the station can't be played.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl StationRecord {
    /// The stream URL when there is one worth handing to the audio output.
    pub fn stream_source(&self) -> Option<&str> {
        self.stream_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_playable(&self) -> bool {
        self.stream_source().is_some()
    }
}

fn seed(
    id: &str,
    name: &str,
    url: &str,
    tracklist_url: &str,
    stream_url: &str,
    domain: &str,
) -> StationRecord {
    StationRecord {
        id: id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        domain: domain.to_string(),
        tracklist_url: Some(tracklist_url.to_string()),
        stream_url: Some(stream_url.to_string()),
    }
}

/// Stations used when nothing usable has been persisted yet.
pub fn default_stations() -> Vec<StationRecord> {
    vec![
        seed(
            "9",
            "Reprezent",
            "https://www.reprezent.org.uk",
            "https://www.reprezent.org.uk/radio",
            "https://shoutcast.reprezent.org.uk/stream?type=.mp3",
            "reprezent.org.uk",
        ),
        seed(
            "8",
            "FunX",
            "https://www.funx.nl",
            "https://www.funx.nl/radio/playlist",
            "https://icecast.omroep.nl/funx-bb-mp3",
            "funx.nl",
        ),
        seed(
            "7",
            "NTS 1",
            "https://www.nts.live",
            "https://www.nts.live/schedule",
            "https://stream-relay-geo.ntslive.net/stream?type=.mp3",
            "nts.live",
        ),
        seed(
            "nts-2",
            "NTS 2",
            "https://www.nts.live",
            "https://www.nts.live/schedule",
            "https://stream-relay-geo.ntslive.net/stream2?type=.mp3",
            "nts.live",
        ),
        seed(
            "10",
            "Rinse FM",
            "https://rinse.fm",
            "https://rinse.fm/schedule",
            "https://streamer.rinse.fm/rinse_fm?type=.mp3",
            "rinse.fm",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stations_have_unique_ids() {
        let stations = default_stations();
        assert_eq!(stations.len(), 5);
        let mut ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert!(stations.iter().all(StationRecord::is_playable));
    }

    #[test]
    fn test_blank_stream_is_not_playable() {
        let mut station = StationRecord {
            id: "x".into(),
            name: "Test".into(),
            ..Default::default()
        };
        assert!(!station.is_playable());
        station.stream_url = Some("   ".into());
        assert!(!station.is_playable());
        station.stream_url = Some(" https://a/stream ".into());
        assert_eq!(station.stream_source(), Some("https://a/stream"));
    }

    #[test]
    fn test_json_shape_is_camel_case() {
        let station = &default_stations()[2];
        let json = serde_json::to_value(station).unwrap();
        assert_eq!(json["id"], "7");
        assert_eq!(json["tracklistUrl"], "https://www.nts.live/schedule");
        assert!(json.get("streamUrl").is_some());

        let bare = StationRecord {
            id: "x".into(),
            name: "Test".into(),
            url: "u".into(),
            domain: "d".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("streamUrl"));
        let back: StationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bare);
    }
}
