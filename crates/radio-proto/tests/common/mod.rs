use radio_proto::playback::{AttemptId, AudioOutput};
use radio_proto::station::StationRecord;

/// Audio output double that mimics a single media element: one source slot,
/// one "is producing sound" flag.
#[derive(Debug, Default)]
pub struct FakeOutput {
    pub source: Option<String>,
    pub sounding: bool,
    pub plays: Vec<(AttemptId, String)>,
    pub loads: usize,
    pub volume: f32,
}

impl AudioOutput for FakeOutput {
    fn assign_source(&mut self, url: Option<&str>) {
        self.source = url.map(str::to_string);
        self.sounding = false;
    }

    fn load(&mut self) {
        self.loads += 1;
    }

    fn play(&mut self, attempt: AttemptId) {
        if let Some(src) = &self.source {
            self.plays.push((attempt, src.clone()));
            self.sounding = true;
        }
    }

    fn pause(&mut self) {
        self.sounding = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }
}

impl FakeOutput {
    pub fn last_attempt(&self) -> Option<AttemptId> {
        self.plays.last().map(|(a, _)| *a)
    }
}

pub fn bare_station(id: &str, name: &str) -> StationRecord {
    StationRecord {
        id: id.into(),
        name: name.into(),
        url: "u".into(),
        domain: "d".into(),
        tracklist_url: None,
        stream_url: None,
    }
}
