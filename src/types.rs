use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SUCCESS_MESSAGE: &str = "File processed successfully!";

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Raw upload as received from the client. `file_name` is untrusted.
#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Separation mode; selects both the engine preset and the expected stems.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StemMode {
    Two,
    Four,
}

impl StemMode {
    pub fn count(self) -> u8 {
        match self {
            StemMode::Two => 2,
            StemMode::Four => 4,
        }
    }
}

impl TryFrom<u8> for StemMode {
    type Error = String;

    fn try_from(n: u8) -> std::result::Result<Self, Self::Error> {
        match n {
            2 => Ok(StemMode::Two),
            4 => Ok(StemMode::Four),
            other => Err(format!("unsupported stem count {other} (expected 2 or 4)")),
        }
    }
}

impl From<StemMode> for u8 {
    fn from(mode: StemMode) -> u8 {
        mode.count()
    }
}

impl FromStr for StemMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid stem count `{s}`"))?;
        StemMode::try_from(n)
    }
}

impl fmt::Display for StemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// One expected stem: the engine's file label and the response field it is reported under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StemSlot {
    pub label: &'static str,
    pub field: &'static str,
}

/// How the response renders a stem that has no URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbsentStem {
    EmptyString,
    Omit,
}

const TWO_STEMS: &[StemSlot] = &[
    StemSlot {
        label: "vocals",
        field: "vocals_url",
    },
    StemSlot {
        label: "accompaniment",
        field: "instrumental_url",
    },
];

const FOUR_STEMS: &[StemSlot] = &[
    StemSlot {
        label: "vocals",
        field: "vocals_url",
    },
    StemSlot {
        label: "drums",
        field: "drums_url",
    },
    StemSlot {
        label: "bass",
        field: "bass_url",
    },
    StemSlot {
        label: "other",
        field: "other_url",
    },
];

/// Fixed, ordered stem set for a mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StemSpec {
    pub mode: StemMode,
    pub slots: &'static [StemSlot],
    pub absent: AbsentStem,
}

impl StemSpec {
    pub fn for_mode(mode: StemMode) -> Self {
        match mode {
            StemMode::Two => Self {
                mode,
                slots: TWO_STEMS,
                absent: AbsentStem::Omit,
            },
            StemMode::Four => Self {
                mode,
                slots: FOUR_STEMS,
                absent: AbsentStem::EmptyString,
            },
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|s| s.label)
    }
}

/// A produced stem: decoded file from the engine, compressed file once transcoded.
#[derive(Clone, Debug)]
pub struct StemArtifact {
    pub label: String,
    pub decoded_path: PathBuf,
    pub compressed_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StemStatus {
    Ready {
        url: String,
    },
    Missing,
    TranscodeFailed {
        #[serde(rename = "error")]
        reason: String,
    },
}

/// Per-request outcome, in StemSpec order. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct ResultManifest {
    entries: Vec<(String, StemStatus)>,
}

impl ResultManifest {
    pub fn record(&mut self, label: impl Into<String>, status: StemStatus) {
        self.entries.push((label.into(), status));
    }

    pub fn status(&self, label: &str) -> Option<&StemStatus> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| s)
    }

    pub fn url(&self, label: &str) -> Option<&str> {
        match self.status(label) {
            Some(StemStatus::Ready { url }) => Some(url),
            _ => None,
        }
    }

    /// Label → URL for stems that were produced and transcoded.
    pub fn urls(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(label, status)| match status {
                StemStatus::Ready { url } => Some((label.as_str(), url.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct SplitOutcome {
    pub request_id: String,
    pub spec: StemSpec,
    pub manifest: ResultManifest,
}

impl SplitOutcome {
    /// Body of the `POST /split` success response.
    pub fn to_response_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), Value::from(SUCCESS_MESSAGE));

        for slot in self.spec.slots {
            match (self.manifest.url(slot.label), self.spec.absent) {
                (Some(url), _) => {
                    body.insert(slot.field.into(), Value::from(url));
                }
                (None, AbsentStem::EmptyString) => {
                    body.insert(slot.field.into(), Value::from(""));
                }
                (None, AbsentStem::Omit) => {}
            }
        }

        let mut stems = Map::new();
        for slot in self.spec.slots {
            let status = self
                .manifest
                .status(slot.label)
                .cloned()
                .unwrap_or(StemStatus::Missing);
            stems.insert(
                slot.label.into(),
                serde_json::to_value(status).unwrap_or(Value::Null),
            );
        }

        body.insert("request_id".into(), Value::from(self.request_id.clone()));
        body.insert("stems".into(), Value::Object(stems));
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(mode: StemMode, manifest: ResultManifest) -> SplitOutcome {
        SplitOutcome {
            request_id: "req-1".into(),
            spec: StemSpec::for_mode(mode),
            manifest,
        }
    }

    #[test]
    fn stem_mode_parses_only_two_and_four() {
        assert_eq!("2".parse::<StemMode>().unwrap(), StemMode::Two);
        assert_eq!(" 4 ".parse::<StemMode>().unwrap(), StemMode::Four);
        assert!("5".parse::<StemMode>().is_err());
        assert!("four".parse::<StemMode>().is_err());
    }

    #[test]
    fn spec_order_is_fixed() {
        let labels: Vec<_> = StemSpec::for_mode(StemMode::Four).labels().collect();
        assert_eq!(labels, ["vocals", "drums", "bass", "other"]);
        let labels: Vec<_> = StemSpec::for_mode(StemMode::Two).labels().collect();
        assert_eq!(labels, ["vocals", "accompaniment"]);
    }

    #[test]
    fn four_stem_response_uses_empty_strings_for_absent_stems() {
        let mut m = ResultManifest::default();
        m.record("vocals", StemStatus::Ready { url: "http://h:1/output/a/vocals.mp3".into() });
        m.record("drums", StemStatus::Missing);
        m.record(
            "bass",
            StemStatus::TranscodeFailed {
                reason: "boom".into(),
            },
        );
        let json = outcome(StemMode::Four, m).to_response_json();

        assert_eq!(json["message"], SUCCESS_MESSAGE);
        assert_eq!(json["vocals_url"], "http://h:1/output/a/vocals.mp3");
        assert_eq!(json["drums_url"], "");
        assert_eq!(json["bass_url"], "");
        assert_eq!(json["other_url"], "");
        assert_eq!(json["stems"]["drums"]["status"], "missing");
        assert_eq!(json["stems"]["bass"]["status"], "transcode_failed");
        assert_eq!(json["stems"]["bass"]["error"], "boom");
        assert_eq!(json["stems"]["other"]["status"], "missing");
    }

    #[test]
    fn two_stem_response_omits_absent_instrumental() {
        let mut m = ResultManifest::default();
        m.record("vocals", StemStatus::Ready { url: "u".into() });
        m.record("accompaniment", StemStatus::Missing);
        let json = outcome(StemMode::Two, m).to_response_json();

        assert_eq!(json["vocals_url"], "u");
        assert!(json.get("instrumental_url").is_none());
        assert_eq!(json["stems"]["accompaniment"]["status"], "missing");
    }

    #[test]
    fn manifest_urls_skip_unavailable_stems() {
        let mut m = ResultManifest::default();
        m.record("vocals", StemStatus::Ready { url: "v".into() });
        m.record("drums", StemStatus::Missing);
        m.record("other", StemStatus::Ready { url: "o".into() });
        assert_eq!(m.urls(), vec![("vocals", "v"), ("other", "o")]);
        assert_eq!(m.url("drums"), None);
    }
}
