use std::{collections::BTreeMap, io::Write};

use serde_derive::Serialize;

use crate::{
    error::FormatError,
    ingest::{EventlogVersion, Formatter},
    tpm::eventlog::{parse_log, replay_sha256, Event, EventType},
};

#[derive(Debug, Serialize)]
struct Document {
    version: u32,
    events: Vec<EventEntry>,
    #[serde(skip_serializing_if = "Pcrs::is_empty")]
    pcrs: Pcrs,
}

#[derive(Debug, Serialize)]
struct EventEntry {
    #[serde(rename = "EventNum")]
    num: usize,
    #[serde(rename = "PCRIndex")]
    pcr_index: u32,
    #[serde(rename = "EventType")]
    event_type: String,
    #[serde(rename = "DigestCount")]
    digest_count: usize,
    #[serde(rename = "Digests")]
    digests: Vec<DigestEntry>,
    #[serde(rename = "EventSize")]
    event_size: usize,
    #[serde(rename = "Event")]
    event: String,
    #[serde(rename = "String", skip_serializing_if = "Option::is_none")]
    string: Option<String>,
}

#[derive(Debug, Serialize)]
struct DigestEntry {
    #[serde(rename = "AlgorithmId")]
    algorithm: String,
    #[serde(rename = "Digest")]
    digest: String,
}

#[derive(Debug, Default, Serialize)]
struct Pcrs {
    sha256: BTreeMap<u32, String>,
}

impl Pcrs {
    fn is_empty(&self) -> bool {
        self.sha256.is_empty()
    }
}

impl EventEntry {
    fn new(event: &Event, version: EventlogVersion) -> Self {
        let string = if version.get() >= 2 {
            printable(event)
        } else {
            None
        };

        EventEntry {
            num: event.num,
            pcr_index: event.pcr_index,
            event_type: event.event_type.to_string(),
            digest_count: event.digests.len(),
            digests: event
                .digests
                .iter()
                .map(|d| DigestEntry {
                    algorithm: d.algorithm.to_string(),
                    digest: hex::encode(&d.value),
                })
                .collect(),
            event_size: event.event_data.len(),
            event: hex::encode(&event.event_data),
            string,
        }
    }
}

/// Text carried by events whose payload is a human readable string.
fn printable(event: &Event) -> Option<String> {
    use EventType::*;

    match event.event_type {
        PostCode | Action | EFIAction | Separator | SCrtmVersion | IPL => {
            decode_text(&event.event_data)
        }
        _ => None,
    }
}

/// Decodes UCS-2 (firmware version strings) or UTF-8, dropping trailing NULs.
fn decode_text(data: &[u8]) -> Option<String> {
    let ucs2 = data.len() >= 2
        && data.len() % 2 == 0
        && data.iter().skip(1).step_by(2).all(|b| *b == 0);

    let text = if ucs2 {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).ok()?
    } else {
        String::from_utf8(data.to_vec()).ok()?
    };

    let text = text.trim_end_matches('\0');
    if text.is_empty() || text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return None;
    }
    Some(text.to_owned())
}

/// Renders event logs as YAML documents onto a writer.
pub struct YamlFormatter<W> {
    out: W,
}

impl<W: Write> YamlFormatter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Formatter for YamlFormatter<W> {
    fn render(&mut self, log: &[u8], version: EventlogVersion) -> Result<(), FormatError> {
        let log = parse_log(log)?;

        let pcrs = Pcrs {
            sha256: replay_sha256(&log)
                .into_iter()
                .map(|(index, value)| (index, hex::encode(value)))
                .collect(),
        };
        let document = Document {
            version: version.get(),
            events: log
                .events
                .iter()
                .map(|e| EventEntry::new(e, version))
                .collect(),
            pcrs,
        };

        serde_yaml::to_writer(&mut self.out, &document)?;
        self.out.flush()?;
        Ok(())
    }
}
