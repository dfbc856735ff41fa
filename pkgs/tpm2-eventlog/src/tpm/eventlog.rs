// TCG PC Client Platform Firmware Profile Specification, Level 00 Version 1.05
// 10.2.1 TCG_PCR_EVENT, 10.2.2 TCG_PCR_EVENT2, 10.4.5.1 TCG_EfiSpecIdEvent

use std::{collections::BTreeMap, fmt};

use nom::{
    bytes::complete::{tag, take},
    error::ErrorKind,
    number::complete::{le_u16, le_u32, le_u8},
    IResult,
};
use sha2::{Digest as Sha2Digest, Sha256};
use tracing::debug;

use crate::error::FormatError;

const SPEC_ID_EVENT03: &[u8] = b"Spec ID Event03\0";
const SHA1_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    PrebootCert,
    PostCode,
    Unused,
    NoAction,
    Separator,
    Action,
    EventTag,
    SCrtmContents,
    SCrtmVersion,
    CPUMicrocode,
    PlatformConfigFlags,
    TableOfDevices,
    CompactHash,
    IPL,
    IPLPartitionData,
    NonhostCode,
    NonhostConfig,
    NonhostInfo,
    OmitBootDeviceEvents,

    EFIVariableDriverConfig,
    EFIVariableBoot,
    EFIBootServicesApplication,
    EFIBootServicesDriver,
    EFIRuntimeServicesDriver,
    EFIGPTEvent,
    EFIAction,
    EFIPlatformFirmwareBlob,
    EFIHandoffTables,
    EFIVariableAuthority,

    Unknown(u32),
}

impl EventType {
    fn read(i: &[u8]) -> IResult<&[u8], EventType> {
        use EventType::*;

        let out = match le_u32(i)? {
            (i, 0x0) => (i, PrebootCert),
            (i, 0x1) => (i, PostCode),
            (i, 0x2) => (i, Unused),
            (i, 0x3) => (i, NoAction),
            (i, 0x4) => (i, Separator),
            (i, 0x5) => (i, Action),
            (i, 0x6) => (i, EventTag),
            (i, 0x7) => (i, SCrtmContents),
            (i, 0x8) => (i, SCrtmVersion),
            (i, 0x9) => (i, CPUMicrocode),
            (i, 0xa) => (i, PlatformConfigFlags),
            (i, 0xb) => (i, TableOfDevices),
            (i, 0xc) => (i, CompactHash),
            (i, 0xd) => (i, IPL),
            (i, 0xe) => (i, IPLPartitionData),
            (i, 0xf) => (i, NonhostCode),
            (i, 0x10) => (i, NonhostConfig),
            (i, 0x11) => (i, NonhostInfo),
            (i, 0x12) => (i, OmitBootDeviceEvents),

            (i, 0x80000001) => (i, EFIVariableDriverConfig),
            (i, 0x80000002) => (i, EFIVariableBoot),
            (i, 0x80000003) => (i, EFIBootServicesApplication),
            (i, 0x80000004) => (i, EFIBootServicesDriver),
            (i, 0x80000005) => (i, EFIRuntimeServicesDriver),
            (i, 0x80000006) => (i, EFIGPTEvent),
            (i, 0x80000007) => (i, EFIAction),
            (i, 0x80000008) => (i, EFIPlatformFirmwareBlob),
            (i, 0x80000009) => (i, EFIHandoffTables),
            (i, 0x800000e0) => (i, EFIVariableAuthority),

            (i, e) => (i, Unknown(e)),
        };

        Ok(out)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use EventType::*;

        let name = match self {
            PrebootCert => "EV_PREBOOT_CERT",
            PostCode => "EV_POST_CODE",
            Unused => "EV_UNUSED",
            NoAction => "EV_NO_ACTION",
            Separator => "EV_SEPARATOR",
            Action => "EV_ACTION",
            EventTag => "EV_EVENT_TAG",
            SCrtmContents => "EV_S_CRTM_CONTENTS",
            SCrtmVersion => "EV_S_CRTM_VERSION",
            CPUMicrocode => "EV_CPU_MICROCODE",
            PlatformConfigFlags => "EV_PLATFORM_CONFIG_FLAGS",
            TableOfDevices => "EV_TABLE_OF_DEVICES",
            CompactHash => "EV_COMPACT_HASH",
            IPL => "EV_IPL",
            IPLPartitionData => "EV_IPL_PARTITION_DATA",
            NonhostCode => "EV_NONHOST_CODE",
            NonhostConfig => "EV_NONHOST_CONFIG",
            NonhostInfo => "EV_NONHOST_INFO",
            OmitBootDeviceEvents => "EV_OMIT_BOOT_DEVICE_EVENTS",
            EFIVariableDriverConfig => "EV_EFI_VARIABLE_DRIVER_CONFIG",
            EFIVariableBoot => "EV_EFI_VARIABLE_BOOT",
            EFIBootServicesApplication => "EV_EFI_BOOT_SERVICES_APPLICATION",
            EFIBootServicesDriver => "EV_EFI_BOOT_SERVICES_DRIVER",
            EFIRuntimeServicesDriver => "EV_EFI_RUNTIME_SERVICES_DRIVER",
            EFIGPTEvent => "EV_EFI_GPT_EVENT",
            EFIAction => "EV_EFI_ACTION",
            EFIPlatformFirmwareBlob => "EV_EFI_PLATFORM_FIRMWARE_BLOB",
            EFIHandoffTables => "EV_EFI_HANDOFF_TABLES",
            EFIVariableAuthority => "EV_EFI_VARIABLE_AUTHORITY",
            Unknown(e) => return write!(f, "{:#010x}", e),
        };
        f.write_str(name)
    }
}

// TPM_ALG_ID, TCG Algorithm Registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sm3_256,
    Unknown(u16),
}

impl Algorithm {
    fn from_id(id: u16) -> Self {
        use Algorithm::*;
        match id {
            0x04 => Sha1,
            0x0b => Sha256,
            0x0c => Sha384,
            0x0d => Sha512,
            0x12 => Sm3_256,
            e => Unknown(e),
        }
    }

    fn size(self) -> Option<usize> {
        use Algorithm::*;
        match self {
            Sha1 => Some(20),
            Sha256 | Sm3_256 => Some(32),
            Sha384 => Some(48),
            Sha512 => Some(64),
            Unknown(_) => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Algorithm::*;
        match self {
            Sha1 => f.write_str("sha1"),
            Sha256 => f.write_str("sha256"),
            Sha384 => f.write_str("sha384"),
            Sha512 => f.write_str("sha512"),
            Sm3_256 => f.write_str("sm3_256"),
            Unknown(id) => write!(f, "{:#06x}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: Algorithm,
    pub value: Vec<u8>,
}

/// Digest sizes advertised by the Spec ID event, keyed by algorithm id.
type DigestSizes = BTreeMap<u16, usize>;

impl Digest {
    fn read<'a>(i: &'a [u8], sizes: &DigestSizes) -> IResult<&'a [u8], Digest> {
        let (rest, id) = le_u16(i)?;
        let algorithm = Algorithm::from_id(id);
        let size = match sizes.get(&id).copied().or_else(|| algorithm.size()) {
            Some(size) => size,
            None => return Err(nom::Err::Failure((i, ErrorKind::Verify))),
        };
        let (rest, value) = take(size)(rest)?;

        Ok((
            rest,
            Digest {
                algorithm,
                value: value.to_vec(),
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub num: usize,
    pub pcr_index: u32,
    pub event_type: EventType,
    pub digests: Vec<Digest>,
    pub event_data: Vec<u8>,
}

impl Event {
    fn read<'a>(i: &'a [u8], num: usize, sizes: &DigestSizes) -> IResult<&'a [u8], Event> {
        let (i, pcr_index) = le_u32(i)?;
        let (i, event_type) = EventType::read(i)?;

        // The count is untrusted, digests are only collected as they parse.
        let (mut rest, digest_count) = le_u32(i)?;
        let mut digests = Vec::new();
        for _ in 0..digest_count {
            let (i, digest) = Digest::read(rest, sizes)?;
            digests.push(digest);
            rest = i;
        }

        let (i, event_size) = le_u32(rest)?;
        let (i, event_data) = take(event_size as usize)(i)?;

        Ok((
            i,
            Event {
                num,
                pcr_index,
                event_type,
                digests,
                event_data: event_data.to_vec(),
            },
        ))
    }

    fn read_sha1_log(i: &[u8], num: usize) -> IResult<&[u8], Event> {
        let (i, pcr_index) = le_u32(i)?;
        let (i, event_type) = EventType::read(i)?;

        let (i, data) = take(SHA1_SIZE)(i)?;
        let digests = vec![Digest {
            algorithm: Algorithm::Sha1,
            value: data.to_vec(),
        }];

        let (i, event_size) = le_u32(i)?;
        let (i, event_data) = take(event_size as usize)(i)?;

        Ok((
            i,
            Event {
                num,
                pcr_index,
                event_type,
                digests,
                event_data: event_data.to_vec(),
            },
        ))
    }
}

/// Reads the algorithm table of a `Spec ID Event03` payload.
fn read_spec_id(i: &[u8]) -> IResult<&[u8], DigestSizes> {
    let (i, _) = tag(SPEC_ID_EVENT03)(i)?;
    let (i, _platform_class) = le_u32(i)?;
    let (i, _version) = take(3usize)(i)?;
    let (i, _uintn_size) = le_u8(i)?;
    let (mut rest, count) = le_u32(i)?;

    let mut sizes = DigestSizes::new();
    for _ in 0..count {
        let (i, id) = le_u16(rest)?;
        let (i, size) = le_u16(i)?;
        sizes.insert(id, size as usize);
        rest = i;
    }

    Ok((rest, sizes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// TCG_PCR_EVENT records only.
    Sha1,
    /// A TCG_PCR_EVENT Spec ID header followed by TCG_PCR_EVENT2 records.
    CryptoAgile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    pub format: LogFormat,
    pub events: Vec<Event>,
}

fn parse_failure(num: usize, err: nom::Err<(&[u8], ErrorKind)>) -> FormatError {
    let reason = match err {
        nom::Err::Incomplete(_) => "incomplete record".to_owned(),
        nom::Err::Error((_, ErrorKind::Eof)) | nom::Err::Failure((_, ErrorKind::Eof)) => {
            "record overruns end of log".to_owned()
        }
        nom::Err::Error((_, ErrorKind::Verify)) | nom::Err::Failure((_, ErrorKind::Verify)) => {
            "unsupported digest algorithm".to_owned()
        }
        nom::Err::Error((_, kind)) | nom::Err::Failure((_, kind)) => {
            kind.description().to_owned()
        }
    };
    FormatError::parse(num, reason)
}

pub fn parse_log(contents: &[u8]) -> Result<EventLog, FormatError> {
    let mut out = Vec::new();
    if contents.is_empty() {
        return Ok(EventLog {
            format: LogFormat::Sha1,
            events: out,
        });
    }

    let (mut rest, first_event) =
        Event::read_sha1_log(contents, 0).map_err(|e| parse_failure(0, e))?;

    let spec_id = if first_event.event_type == EventType::NoAction {
        read_spec_id(&first_event.event_data).ok().map(|(_, sizes)| sizes)
    } else {
        None
    };
    out.push(first_event);

    let format = match spec_id {
        Some(sizes) => {
            debug!(algorithms = sizes.len(), "crypto agile event log");
            while !rest.is_empty() {
                let num = out.len();
                let (i, event) =
                    Event::read(rest, num, &sizes).map_err(|e| parse_failure(num, e))?;
                out.push(event);
                rest = i;
            }
            LogFormat::CryptoAgile
        }
        None => {
            debug!("sha1 event log");
            while !rest.is_empty() {
                let num = out.len();
                let (i, event) =
                    Event::read_sha1_log(rest, num).map_err(|e| parse_failure(num, e))?;
                out.push(event);
                rest = i;
            }
            LogFormat::Sha1
        }
    };

    Ok(EventLog {
        format,
        events: out,
    })
}

/// Replays every SHA-256 measurement of the log into a fresh PCR bank.
///
/// Only PCRs that received at least one extend are present.
pub fn replay_sha256(log: &EventLog) -> BTreeMap<u32, [u8; 32]> {
    let mut pcrs = BTreeMap::new();

    for event in log
        .events
        .iter()
        .filter(|e| e.event_type != EventType::NoAction)
    {
        for digest in event
            .digests
            .iter()
            .filter(|d| d.algorithm == Algorithm::Sha256)
        {
            let pcr = pcrs.entry(event.pcr_index).or_insert([0u8; 32]);
            let mut hasher = Sha256::new();
            hasher.update(&pcr[..]);
            hasher.update(&digest.value);
            pcr.copy_from_slice(&hasher.finalize()[..]);
        }
    }

    pcrs
}
