//! Bounded ingestion of an event log file and dispatch to a [`Formatter`].
//!
//! The event log is untrusted input: no more than [`CAPACITY`] bytes of it are
//! ever held in memory. Larger files are truncated with a warning rather than
//! rejected.

use std::{
    fmt,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::{debug, warn};

use crate::error::{Error, FormatError};

pub mod buffer;

pub use self::buffer::{BoundedBuffer, BufferArena, HeapArena, CAPACITY};

/// Output schema selector, always within
/// [`MIN`](EventlogVersion::MIN)..=[`MAX`](EventlogVersion::MAX).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventlogVersion(u32);

impl EventlogVersion {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 2;

    pub fn new(version: u32) -> Result<Self, Error> {
        if version < Self::MIN || version > Self::MAX {
            return Err(Error::Config(format!(
                "unexpected eventlog version number: {}",
                version
            )));
        }
        Ok(Self(version))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for EventlogVersion {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for EventlogVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventlogVersion {
    type Err = Error;

    /// Accepts decimal and `0x` prefixed hexadecimal.
    fn from_str(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => trimmed.parse::<u32>(),
        };

        let version = parsed
            .map_err(|_| Error::Config(format!("cannot parse eventlog version: {}", s)))?;
        Self::new(version)
    }
}

/// A validated request to render one event log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRequest {
    path: PathBuf,
    version: EventlogVersion,
}

impl IngestionRequest {
    pub fn new(path: impl Into<PathBuf>, version: EventlogVersion) -> Result<Self, Error> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::Config(
                "missing required positional parameter, try -h / --help".to_owned(),
            ));
        }
        Ok(Self { path, version })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> EventlogVersion {
        self.version
    }
}

/// Outcome of a successful [`LogIngestor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Size reported by the metadata lookup.
    pub declared_size: u64,
    /// Bytes handed to the formatter.
    pub filled: usize,
    pub truncated: bool,
    pub version: EventlogVersion,
}

pub trait FileMetadata {
    fn size(&self, path: &Path) -> io::Result<u64>;
}

pub trait FileReader {
    /// Fills `buffer` from the start of the file until either is exhausted,
    /// returning the number of bytes retained.
    fn read_up_to(&self, path: &Path, buffer: &mut BoundedBuffer) -> io::Result<usize>;
}

/// Parses and renders the retained bytes of an event log.
pub trait Formatter {
    fn render(&mut self, log: &[u8], version: EventlogVersion) -> Result<(), FormatError>;
}

impl<F: Formatter + ?Sized> Formatter for &mut F {
    fn render(&mut self, log: &[u8], version: EventlogVersion) -> Result<(), FormatError> {
        (**self).render(log, version)
    }
}

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fs;

impl FileMetadata for Fs {
    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}

impl FileReader for Fs {
    fn read_up_to(&self, path: &Path, buffer: &mut BoundedBuffer) -> io::Result<usize> {
        let mut file = File::open(path)?;
        while !buffer.is_full() {
            match file.read(buffer.unfilled_mut()) {
                Ok(0) => break,
                Ok(n) => buffer.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(buffer.filled())
    }
}

pub struct LogIngestor<S, A, F> {
    source: S,
    arena: A,
    formatter: F,
}

impl<F: Formatter> LogIngestor<Fs, HeapArena, F> {
    pub fn new(formatter: F) -> Self {
        Self::with_parts(Fs, HeapArena, formatter)
    }
}

impl<S, A, F> LogIngestor<S, A, F>
where
    S: FileMetadata + FileReader,
    A: BufferArena,
    F: Formatter,
{
    pub fn with_parts(source: S, arena: A, formatter: F) -> Self {
        Self {
            source,
            arena,
            formatter,
        }
    }

    pub fn formatter(&self) -> &F {
        &self.formatter
    }

    pub fn into_formatter(self) -> F {
        self.formatter
    }

    /// Reads at most [`CAPACITY`] bytes of the requested file and renders
    /// them.
    ///
    /// The buffer is dropped before returning, whichever stage failed.
    pub fn run(&mut self, request: &IngestionRequest) -> Result<IngestReport, Error> {
        let path = request.path();
        let version = request.version();
        debug!(path = %path.display(), %version, "ingesting event log");

        let declared_size = self
            .source
            .size(path)
            .map_err(|e| Error::io(path, e))?;
        debug!(size = declared_size, "probed event log size");

        let truncated = declared_size > CAPACITY as u64;
        if truncated {
            warn!(
                size = declared_size,
                "event log exceeds {} bytes and will be truncated", CAPACITY
            );
        }

        let mut buffer = self.arena.allocate()?;

        self.source
            .read_up_to(path, &mut buffer)
            .map_err(|e| Error::io(path, e))?;
        let filled = buffer.filled();
        debug!(filled, "read event log");

        self.formatter.render(buffer.contents(), version)?;
        debug!("rendered event log");

        Ok(IngestReport {
            declared_size,
            filled,
            truncated,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{cell::Cell, collections::HashMap, collections::TryReserveError};

    use tracing_test::traced_test;

    #[derive(Default)]
    struct MemSource {
        files: HashMap<PathBuf, Vec<u8>>,
        stats: Cell<usize>,
        reads: Cell<usize>,
        fail_read: bool,
    }

    impl MemSource {
        fn with_file(path: &str, len: usize) -> Self {
            let mut files = HashMap::new();
            files.insert(PathBuf::from(path), (0..len).map(|i| i as u8).collect());
            Self {
                files,
                ..Default::default()
            }
        }
    }

    impl FileMetadata for MemSource {
        fn size(&self, path: &Path) -> io::Result<u64> {
            self.stats.set(self.stats.get() + 1);
            self.files
                .get(path)
                .map(|f| f.len() as u64)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }

    impl FileReader for MemSource {
        fn read_up_to(&self, path: &Path, buffer: &mut BoundedBuffer) -> io::Result<usize> {
            self.reads.set(self.reads.get() + 1);
            if self.fail_read {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "revoked"));
            }
            let file = self
                .files
                .get(path)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
            let n = file.len().min(buffer.unfilled_mut().len());
            buffer.unfilled_mut()[..n].copy_from_slice(&file[..n]);
            buffer.advance(n);
            Ok(buffer.filled())
        }
    }

    struct FailingArena;

    impl BufferArena for FailingArena {
        fn allocate(&self) -> Result<BoundedBuffer, TryReserveError> {
            Err(Vec::<u8>::new().try_reserve_exact(usize::MAX).unwrap_err())
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(Vec<u8>, EventlogVersion)>,
        reject: bool,
    }

    impl Formatter for Recorder {
        fn render(&mut self, log: &[u8], version: EventlogVersion) -> Result<(), FormatError> {
            self.calls.push((log.to_vec(), version));
            if self.reject {
                return Err(FormatError::parse(0, "garbage"));
            }
            Ok(())
        }
    }

    fn request(path: &str, version: u32) -> IngestionRequest {
        IngestionRequest::new(path, EventlogVersion::new(version).unwrap()).unwrap()
    }

    #[test]
    fn version_defaults_to_one() {
        assert_eq!(EventlogVersion::default().get(), 1);
    }

    #[test]
    fn version_range_is_closed() {
        assert!(EventlogVersion::new(0).is_err());
        assert_eq!(EventlogVersion::new(1).unwrap().get(), 1);
        assert_eq!(EventlogVersion::new(2).unwrap().get(), 2);
        let err = EventlogVersion::new(3).unwrap_err();
        assert_eq!(err.to_string(), "unexpected eventlog version number: 3");
        assert_eq!(err.exit_code(), crate::error::EXIT_OPTION_ERROR);
    }

    #[test]
    fn version_parses_decimal_and_hex() {
        assert_eq!("2".parse::<EventlogVersion>().unwrap().get(), 2);
        assert_eq!("0x1".parse::<EventlogVersion>().unwrap().get(), 1);
        assert!("0x10".parse::<EventlogVersion>().is_err());
    }

    #[test]
    fn version_rejects_non_numbers() {
        for input in &["abc", "", "-1", "1.0", "0x"] {
            let err = input.parse::<EventlogVersion>().unwrap_err();
            assert!(
                err.to_string().starts_with("cannot parse eventlog version"),
                "{:?} gave {}",
                input,
                err
            );
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = IngestionRequest::new("", EventlogVersion::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[traced_test]
    #[test]
    fn small_log_is_read_whole() {
        let mut ingestor =
            LogIngestor::with_parts(MemSource::with_file("log.bin", 100), HeapArena, Recorder::default());

        let report = ingestor.run(&request("log.bin", 1)).expect("run");

        assert_eq!(report.filled, 100);
        assert_eq!(report.declared_size, 100);
        assert!(!report.truncated);
        let calls = &ingestor.formatter().calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.len(), 100);
        assert_eq!(calls[0].1.get(), 1);
        assert!(!logs_contain("will be truncated"));
    }

    #[traced_test]
    #[test]
    fn big_log_is_truncated_and_still_rendered() {
        let mut ingestor = LogIngestor::with_parts(
            MemSource::with_file("big.bin", 200_000),
            HeapArena,
            Recorder::default(),
        );

        let report = ingestor.run(&request("big.bin", 2)).expect("run");

        assert_eq!(report.filled, 65535);
        assert_eq!(report.declared_size, 200_000);
        assert!(report.truncated);
        let calls = &ingestor.formatter().calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.len(), 65535);
        assert_eq!(calls[0].0[..256], (0..=255u8).collect::<Vec<_>>()[..]);
        assert_eq!(calls[0].1.get(), 2);
        assert!(logs_contain("event log exceeds 65535 bytes and will be truncated"));
    }

    #[traced_test]
    #[test]
    fn exactly_capacity_is_not_truncated() {
        let mut ingestor = LogIngestor::with_parts(
            MemSource::with_file("edge.bin", 65535),
            HeapArena,
            Recorder::default(),
        );

        let report = ingestor.run(&request("edge.bin", 1)).expect("run");

        assert_eq!(report.filled, 65535);
        assert!(!report.truncated);
        assert!(!logs_contain("will be truncated"));
    }

    #[traced_test]
    #[test]
    fn one_past_capacity_is_truncated() {
        let mut ingestor = LogIngestor::with_parts(
            MemSource::with_file("edge.bin", 65536),
            HeapArena,
            Recorder::default(),
        );

        let report = ingestor.run(&request("edge.bin", 1)).expect("run");

        assert_eq!(report.filled, 65535);
        assert!(report.truncated);
        assert!(logs_contain("will be truncated"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let source = MemSource::default();
        let mut recorder = Recorder::default();
        let mut ingestor = LogIngestor::with_parts(source, HeapArena, &mut recorder);

        let err = ingestor.run(&request("missing.bin", 1)).unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_GENERAL_ERROR);
        drop(ingestor);
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn allocation_failure_skips_read() {
        let mut ingestor = LogIngestor::with_parts(
            MemSource::with_file("log.bin", 100),
            FailingArena,
            Recorder::default(),
        );

        let err = ingestor.run(&request("log.bin", 1)).unwrap_err();

        assert!(matches!(err, Error::Resource(_)));
        assert_eq!(ingestor.source.stats.get(), 1);
        assert_eq!(ingestor.source.reads.get(), 0);
        assert!(ingestor.formatter().calls.is_empty());
    }

    #[test]
    fn read_failure_is_io_error() {
        let mut source = MemSource::with_file("log.bin", 100);
        source.fail_read = true;
        let mut ingestor = LogIngestor::with_parts(source, HeapArena, Recorder::default());

        let err = ingestor.run(&request("log.bin", 1)).unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(ingestor.source.reads.get(), 1);
        assert!(ingestor.formatter().calls.is_empty());
    }

    #[test]
    fn formatter_rejection_is_format_error() {
        let recorder = Recorder {
            reject: true,
            ..Default::default()
        };
        let mut ingestor =
            LogIngestor::with_parts(MemSource::with_file("log.bin", 10), HeapArena, recorder);

        let err = ingestor.run(&request("log.bin", 1)).unwrap_err();

        assert!(matches!(err, Error::Format(_)));
        assert!(err.to_string().starts_with("failed to parse event log"));
        assert_eq!(ingestor.formatter().calls.len(), 1);
    }

    #[test]
    fn runs_are_repeatable() {
        let mut ingestor = LogIngestor::with_parts(
            MemSource::with_file("big.bin", 70_000),
            HeapArena,
            Recorder::default(),
        );
        let request = request("big.bin", 2);

        let first = ingestor.run(&request).expect("first run");
        let second = ingestor.run(&request).expect("second run");

        assert_eq!(first, second);
        let calls = &ingestor.formatter().calls;
        assert_eq!(calls[0], calls[1]);
    }

    #[test]
    fn fs_reads_short_file_whole() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[0xa5; 100]).unwrap();
        let mut buffer = BoundedBuffer::try_new().unwrap();

        assert_eq!(Fs.size(file.path()).unwrap(), 100);
        assert_eq!(Fs.read_up_to(file.path(), &mut buffer).unwrap(), 100);
        assert_eq!(buffer.contents(), &[0xa5; 100][..]);
        assert!(buffer.unfilled_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn fs_stops_at_capacity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &vec![1u8; 200_000]).unwrap();
        let mut buffer = BoundedBuffer::try_new().unwrap();

        assert_eq!(Fs.read_up_to(file.path(), &mut buffer).unwrap(), CAPACITY);
        assert!(buffer.is_full());
    }
}
