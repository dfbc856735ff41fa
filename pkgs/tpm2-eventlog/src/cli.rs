use std::ffi::OsString;

use clap::{App, AppSettings, Arg, ArgMatches, ErrorKind};

use crate::{
    error::Error,
    ingest::{EventlogVersion, IngestionRequest},
    VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Normal
    }
}

/// Everything the command line decides, fixed before the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub request: IngestionRequest,
    pub verbosity: Verbosity,
}

fn app() -> App<'static, 'static> {
    App::new("tpm2_eventlog")
        .version(VERSION)
        .about("Parse a binary TPM2 event log and display it as YAML")
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("eventlog-version")
                .short("y")
                .long("eventlog-version")
                .value_name("VERSION")
                .help("The YAML schema version of the output")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("V")
                .long("verbose")
                .help("Log debug output")
                .conflicts_with("quiet"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("Q")
                .long("quiet")
                .help("Only log errors"),
        )
        .arg(
            Arg::with_name("FILE")
                .help("The binary event log to parse")
                .multiple(true),
        )
}

/// Parses the command line.
///
/// `--help` and `--version` print and exit the process from here.
pub fn parse<I, T>(args: I) -> Result<Options, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match app().get_matches_from_safe(args) {
        Ok(matches) => matches,
        Err(e) if e.kind == ErrorKind::HelpDisplayed || e.kind == ErrorKind::VersionDisplayed => {
            e.exit()
        }
        Err(e) => return Err(Error::Config(e.message)),
    };

    options(&matches)
}

fn options(matches: &ArgMatches) -> Result<Options, Error> {
    let version = match matches.value_of("eventlog-version") {
        Some(v) => v.parse()?,
        None => EventlogVersion::default(),
    };

    let files: Vec<_> = matches.values_of_os("FILE").into_iter().flatten().collect();
    let path = match files.as_slice() {
        [path] => *path,
        [] => {
            return Err(Error::Config(
                "missing required positional parameter, try -h / --help".to_owned(),
            ))
        }
        more => {
            return Err(Error::Config(format!(
                "expected one file name as a positional parameter, got: {}",
                more.len()
            )))
        }
    };

    let verbosity = if matches.is_present("verbose") {
        Verbosity::Verbose
    } else if matches.is_present("quiet") {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };

    Ok(Options {
        request: IngestionRequest::new(path, version)?,
        verbosity,
    })
}
