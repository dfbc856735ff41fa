use std::{env, io, process};

use tpm2_eventlog::{
    cli,
    error::EXIT_SUCCESS,
    ingest::LogIngestor,
    logging,
    tpm::yaml::YamlFormatter,
};
use tracing::error;

fn main() {
    let options = cli::parse(env::args_os());
    let verbosity = options
        .as_ref()
        .map(|o| o.verbosity)
        .unwrap_or_default();
    logging::init(verbosity);

    let result = options.and_then(|options| {
        let stdout = io::stdout();
        let mut ingestor = LogIngestor::new(YamlFormatter::new(stdout.lock()));
        ingestor.run(&options.request)
    });

    let code = match result {
        Ok(_) => EXIT_SUCCESS,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}
