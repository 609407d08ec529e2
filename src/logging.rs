use std::path::{Path, PathBuf};

use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{runtime::ConfigErrors, Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

const CONSOLE_PATTERN: &str = "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M})} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] {M} - {m}{n}";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not open log file {}: {source}", path.display())]
    LogFile { path: PathBuf, source: std::io::Error },
    #[error("Invalid logger configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Logger already initialized: {0}")]
    Init(#[from] log::SetLoggerError),
}

/// Send log messages at `level` and above to stderr and, if `log_file` is given, to that file as well.
pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .target(Target::Stderr)
        .build();

    let mut config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
            .append(false)
            .build(path)
            .map_err(|e| LoggingError::LogFile { path: path.to_owned(), source: e })?;
        config = config.appender(Appender::builder().build("run_log", Box::new(file)));
        root = root.appender("run_log");
    }

    let config = config.build(root.build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
