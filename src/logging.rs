use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

const CONSOLE_PATTERN: &str = "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] {M})} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] {M}:{L} - {m}{n}";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not create log file {}", .0.display())]
    LogFile(PathBuf),
    #[error("Could not configure the logger: {0}")]
    Config(String),
}

/// Set up logging to stderr at `level` and, if `log_file` is given, to that file.
///
/// The log file always records at least DEBUG messages so that a failed run can be
/// diagnosed after the fact, regardless of how quiet the console was. Any existing
/// log file is overwritten.
pub fn init_logging(
    level: log::LevelFilter,
    log_file: Option<&Path>,
) -> error_stack::Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = level;

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
            .append(false)
            .build(path)
            .change_context_lazy(|| LoggingError::LogFile(path.to_path_buf()))?;
        builder = builder.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(log::LevelFilter::Debug)))
                .build("logfile", Box::new(file)),
        );
        root = root.appender("logfile");
        root_level = root_level.max(log::LevelFilter::Debug);
    }

    let config = builder
        .build(root.build(root_level))
        .map_err(|e| error_stack::Report::new(LoggingError::Config(e.to_string())))?;

    log4rs::init_config(config)
        .map_err(|e| error_stack::Report::new(LoggingError::Config(e.to_string())))?;
    Ok(())
}
