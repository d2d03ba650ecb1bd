use thiserror::Error;

/// Errors produced while loading or binding scenario material.
///
/// `ScenarioParse` and `DataBinding` are fatal for the run they occur in;
/// they are never retried.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The scenario document could not be parsed or failed validation.
    #[error("failed to parse scenario: {0}")]
    ScenarioParse(String),

    /// A `{{ variable }}` reference had no value in the execution context.
    #[error("no value bound for variable '{name}'")]
    DataBinding { name: String },

    /// A `Call` step or run request referenced a scenario id that is not in
    /// the library.
    #[error("unknown scenario id '{0}'")]
    UnknownScenario(String),

    /// A trigger rule pattern is not a valid regular expression.
    #[error("invalid trigger pattern '{pattern}': {source}")]
    TriggerPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A data source file could not be read as tabular records.
    #[error("failed to read data source: {0}")]
    DataSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
