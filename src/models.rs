use serde::Deserialize;

/// Form payload accepted by `POST /format`.
#[derive(Debug, Deserialize)]
pub struct FormatForm {
    pub src: String,
}

/// Classified result of a single formatter invocation. Exactly one variant
/// is produced per invocation.
#[derive(Debug)]
pub enum FormatOutcome {
    /// Formatter exited zero; the captured bytes are returned verbatim.
    Succeeded(Vec<u8>),
    /// The deadline elapsed before the formatter exited. Any partial
    /// output is discarded.
    TimedOut,
    /// Formatter exited non-zero or could not be spawned.
    Failed(String),
}
