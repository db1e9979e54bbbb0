use crate::codec::{self, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};
use crate::notes::NoteNames;
use std::str::FromStr;

/// How the `ETag` header is altered on compressed responses.
///
/// A compressed representation must not share a strong validator with the
/// identity one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum EtagMode {
    /// Insert `-zstd` before the closing quote.
    #[default]
    AddSuffix,
    /// Leave the header untouched.
    NoChange,
    /// Drop the header.
    Remove,
}

impl FromStr for EtagMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("AddSuffix") {
            Ok(EtagMode::AddSuffix)
        } else if s.eq_ignore_ascii_case("NoChange") {
            Ok(EtagMode::NoChange)
        } else if s.eq_ignore_ascii_case("Remove") {
            Ok(EtagMode::Remove)
        } else {
            Err(Error::Config(
                "ZstdAlterETag accepts only 'AddSuffix', 'NoChange' and 'Remove'".to_string(),
            ))
        }
    }
}

impl TryFrom<String> for EtagMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Which total a note name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    /// Output size as a percentage of input size.
    Ratio,
    /// Uncompressed byte count.
    Input,
    /// Compressed byte count.
    Output,
}

impl FromStr for NoteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("Ratio") {
            Ok(NoteKind::Ratio)
        } else if s.eq_ignore_ascii_case("Input") {
            Ok(NoteKind::Input)
        } else if s.eq_ignore_ascii_case("Output") {
            Ok(NoteKind::Output)
        } else {
            Err(Error::Config(format!("Unknown ZstdFilterNote type '{s}'")))
        }
    }
}

/// Server-wide settings for the zstd filter.
///
/// Built once at startup and shared read-only by every request, usually
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "ConfigFile")]
pub struct ZstdConfig {
    compression_level: i32,
    workers: u32,
    etag_mode: EtagMode,
    notes: NoteNames,
}

impl ZstdConfig {
    /// Creates a configuration with level 15, one zstd worker per CPU,
    /// `AddSuffix` ETag handling and no notes.
    pub fn new() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            workers: num_cpus::get() as u32,
            etag_mode: EtagMode::default(),
            notes: NoteNames::default(),
        }
    }

    /// Sets the compression level, rejecting values outside the range the
    /// linked zstd supports.
    pub fn level(mut self, level: i32) -> Result<Self> {
        let range = codec::level_range();
        if !range.contains(&level) {
            return Err(level_error());
        }
        self.compression_level = level;
        Ok(self)
    }

    /// Sets the number of zstd worker threads. `0` compresses on the calling thread.
    pub fn workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    /// Sets how `ETag` headers are altered.
    pub fn etag_mode(mut self, mode: EtagMode) -> Self {
        self.etag_mode = mode;
        self
    }

    /// Records the given total under `name` at the end of each compressed response.
    pub fn note(mut self, kind: NoteKind, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match kind {
            NoteKind::Ratio => self.notes.ratio = name,
            NoteKind::Input => self.notes.input = name,
            NoteKind::Output => self.notes.output = name,
        }
        self
    }

    /// Applies a single `Zstd*` directive.
    ///
    /// Supported directives:
    /// - `ZstdCompressionLevel <level>`
    /// - `ZstdAlterETag AddSuffix|NoChange|Remove`
    /// - `ZstdFilterNote [Ratio|Input|Output] <name>`; with a single argument
    ///   the name is used for the ratio.
    pub fn apply_directive(&mut self, name: &str, args: &[&str]) -> Result<()> {
        if name.eq_ignore_ascii_case("ZstdCompressionLevel") {
            let [arg] = args else {
                return Err(arity_error(name, "one argument"));
            };
            let level = arg.trim().parse::<i32>().map_err(|_| level_error())?;
            *self = self.clone().level(level)?;
        } else if name.eq_ignore_ascii_case("ZstdAlterETag") {
            let [arg] = args else {
                return Err(arity_error(name, "one argument"));
            };
            self.etag_mode = arg.parse()?;
        } else if name.eq_ignore_ascii_case("ZstdFilterNote") {
            *self = match args {
                [note] => self.clone().note(NoteKind::Ratio, *note),
                [kind, note] => self.clone().note(kind.parse()?, *note),
                _ => return Err(arity_error(name, "one or two arguments")),
            };
        } else {
            return Err(Error::Config(format!("Unknown directive '{name}'")));
        }
        Ok(())
    }

    /// Returns the configured compression level.
    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// Returns the configured zstd worker count.
    pub fn worker_count(&self) -> u32 {
        self.workers
    }

    /// Returns the ETag policy.
    pub fn etag_policy(&self) -> EtagMode {
        self.etag_mode
    }

    /// Returns the configured note names.
    pub fn note_names(&self) -> &NoteNames {
        &self.notes
    }
}

impl Default for ZstdConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialized form of [`ZstdConfig`], validated on conversion.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    compression_level: Option<i32>,
    workers: Option<u32>,
    etag_mode: EtagMode,
    notes: NoteNames,
}

impl TryFrom<ConfigFile> for ZstdConfig {
    type Error = Error;

    fn try_from(file: ConfigFile) -> Result<Self> {
        let mut config = ZstdConfig::new();
        if let Some(level) = file.compression_level {
            config = config.level(level)?;
        }
        if let Some(workers) = file.workers {
            config = config.workers(workers);
        }
        config.etag_mode = file.etag_mode;
        config.notes = file.notes;
        Ok(config)
    }
}

fn level_error() -> Error {
    let range = codec::level_range();
    Error::Config(format!(
        "ZstdCompressionLevel must be between {} and {}",
        range.start(),
        range.end()
    ))
}

fn arity_error(name: &str, expected: &str) -> Error {
    Error::Config(format!("{name} takes {expected}"))
}
