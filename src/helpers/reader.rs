use crate::error::SheetSleuthError;
use serde::Deserialize;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum SourceReaderError {
    #[error("Remote inputs are not supported: '{0}'")]
    RemoteInputError(String),

    #[error("Invalid file URL: '{0}'")]
    FileUrlError(String),
}

/// One file submitted for analysis: a path on disk or an in-memory buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Input {
    Path(PathBuf),
    Bytes { name: String, data: Arc<[u8]> },
}

impl Input {
    /// Parses a path or a `file://` URL. Remote URLs are rejected.
    pub fn parse(location: &str) -> Result<Input, SheetSleuthError> {
        match Url::parse(location) {
            // Single-letter schemes are Windows drive letters, not URLs
            Ok(url) if url.scheme().len() > 1 => {
                if url.scheme() == "file" {
                    let path = url
                        .to_file_path()
                        .map_err(|_| SourceReaderError::FileUrlError(location.to_owned()))?;
                    Ok(Input::Path(path))
                } else {
                    Err(SourceReaderError::RemoteInputError(location.to_owned()))?
                }
            }
            _ => Ok(Input::Path(PathBuf::from(location))),
        }
    }

    /// Wraps an in-memory buffer under a display name.
    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Input {
        Input::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Identity reported in results: the path, or the buffer's name.
    pub fn identity(&self) -> String {
        match self {
            Input::Path(path) => path.display().to_string(),
            Input::Bytes { name, .. } => name.to_owned(),
        }
    }

    /// Lower-cased extension of the path or buffer name.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            Input::Path(path) => path.as_path(),
            Input::Bytes { name, .. } => Path::new(name),
        };
        name.extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase())
    }

    /// File stem used to name single-sheet sources such as delimited text.
    pub fn stem(&self) -> String {
        let name = match self {
            Input::Path(path) => path.as_path(),
            Input::Bytes { name, .. } => Path::new(name),
        };
        name.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Sheet1")
            .to_owned()
    }

    /// Size in bytes.
    pub fn size(&self) -> Result<u64, SheetSleuthError> {
        match self {
            Input::Path(path) => Ok(std::fs::metadata(path)?.len()),
            Input::Bytes { data, .. } => Ok(data.len() as u64),
        }
    }

    /// Opens a fresh, independent reader positioned at the start.
    pub(crate) fn open(&self) -> Result<SourceReader, SheetSleuthError> {
        match self {
            Input::Path(path) => Ok(SourceReader::Local(BufReader::new(File::open(path)?))),
            Input::Bytes { data, .. } => Ok(SourceReader::Memory(Cursor::new(data.clone()))),
        }
    }

    /// Reads the whole input into memory.
    pub(crate) fn read_all(&self) -> Result<Arc<[u8]>, SheetSleuthError> {
        match self {
            Input::Path(path) => Ok(std::fs::read(path)?.into()),
            Input::Bytes { data, .. } => Ok(data.clone()),
        }
    }

    /// Detects the container kind from the leading magic bytes.
    pub(crate) fn signature(&self) -> Result<Signature, SheetSleuthError> {
        let mut reader = self.open()?;
        let mut magic = [0u8; 8];
        let mut filled = 0usize;
        while filled < magic.len() {
            let count = reader.read(&mut magic[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        Ok(Signature::detect(&magic[..filled]))
    }
}

/// Container kinds distinguishable from the first bytes of a file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Signature {
    Zip,
    Ole,
    Other,
}

impl Signature {
    pub(crate) fn detect(magic: &[u8]) -> Signature {
        if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") || magic.starts_with(b"PK\x07\x08") {
            Signature::Zip
        } else if magic.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
            Signature::Ole
        } else {
            Signature::Other
        }
    }
}

/// A reader over either a local file or an in-memory buffer.
pub(crate) enum SourceReader {
    Local(BufReader<File>),
    Memory(Cursor<Arc<[u8]>>),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SourceReader::Local(reader) => reader.read(buf),
            SourceReader::Memory(reader) => reader.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            SourceReader::Local(reader) => reader.seek(pos),
            SourceReader::Memory(reader) => reader.seek(pos),
        }
    }
}
