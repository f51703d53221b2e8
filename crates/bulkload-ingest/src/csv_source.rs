//! Upload decoding and header-driven CSV row extraction

use std::fmt;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Dataset-level failure to turn an upload into text
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} is not valid UTF-8: {source}")]
    Decode {
        name: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("{name} has an unreadable header row: {source}")]
    Header {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("{name} has no header row")]
    MissingHeader { name: String },
}

enum Content {
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// Opened on first read so an unreadable path is a dataset-level error
    Path(PathBuf),
}

/// One uploaded dataset: a readable byte stream plus a display name
pub struct InputFile {
    name: String,
    content: Content,
}

impl InputFile {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(name, std::io::Cursor::new(bytes.into()))
    }

    pub fn from_reader(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            content: Content::Stream(Box::new(reader)),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            name: path.display().to_string(),
            content: Content::Path(path.to_path_buf()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain the stream and decode it as UTF-8 without a leading BOM
    pub async fn read_text(self) -> Result<String, SourceError> {
        let read = match self.content {
            Content::Stream(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await.map(|_| bytes)
            },
            Content::Path(path) => tokio::fs::read(&path).await,
        };
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(source) => {
                return Err(SourceError::Read {
                    name: self.name,
                    source,
                })
            },
        };
        decode(bytes).map_err(|source| SourceError::Decode {
            name: self.name,
            source,
        })
    }
}

impl fmt::Debug for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFile").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Strict UTF-8 decoding; a single leading byte-order mark is dropped
pub fn decode(mut bytes: Vec<u8>) -> Result<String, std::string::FromUtf8Error> {
    if bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }
    String::from_utf8(bytes)
}

/// A data line keyed by the header row, in column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Line number in the source file (the header is line 1)
    pub line: u64,
    pub fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new<K, V>(line: u64, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            line,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Value of the first column whose header matches any of `names`
    pub fn get(&self, names: &[&str]) -> Option<&str> {
        self.fields
            .iter()
            .find(|(column, _)| names.contains(&column.as_str()))
            .map(|(_, value)| value.as_str())
    }

    /// Like [`RawRow::get`] but treats an empty value as absent
    pub fn non_empty(&self, names: &[&str]) -> Option<&str> {
        self.get(names).filter(|value| !value.is_empty())
    }
}

impl fmt::Display for RawRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (column, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        f.write_str("}")
    }
}

/// A data line the CSV reader could not split into fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub line: u64,
    pub reason: String,
}

/// Split decoded text into header-keyed rows
///
/// Short lines yield rows without the trailing columns, surplus fields are
/// dropped, blank lines are not rows. Values are kept byte-for-byte. Input
/// without a single named column is rejected whole.
pub fn parse_rows(name: &str, text: &str) -> Result<Vec<Result<RawRow, MalformedRow>>, SourceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| SourceError::Header {
            name: name.to_string(),
            source,
        })?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(SourceError::MissingHeader { name: name.to_string() });
    }

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        match result {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 2);
                rows.push(Ok(RawRow::new(line, headers.iter().zip(record.iter()))));
            },
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(index as u64 + 2);
                rows.push(Err(MalformedRow {
                    line,
                    reason: e.to_string(),
                }));
            },
        }
    }

    tracing::debug!(source = name, rows = rows.len(), columns = headers.len(), "Parsed CSV rows");
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn rows(text: &str) -> Vec<RawRow> {
        parse_rows("test.csv", text)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_decode_strips_single_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"id,name\n");
        assert_eq!(decode(bytes).unwrap(), "id,name\n");

        let mut twice = UTF8_BOM.repeat(2);
        twice.extend_from_slice(b"id");
        assert_eq!(decode(twice).unwrap(), "\u{feff}id");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(decode(vec![b'i', b'd', 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_parse_rows_keys_by_header() {
        let parsed = rows("id,name,email\nu1,Ann,a@x.com\nu2,Bob,b@x.com\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].get(&["id"]), Some("u1"));
        assert_eq!(parsed[1].get(&["email"]), Some("b@x.com"));
        assert_eq!(parsed[0].line, 2);
        assert_eq!(parsed[1].line, 3);
    }

    #[test]
    fn test_parse_rows_short_and_long_lines() {
        let parsed = rows(" id , name ,email\nu1,Ann\nu2,Bob,b@x.com,extra\n");
        assert_eq!(parsed[0].get(&["email"]), None);
        assert_eq!(parsed[0].get(&["name"]), Some("Ann"));
        assert_eq!(parsed[1].fields.len(), 3);
    }

    #[test]
    fn test_values_are_not_trimmed() {
        let parsed = rows("id,name\n u1 ,Ann\n");
        assert_eq!(parsed[0].get(&["id"]), Some(" u1 "));
    }

    #[test]
    fn test_header_only_input_has_no_rows() {
        assert!(rows("id,name\n").is_empty());
    }

    #[test]
    fn test_input_without_header_is_rejected() {
        for text in ["", "\n\n", ",,\n"] {
            let err = parse_rows("items.csv", text).unwrap_err();
            assert!(matches!(err, SourceError::MissingHeader { .. }), "{text:?}");
            assert_eq!(err.to_string(), "items.csv has no header row");
        }
    }

    #[test]
    fn test_aliases_and_non_empty() {
        let row = RawRow::new(2, [("id", "r1"), ("entityRef", "u1"), ("quantity", "")]);
        assert_eq!(row.get(&["entity_ref", "entityRef"]), Some("u1"));
        assert_eq!(row.get(&["quantity"]), Some(""));
        assert_eq!(row.non_empty(&["quantity"]), None);
        assert_eq!(row.to_string(), "{id=r1, entityRef=u1, quantity=}");
    }

    #[tokio::test]
    async fn test_input_file_read_text() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("id,name\nu1,Zoë\n".as_bytes());
        let file = InputFile::from_bytes("entities.csv", bytes);
        assert_eq!(file.name(), "entities.csv");
        assert_eq!(file.read_text().await.unwrap(), "id,name\nu1,Zoë\n");
    }

    #[tokio::test]
    async fn test_input_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.csv");
        std::fs::write(&path, "id,name,email\n").unwrap();

        assert_eq!(InputFile::from_path(&path).read_text().await.unwrap(), "id,name,email\n");

        let missing = InputFile::from_path(dir.path().join("absent.csv"));
        let err = missing.read_text().await.unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
        assert!(err.to_string().contains("absent.csv"));
    }

    #[tokio::test]
    async fn test_input_file_decode_error_names_source() {
        let file = InputFile::from_bytes("items.csv", vec![0xc3, 0x28]);
        let err = file.read_text().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
        assert!(err.to_string().starts_with("items.csv is not valid UTF-8"));
    }
}
