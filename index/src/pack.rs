//! The transportable packed index.
//!
//! A pack is a gzip-compressed stream of JSON records, one artifact per
//! line, published at `.index/quarry-index.gz` under a repository root.
//! A small properties companion next to it names the index and its
//! generation time, so peers can tell packs apart without decompressing.

use std::io;

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};

use maven_compat::{Coordinates, INDEX_DIR};

/// File name of the packed index inside [`INDEX_DIR`].
pub const PACK_FILE: &str = "quarry-index.gz";

/// File name of the pack's properties companion.
pub const PROPERTIES_FILE: &str = "quarry-index.properties";

/// Repository-relative location of the packed index.
pub fn pack_rel_path() -> String {
    format!("{}/{}", INDEX_DIR, PACK_FILE)
}

/// Repository-relative location of the properties companion.
pub fn properties_rel_path() -> String {
    format!("{}/{}", INDEX_DIR, PROPERTIES_FILE)
}

/// One indexed artifact, as serialized into a pack line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(flatten)]
    pub coords: Coordinates,
    /// Repository-relative path of the artifact file.
    pub path: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
}

/// Serializes and compresses records into pack bytes.
pub async fn write_pack(records: &[IndexRecord]) -> io::Result<Vec<u8>> {
    let mut lines = Vec::new();
    for record in records {
        serde_json::to_writer(&mut lines, record)?;
        lines.push(b'\n');
    }
    let mut encoder = GzipEncoder::new(&lines[..]);
    let mut packed = Vec::new();
    encoder.read_to_end(&mut packed).await?;
    Ok(packed)
}

/// Decompresses and parses a pack. Fails on the first malformed line;
/// a truncated or hand-edited pack is treated as wholly unusable.
pub async fn read_pack<R>(reader: R) -> io::Result<Vec<IndexRecord>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = BufReader::new(GzipDecoder::new(reader)).lines();
    let mut records = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Contents of the properties companion, `key=value` per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackProperties {
    /// Storage key the pack was generated for.
    pub index_id: String,
    /// Generation time, milliseconds since the Unix epoch.
    pub generated: u64,
}

impl PackProperties {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "index.id={}\nindex.generated={}\n",
            self.index_id, self.generated
        )
        .into_bytes()
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut index_id = None;
        let mut generated = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return None;
            };
            match key {
                "index.id" => index_id = Some(value.to_string()),
                "index.generated" => generated = value.parse().ok(),
                _ => {}
            }
        }
        Some(PackProperties {
            index_id: index_id?,
            generated: generated?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(artifact: &str, version: &str) -> IndexRecord {
        IndexRecord {
            coords: Coordinates {
                group_id: "com.example".to_string(),
                artifact_id: artifact.to_string(),
                version: version.to_string(),
                classifier: None,
                extension: "jar".to_string(),
            },
            path: format!(
                "com/example/{artifact}/{version}/{artifact}-{version}.jar"
            ),
            last_modified: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn packs_survive_the_wire() {
        let records = vec![record("widget", "1.0"), record("gadget", "2.1")];
        let packed = write_pack(&records).await.unwrap();
        // Gzip magic, so a peer stores it with the right mime type.
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        let parsed = read_pack(&packed[..]).await.unwrap();
        assert_eq!(parsed, records);
    }

    #[tokio::test]
    async fn empty_packs_parse_to_nothing() {
        let packed = write_pack(&[]).await.unwrap();
        assert_eq!(read_pack(&packed[..]).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        assert!(read_pack(&b"not a gzip stream"[..]).await.is_err());
    }

    #[test]
    fn properties_parse_what_they_print() {
        let props = PackProperties {
            index_id: "releases".to_string(),
            generated: 1_700_000_000_000,
        };
        let text = String::from_utf8(props.to_bytes()).unwrap();
        assert_eq!(PackProperties::parse(&text), Some(props));
    }

    #[test]
    fn properties_tolerate_comments_and_reject_gaps() {
        let parsed = PackProperties::parse(
            "# generated by quarry\nindex.id=dev\nindex.generated=42\n",
        );
        assert_eq!(
            parsed,
            Some(PackProperties {
                index_id: "dev".to_string(),
                generated: 42
            })
        );
        assert_eq!(PackProperties::parse("index.id=dev\n"), None);
    }
}
