//! Input file unpacking.
//!
//! Files arrive either as a single delimited text file or as a gzip-compressed
//! tarball with one or more members. Dispatch is purely on the file name suffix.

use super::error::IngestError;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use tar::{Archive, EntryType};

/// Supported input layouts, derived from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    TarGz,
    Delimited,
}

impl InputFormat {
    pub fn detect(file_name: &str) -> Result<Self, IngestError> {
        if file_name.ends_with(".tar.gz") {
            Ok(InputFormat::TarGz)
        } else if file_name.ends_with(".txt") || file_name.ends_with(".csv") {
            Ok(InputFormat::Delimited)
        } else {
            Err(IngestError::UnsupportedFormat(file_name.to_string()))
        }
    }
}

/// Split raw bytes into named member files.
///
/// Plain text inputs come back as a single entry keyed by `file_name`.
pub fn extract(data: Vec<u8>, file_name: &str) -> Result<BTreeMap<String, Vec<u8>>, IngestError> {
    match InputFormat::detect(file_name)? {
        InputFormat::TarGz => extract_tar_gz(&data, file_name),
        InputFormat::Delimited => Ok(BTreeMap::from([(file_name.to_string(), data)])),
    }
}

fn extract_tar_gz(data: &[u8], file_name: &str) -> Result<BTreeMap<String, Vec<u8>>, IngestError> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let mut files = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|e| IngestError::corrupt(file_name, format!("failed to read tar header: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| IngestError::corrupt(file_name, format!("failed to read tar header: {e}")))?;

        if entry.header().entry_type() == EntryType::Directory {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| IngestError::corrupt(file_name, format!("invalid member path: {e}")))?
            .to_string_lossy()
            .into_owned();

        // Header sizes are untrusted; never reserve memory from them.
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| IngestError::corrupt(file_name, format!("failed to read {name}: {e}")))?;
        let claimed = entry.size();
        if content.len() as u64 != claimed {
            let reason = format!("{name} truncated: header claims {claimed} bytes, read {}", content.len());
            return Err(IngestError::corrupt(file_name, reason));
        }

        files.insert(name, content);
    }

    Ok(files)
}
