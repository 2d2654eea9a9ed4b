//! Zip archives of parameter storage trees.

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use taskpod_core::StorageData;

/// Archive read or write failure.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry name that would resolve outside the extraction root.
    #[error("Unsafe entry name: {0}")]
    UnsafeName(String),
}

/// One entry of a results archive, in archive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Full entry name; directories end with `/`.
    pub name: String,
    pub is_dir: bool,
    pub data: Vec<u8>,
}

/// Builds an in-memory zip from storage trees.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Add every node of `data`, each named by its absolute storage path.
    pub fn add_storage_data(&mut self, data: &StorageData) -> Result<(), ArchiveError> {
        for id in data.level_order() {
            let name = data.absolute_path(id);
            match data.entry(id).data() {
                None => self.writer.add_directory(format!("{name}/"), self.options)?,
                Some(bytes) => {
                    self.writer.start_file(name, self.options)?;
                    self.writer.write_all(bytes)?;
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.writer.finish()?.into_inner())
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read every entry of `bytes`, in archive order.
///
/// Fails on the first entry whose name is absolute or has a `.` or `..` segment.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.enclosed_name().is_none() || !is_relative_name(file.name()) {
            return Err(ArchiveError::UnsafeName(file.name().to_string()));
        }
        let mut data = Vec::new();
        if !file.is_dir() {
            file.read_to_end(&mut data)?;
        }
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            data,
        });
    }
    Ok(entries)
}

/// Returns true if `name` is a plain relative path of `/`-separated segments.
fn is_relative_name(name: &str) -> bool {
    !name.starts_with('/')
        && !name.contains('\\')
        && name
            .trim_end_matches('/')
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[cfg(test)]
pub(crate) fn zip_of<D: AsRef<[u8]>>(entries: &[(&str, D)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data.as_ref()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
