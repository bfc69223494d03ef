//! Flat CSV persistence for embedding galleries and attendance tables.
//!
//! Embedding table: `label,source_path,emb_0,...,emb_{D-1}`, one row per
//! gallery entry. Floats are written in shortest round-trip form, so a
//! reload reproduces every component exactly.
//!
//! Attendance table: `name,attendance`.

use crate::attendance::{AttendanceRecord, AttendanceStatus};
use crate::error::MatchError;
use crate::gallery::{Gallery, GalleryEntry};
use crate::types::Embedding;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {reason}")]
    Malformed { row: usize, reason: String },
    #[error(transparent)]
    Gallery(#[from] MatchError),
}

/// Write every gallery entry as one CSV row.
pub fn write_embeddings<W: Write>(writer: W, gallery: &Gallery) -> Result<(), TableError> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["label".to_string(), "source_path".to_string()];
    header.extend((0..gallery.dim()).map(|i| format!("emb_{i}")));
    csv.write_record(&header)?;

    for entry in gallery.entries() {
        let mut row = Vec::with_capacity(gallery.dim() + 2);
        row.push(entry.label);
        row.push(
            entry
                .source
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        row.extend(entry.embedding.values().iter().map(f32::to_string));
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Read an embedding table back into a gallery (rows in file order).
pub fn read_embeddings<R: Read>(reader: R) -> Result<Gallery, TableError> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut entries = Vec::new();

    for (i, record) in csv.records().enumerate() {
        let record = record?;
        let row = i + 1;
        if record.len() < 3 {
            return Err(TableError::Malformed {
                row,
                reason: format!("expected label, source and embedding columns, got {} fields", record.len()),
            });
        }
        let values = record
            .iter()
            .skip(2)
            .map(|field| {
                field.trim().parse::<f32>().map_err(|e| TableError::Malformed {
                    row,
                    reason: format!("bad embedding component {field:?}: {e}"),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        let mut entry = GalleryEntry::new(&record[0], Embedding::new(values));
        if !record[1].is_empty() {
            entry.source = Some(PathBuf::from(&record[1]));
        }
        entries.push(entry);
    }

    Ok(Gallery::build(entries)?)
}

pub fn save_embeddings(path: &Path, gallery: &Gallery) -> Result<(), TableError> {
    let file = std::fs::File::create(path)?;
    write_embeddings(std::io::BufWriter::new(file), gallery)?;
    tracing::info!(path = %path.display(), entries = gallery.len(), dim = gallery.dim(), "saved embedding table");
    Ok(())
}

pub fn load_embeddings(path: &Path) -> Result<Gallery, TableError> {
    let file = std::fs::File::open(path)?;
    let gallery = read_embeddings(std::io::BufReader::new(file))?;
    tracing::info!(path = %path.display(), entries = gallery.len(), dim = gallery.dim(), "loaded embedding table");
    Ok(gallery)
}

pub fn write_attendance<W: Write>(writer: W, records: &[AttendanceRecord]) -> Result<(), TableError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["name", "attendance"])?;
    for record in records {
        csv.write_record([record.name.as_str(), record.attendance.as_str()])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn read_attendance<R: Read>(reader: R) -> Result<Vec<AttendanceRecord>, TableError> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(TableError::Malformed {
                row: i + 1,
                reason: format!("expected 2 fields, got {}", record.len()),
            });
        }
        let attendance = record[1]
            .parse::<AttendanceStatus>()
            .map_err(|reason| TableError::Malformed { row: i + 1, reason })?;
        records.push(AttendanceRecord {
            name: record[0].to_string(),
            attendance,
        });
    }
    Ok(records)
}

/// Write the attendance table to `path`, replacing any previous file.
pub fn save_attendance(path: &Path, records: &[AttendanceRecord]) -> Result<(), TableError> {
    let file = std::fs::File::create(path)?;
    write_attendance(std::io::BufWriter::new(file), records)?;
    tracing::info!(path = %path.display(), records = records.len(), "saved attendance table");
    Ok(())
}

pub fn load_attendance(path: &Path) -> Result<Vec<AttendanceRecord>, TableError> {
    let file = std::fs::File::open(path)?;
    read_attendance(std::io::BufReader::new(file))
}
