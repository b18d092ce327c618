//! Persisted merged dataset (CSV keyed by restaurant and date)

use crate::types::DailyRecord;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write the dataset, replacing any previous file atomically.
/// Returns the SHA-256 of the written content.
pub fn write_dataset(path: &Path, records: &[DailyRecord]) -> Result<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating dataset directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer.into_inner().context("flushing dataset CSV")?;

    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, &bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;

    let hash = sha256_hex(&bytes);
    info!(path = %path.display(), rows = records.len(), sha256 = %&hash[..12], "Dataset written");
    Ok(hash)
}

pub fn read_dataset(path: &Path) -> Result<Vec<DailyRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening dataset {}", path.display()))?;
    let mut records = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let record: DailyRecord =
            row.with_context(|| format!("dataset {} row {}", path.display(), i + 2))?;
        records.push(record);
    }
    Ok(records)
}

/// SHA-256 of the dataset file content, lowercase hex
pub fn dataset_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
