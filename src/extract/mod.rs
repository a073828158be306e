// src/extract/mod.rs

use async_trait::async_trait;
use csv::ReaderBuilder;
use std::{
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::ExtractError;
use crate::plan::RowDataset;

/// Which part of the document a dataset is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// First page, stream mode: the title lines carrying the date.
    Header,
    /// All pages, lattice mode: the ruled substitution table.
    Body,
}

impl Region {
    fn tabula_args(self) -> [&'static str; 3] {
        match self {
            Region::Header => ["-t", "-p", "1"],
            Region::Body => ["-l", "-p", "all"],
        }
    }
}

/// Turns a fetched document into rows of text cells.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract(&self, pdf: &Path, region: Region) -> Result<RowDataset, ExtractError>;
}

/// Runs the tabula jar and reads back the CSV it writes.
#[derive(Debug, Clone)]
pub struct TabulaExtractor {
    pub java: String,
    pub jar: PathBuf,
    pub header_csv: PathBuf,
    pub body_csv: PathBuf,
}

impl TabulaExtractor {
    fn output_for(&self, region: Region) -> &Path {
        match region {
            Region::Header => &self.header_csv,
            Region::Body => &self.body_csv,
        }
    }
}

#[async_trait]
impl TableExtractor for TabulaExtractor {
    #[instrument(level = "info", skip(self, pdf), fields(pdf = %pdf.display()))]
    async fn extract(&self, pdf: &Path, region: Region) -> Result<RowDataset, ExtractError> {
        let out_csv = self.output_for(region);
        // a run that exits cleanly without writing must not surface old rows
        match tokio::fs::remove_file(out_csv).await {
            Ok(()) => debug!(path = %out_csv.display(), "removed previous output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ExtractError::Read {
                    path: out_csv.to_path_buf(),
                    source,
                })
            }
        }

        let output = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .args(["-a", "%0,0,100,100"])
            .args(region.tabula_args())
            .arg("-o")
            .arg(out_csv)
            .arg(pdf)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: self.java.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let file = File::open(out_csv).map_err(|source| ExtractError::Read {
            path: out_csv.to_path_buf(),
            source,
        })?;
        let rows = read_rows(file)?;
        info!(?region, rows = rows.len(), "extracted table");
        Ok(rows)
    }
}

/// Read headerless CSV of any shape into a dataset, keeping every record in order.
pub fn read_rows<R: Read>(reader: R) -> Result<RowDataset, ExtractError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // records carry different field counts
        .from_reader(reader);

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        debug!(record = idx, fields = record.len(), "csv record");
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RowDataset::new(rows))
}
