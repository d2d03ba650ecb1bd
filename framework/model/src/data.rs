use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::ModelError;

/// One record of a data source: column name to value.
pub type DataRow = HashMap<String, String>;

/// Tabular data backing a data-driven scenario. Each row produces one
/// independent run with its own execution context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<DataRow>,
}

impl DataTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ModelError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let columns: Vec<String> = csv_reader
            .headers()
            .map_err(|e| ModelError::DataSource(e.to_string()))?
            .iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| ModelError::DataSource(e.to_string()))?;
            rows.push(
                columns
                    .iter()
                    .cloned()
                    .zip(record.iter().map(String::from))
                    .collect(),
            );
        }

        Ok(Self { columns, rows })
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
