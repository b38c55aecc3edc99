use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;

pub const PATIENT_ID_COLUMN: &str = "patient_id";

/// Separator for list values inside a single cell
pub const LIST_SEPARATOR: &str = ";";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    /// One sub-directory per patient instead of one shared file per task
    pub split_patient: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            split_patient: false,
        }
    }
}

/// Append-only CSV output, one file per task
pub struct CsvSink {
    config: StorageConfig,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl CsvSink {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn output_path(&self, task: &str, patient_id: &str) -> PathBuf {
        let mut dir = self.config.base_dir.clone();
        if self.config.split_patient {
            dir.push(URL_SAFE.encode(patient_id.as_bytes()));
        }
        dir.join(format!("{}.csv", task))
    }

    /// Append one row per record, writing the header only when the file is new or empty.
    ///
    /// Returns the output path even when there is nothing to write.
    pub async fn append<T: Serialize>(
        &self,
        task: &str,
        patient_id: &str,
        records: &[T],
    ) -> Result<PathBuf, StorageError> {
        let path = self.output_path(task, patient_id);

        if records.is_empty() {
            debug!(task = task, patient_id = patient_id, "No records to store");
            return Ok(path);
        }

        let rows = records
            .iter()
            .map(|record| to_row(record, patient_id))
            .collect::<Result<Vec<_>, String>>()
            .map_err(|reason| StorageError::Encode { path: path.clone(), reason })?;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::CreateDir { path: dir.to_path_buf(), source })?;
        }

        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::Open { path: path.clone(), source })?;

        // An empty file still needs its header, e.g. after an interrupted run
        let is_new = file
            .metadata()
            .await
            .map_err(|source| StorageError::Open { path: path.clone(), source })?
            .len()
            == 0;
        let bytes = encode(&rows, is_new).map_err(|reason| StorageError::Encode {
            path: path.clone(),
            reason,
        })?;

        file.write_all(&bytes)
            .await
            .map_err(|source| StorageError::Write { path: path.clone(), source })?;
        file.flush()
            .await
            .map_err(|source| StorageError::Write { path: path.clone(), source })?;

        info!(
            task = task,
            patient_id = patient_id,
            rows = rows.len(),
            header = is_new,
            path = %path.display(),
            "Stored records"
        );

        Ok(path)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Column names and cell values for one record, `patient_id` last
fn to_row<T: Serialize>(record: &T, patient_id: &str) -> Result<Vec<(String, String)>, String> {
    let mut fields: Map<String, Value> = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return Err(format!("record is not a struct: {}", other)),
        Err(e) => return Err(e.to_string()),
    };

    fields.shift_remove(PATIENT_ID_COLUMN);
    fields.insert(PATIENT_ID_COLUMN.to_string(), Value::String(patient_id.to_string()));

    Ok(fields.into_iter().map(|(k, v)| (k, cell(&v))).collect())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(cell)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        other => other.to_string(),
    }
}

fn encode(rows: &[Vec<(String, String)>], with_header: bool) -> Result<Vec<u8>, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    if with_header {
        if let Some(first) = rows.first() {
            writer
                .write_record(first.iter().map(|(name, _)| name))
                .map_err(|e| e.to_string())?;
        }
    }
    for row in rows {
        writer
            .write_record(row.iter().map(|(_, value)| value))
            .map_err(|e| e.to_string())?;
    }

    writer.into_inner().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Row {
        name: String,
        dose: f64,
        atc_codes: Vec<String>,
        note: Option<String>,
    }

    fn row(name: &str, dose: f64, codes: &[&str]) -> Row {
        Row {
            name: name.to_string(),
            dose,
            atc_codes: codes.iter().map(|c| c.to_string()).collect(),
            note: None,
        }
    }

    fn sink(dir: &TempDir, split_patient: bool) -> CsvSink {
        CsvSink::new(StorageConfig {
            base_dir: dir.path().to_path_buf(),
            split_patient,
        })
    }

    #[tokio::test]
    async fn test_header_then_rows() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, false);

        let path = sink
            .append(
                "medication",
                "p1",
                &[row("Aspirin", 100.0, &["B01AC06", "N02BA01"]), row("Ibuprofen", 400.0, &[])],
            )
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("medication.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "name,dose,atc_codes,note,patient_id\n\
             Aspirin,100.0,B01AC06;N02BA01,,p1\n\
             Ibuprofen,400.0,,,p1\n"
        );
    }

    #[tokio::test]
    async fn test_second_append_has_no_header() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, false);

        sink.append("medication", "p1", &[row("Aspirin", 100.0, &[])]).await.unwrap();
        let path = sink
            .append("medication", "p2", &[row("Metformin, retard", 500.0, &[])])
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "name,dose,atc_codes,note,patient_id");
        assert_eq!(lines[2], "\"Metformin, retard\",500.0,,,p2");
    }

    #[tokio::test]
    async fn test_own_patient_id_field_keeps_column_order() {
        #[derive(Serialize)]
        struct Labelled {
            name: String,
            patient_id: String,
            dose: f64,
            unit: String,
        }

        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, false);
        let record = Labelled {
            name: "Aspirin".to_string(),
            patient_id: "ignored".to_string(),
            dose: 100.0,
            unit: "mg".to_string(),
        };

        let path = sink.append("medication", "p1", &[record]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "name,dose,unit,patient_id\nAspirin,100.0,mg,p1\n");
    }

    #[tokio::test]
    async fn test_existing_empty_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, false);
        std::fs::write(dir.path().join("medication.csv"), "").unwrap();

        let path = sink.append("medication", "p1", &[row("Aspirin", 100.0, &[])]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "name,dose,atc_codes,note,patient_id\nAspirin,100.0,,,p1\n");
    }

    #[tokio::test]
    async fn test_empty_records_write_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, false);

        let path = sink.append::<Row>("diagnosis", "p1", &[]).await.unwrap();

        assert_eq!(path, dir.path().join("diagnosis.csv"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_split_patient_uses_encoded_directory() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir, true);

        let path = sink
            .append("procedure", "patient/01", &[row("CT", 1.0, &[])])
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("cGF0aWVudC8wMQ==").join("procedure.csv"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(sink(&dir, false));

        let mut handles = Vec::new();
        for i in 0..8 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let records: Vec<Row> = (0..5).map(|j| row(&format!("drug-{}-{}", i, j), 1.0, &[])).collect();
                sink.append("medication", &format!("p{}", i), &records).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("medication.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 41);
        assert_eq!(lines.iter().filter(|l| l.starts_with("name,")).count(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_base_dir_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let sink = CsvSink::new(StorageConfig {
            base_dir: blocker.join("nested"),
            split_patient: false,
        });
        let err = sink.append("medication", "p1", &[row("Aspirin", 1.0, &[])]).await.unwrap_err();

        assert!(matches!(err, StorageError::CreateDir { .. }));
    }
}
