use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::document::Document;

pub struct LetterReader;

impl LetterReader {
    pub async fn read_file(path: &Path) -> Result<Document> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        if extension != "txt" {
            anyhow::bail!("Unsupported letter format: {:?}", path);
        }

        let patient_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .with_context(|| format!("Letter file has no usable name: {:?}", path))?;

        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read letter: {:?}", path))?;

        Ok(Document::new(patient_id, text))
    }

    /// Read every `*.txt` letter in `dir`, ordered by file name.
    pub async fn read_directory(dir: &Path) -> Result<Vec<Document>> {
        let mut paths: Vec<PathBuf> = Vec::new();

        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list directory: {:?}", dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
                paths.push(path);
            }
        }

        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(Self::read_file(&path).await?);
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_file_uses_stem_as_patient_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patient-42.txt");
        std::fs::write(&path, "Aspirin 100mg daily").unwrap();

        let doc = LetterReader::read_file(&path).await.unwrap();

        assert_eq!(doc.patient_id(), "patient-42");
        assert_eq!(doc.text(), "Aspirin 100mg daily");
    }

    #[tokio::test]
    async fn test_read_directory_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let docs = LetterReader::read_directory(dir.path()).await.unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.patient_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rejects_non_txt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.pdf");
        std::fs::write(&path, "binary").unwrap();

        assert!(LetterReader::read_file(&path).await.is_err());
    }
}
