pub mod document;
pub mod reader;

pub use document::Document;
pub use reader::LetterReader;

use anyhow::Result;
use std::path::Path;

/// Load letters from a single `.txt` file or from every `.txt` file in a directory
pub async fn load_letters(path: &Path) -> Result<Vec<Document>> {
    if path.is_file() {
        let doc = LetterReader::read_file(path).await?;
        return Ok(vec![doc]);
    }

    if path.is_dir() {
        let docs = LetterReader::read_directory(path).await?;
        if docs.is_empty() {
            anyhow::bail!("No .txt letters found in directory: {:?}", path);
        }
        tracing::info!(count = docs.len(), dir = ?path, "Loaded letters");
        return Ok(docs);
    }

    anyhow::bail!("Path is neither a file nor a directory: {:?}", path)
}
