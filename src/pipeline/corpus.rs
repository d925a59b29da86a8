//! The append-only JSONL training corpus.
//!
//! Each line is one chat-format example:
//! `{"messages":[{"role":"user","content":Q},{"role":"assistant","content":A}]}`.
//! The file is only ever opened for append, so successive runs (and manual
//! additions) accumulate in one corpus.

use crate::error::CorpusError;
use crate::pipeline::parse::QaPair;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// One corpus line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub messages: Vec<ChatTurn>,
}

impl TrainingExample {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatTurn { role: Role::User, content: question.into() },
                ChatTurn { role: Role::Assistant, content: answer.into() },
            ],
        }
    }

    /// A user turn followed by a non-empty assistant turn.
    fn is_complete(&self) -> bool {
        matches!(
            self.messages.as_slice(),
            [ChatTurn { role: Role::User, content: q }, ChatTurn { role: Role::Assistant, content: a }]
                if !q.trim().is_empty() && !a.trim().is_empty()
        )
    }
}

impl From<&QaPair> for TrainingExample {
    fn from(pair: &QaPair) -> Self {
        Self::new(pair.question.clone(), pair.answer.clone())
    }
}

/// Result of [`CorpusWriter::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusReport {
    pub lines: usize,
    /// 1-based numbers of lines that are not a complete example.
    pub invalid_lines: Vec<usize>,
}

impl CorpusReport {
    pub fn is_valid(&self) -> bool {
        self.invalid_lines.is_empty()
    }
}

/// Appends examples to one corpus file.
///
/// Appends through the same writer are serialised, so it can be shared
/// across tasks.
#[derive(Debug)]
pub struct CorpusWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CorpusWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `examples`, one per line, and sync to disk. Returns the number
    /// of lines written. An empty slice does not touch the file.
    pub async fn append(&self, examples: &[TrainingExample]) -> Result<usize, CorpusError> {
        if examples.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::with_capacity(examples.len() * 256);
        for example in examples {
            serde_json::to_writer(&mut buf, example)
                .map_err(|e| CorpusError::Internal(format!("serialising example: {e}")))?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.write_error(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.write_error(e))?;
        file.write_all(&buf).await.map_err(|e| self.write_error(e))?;
        file.flush().await.map_err(|e| self.write_error(e))?;
        file.sync_data().await.map_err(|e| self.write_error(e))?;

        debug!("Appended {} examples to {}", examples.len(), self.path.display());
        Ok(examples.len())
    }

    /// Append one hand-written example.
    pub async fn append_pair(&self, question: &str, answer: &str) -> Result<usize, CorpusError> {
        let (question, answer) = (question.trim(), answer.trim());
        if question.is_empty() || answer.is_empty() {
            return Err(CorpusError::InvalidConfig(
                "question and answer must both be non-empty".into(),
            ));
        }
        self.append(&[TrainingExample::new(question, answer)]).await
    }

    /// Scan the corpus and report lines that are not complete examples.
    /// A missing file is an empty corpus.
    pub async fn verify(&self) -> Result<CorpusReport, CorpusError> {
        let _guard = self.lock.lock().await;

        let file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CorpusReport::default()),
            Err(e) => return Err(self.write_error(e)),
        };

        let mut report = CorpusReport::default();
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await.map_err(|e| self.write_error(e))? {
            report.lines += 1;
            let valid = serde_json::from_str::<TrainingExample>(&line)
                .map(|ex| ex.is_complete())
                .unwrap_or(false);
            if !valid {
                report.invalid_lines.push(report.lines);
            }
        }
        Ok(report)
    }

    pub async fn line_count(&self) -> Result<usize, CorpusError> {
        Ok(self.verify().await?.lines)
    }

    fn write_error(&self, source: std::io::Error) -> CorpusError {
        CorpusError::CorpusWrite { path: self.path.clone(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair(q: &str, a: &str) -> QaPair {
        QaPair { question: q.into(), answer: a.into(), chunk_index: 0 }
    }

    #[test]
    fn example_serialises_chat_format() {
        let line = serde_json::to_string(&TrainingExample::from(&pair("Q?", "A."))).unwrap();
        assert_eq!(
            line,
            r#"{"messages":[{"role":"user","content":"Q?"},{"role":"assistant","content":"A."}]}"#
        );
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("training_data/training_examples.jsonl");
        let writer = CorpusWriter::new(&path);

        let written = tokio_test::block_on(writer.append(&[
            TrainingExample::from(&pair("Q1", "A1")),
            TrainingExample::from(&pair("Q2", "A2")),
        ]))
        .unwrap();

        assert_eq!(written, 2);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));
    }

    #[tokio::test]
    async fn appends_never_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        std::fs::write(&path, "{\"messages\":[{\"role\":\"user\",\"content\":\"old\"},{\"role\":\"assistant\",\"content\":\"kept\"}]}\n").unwrap();

        let writer = CorpusWriter::new(&path);
        writer.append(&[TrainingExample::new("Q", "A")]).await.unwrap();
        writer.append_pair("Manual?", "Yes.").await.unwrap();

        assert_eq!(writer.line_count().await.unwrap(), 3);
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"kept\""));
    }

    #[tokio::test]
    async fn empty_append_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.jsonl");
        assert_eq!(CorpusWriter::new(&path).append(&[]).await.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn blank_manual_pair_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = CorpusWriter::new(dir.path().join("c.jsonl"));
        assert!(writer.append_pair("  ", "A").await.is_err());
    }

    #[tokio::test]
    async fn verify_flags_bad_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let good = serde_json::to_string(&TrainingExample::new("Q", "A")).unwrap();
        let swapped = r#"{"messages":[{"role":"assistant","content":"A"},{"role":"user","content":"Q"}]}"#;
        std::fs::write(&path, format!("{good}\nnot json\n{swapped}\n{good}\n")).unwrap();

        let report = CorpusWriter::new(&path).verify().await.unwrap();
        assert_eq!(report.lines, 4);
        assert_eq!(report.invalid_lines, vec![2, 3]);
        assert!(!report.is_valid());
    }

    #[tokio::test]
    async fn missing_corpus_is_empty() {
        let dir = TempDir::new().unwrap();
        let writer = CorpusWriter::new(dir.path().join("absent.jsonl"));
        assert_eq!(writer.line_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unwritable_destination_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // Parent "directory" is a regular file.
        let writer = CorpusWriter::new(blocker.join("corpus.jsonl"));
        let err = writer.append(&[TrainingExample::new("Q", "A")]).await.unwrap_err();
        assert!(matches!(err, CorpusError::CorpusWrite { .. }));
    }
}
