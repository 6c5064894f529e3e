//! File-backed companion link
//!
//! Stands in for the wearable transport: every cycle summary is appended to
//! a file as one JSON object per line, which a bridge process can tail.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jetfinder_core::{CompanionSync, CycleSummary};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub struct JsonLinesCompanion {
    path: PathBuf,
}

impl JsonLinesCompanion {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl CompanionSync for JsonLinesCompanion {
    async fn send_data(&self, summary: CycleSummary) -> jetfinder_core::Result<()> {
        let mut line = serde_json::to_string(&summary)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
