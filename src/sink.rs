//! Result sink (C8): append-only CSV writer, one file per job.

use crate::models::Poi;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Sink {
    results_dir: PathBuf,
}

impl Sink {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.results_dir.join(format!("{task_id}_poi.csv"))
    }

    /// Appends `rows` to the job's CSV file, writing a UTF-8 BOM and header only
    /// the first time the file is created.
    pub fn append(&self, task_id: &str, rows: &[Poi]) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.results_dir)?;
        let path = self.path_for(task_id);
        let is_new = !path.exists();

        if is_new {
            write_bom(&path)?;
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);

        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        Ok(path)
    }
}

fn write_bom(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&[0xEF, 0xBB, 0xBF])?;
    Ok(())
}
