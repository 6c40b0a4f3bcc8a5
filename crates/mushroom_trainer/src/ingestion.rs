//! Data ingestion: fetch the dataset archive and unpack it
//!
//! The archive is downloaded only when it is not already on disk, so a rerun
//! (or a run with a pre-seeded archive) never touches the network. Extraction
//! always runs and overwrites the unpacked files with identical bytes.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mushroom_core::{
    write_atomic, ArtifactKind, ArtifactStore, DataIngestionConfig, PipelineError, Result,
    StageName,
};
use tracing::{debug, info, warn};
use url::Url;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const GDRIVE_DOWNLOAD_BASE: &str = "https://drive.google.com/uc";

/// Where the dataset archive comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    GoogleDrive { file_id: String },
}

impl SourceLocator {
    /// Recognize a share link; anything else is `SourceUnsupported`.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| PipelineError::SourceUnsupported(format!("{raw}: {e}")))?;

        if url.host_str() != Some("drive.google.com") {
            return Err(PipelineError::SourceUnsupported(raw.to_string()));
        }

        // https://drive.google.com/file/d/<id>/view
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        if let Some(pos) = segments.iter().position(|s| *s == "d") {
            if let Some(id) = segments.get(pos + 1).filter(|id| !id.is_empty()) {
                return Ok(SourceLocator::GoogleDrive {
                    file_id: id.to_string(),
                });
            }
        }

        // https://drive.google.com/open?id=<id> and uc?id=<id>
        if let Some((_, id)) = url.query_pairs().find(|(k, v)| k == "id" && !v.is_empty()) {
            return Ok(SourceLocator::GoogleDrive {
                file_id: id.into_owned(),
            });
        }

        Err(PipelineError::SourceUnsupported(format!(
            "{raw}: no file id in drive link"
        )))
    }

    pub fn download_url(&self) -> Result<Url> {
        match self {
            SourceLocator::GoogleDrive { file_id } => Url::parse_with_params(
                GDRIVE_DOWNLOAD_BASE,
                &[("export", "download"), ("id", file_id.as_str())],
            )
            .map_err(|e| PipelineError::Download(e.to_string())),
        }
    }
}

/// Retrieves archive bytes for a locator.
pub trait ArchiveDownloader {
    fn fetch(&self, locator: &SourceLocator) -> Result<Vec<u8>>;
}

/// Blocking HTTP downloader
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Download(format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

impl ArchiveDownloader for HttpDownloader {
    fn fetch(&self, locator: &SourceLocator) -> Result<Vec<u8>> {
        let url = locator.download_url()?;
        info!(%url, "Downloading archive");

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| PipelineError::Download(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Download(format!("{url}: HTTP {status}")));
        }
        let body = response
            .bytes()
            .map_err(|e| PipelineError::Download(format!("{url}: {e}")))?;

        // Drive answers large or restricted files with an HTML page.
        if !body.starts_with(b"PK") {
            return Err(PipelineError::Download(format!(
                "{url}: response is not a zip archive ({} bytes)",
                body.len()
            )));
        }
        Ok(body.to_vec())
    }
}

/// What an ingestion run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutput {
    pub archive_path: PathBuf,
    pub raw_table_path: PathBuf,
    /// False when an existing archive was reused
    pub downloaded: bool,
    pub extracted_files: usize,
}

/// Download-then-extract component.
pub struct DataIngestion<D: ArchiveDownloader> {
    config: DataIngestionConfig,
    store: ArtifactStore,
    downloader: D,
}

impl DataIngestion<HttpDownloader> {
    pub fn new(config: DataIngestionConfig) -> Result<Self> {
        Ok(Self::with_downloader(config, HttpDownloader::new()?))
    }
}

impl<D: ArchiveDownloader> DataIngestion<D> {
    pub fn with_downloader(config: DataIngestionConfig, downloader: D) -> Self {
        let store = ArtifactStore::new(config.artifacts.clone());
        Self {
            config,
            store,
            downloader,
        }
    }

    /// Fetch the archive unless it already exists. Returns whether it downloaded.
    ///
    /// The source is validated even when the archive is already on disk.
    pub fn download_file(&self) -> Result<bool> {
        let locator = SourceLocator::parse(&self.config.source_url)?;

        if self.store.exists(ArtifactKind::RawArchive) {
            let size = std::fs::metadata(&self.config.archive_path)
                .map_err(|e| self.download_error(e.into()))?
                .len();
            info!(
                "{} already exists ({} bytes); skipping download",
                self.config.archive_path.display(),
                size
            );
            return Ok(false);
        }

        let bytes = self.downloader.fetch(&locator)?;
        let path = self
            .store
            .write(ArtifactKind::RawArchive, &bytes)
            .map_err(|e| self.download_error(e))?;
        info!(bytes = bytes.len(), "Downloaded archive to {}", path.display());
        Ok(true)
    }

    fn download_error(&self, err: PipelineError) -> PipelineError {
        match err {
            PipelineError::Io(e) => PipelineError::Download(format!(
                "{}: {e}",
                self.config.archive_path.display()
            )),
            other => other,
        }
    }

    /// Unpack every entry under `unzip_dir`; returns the file count.
    pub fn extract_zip_file(&self) -> Result<usize> {
        let archive = self
            .store
            .open(ArtifactKind::RawArchive)
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;
        let count = unpack(archive, &self.config.unzip_dir)?;

        if !self.config.raw_table_path.is_file() {
            return Err(PipelineError::Extraction(format!(
                "archive did not contain {}",
                self.config.raw_table_path.display()
            )));
        }
        info!(
            files = count,
            "Extracted archive into {}",
            self.config.unzip_dir.display()
        );
        Ok(count)
    }

    pub fn ingest(&self) -> Result<IngestionOutput> {
        let downloaded = self
            .download_file()
            .map_err(|e| e.within(StageName::Ingestion))?;
        let extracted_files = self
            .extract_zip_file()
            .map_err(|e| e.within(StageName::Ingestion))?;
        Ok(IngestionOutput {
            archive_path: self.config.archive_path.clone(),
            raw_table_path: self.config.raw_table_path.clone(),
            downloaded,
            extracted_files,
        })
    }
}

fn unpack<R: Read + Seek>(reader: R, target: &Path) -> Result<usize> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| PipelineError::Extraction(e.to_string()))?;
    std::fs::create_dir_all(target).map_err(|e| PipelineError::Extraction(e.to_string()))?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;
        let relative = entry.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            PipelineError::Extraction(format!(
                "entry '{}' escapes the target directory",
                entry.name()
            ))
        })?;
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let written = write_atomic(&out_path, &mut entry)
            .map_err(|e| PipelineError::Extraction(format!("{}: {e}", out_path.display())))?;
        debug!(bytes = written, "Extracted {}", out_path.display());
        files += 1;
    }

    if files == 0 {
        warn!("Archive contained no files");
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mushroom_core::ConfigurationManager;
    use std::cell::Cell;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    const TABLE: &str = "class,odor\np,f\ne,n\n";

    struct CountingDownloader {
        calls: Cell<usize>,
        payload: Vec<u8>,
    }

    impl ArchiveDownloader for CountingDownloader {
        fn fetch(&self, _locator: &SourceLocator) -> Result<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.payload.clone())
        }
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn counting(payload: Vec<u8>) -> CountingDownloader {
        CountingDownloader {
            calls: Cell::new(0),
            payload,
        }
    }

    fn unpack_bytes(bytes: &[u8], target: &Path) -> Result<usize> {
        unpack(Cursor::new(bytes), target)
    }

    fn config(root: &Path) -> DataIngestionConfig {
        config_with_source(root, "https://drive.google.com/file/d/abc/view")
    }

    fn config_with_source(root: &Path, source_url: &str) -> DataIngestionConfig {
        let yaml = format!(
            "artifacts_root: {}\ndata_ingestion:\n  source_url: {source_url}\n",
            root.display()
        );
        ConfigurationManager::from_documents(&yaml, "DecisionTreeClassifier: {}\n")
            .unwrap()
            .data_ingestion_config()
            .unwrap()
    }

    #[test]
    fn test_parse_drive_links() {
        assert_eq!(
            SourceLocator::parse("https://drive.google.com/file/d/1AbC/view?usp=sharing").unwrap(),
            SourceLocator::GoogleDrive {
                file_id: "1AbC".to_string()
            }
        );
        assert_eq!(
            SourceLocator::parse("https://drive.google.com/open?id=xyz").unwrap(),
            SourceLocator::GoogleDrive {
                file_id: "xyz".to_string()
            }
        );
    }

    #[test]
    fn test_other_sources_unsupported() {
        for raw in ["s3://bucket/data.zip", "https://example.com/data.zip", "not a url"] {
            assert!(matches!(
                SourceLocator::parse(raw),
                Err(PipelineError::SourceUnsupported(_))
            ));
        }
    }

    #[test]
    fn test_download_url_format() {
        let locator = SourceLocator::GoogleDrive {
            file_id: "abc".to_string(),
        };
        assert_eq!(
            locator.download_url().unwrap().as_str(),
            "https://drive.google.com/uc?export=download&id=abc"
        );
    }

    #[test]
    fn test_downloads_once_then_skips() {
        let dir = tempdir().unwrap();
        let downloader = counting(zip_bytes(&[("mushrooms.csv", TABLE)]));
        let ingestion = DataIngestion::with_downloader(config(dir.path()), downloader);

        let first = ingestion.ingest().unwrap();
        assert!(first.downloaded);
        let table_first = std::fs::read(&first.raw_table_path).unwrap();

        let second = ingestion.ingest().unwrap();
        assert!(!second.downloaded);
        assert_eq!(ingestion.downloader.calls.get(), 1);
        assert_eq!(std::fs::read(&second.raw_table_path).unwrap(), table_first);
        assert_eq!(table_first, TABLE.as_bytes());
    }

    #[test]
    fn test_unsupported_source_rejected_with_archive_present() {
        let dir = tempdir().unwrap();
        let cfg = config_with_source(dir.path(), "ftp://example.org/data.zip");
        std::fs::write(&cfg.archive_path, b"PKstale").unwrap();

        let ingestion = DataIngestion::with_downloader(cfg, counting(Vec::new()));
        let err = ingestion.download_file().unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnsupported(_)));
        assert!(matches!(
            ingestion.ingest().unwrap_err(),
            PipelineError::SourceUnsupported(_)
        ));
        assert_eq!(ingestion.downloader.calls.get(), 0);
    }

    #[test]
    fn test_failed_archive_save_is_download_error() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        // A directory at the archive path makes the final rename fail.
        std::fs::create_dir_all(&cfg.archive_path).unwrap();

        let payload = zip_bytes(&[("mushrooms.csv", TABLE)]);
        let ingestion = DataIngestion::with_downloader(cfg, counting(payload));
        let err = ingestion.ingest().unwrap_err();
        assert!(matches!(err, PipelineError::Download(_)));
        assert_eq!(ingestion.downloader.calls.get(), 1);
    }

    #[test]
    fn test_extraction_replaces_files_whole() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("mushrooms.csv"), "class,odor\nstale,row\nextra,row\n").unwrap();

        let bytes = zip_bytes(&[("mushrooms.csv", TABLE), ("notes/readme.txt", "agaricus")]);
        assert_eq!(unpack_bytes(&bytes, &out).unwrap(), 2);

        assert_eq!(std::fs::read_to_string(out.join("mushrooms.csv")).unwrap(), TABLE);
        assert_eq!(
            std::fs::read_to_string(out.join("notes/readme.txt")).unwrap(),
            "agaricus"
        );
        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["mushrooms.csv", "notes"]);
    }

    #[test]
    fn test_escaping_entry_rejected() {
        let dir = tempdir().unwrap();
        let bytes = zip_bytes(&[("../evil.csv", "x")]);
        let err = unpack_bytes(&bytes, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
        assert!(!dir.path().join("evil.csv").exists());
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::write(&cfg.archive_path, b"<html>quota exceeded</html>").unwrap();

        let err = DataIngestion::with_downloader(cfg, counting(Vec::new()))
            .ingest()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn test_missing_table_in_archive() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::write(&cfg.archive_path, zip_bytes(&[("other.csv", TABLE)])).unwrap();

        let err = DataIngestion::with_downloader(cfg, counting(Vec::new()))
            .extract_zip_file()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(msg) if msg.contains("mushrooms.csv")));
    }
}
