use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Instant,
};

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::semantic::preprocess::{dedupe_keywords, split_keyword_list};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Video,
    Audio,
    Image,
    Document,
    Text,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Video => "video",
            AssetType::Audio => "audio",
            AssetType::Image => "image",
            AssetType::Document => "document",
            AssetType::Text => "text",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFile {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub asset_type: AssetType,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,

    // audio
    pub transcription: Option<String>,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,

    // document / text
    pub summary: Option<String>,
    pub word_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssetCreate {
    pub name: String,
    pub path: String,
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u64>,
}

/// One keyword attached to one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKeyword {
    pub file_id: u64,
    pub keyword: String,
}

/// Keywords detected on one video frame.
///
/// `field` is kept exactly as upstream wrote it and may join several
/// keywords with commas; `tokens` is the split, trimmed form.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameKeywords {
    pub file_id: u64,
    pub frame_index: u32,
    pub timestamp: Option<f64>,
    pub confidence: Option<f32>,
    pub field: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FrameCreate {
    pub frame_index: u32,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f32>,
    pub keywords: Vec<String>,
}

/// On-disk shape of a frame row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameRow {
    file_id: u64,
    frame_index: u32,
    timestamp: Option<f64>,
    confidence: Option<f32>,
    keyword: String,
}

impl From<FrameRow> for FrameKeywords {
    fn from(row: FrameRow) -> Self {
        let tokens = split_keyword_list(&row.keyword);
        FrameKeywords {
            file_id: row.file_id,
            frame_index: row.frame_index,
            timestamp: row.timestamp,
            confidence: row.confidence,
            field: row.keyword,
            tokens,
        }
    }
}

impl From<&FrameKeywords> for FrameRow {
    fn from(frame: &FrameKeywords) -> Self {
        FrameRow {
            file_id: frame.file_id,
            frame_index: frame.frame_index,
            timestamp: frame.timestamp,
            confidence: frame.confidence,
            keyword: frame.field.clone(),
        }
    }
}

/// Point-in-time copy of the catalog used by one search or index pass.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub files: BTreeMap<u64, AssetFile>,
    pub file_keywords: Vec<FileKeyword>,
    pub frames: Vec<FrameKeywords>,
}

impl CatalogSnapshot {
    /// Whether `file_id` exists and passes the optional type filter.
    ///
    /// Rows pointing at a missing file are never in scope.
    pub fn in_scope(&self, file_id: u64, filter: Option<AssetType>) -> bool {
        match self.files.get(&file_id) {
            Some(file) => filter.map_or(true, |t| file.asset_type == t),
            None => false,
        }
    }

    pub fn frames_of(&self, file_id: u64) -> impl Iterator<Item = &FrameKeywords> {
        self.frames.iter().filter(move |f| f.file_id == file_id)
    }

    /// Every distinct keyword known to the catalog: file keywords plus
    /// frame tokens, exact-string deduplicated.
    pub fn distinct_keywords(&self) -> Vec<String> {
        let file_keywords = self.file_keywords.iter().map(|k| k.keyword.as_str());
        let frame_tokens = self
            .frames
            .iter()
            .flat_map(|f| f.tokens.iter().map(String::as_str));
        dedupe_keywords(file_keywords.chain(frame_tokens))
    }
}

pub trait AssetCatalog: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<CatalogSnapshot>;
    fn create_file(&self, file: AssetCreate) -> anyhow::Result<AssetFile>;
    /// Returns the keywords that were not attached to the file yet.
    fn add_file_keywords(&self, file_id: u64, keywords: &[String]) -> anyhow::Result<Vec<String>>;
    fn add_frame_keywords(&self, file_id: u64, frame: FrameCreate)
        -> anyhow::Result<FrameKeywords>;
}

const FILES_CSV: &str = "files.csv";
const FILE_KEYWORDS_CSV: &str = "file_keywords.csv";
const FRAME_KEYWORDS_CSV: &str = "frame_keywords.csv";

#[derive(Debug)]
pub struct CatalogCsv {
    data: RwLock<CatalogSnapshot>,
    dir: PathBuf,
}

impl CatalogCsv {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create catalog directory {dir:?}"))?;

        let now = Instant::now();

        let files: Vec<AssetFile> = read_rows(&dir.join(FILES_CSV))?;
        let file_keywords: Vec<FileKeyword> = read_rows(&dir.join(FILE_KEYWORDS_CSV))?;
        let frame_rows: Vec<FrameRow> = read_rows(&dir.join(FRAME_KEYWORDS_CSV))?;

        let files: BTreeMap<u64, AssetFile> = files.into_iter().map(|f| (f.id, f)).collect();
        let frames: Vec<FrameKeywords> = frame_rows.into_iter().map(FrameKeywords::from).collect();

        log::debug!(
            "took {}ms to read catalog ({} files, {} keyword rows, {} frame rows)",
            now.elapsed().as_micros() as f64 / 1000.0,
            files.len(),
            file_keywords.len(),
            frames.len()
        );

        Ok(CatalogCsv {
            data: RwLock::new(CatalogSnapshot {
                files,
                file_keywords,
                frames,
            }),
            dir: dir.to_path_buf(),
        })
    }

    fn save(&self, data: &CatalogSnapshot) -> anyhow::Result<()> {
        write_rows(&self.dir.join(FILES_CSV), data.files.values())?;
        write_rows(&self.dir.join(FILE_KEYWORDS_CSV), data.file_keywords.iter())?;
        write_rows(
            &self.dir.join(FRAME_KEYWORDS_CSV),
            data.frames.iter().map(FrameRow::from),
        )?;
        Ok(())
    }

    fn read(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, CatalogSnapshot>> {
        self.data
            .read()
            .map_err(|e| anyhow!("catalog lock poisoned: {e}"))
    }

    fn write(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, CatalogSnapshot>> {
        self.data
            .write()
            .map_err(|e| anyhow!("catalog lock poisoned: {e}"))
    }
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        log::info!("Creating new catalog table at {path:?}");
        return Ok(vec![]);
    }

    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("failed to open {path:?}"))?;
    let mut rows = vec![];
    for (line, record) in reader.deserialize().enumerate() {
        let row: T = record.with_context(|| format!("{path:?}: invalid row {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_rows<T, I>(path: &Path, rows: I) -> anyhow::Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let temp_path = path.with_extension("csv-tmp");
    let mut writer = csv::Writer::from_path(&temp_path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

impl AssetCatalog for CatalogCsv {
    fn snapshot(&self) -> anyhow::Result<CatalogSnapshot> {
        Ok(self.read()?.clone())
    }

    fn create_file(&self, create: AssetCreate) -> anyhow::Result<AssetFile> {
        if create.name.trim().is_empty() {
            bail!("file name must not be empty");
        }

        let mut data = self.write()?;
        let id = data.files.keys().next_back().map_or(0, |last| last + 1);

        let file = AssetFile {
            id,
            name: create.name,
            path: create.path,
            asset_type: create.asset_type.unwrap_or(AssetType::Document),
            size_bytes: create.size_bytes,
            created_at: Utc::now(),
            transcription: create.transcription,
            language: create.language,
            duration_secs: create.duration_secs,
            summary: create.summary,
            word_count: create.word_count,
        };

        data.files.insert(id, file.clone());
        self.save(&data)?;

        Ok(file)
    }

    fn add_file_keywords(&self, file_id: u64, keywords: &[String]) -> anyhow::Result<Vec<String>> {
        let mut data = self.write()?;
        if !data.files.contains_key(&file_id) {
            bail!("file with id {file_id} not found");
        }

        let existing: HashSet<&str> = data
            .file_keywords
            .iter()
            .filter(|k| k.file_id == file_id)
            .map(|k| k.keyword.as_str())
            .collect();

        let added: Vec<String> = dedupe_keywords(keywords)
            .into_iter()
            .filter(|k| !existing.contains(k.as_str()))
            .collect();

        if added.is_empty() {
            return Ok(added);
        }

        data.file_keywords
            .extend(added.iter().map(|keyword| FileKeyword {
                file_id,
                keyword: keyword.clone(),
            }));
        self.save(&data)?;

        Ok(added)
    }

    fn add_frame_keywords(
        &self,
        file_id: u64,
        frame: FrameCreate,
    ) -> anyhow::Result<FrameKeywords> {
        let mut data = self.write()?;
        match data.files.get(&file_id) {
            Some(file) if file.asset_type == AssetType::Video => {}
            Some(file) => bail!("file {file_id} is {}, frames need a video", file.asset_type),
            None => bail!("file with id {file_id} not found"),
        }

        let tokens = dedupe_keywords(&frame.keywords);
        if tokens.is_empty() {
            bail!("frame {} has no keywords", frame.frame_index);
        }

        // upstream writes all keywords of a frame into one comma-joined field
        let row = FrameRow {
            file_id,
            frame_index: frame.frame_index,
            timestamp: frame.timestamp,
            confidence: frame.confidence,
            keyword: tokens.join(", "),
        };
        let frame = FrameKeywords::from(row);

        data.frames.push(frame.clone());
        self.save(&data)?;

        Ok(frame)
    }
}
