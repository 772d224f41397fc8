use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tracing::{info, warn};

use crate::model::{Dataset, PageResult, Record};
use crate::{Error, Result};

pub const HEADER: [&str; 4] = ["year", "number", "extract", "document_url"];

/// Durable storage for pages and the final combined dataset.
pub trait PersistenceSink {
    fn save_page(&mut self, page: &PageResult) -> Result<PathBuf>;
    fn save_combined(&mut self, dataset: &Dataset) -> Result<PathBuf>;
}

/// Writes one CSV per page into a directory, plus one combined CSV.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
    combined: PathBuf,
}

impl CsvSink {
    /// Creates the output directory. Failing here is fatal for a run.
    pub fn create(dir: impl Into<PathBuf>, combined: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| Error::OutputDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            combined: combined.into(),
        })
    }

    pub fn page_path(&self, offset: usize) -> PathBuf {
        self.dir.join(page_file_name(offset))
    }
}

impl PersistenceSink for CsvSink {
    fn save_page(&mut self, page: &PageResult) -> Result<PathBuf> {
        let path = self.page_path(page.offset);
        write_records(&path, &page.records)?;
        Ok(path)
    }

    fn save_combined(&mut self, dataset: &Dataset) -> Result<PathBuf> {
        write_records(&self.combined, dataset.records())?;
        Ok(self.combined.clone())
    }
}

/// Zero-padded so a plain directory listing is in offset order too.
pub fn page_file_name(offset: usize) -> String {
    format!("page_{offset:010}.csv")
}

/// Inverse of [`page_file_name`].
pub fn page_offset(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("page_")?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

/// Writes the header row and then every record.
pub fn write_records<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a Record>,
) -> Result<usize> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(HEADER)?;
    let mut count = 0;
    for record in records {
        writer.serialize(record)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<core::result::Result<Vec<Record>, _>>()?;
    Ok(records)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineSummary {
    pub files: usize,
    pub rows: usize,
    pub output: Option<PathBuf>,
}

/// Rebuilds the combined CSV from the page files in `dir`.
///
/// Pages are ordered by the offset in their file name. Unreadable files are
/// skipped with a warning. Nothing is written when there are no page files.
pub fn combine_dir(dir: &Path, output: &Path) -> Result<CombineSummary> {
    let mut pages: Vec<(usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let offset = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(page_offset);
        if let Some(offset) = offset {
            pages.push((offset, path));
        }
    }
    if pages.is_empty() {
        warn!(dir = %dir.display(), "No files to combine");
        return Ok(CombineSummary::default());
    }
    pages.sort_unstable_by_key(|(offset, _)| *offset);

    let mut dataset = Dataset::new();
    let mut files = 0;
    for (offset, path) in pages {
        match read_records(&path) {
            Ok(records) => {
                info!("Added {} to combination ({} rows)", path.display(), records.len());
                dataset.insert(PageResult {
                    offset,
                    is_short: false,
                    records,
                });
                files += 1;
            }
            Err(e) => warn!("Error reading {}: {e}", path.display()),
        }
    }

    let rows = write_records(output, dataset.records())?;
    info!(
        "Successfully combined {files} files into {} ({rows} rows)",
        output.display()
    );
    Ok(CombineSummary {
        files,
        rows,
        output: Some(output.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("apex-scrap-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn rec(year: &str, number: &str) -> Record {
        Record {
            year: year.into(),
            number: number.into(),
            extract: "some, quoted \"text\"".into(),
            document_url: String::new(),
        }
    }

    #[test]
    fn file_names_sort_like_offsets() {
        assert_eq!(page_file_name(51), "page_0000000051.csv");
        assert!(page_file_name(501) > page_file_name(51));
        assert_eq!(page_offset("page_0000000051.csv"), Some(51));
        assert_eq!(page_offset("page_7.csv"), Some(7));
        assert_eq!(page_offset("combined_data.csv"), None);
    }

    #[test]
    fn page_file_has_header_and_rows() {
        let dir = temp_dir("page");
        let mut sink = CsvSink::create(&dir, dir.join("all.csv")).unwrap();
        let page = PageResult::new(1, vec![rec("2020", "1"), rec("2021", "2")], 50);

        let path = sink.save_page(&page).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("year,number,extract,document_url\n"));
        assert_eq!(read_records(&path).unwrap(), page.records);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn combine_orders_by_numeric_offset() {
        let dir = temp_dir("combine");
        fs::create_dir_all(&dir).unwrap();
        // Unpadded names would sort "page_101" < "page_51" as strings.
        write_records(&dir.join("page_101.csv"), &[rec("2022", "c")]).unwrap();
        write_records(&dir.join("page_1.csv"), &[rec("2020", "a")]).unwrap();
        write_records(&dir.join("page_51.csv"), &[rec("2021", "b")]).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let out = dir.join("combined.csv");
        let summary = combine_dir(&dir, &out).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.rows, 3);

        let numbers: Vec<_> = read_records(&out)
            .unwrap()
            .into_iter()
            .map(|r| r.number)
            .collect();
        assert_eq!(numbers, ["a", "b", "c"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn combine_without_pages_writes_nothing() {
        let dir = temp_dir("combine-empty");
        fs::create_dir_all(&dir).unwrap();
        let out = dir.join("combined.csv");

        let summary = combine_dir(&dir, &out).unwrap();
        assert_eq!(summary, CombineSummary::default());
        assert!(!out.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn output_dir_under_a_file_is_fatal() {
        let dir = temp_dir("blocked");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("file");
        fs::write(&file, "x").unwrap();

        let err = CsvSink::create(file.join("sub"), "all.csv").unwrap_err();
        assert!(matches!(err, Error::OutputDir { .. }));

        fs::remove_dir_all(&dir).unwrap();
    }
}
