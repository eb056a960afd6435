//! PDF library listing

use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const CHAPTER_PREFIX: &str = "CLASS 10 CH-";

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("library directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read library directory {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One PDF in the library
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookEntry {
    pub filename: String,
    pub title: String,
    /// Human-readable file size
    pub size: String,
    pub path: PathBuf,
}

/// List the PDFs directly inside `dir`, sorted by filename
pub fn scan_library(dir: &Path) -> Result<Vec<BookEntry>, LibraryError> {
    if !dir.is_dir() {
        return Err(LibraryError::NotFound(dir.to_path_buf()));
    }

    let entries = fs::read_dir(dir).map_err(|source| LibraryError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut books: Vec<BookEntry> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            let extension = path.extension()?.to_str()?.to_lowercase();
            if extension != "pdf" {
                return None;
            }
            let filename = path.file_name()?.to_str()?.to_string();
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => return None,
                Err(e) => {
                    warn!("Skipping {filename}: {e}");
                    return None;
                }
            };
            Some(BookEntry {
                title: title_from_filename(&filename),
                size: format_size(metadata.len()),
                filename,
                path,
            })
        })
        .collect();

    books.sort_by(|a, b| a.filename.cmp(&b.filename));
    debug!("Found {} PDFs in {}", books.len(), dir.display());
    Ok(books)
}

/// Display title for a PDF file name.
///
/// `CLASS 10 CH-3_Motion.pdf` becomes `Class 10 - Chapter 3 Motion`.
#[must_use]
pub fn title_from_filename(filename: &str) -> String {
    let stem = strip_pdf_extension(filename);
    match stem.strip_prefix(CHAPTER_PREFIX) {
        Some(rest) => format!("Class 10 - Chapter {}", clean_words(rest)),
        None => clean_words(stem),
    }
}

fn clean_words(text: &str) -> String {
    text.replace(['_', '-'], " ")
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_pdf_extension(filename: &str) -> &str {
    match filename.len().checked_sub(4) {
        Some(cut)
            if filename.is_char_boundary(cut) && filename[cut..].eq_ignore_ascii_case(".pdf") =>
        {
            &filename[..cut]
        }
        _ => filename,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// `"12.3 KB"` below one megabyte, `"1.8 MB"` from there on
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_cleaned_up() {
        assert_eq!(title_from_filename("linear_algebra-notes.pdf"), "Linear Algebra Notes");
        assert_eq!(title_from_filename("SHOUTING.PDF"), "Shouting");
        assert_eq!(title_from_filename("no_extension"), "No Extension");
        assert_eq!(title_from_filename("a__b.pdf"), "A B");
        assert_eq!(title_from_filename("_lead-trail-.pdf"), "Lead Trail");
        assert_eq!(title_from_filename("two  spaces.pdf"), "Two Spaces");
    }

    #[test]
    fn chapter_prefix_is_expanded() {
        assert_eq!(
            title_from_filename("CLASS 10 CH-3_Motion.pdf"),
            "Class 10 - Chapter 3 Motion"
        );
        assert_eq!(title_from_filename("CLASS 10 CH-1.pdf"), "Class 10 - Chapter 1");
    }

    #[test]
    fn sizes_switch_units_at_one_megabyte() {
        assert_eq!(format_size(0), "0.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(MIB - 1), "1024.0 KB");
        assert_eq!(format_size(MIB), "1.0 MB");
        assert_eq!(format_size(5 * MIB + MIB / 2), "5.5 MB");
    }

    #[test]
    fn scan_lists_pdfs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_second.pdf"), vec![0u8; 2048]).unwrap();
        fs::write(dir.path().join("a_first.PDF"), b"%PDF").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip").unwrap();
        fs::create_dir(dir.path().join("folder.pdf")).unwrap();

        let books = scan_library(dir.path()).unwrap();
        let names: Vec<_> = books.iter().map(|b| b.filename.as_str()).collect();
        assert_eq!(names, vec!["a_first.PDF", "b_second.pdf"]);
        assert_eq!(books[1].title, "B Second");
        assert_eq!(books[1].size, "2.0 KB");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_library(&missing),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn entries_serialize_to_json() {
        let entry = BookEntry {
            filename: "a.pdf".into(),
            title: "A".into(),
            size: "1.0 KB".into(),
            path: PathBuf::from("/books/a.pdf"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["title"], "A");
        assert_eq!(json["size"], "1.0 KB");
    }
}
