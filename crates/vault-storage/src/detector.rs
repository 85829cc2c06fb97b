//! Content type detection
//!
//! Classifies uploaded content into a coarse category without trusting the client.
//! Signals are tried in decreasing order of reliability:
//!
//! 1. magic-byte signature (`Confidence::High`)
//! 2. filename extension (`Confidence::Medium`)
//! 3. caller-supplied MIME hint (`Confidence::Low`)
//! 4. UTF-8 sniffing when the result is still binary (`Confidence::Medium`)
//!
//! Everything else is `binary` / `application/octet-stream`. Detection is pure and
//! total: any byte slice, including an empty one, yields a result.

use std::path::Path;
use vault_core::models::{Confidence, FileCategory, FileTypeInfo};

/// Number of leading bytes inspected by the UTF-8 sniffer.
pub const TEXT_SAMPLE_SIZE: usize = 8192;

/// Window searched for Office Open XML part names inside a ZIP container.
const OOXML_SCAN_WINDOW: usize = 1000;

/// Minimum share of printable characters for sniffed content to count as text.
const PRINTABLE_RATIO: f64 = 0.85;

const OCTET_STREAM: &str = "application/octet-stream";

const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MIME_PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const RIFF_MAGIC: &[u8] = b"RIFF";

struct Signature {
    magic: &'static [u8],
    category: FileCategory,
    mime: &'static str,
}

const fn sig(magic: &'static [u8], category: FileCategory, mime: &'static str) -> Signature {
    Signature {
        magic,
        category,
        mime,
    }
}

/// Ordered signature table; the first matching prefix wins.
const SIGNATURES: &[Signature] = &[
    // images
    sig(b"\xff\xd8\xff", FileCategory::Image, "image/jpeg"),
    sig(b"\x89PNG\r\n\x1a\n", FileCategory::Image, "image/png"),
    sig(b"GIF8", FileCategory::Image, "image/gif"),
    sig(b"BM", FileCategory::Image, "image/bmp"),
    sig(b"II*\x00", FileCategory::Image, "image/tiff"),
    sig(b"MM\x00*", FileCategory::Image, "image/tiff"),
    sig(RIFF_MAGIC, FileCategory::Image, "image/webp"),
    sig(b"\x00\x00\x01\x00", FileCategory::Image, "image/x-icon"),
    // video
    sig(b"\x00\x00\x00\x18ftyp", FileCategory::Video, "video/mp4"),
    sig(b"\x00\x00\x00\x20ftyp", FileCategory::Video, "video/mp4"),
    sig(b"\x00\x00\x00\x1cftyp", FileCategory::Video, "video/mp4"),
    sig(b"\x1a\x45\xdf\xa3", FileCategory::Video, "video/webm"),
    sig(b"FLV\x01", FileCategory::Video, "video/x-flv"),
    // documents
    sig(b"%PDF", FileCategory::Document, "application/pdf"),
    sig(ZIP_MAGIC, FileCategory::Document, "application/zip"),
    sig(
        b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1",
        FileCategory::Document,
        "application/msword",
    ),
    sig(b"{\\rtf", FileCategory::Document, "application/rtf"),
    // archives
    sig(b"\x1f\x8b", FileCategory::Binary, "application/gzip"),
    sig(b"BZh", FileCategory::Binary, "application/x-bzip2"),
    sig(
        b"Rar!\x1a\x07",
        FileCategory::Binary,
        "application/x-rar-compressed",
    ),
    sig(
        b"7z\xbc\xaf\x27\x1c",
        FileCategory::Binary,
        "application/x-7z-compressed",
    ),
    // executables
    sig(b"MZ", FileCategory::Binary, "application/x-msdownload"),
    sig(b"\x7fELF", FileCategory::Binary, "application/x-executable"),
    // audio
    sig(b"ID3", FileCategory::Binary, "audio/mpeg"),
    sig(b"\xff\xfb", FileCategory::Binary, "audio/mpeg"),
    sig(b"\xff\xf3", FileCategory::Binary, "audio/mpeg"),
    sig(b"\xff\xf2", FileCategory::Binary, "audio/mpeg"),
];

const TEXT_MIMES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/css",
    "text/javascript",
    "text/xml",
    "text/csv",
    "text/markdown",
    "text/x-python",
    "text/x-java",
    "text/x-c",
    "text/x-c++",
    "text/x-csharp",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-yaml",
    "application/yaml",
    "application/x-toml",
];

const IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
    "image/svg+xml",
    "image/tiff",
    "image/x-icon",
];

const VIDEO_MIMES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-flv",
    "video/webm",
    "video/x-matroska",
];

const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    MIME_DOCX,
    "application/vnd.ms-excel",
    MIME_XLSX,
    "application/vnd.ms-powerpoint",
    MIME_PPTX,
    "application/rtf",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "json", "xml", "yaml", "yml", "html", "htm", "css", "js", "ts",
    "jsx", "tsx", "py", "java", "c", "cpp", "h", "hpp", "cs", "go", "rs", "php", "rb", "pl",
    "sh", "bat", "ps1", "sql", "log", "ini", "cfg", "conf", "toml", "env",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "tiff", "tif", "heic", "heif",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v", "mpg", "mpeg", "3gp",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "epub",
];

/// Extensions whose registry guess is wrong or missing.
const EXTENSION_MIME_OVERRIDES: &[(&str, &str)] = &[
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("ts", "text/x-typescript"),
    ("tsx", "text/x-typescript"),
    ("jsx", "text/javascript"),
    ("sass", "text/x-sass"),
    ("scss", "text/x-scss"),
    ("manifest", "text/cache-manifest"),
    ("map", "application/json"),
];

/// Classify content from its name, leading bytes and an optional declared MIME type.
pub fn detect(filename: &str, content: Option<&[u8]>, mime_hint: Option<&str>) -> FileTypeInfo {
    let content = content.filter(|c| !c.is_empty());

    let mut detected = content
        .and_then(detect_by_magic)
        .map(|(category, mime)| (category, mime, Confidence::High))
        .or_else(|| {
            detect_by_extension(filename)
                .map(|(category, mime)| (category, mime, Confidence::Medium))
        })
        .or_else(|| {
            mime_hint
                .map(str::trim)
                .filter(|hint| !hint.is_empty())
                .map(|hint| (category_from_mime(hint), hint.to_string(), Confidence::Low))
        });

    let undecided = matches!(detected, None | Some((FileCategory::Binary, _, _)));
    if undecided {
        if let Some(bytes) = content {
            if looks_like_text(bytes) {
                let mime = match detected.take() {
                    Some((_, mime, _)) if mime != OCTET_STREAM => mime,
                    _ => "text/plain".to_string(),
                };
                detected = Some((FileCategory::Text, mime, Confidence::Medium));
            }
        }
    }

    match detected {
        Some((category, mime, confidence)) => FileTypeInfo::new(category, mime, confidence),
        None => FileTypeInfo::new(FileCategory::Binary, OCTET_STREAM, Confidence::Low),
    }
}

/// Match leading bytes against the signature table.
pub fn detect_by_magic(content: &[u8]) -> Option<(FileCategory, String)> {
    let signature = SIGNATURES
        .iter()
        .find(|signature| content.starts_with(signature.magic))?;

    if signature.magic == ZIP_MAGIC {
        return Some(classify_zip(content));
    }

    if signature.magic == RIFF_MAGIC {
        match content.get(8..12) {
            Some(b"WEBP") => return Some((FileCategory::Image, "image/webp".to_string())),
            Some(b"AVI ") => return Some((FileCategory::Video, "video/x-msvideo".to_string())),
            _ => {}
        }
    }

    Some((signature.category, signature.mime.to_string()))
}

/// Office Open XML files are ZIP containers with well-known part directories.
fn classify_zip(content: &[u8]) -> (FileCategory, String) {
    let window = &content[..content.len().min(OOXML_SCAN_WINDOW)];
    let contains = |needle: &[u8]| window.windows(needle.len()).any(|w| w == needle);

    if contains(b"word/") {
        (FileCategory::Document, MIME_DOCX.to_string())
    } else if contains(b"xl/") {
        (FileCategory::Document, MIME_XLSX.to_string())
    } else if contains(b"ppt/") {
        (FileCategory::Document, MIME_PPTX.to_string())
    } else {
        (FileCategory::Binary, "application/zip".to_string())
    }
}

/// Look the extension up in the curated tables, then in the MIME registry.
pub fn detect_by_extension(filename: &str) -> Option<(FileCategory, String)> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;

    if let Some(category) = extension_category(&ext) {
        let mime = mime_override(&ext)
            .map(str::to_string)
            .or_else(|| guess_mime(filename))
            .unwrap_or_else(|| format!("{}/unknown", category));
        return Some((category, mime));
    }

    let mime = mime_override(&ext)
        .map(str::to_string)
        .or_else(|| guess_mime(filename))?;
    Some((category_from_mime(&mime), mime))
}

fn extension_category(ext: &str) -> Option<FileCategory> {
    let tables: [(&[&str], FileCategory); 4] = [
        (TEXT_EXTENSIONS, FileCategory::Text),
        (IMAGE_EXTENSIONS, FileCategory::Image),
        (VIDEO_EXTENSIONS, FileCategory::Video),
        (DOCUMENT_EXTENSIONS, FileCategory::Document),
    ];
    tables
        .iter()
        .find(|(exts, _)| exts.contains(&ext))
        .map(|(_, category)| *category)
}

fn mime_override(ext: &str) -> Option<&'static str> {
    EXTENSION_MIME_OVERRIDES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

fn guess_mime(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first_raw()
        .map(str::to_string)
}

/// Map a MIME type to a category: exact list membership first, then the top-level type.
pub fn category_from_mime(mime: &str) -> FileCategory {
    let mime = mime
        .split(';')
        .next()
        .unwrap_or(mime)
        .trim()
        .to_ascii_lowercase();

    let lists: [(&[&str], FileCategory); 4] = [
        (TEXT_MIMES, FileCategory::Text),
        (IMAGE_MIMES, FileCategory::Image),
        (VIDEO_MIMES, FileCategory::Video),
        (DOCUMENT_MIMES, FileCategory::Document),
    ];
    let listed = lists.iter().find(|(list, _)| list.contains(&mime.as_str()));
    if let Some((_, category)) = listed {
        return *category;
    }

    match mime.split('/').next() {
        Some("text") => FileCategory::Text,
        Some("image") => FileCategory::Image,
        Some("video") => FileCategory::Video,
        _ => FileCategory::Binary,
    }
}

/// Decode a leading sample as UTF-8 and require mostly printable characters.
///
/// A sample cut mid-codepoint at the sample boundary is judged on its valid prefix.
pub fn looks_like_text(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(TEXT_SAMPLE_SIZE)];
    let truncated = content.len() > TEXT_SAMPLE_SIZE;

    let decoded = match std::str::from_utf8(sample) {
        Ok(s) => s,
        Err(e) if truncated && e.error_len().is_none() => {
            // Incomplete trailing sequence: the prefix up to it is valid.
            match std::str::from_utf8(&sample[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };

    let mut total = 0usize;
    let mut printable = 0usize;
    for c in decoded.chars() {
        total += 1;
        if !c.is_control() || c.is_whitespace() {
            printable += 1;
        }
    }

    total > 0 && (printable as f64 / total as f64) >= PRINTABLE_RATIO
}
