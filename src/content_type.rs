//! Content-type inference from object names.
//!
//! Uploads without an explicit content type get one from the object name's
//! extension. The table is built once and never mutated.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Fallback for unknown or missing extensions
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static EXTENSION_TABLE: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        // executables and scripts
        ("exe", "application/vnd.microsoft.portable-executable"),
        ("sh", "application/x-sh"),
        ("bat", "application/x-bat"),
        ("ps1", "text/plain"),
        ("apk", "application/vnd.android.package-archive"),
        ("ipa", "application/octet-stream"),
        // documents
        ("txt", "text/plain"),
        ("doc", "application/msword"),
        (
            "docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        ("ppt", "application/vnd.ms-powerpoint"),
        (
            "pptx",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ),
        ("xls", "application/vnd.ms-excel"),
        (
            "xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ),
        ("pdf", "application/pdf"),
        ("json", "application/json"),
        ("xml", "application/xml"),
        ("yml", "application/yaml"),
        ("yaml", "application/yaml"),
        ("ini", "text/plain"),
        ("csv", "text/csv"),
        ("sql", "application/sql"),
        ("ttf", "font/ttf"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("md", "text/markdown"),
        ("rtf", "application/rtf"),
        ("html", "text/html"),
        ("htm", "text/html"),
        ("css", "text/css"),
        // images
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("bmp", "image/bmp"),
        ("webp", "image/webp"),
        ("tiff", "image/tiff"),
        ("tif", "image/tiff"),
        ("svg", "image/svg+xml"),
        ("ico", "image/vnd.microsoft.icon"),
        ("psd", "image/vnd.adobe.photoshop"),
        // audio
        ("mp3", "audio/mpeg"),
        ("wav", "audio/wav"),
        ("aac", "audio/aac"),
        ("flac", "audio/flac"),
        ("ogg", "audio/ogg"),
        ("wma", "audio/x-ms-wma"),
        ("m4a", "audio/mp4"),
        ("amr", "audio/amr"),
        ("aiff", "audio/aiff"),
        ("ape", "audio/ape"),
        // archives
        ("zip", "application/zip"),
        ("tar", "application/x-tar"),
        ("gz", "application/gzip"),
        ("rar", "application/vnd.rar"),
        ("7z", "application/x-7z-compressed"),
        // video
        ("mp4", "video/mp4"),
        ("avi", "video/x-msvideo"),
        ("mov", "video/quicktime"),
        ("flv", "video/x-flv"),
        ("mpg", "video/mpeg"),
        ("mpeg", "video/mpeg"),
        ("mkv", "video/x-matroska"),
        ("webm", "video/webm"),
        ("3gp", "video/3gpp"),
        ("m4v", "video/x-m4v"),
        ("wmv", "video/x-ms-wmv"),
        ("asf", "video/x-ms-asf"),
        ("ogv", "video/ogg"),
        // source code
        ("js", "text/javascript"),
        ("ts", "text/plain"),
        ("py", "text/x-python"),
        ("java", "text/x-java-source"),
        ("php", "application/x-httpd-php"),
        ("c", "text/x-c"),
        ("h", "text/x-c"),
        ("cpp", "text/x-c++"),
        ("hpp", "text/x-c++"),
        ("cs", "text/plain"),
        ("swift", "text/plain"),
        ("kt", "text/plain"),
        ("go", "text/plain"),
        ("rs", "text/plain"),
        ("vue", "text/plain"),
    ])
});

/// MIME type for an object name, by its extension
///
/// Matching is case-insensitive. Names without an extension, dotfiles such as
/// `.gitignore`, and unknown extensions map to [`DEFAULT_CONTENT_TYPE`].
pub fn infer_content_type(object_name: &str) -> &'static str {
    let file_name = object_name.rsplit('/').next().unwrap_or(object_name);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => EXTENSION_TABLE
            .get(ext.to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(DEFAULT_CONTENT_TYPE),
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(infer_content_type("report.pdf"), "application/pdf");
        assert_eq!(infer_content_type("photos/2024/beach.JPG"), "image/jpeg");
        assert_eq!(infer_content_type("backup.tar.gz"), "application/gzip");
        assert_eq!(infer_content_type("movie.mkv"), "video/x-matroska");
    }

    #[test]
    fn unknown_or_missing_extensions_fall_back() {
        assert_eq!(infer_content_type("README"), DEFAULT_CONTENT_TYPE);
        assert_eq!(infer_content_type("data.unknownext"), DEFAULT_CONTENT_TYPE);
        assert_eq!(infer_content_type("trailing."), DEFAULT_CONTENT_TYPE);
        assert_eq!(infer_content_type("dir/.gitignore"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn extension_only_considers_file_name() {
        assert_eq!(infer_content_type("v1.2/notes"), DEFAULT_CONTENT_TYPE);
    }
}
