//! Diagnostic sanitizer
//!
//! Removes host-specific detail (temp directories, generated file names)
//! from tool output before it is shown to a user.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Stable name shown in place of the generated source file
pub const DISPLAY_FILE_NAME: &str = "main.c";
const DISPLAY_STEM: &str = "main";

/// Any remaining `<sep><name>.c` reference
fn source_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\\][^\s:'"<>()]*\.c\b"#).unwrap())
}

/// Secrets to scrub from one invocation's output
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    /// Literal paths, removed verbatim (longest first)
    paths: Vec<String>,
    /// Generated basename (e.g. `code_..._x1y2.c`) as an escaped pattern
    basename: Option<Regex>,
    /// Generated basename without extension
    stem: Option<Regex>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every literal occurrence of `dir`
    pub fn with_path(mut self, dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().to_string_lossy().into_owned();
        let trimmed = path.trim_end_matches(['/', '\\']);
        // Never strip "/" or an empty string out of arbitrary text
        if trimmed.len() >= 2 {
            self.paths.push(trimmed.to_string());
            self.paths.sort_by_key(|p| std::cmp::Reverse(p.len()));
        }
        self
    }

    /// Replace the generated file name (and its stem) with the display name
    pub fn with_basename(mut self, basename: &str) -> Self {
        if basename.is_empty() {
            return self;
        }
        self.basename = Regex::new(&regex::escape(basename)).ok();

        if let Some((stem, _)) = basename.rsplit_once('.') {
            if stem.len() >= 2 {
                self.stem = Regex::new(&format!(r"\b{}\b", regex::escape(stem))).ok();
            }
        }
        self
    }

    /// Scrub compiler or tool diagnostics.
    ///
    /// Besides the literal unit paths, any other `<path>/<name>.c` reference
    /// is shown as `main.c`.
    pub fn clean(&self, text: &str) -> String {
        let out = self.clean_listing(text);
        source_reference_regex()
            .replace_all(&out, DISPLAY_FILE_NAME)
            .into_owned()
    }

    /// Scrub text that carries user content (program output, preprocessed
    /// source, assembly): only the unit's own paths and names are touched.
    pub fn clean_listing(&self, text: &str) -> String {
        let mut out = text.to_string();

        for path in &self.paths {
            for sep in ['/', '\\'] {
                out = out.replace(&format!("{}{}", path, sep), "");
            }
            out = out.replace(path.as_str(), "");
        }
        if let Some(re) = &self.basename {
            out = re.replace_all(&out, DISPLAY_FILE_NAME).into_owned();
        }
        if let Some(re) = &self.stem {
            out = re.replace_all(&out, DISPLAY_STEM).into_owned();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR: &str = "/tmp/.tmpQ1w2E3";
    const BASENAME: &str = "code_20261016-101500123_Ab9xZq.c";

    fn sanitizer() -> Sanitizer {
        Sanitizer::new().with_path(DIR).with_basename(BASENAME)
    }

    #[test]
    fn test_removes_temp_path_and_generated_name() {
        let raw = format!(
            "{DIR}/{BASENAME}: In function 'main':\n{DIR}/{BASENAME}:3:5: error: expected ';' before 'return'\n"
        );
        let clean = sanitizer().clean(&raw);

        assert!(!clean.contains(DIR));
        assert!(!clean.contains("Ab9xZq"));
        assert!(clean.contains("main.c:3:5: error: expected ';'"));
        assert!(clean.starts_with("main.c: In function 'main'"));
    }

    #[test]
    fn test_basename_without_directory() {
        let raw = format!("{BASENAME}:1:1: warning: empty file\n");
        assert_eq!(sanitizer().clean(&raw), "main.c:1:1: warning: empty file\n");
    }

    #[test]
    fn test_basename_is_escaped() {
        // '.' in the name must not match arbitrary characters
        let sanitizer = Sanitizer::new().with_basename("a.c");
        assert_eq!(sanitizer.clean("abc a.c"), "abc main.c");
    }

    #[test]
    fn test_stem_replaced() {
        let stem = BASENAME.trim_end_matches(".c");
        let raw = format!("\t.file\t\"{stem}.s\"\n");
        assert_eq!(sanitizer().clean(&raw), "\t.file\t\"main.s\"\n");
    }

    #[test]
    fn test_other_source_references() {
        let raw = "/home/runner/work/other_file.c:10: note: here";
        assert_eq!(Sanitizer::new().clean(raw), "main.c:10: note: here");
    }

    #[test]
    fn test_headers_untouched() {
        let raw = "In file included from /usr/include/stdio.h:27:";
        assert_eq!(Sanitizer::new().clean(raw), raw);
    }

    #[test]
    fn test_listing_keeps_user_paths() {
        let raw = format!(
            "return a/s.c;\nfopen(\"/tmp/log.txt\", \"r\");\nconst char *f = \"{DIR}/{BASENAME}\";\n"
        );
        assert_eq!(
            sanitizer().clean_listing(&raw),
            "return a/s.c;\nfopen(\"/tmp/log.txt\", \"r\");\nconst char *f = \"main.c\";\n"
        );
    }

    #[test]
    fn test_unit_dir_does_not_cover_its_parent() {
        assert_eq!(sanitizer().clean("cannot open /tmp/data.txt"), "cannot open /tmp/data.txt");
    }

    #[test]
    fn test_root_path_is_never_stripped() {
        let sanitizer = Sanitizer::new().with_path("/");
        assert_eq!(sanitizer.clean("a/b"), "a/b");
    }
}
