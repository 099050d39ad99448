//! Walks an extracted archive and concatenates its source files.
//!
//! For every directory the aggregator first handles the files it contains and only
//! then descends into its subdirectories, so sibling files stay together in the
//! output. Entries are visited in lexicographic order of their file names, which
//! makes the output independent of the filesystem's listing order.
//!
//! Three buffers are produced per run:
//! - plaintext: `"<name>\n\n<contents>\n\n\n"` per file
//! - highlighted HTML: highlight.js theme and script embedded inline
//! - plain HTML: monospace `<pre>` blocks, the variant that gets printed
//!
//! PDF files are not read. Their paths are collected, in discovery order, for the
//! merge step.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{AggregateOptions, SourceKind};

pub const HIGHLIGHT_CSS_FILE: &str = "default-dark.min.css";
pub const HIGHLIGHT_JS_FILE: &str = "highlight.min.js";

/// highlight.js theme and script inlined into the highlighted document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightAssets {
    pub css: String,
    pub script: String,
}

impl HighlightAssets {
    /// Read both assets from `dir`. A missing asset is logged and left empty.
    pub fn load(dir: &Path) -> Self {
        let read = |name: &str| match fs::read_to_string(dir.join(name)) {
            Ok(content) => {
                debug!(asset = name, size = content.len(), "Loaded highlight asset");
                content
            }
            Err(e) => {
                warn!(error = ?e, asset = name, dir = %dir.display(), "Highlight asset unavailable, embedding nothing");
                String::new()
            }
        };
        Self {
            css: read(HIGHLIGHT_CSS_FILE),
            script: read(HIGHLIGHT_JS_FILE),
        }
    }
}

/// An entry that was left out of the aggregate, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// The finished text and HTML documents of one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOutput {
    pub plaintext: String,
    pub highlighted_html: String,
    pub plain_html: String,
    /// Display names of the included source files, in output order.
    pub sections: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

/// Pre-existing PDFs found in the tree, in discovery order.
pub type MergeList = Vec<PathBuf>;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("cannot read extraction root {}: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Aggregator {
    options: AggregateOptions,
    assets: HighlightAssets,
}

impl Aggregator {
    pub fn new(options: AggregateOptions, assets: HighlightAssets) -> Self {
        Self { options, assets }
    }

    pub fn options(&self) -> &AggregateOptions {
        &self.options
    }

    /// Aggregate every recognised source file below `root` and collect the PDFs.
    ///
    /// Display names are the entry paths relative to `root`.
    pub fn traverse(&self, root: &Path) -> Result<(AggregateOutput, MergeList), AggregateError> {
        info!(root = %root.display(), "Aggregating extracted archive");
        let root_entries = list_sorted(root).map_err(|source| AggregateError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut buffers = Buffers::open(&self.assets);
        let mut merge_list = MergeList::new();
        let mut skipped = Vec::new();

        // (directory, depth, pre-listed entries); subdirectories are pushed in
        // reverse so that they pop in name order.
        let mut stack: Vec<(PathBuf, usize, Option<Vec<fs::DirEntry>>)> =
            vec![(root.to_path_buf(), 0, Some(root_entries))];

        while let Some((dir, depth, listed)) = stack.pop() {
            let entries = match listed {
                Some(entries) => entries,
                None => match list_sorted(&dir) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(error = ?e, path = %dir.display(), "Skipping unreadable directory");
                        skipped.push(SkippedEntry {
                            path: dir,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                },
            };

            let mut subdirs = Vec::new();
            for entry in &entries {
                let path = entry.path();
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        warn!(error = ?e, path = %path.display(), "Skipping entry with unknown type");
                        skipped.push(SkippedEntry {
                            path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                if file_type.is_dir() {
                    subdirs.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    debug!(path = %path.display(), "Ignoring non-regular entry");
                    continue;
                }

                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if let Some(kind) = self.options.source_kind_for(&file_name) {
                    let name = display_name(root, &path);
                    match fs::read_to_string(&path) {
                        Ok(contents) => {
                            debug!(name = %name, size = contents.len(), "Aggregated source file");
                            buffers.push_section(&name, &contents, kind);
                        }
                        Err(e) => {
                            warn!(error = ?e, path = %path.display(), "Skipping unreadable source file");
                            skipped.push(SkippedEntry {
                                path,
                                reason: e.to_string(),
                            });
                        }
                    }
                } else if file_name.ends_with(".pdf") {
                    debug!(path = %path.display(), "Queued PDF for merging");
                    merge_list.push(path);
                }
            }

            if depth >= self.options.max_depth && !subdirs.is_empty() {
                warn!(
                    path = %dir.display(),
                    max_depth = self.options.max_depth,
                    skipped_dirs = subdirs.len(),
                    "Maximum depth reached, not descending further"
                );
                skipped.extend(subdirs.into_iter().map(|path| SkippedEntry {
                    path,
                    reason: format!("deeper than {} levels", self.options.max_depth),
                }));
                continue;
            }
            stack.extend(subdirs.into_iter().rev().map(|sub| (sub, depth + 1, None)));
        }

        let output = buffers.close(&self.assets, skipped);
        info!(
            sections = output.sections.len(),
            pdfs = merge_list.len(),
            skipped = output.skipped.len(),
            "Aggregation complete"
        );
        Ok((output, merge_list))
    }
}

fn list_sorted(dir: &Path) -> std::io::Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    Ok(entries)
}

struct Buffers {
    plaintext: String,
    highlighted: String,
    plain: String,
    sections: Vec<String>,
}

impl Buffers {
    fn open(assets: &HighlightAssets) -> Self {
        Self {
            plaintext: String::new(),
            highlighted: format!("<!DOCTYPE html><head><style>{}</style></head><body>", assets.css),
            plain: String::from("<!DOCTYPE html><head><meta charset=\"utf-8\"></head><body>"),
            sections: Vec::new(),
        }
    }

    fn push_section(&mut self, name: &str, contents: &str, kind: &SourceKind) {
        let name_html = escape_html(name);
        let contents_html = escape_html(contents);

        self.plaintext
            .push_str(&format!("{name}\n\n{contents}\n\n\n"));
        self.highlighted.push_str(&format!(
            "<h2>{name_html}</h2><pre><code class=\"language-{}\">{contents_html}</code></pre>",
            escape_html(&kind.language)
        ));
        self.plain.push_str(&format!(
            "<h2>{name_html}</h2><pre style=\"font: 25px Monospace\">{contents_html}</pre>"
        ));
        self.sections.push(name.to_string());
    }

    fn close(mut self, assets: &HighlightAssets, skipped: Vec<SkippedEntry>) -> AggregateOutput {
        self.highlighted.push_str(&format!(
            "<script>{}</script><script>hljs.highlightAll();</script></body></html>",
            assets.script
        ));
        self.plain.push_str("</body></html>");
        AggregateOutput {
            plaintext: self.plaintext,
            highlighted_html: self.highlighted,
            plain_html: self.plain,
            sections: self.sections,
            skipped,
        }
    }
}

/// `path` relative to `root`, segments joined with `/`.
pub fn display_name(root: &Path, path: &Path) -> String {
    let relative: Vec<_> = match path.strip_prefix(root) {
        Ok(rest) => rest.components().collect(),
        Err(_) => path.components().skip(root.components().count()).collect(),
    };
    relative
        .iter()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Replace the characters that are significant in HTML markup and attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_neutralises_markup() {
        assert_eq!(
            escape_html("<script>alert('x') && \"y\"</script>"),
            "&lt;script&gt;alert(&#39;x&#39;) &amp;&amp; &quot;y&quot;&lt;/script&gt;"
        );
        assert_eq!(escape_html("plain text"), "plain text");
    }

    #[test]
    fn display_name_drops_the_extraction_prefix() {
        let root = Path::new("extracted/abc-123");
        assert_eq!(
            display_name(root, Path::new("extracted/abc-123/src/Main.java")),
            "src/Main.java"
        );
        assert_eq!(display_name(root, Path::new("extracted/abc-123/A.java")), "A.java");
    }

    #[test]
    fn display_name_falls_back_to_counting_segments() {
        let root = Path::new("./extracted/abc-123");
        assert_eq!(
            display_name(root, Path::new("./uploads/other/pkg/B.java")),
            "pkg/B.java"
        );
    }

    #[test]
    fn empty_aggregate_is_still_a_complete_document() {
        let assets = HighlightAssets {
            css: "body{}".into(),
            script: "var hljs;".into(),
        };
        let output = Buffers::open(&assets).close(&assets, Vec::new());
        assert_eq!(output.plaintext, "");
        assert_eq!(
            output.highlighted_html,
            "<!DOCTYPE html><head><style>body{}</style></head><body><script>var hljs;</script><script>hljs.highlightAll();</script></body></html>"
        );
        assert!(output.plain_html.ends_with("<body></body></html>"));
    }
}
