//! # npm Registry Documents
//!
//! Typed views of the JSON the npm registry and its replication endpoint serve.
//! Every type ignores fields it does not name, so registry-side additions never
//! break parsing.
//!
//! The `_changes` response can be very large, so it is never buffered whole:
//! [`ChangesFeedReader`] is fed raw body chunks as they arrive and hands back
//! each `results[]` element as soon as its closing brace is seen.

use crate::error::{AppError, AppResult};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::VecDeque;

/// One `results[]` element of the changes feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub seq: u64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    /// Present when the feed was requested with `include_docs=true`
    #[serde(default)]
    pub doc: Option<PackageFeed>,
}

/// A package document: every published version of one package.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageFeed {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub versions: IndexMap<String, PackageVersion>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: IndexMap<String, String>,
}

impl PackageFeed {
    /// Package name, falling back to the document id.
    pub fn package_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageVersion {
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub dist: Option<Dist>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: Option<String>,
    #[serde(default)]
    pub shasum: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// Response of `GET /-/v1/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub objects: Vec<SearchHit>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub package: SearchPackage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Incremental splitter for a `_changes` response body.
///
/// The top level must be an object containing a `results` array; other keys
/// are skipped wherever they appear. Elements are not parsed here, only
/// delimited, so a malformed element surfaces when the caller deserializes it
/// while the elements before it have already been handed out.
#[derive(Debug, Default)]
pub struct ChangesFeedReader {
    state: ReaderState,
    buf: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    saw_results: bool,
}

#[derive(Debug, Default)]
enum ReaderState {
    #[default]
    Start,
    Key,
    KeyString { escaped: bool },
    Colon { results: bool },
    ResultsOpen,
    Results,
    Element(ValueScanner),
    Skip(ValueScanner),
    AfterValue,
    Done,
}

#[derive(Debug, Default)]
struct ValueScanner {
    started: bool,
    scalar: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

enum Scan {
    More,
    /// The byte closed the value
    Closed,
    /// The value ended just before this byte
    EndedBefore,
}

impl ValueScanner {
    fn step(&mut self, b: u8) -> AppResult<Scan> {
        if !self.started {
            self.started = true;
            match b {
                b'{' | b'[' => self.depth = 1,
                b'"' => self.in_string = true,
                b',' | b':' | b'}' | b']' => {
                    return Err(structure(format!("unexpected '{}'", b as char)))
                }
                _ => self.scalar = true,
            }
            return Ok(Scan::More);
        }
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
                if self.depth == 0 {
                    return Ok(Scan::Closed);
                }
            }
            return Ok(Scan::More);
        }
        if self.scalar {
            if matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace() {
                return Ok(Scan::EndedBefore);
            }
            return Ok(Scan::More);
        }
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth -= 1;
                if self.depth == 0 {
                    return Ok(Scan::Closed);
                }
            }
            _ => {}
        }
        Ok(Scan::More)
    }
}

fn structure(message: impl Into<String>) -> AppError {
    AppError::FeedStructure(message.into())
}

impl ChangesFeedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk.
    ///
    /// Elements completed before a structural error stay available through
    /// [`next_entry`](Self::next_entry).
    pub fn feed(&mut self, chunk: &[u8]) -> AppResult<()> {
        for &b in chunk {
            self.consume(b)?;
        }
        Ok(())
    }

    /// Next complete `results[]` element, as raw JSON.
    pub fn next_entry(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Confirm the body ended with a closed top-level object holding `results`.
    pub fn finish(&self) -> AppResult<()> {
        if !matches!(self.state, ReaderState::Done) {
            return Err(structure("changes feed ended before the top-level object closed"));
        }
        if !self.saw_results {
            return Err(structure("changes feed has no `results` array"));
        }
        Ok(())
    }

    fn consume(&mut self, b: u8) -> AppResult<()> {
        let ws = b.is_ascii_whitespace();
        match &mut self.state {
            ReaderState::Start => match b {
                _ if ws => {}
                b'{' => self.state = ReaderState::Key,
                _ => return Err(structure("changes feed should be a JSON object")),
            },
            ReaderState::Key => match b {
                _ if ws => {}
                b'"' => {
                    self.buf.clear();
                    self.state = ReaderState::KeyString { escaped: false };
                }
                b'}' => self.state = ReaderState::Done,
                _ => return Err(structure("expected an object key")),
            },
            ReaderState::KeyString { escaped } => {
                if *escaped {
                    *escaped = false;
                    self.buf.push(b);
                } else if b == b'\\' {
                    *escaped = true;
                    self.buf.push(b);
                } else if b == b'"' {
                    let results = self.buf == b"results";
                    self.state = ReaderState::Colon { results };
                } else {
                    self.buf.push(b);
                }
            }
            ReaderState::Colon { results } => match b {
                _ if ws => {}
                b':' if *results => self.state = ReaderState::ResultsOpen,
                b':' => self.state = ReaderState::Skip(ValueScanner::default()),
                _ => return Err(structure("expected ':' after object key")),
            },
            ReaderState::ResultsOpen => match b {
                _ if ws => {}
                b'[' => {
                    if self.saw_results {
                        return Err(structure("changes feed has more than one `results`"));
                    }
                    self.saw_results = true;
                    self.state = ReaderState::Results;
                }
                _ => return Err(structure("changes feed `results` should be an array")),
            },
            ReaderState::Results => match b {
                _ if ws => {}
                b',' => {}
                b']' => self.state = ReaderState::AfterValue,
                _ => {
                    self.buf.clear();
                    self.state = ReaderState::Element(ValueScanner::default());
                    return self.consume(b);
                }
            },
            ReaderState::Element(scanner) => match scanner.step(b)? {
                Scan::More => self.buf.push(b),
                Scan::Closed => {
                    self.buf.push(b);
                    self.ready.push_back(std::mem::take(&mut self.buf));
                    self.state = ReaderState::Results;
                }
                Scan::EndedBefore => {
                    self.ready.push_back(std::mem::take(&mut self.buf));
                    self.state = ReaderState::Results;
                    return self.consume(b);
                }
            },
            ReaderState::Skip(scanner) => {
                if ws && !scanner.started {
                    return Ok(());
                }
                match scanner.step(b)? {
                    Scan::More => {}
                    Scan::Closed => self.state = ReaderState::AfterValue,
                    Scan::EndedBefore => {
                        self.state = ReaderState::AfterValue;
                        return self.consume(b);
                    }
                }
            }
            ReaderState::AfterValue => match b {
                _ if ws => {}
                b',' => self.state = ReaderState::Key,
                b'}' => self.state = ReaderState::Done,
                _ => return Err(structure("expected ',' or '}' after value")),
            },
            ReaderState::Done => {
                if !ws {
                    return Err(structure("trailing data after changes feed"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(body: &str, chunk_size: usize) -> (Vec<String>, AppResult<()>) {
        let mut reader = ChangesFeedReader::new();
        let mut result = Ok(());
        for chunk in body.as_bytes().chunks(chunk_size) {
            if let Err(e) = reader.feed(chunk) {
                result = Err(e);
                break;
            }
        }
        let mut entries = Vec::new();
        while let Some(raw) = reader.next_entry() {
            entries.push(String::from_utf8(raw).unwrap());
        }
        (entries, result.and_then(|_| reader.finish()))
    }

    const FEED: &str = r#"{
        "results": [
            {"seq": 121, "id": "a", "doc": {"name": "a", "versions": {}}},
            {"seq": 122, "id": "b}", "doc": {"name": "b\"]", "versions": {"1.0.0": {"version": "1.0.0"}}}}
        ],
        "last_seq": 122
    }"#;

    #[test]
    fn test_elements_survive_any_chunking() {
        for chunk_size in [1, 3, 7, 64, FEED.len()] {
            let (entries, result) = read_all(FEED, chunk_size);
            assert!(result.is_ok(), "chunk size {chunk_size}");
            assert_eq!(entries.len(), 2);
            let change: Change = serde_json::from_str(&entries[1]).unwrap();
            assert_eq!(change.seq, 122);
            assert_eq!(change.doc.unwrap().name.as_deref(), Some("b\"]"));
        }
    }

    #[test]
    fn test_leading_keys_are_skipped() {
        let body = r#"{"pending": 3, "meta": {"results": [1]}, "results": [{"seq": 1}]}"#;
        let (entries, result) = read_all(body, 5);
        result.unwrap();
        assert_eq!(entries, vec![r#"{"seq": 1}"#]);
    }

    #[test]
    fn test_structural_errors() {
        for body in [r#"[]"#, r#"{"results": {}}"#, r#"{"last_seq": 0}"#] {
            let (_, result) = read_all(body, 4);
            assert!(
                matches!(result, Err(AppError::FeedStructure(_))),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn test_truncated_body_keeps_completed_elements() {
        let body = r#"{"results": [{"seq": 1}, {"seq": 2}, {"seq""#;
        let (entries, result) = read_all(body, 8);
        assert_eq!(entries.len(), 2);
        assert!(matches!(result, Err(AppError::FeedStructure(_))));
    }

    #[test]
    fn test_malformed_element_is_delimited_not_rejected() {
        let body = r#"{"results": [{"seq": 1}, 42, {"seq": "x"}]}"#;
        let (entries, result) = read_all(body, 2);
        result.unwrap();
        assert_eq!(entries, vec![r#"{"seq": 1}"#, "42", r#"{"seq": "x"}"#]);
        assert!(serde_json::from_str::<Change>(&entries[1]).is_err());
    }

    #[test]
    fn test_documents_tolerate_unknown_fields() {
        let json = r#"{
            "_id": "lodash", "_rev": "1-abc", "license": "MIT",
            "dist-tags": {"latest": "4.17.21"},
            "versions": {"4.17.21": {"version": "4.17.21", "main": "lodash.js",
                "dist": {"shasum": "679591c564c3bffaae8454cf0b3df370c3d6911c", "fileCount": 1}}}
        }"#;
        let feed: PackageFeed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.package_name(), Some("lodash"));
        assert_eq!(feed.dist_tags["latest"], "4.17.21");
        assert!(feed.versions["4.17.21"].dist.as_ref().unwrap().shasum.is_some());
    }

    #[test]
    fn test_search_results() {
        let json = r#"{"objects": [{"package": {"name": "lodash", "version": "4.17.21",
            "links": {}}, "score": {"final": 0.9}}], "total": 1, "time": "now"}"#;
        let results: SearchResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.objects[0].package.name, "lodash");
    }
}
