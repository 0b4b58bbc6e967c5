//! Streaming parser for the consolidated list XML
//!
//! Only the direct fields of `CONSOLIDATED_LIST/INDIVIDUALS/INDIVIDUAL` and
//! `CONSOLIDATED_LIST/ENTITIES/ENTITY` are read; nested blocks (aliases, addresses, documents)
//! are skipped.

use crate::error::{Error, Result};
use crate::types::{ListEntry, ListEntryKind};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// Longest comment kept per record, in characters
pub const MAX_COMMENT_LENGTH: usize = 500;

const NAME_FIELDS: [&str; 4] = ["FIRST_NAME", "SECOND_NAME", "THIRD_NAME", "FOURTH_NAME"];

/// Parsed record with the individual name parts kept for matching
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub entry: ListEntry,
    pub name_parts: Vec<String>,
}

struct RecordBuilder {
    kind: ListEntryKind,
    depth: usize,
    fields: HashMap<String, String>,
}

impl RecordBuilder {
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn finish(self) -> Option<ParsedRecord> {
        let name_parts: Vec<String> = match self.kind {
            ListEntryKind::Individual => NAME_FIELDS.iter().filter_map(|f| self.field(f)).collect(),
            ListEntryKind::Entity => self.field("FIRST_NAME").into_iter().collect(),
        };
        if name_parts.is_empty() {
            return None;
        }

        let comments = self
            .field("COMMENTS1")
            .map(|c| c.chars().take(MAX_COMMENT_LENGTH).collect())
            .unwrap_or_default();

        Some(ParsedRecord {
            entry: ListEntry {
                data_id: self.field("DATAID"),
                name: name_parts.join(" "),
                reference_number: self.field("REFERENCE_NUMBER"),
                listed_on: self.field("LISTED_ON"),
                un_list_type: self.field("UN_LIST_TYPE"),
                comments,
                kind: self.kind,
            },
            name_parts,
        })
    }
}

/// Parse the list, keeping document order
pub fn parse_consolidated(xml: &[u8]) -> Result<Vec<ParsedRecord>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<RecordBuilder> = None;
    let mut records = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.is_empty() {
                    saw_root = tag == "CONSOLIDATED_LIST";
                }

                if current.is_none() && path.len() == 2 && path[0] == "CONSOLIDATED_LIST" {
                    let kind = match (path[1].as_str(), tag.as_str()) {
                        ("INDIVIDUALS", "INDIVIDUAL") => Some(ListEntryKind::Individual),
                        ("ENTITIES", "ENTITY") => Some(ListEntryKind::Entity),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        current = Some(RecordBuilder {
                            kind,
                            depth: path.len() + 1,
                            fields: HashMap::new(),
                        });
                    }
                }
                path.push(tag);
            }
            Event::End(_) => {
                let closing_depth = path.len();
                path.pop();
                if current.as_ref().map(|r| r.depth) == Some(closing_depth) {
                    if let Some(record) = current.take().and_then(RecordBuilder::finish) {
                        records.push(record);
                    }
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                append_field(&mut current, &path, &text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                append_field(&mut current, &path, &text);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Error::Parse(
            "document root is not CONSOLIDATED_LIST".to_string(),
        ));
    }
    if !path.is_empty() {
        return Err(Error::Parse(format!(
            "truncated document, {} unclosed elements",
            path.len()
        )));
    }
    Ok(records)
}

fn append_field(current: &mut Option<RecordBuilder>, path: &[String], text: &str) {
    let Some(record) = current.as_mut() else {
        return;
    };
    // Only direct children of the record element
    if path.len() != record.depth + 1 {
        return;
    }
    if let Some(field) = path.last() {
        record.fields.entry(field.clone()).or_default().push_str(text);
    }
}
