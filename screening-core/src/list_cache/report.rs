//! HTML evidence of a consolidated-list lookup
//!
//! Written for every final search, match or not, so the bundle always records what the UN side
//! of the check saw and which list snapshot it was run against.

use super::SnapshotInfo;
use crate::live_source::capture::escape_html;
use crate::types::{
    EvidenceArtifact, EvidenceKind, SearchType, SourceMatch, SourceReport, SourceStatus,
};
use chrono::{DateTime, Utc};
use std::fmt::Write;

pub const LIST_REPORT_FILE_NAME: &str = "evidence_un.html";

/// Render the UN evidence document for one search
pub fn list_report(
    query: &str,
    search_type: SearchType,
    report: &SourceReport,
    snapshot: Option<&SnapshotInfo>,
    generated_at: DateTime<Utc>,
) -> EvidenceArtifact {
    let mut body = String::new();

    match &report.status {
        SourceStatus::Timeout { seconds } => {
            let _ = writeln!(
                body,
                "<h2>Not checked</h2>\n<p>The consolidated list lookup timed out after {}s.</p>",
                seconds
            );
        }
        SourceStatus::Unavailable { reason } => {
            let _ = writeln!(
                body,
                "<h2>Not checked</h2>\n<p>The consolidated list could not be loaded: {}</p>",
                escape_html(reason)
            );
        }
        SourceStatus::Ok | SourceStatus::Stale { .. } if !report.found => {
            body.push_str(
                "<h2>No matches found</h2>\n<p>The searched name was not found in the UN Security \
                 Council consolidated sanctions list.</p>\n",
            );
        }
        SourceStatus::Ok | SourceStatus::Stale { .. } => {
            let _ = writeln!(body, "<h2>{} match(es) found</h2>", report.total_matches);
            if report.total_matches > report.matches.len() {
                let _ = writeln!(body, "<p>First {} listed.</p>", report.matches.len());
            }
            for m in &report.matches {
                if let SourceMatch::ListEntry(entry) = m {
                    let _ = write!(
                        body,
                        "<div class=\"record\">\n<h3>{}</h3>\n<table border=\"1\">\n",
                        escape_html(&entry.name)
                    );
                    let fields = [
                        ("Reference number", entry.reference_number.as_deref()),
                        ("List type", entry.un_list_type.as_deref()),
                        ("Listed on", entry.listed_on.as_deref()),
                        ("Data ID", entry.data_id.as_deref()),
                    ];
                    for (label, value) in fields {
                        let _ = writeln!(
                            body,
                            "<tr><th>{}</th><td>{}</td></tr>",
                            label,
                            escape_html(value.unwrap_or("N/A"))
                        );
                    }
                    body.push_str("</table>\n");
                    if !entry.comments.is_empty() {
                        let _ = writeln!(body, "<p>{}</p>", escape_html(&entry.comments));
                    }
                    body.push_str("</div>\n");
                }
            }
        }
    }

    let snapshot_line = match snapshot {
        Some(info) => format!(
            "List snapshot fetched at {} (SHA-256 {}, {} records)",
            info.fetched_at.to_rfc3339(),
            info.sha256,
            info.entries
        ),
        None => "No list snapshot available".to_string(),
    };
    let stale_note = match &report.status {
        SourceStatus::Stale { .. } => "<p><strong>Served from a stale snapshot.</strong></p>\n",
        _ => "",
    };

    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>UN sanctions evidence: {query}</title>\n</head>\n<body>\n\
         <h1>UN Security Council Sanctions Check</h1>\n\
         <p><strong>Query:</strong> {query}</p>\n\
         <p><strong>Search type:</strong> {search_type}</p>\n\
         <p><strong>Generated at:</strong> {generated_at}</p>\n\
         <p>{snapshot}</p>\n{stale}{body}\
         <p>Source: UN Security Council Consolidated List</p>\n\
         </body>\n</html>\n",
        query = escape_html(query),
        search_type = search_type,
        generated_at = generated_at.to_rfc3339(),
        snapshot = escape_html(&snapshot_line),
        stale = stale_note,
        body = body,
    );

    EvidenceArtifact::new(
        EvidenceKind::ListReport,
        LIST_REPORT_FILE_NAME,
        "text/html; charset=utf-8",
        html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListEntry, ListEntryKind, MatchSet, SourceId};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn snapshot() -> SnapshotInfo {
        SnapshotInfo {
            fetched_at: at(),
            sha256: "ab12".to_string(),
            key: "cache/consolidated.xml".to_string(),
            entries: 3,
        }
    }

    fn html(artifact: &EvidenceArtifact) -> String {
        String::from_utf8(artifact.content.to_vec()).unwrap()
    }

    #[test]
    fn test_report_lists_matched_records() {
        let entry = ListEntry {
            data_id: Some("6908001".to_string()),
            name: "IVAN PETROVICH SIDOROV".to_string(),
            reference_number: Some("KPi.101".to_string()),
            listed_on: Some("2017-06-02".to_string()),
            un_list_type: Some("DPRK".to_string()),
            comments: "Bank <representative>.".to_string(),
            kind: ListEntryKind::Individual,
        };
        let report = SourceReport::from_match_set(
            MatchSet::new(SourceId::Un, vec![SourceMatch::ListEntry(entry)]),
            SourceStatus::Ok,
            3,
        );

        let snapshot = snapshot();
        let artifact = list_report("Sidorov", SearchType::Person, &report, Some(&snapshot), at());
        let page = html(&artifact);

        assert_eq!(artifact.kind, EvidenceKind::ListReport);
        assert_eq!(artifact.file_name, LIST_REPORT_FILE_NAME);
        assert!(page.contains("1 match(es) found"));
        assert!(page.contains("<td>KPi.101</td>"));
        assert!(page.contains("<td>DPRK</td>"));
        assert!(page.contains("<td>2017-06-02</td>"));
        assert!(page.contains("<td>6908001</td>"));
        assert!(page.contains("Bank &lt;representative&gt;."));
        assert!(page.contains("SHA-256 ab12"));
    }

    #[test]
    fn test_report_states_no_match() {
        let report = SourceReport::from_match_set(
            MatchSet::new(SourceId::Un, Vec::new()),
            SourceStatus::Ok,
            1,
        );

        let page = html(&list_report(
            "ACME Holdings",
            SearchType::Entity,
            &report,
            Some(&snapshot()),
            at(),
        ));

        assert!(page.contains("No matches found"));
        assert!(!page.contains("match(es) found"));
    }

    #[test]
    fn test_report_states_unchecked_list() {
        let report = SourceReport::unavailable(
            SourceId::Un,
            SourceStatus::Unavailable {
                reason: "connection refused".to_string(),
            },
            2,
        );

        let page = html(&list_report("ACME", SearchType::Entity, &report, None, at()));

        assert!(page.contains("Not checked"));
        assert!(page.contains("connection refused"));
        assert!(page.contains("No list snapshot available"));
        assert!(!page.contains("No matches found"));
    }
}
