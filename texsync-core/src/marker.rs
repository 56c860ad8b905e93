//! In-document processing marker.
//!
//! A marker is a single comment line inside the tracked document:
//!
//! ```text
//! %parameters: model=o1, status=start
//! ```
//!
//! The reserved `status` key drives the [`EnvironmentStateMachine`]; every other
//! key is opaque configuration handed to the generator untouched and in order.
//!
//! [`EnvironmentStateMachine`]: crate::state_machine::EnvironmentStateMachine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MarkerError;

/// Prefix that identifies a marker line (after leading whitespace).
pub const PARAMETER_PREFIX: &str = "%parameters:";

/// Reserved key whose value is the marker status.
pub const STATUS_KEY: &str = "status";

// ---------------------------------------------------------------------------
// MarkerId
// ---------------------------------------------------------------------------

/// Timestamp id distinguishing one generation from the next.
///
/// Rendered as `YYYYMMDDHHMMSSffffff` (UTC, microseconds).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerId(pub String);

impl MarkerId {
    const FORMAT: &'static str = "%Y%m%d%H%M%S%6f";
    const WIDTH: usize = 20;

    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.format(Self::FORMAT).to_string())
    }

    /// A fresh id strictly greater than `prev`, even under clock regressions.
    pub fn next_after(prev: Option<&MarkerId>) -> Self {
        let now = Self::from_time(Utc::now());
        let (Some(prev_num), Some(now_num)) = (prev.and_then(MarkerId::as_number), now.as_number())
        else {
            return now;
        };
        if now_num > prev_num {
            now
        } else {
            Self(format!("{:0width$}", prev_num + 1, width = Self::WIDTH))
        }
    }

    /// Numeric value of the id, ignoring `_` separators used by older markers.
    pub fn as_number(&self) -> Option<u128> {
        let digits: String = self.0.chars().filter(|c| *c != '_').collect();
        digits.parse().ok()
    }

    fn is_valid(raw: &str) -> bool {
        !raw.is_empty()
            && raw.chars().any(|c| c.is_ascii_digit())
            && raw.chars().all(|c| c.is_ascii_digit() || c == '_')
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// MarkerStatus
// ---------------------------------------------------------------------------

/// Value of the reserved `status` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerStatus {
    Idle,
    Start,
    Streaming(MarkerId),
    Completed(MarkerId),
    Error(MarkerId),
    /// Anything unrecognised; kept verbatim and never triggers.
    Other(String),
}

impl MarkerStatus {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "" | "idle" => return MarkerStatus::Idle,
            "start" => return MarkerStatus::Start,
            _ => {}
        }
        if let Some((prefix, id)) = value.split_once('_') {
            if MarkerId::is_valid(id) {
                let id = MarkerId(id.to_string());
                match prefix.to_ascii_lowercase().as_str() {
                    // `reasoning_` is what early documents carry for in-flight runs.
                    "streaming" | "reasoning" => return MarkerStatus::Streaming(id),
                    "completed" => return MarkerStatus::Completed(id),
                    "error" => return MarkerStatus::Error(id),
                    _ => {}
                }
            }
        }
        MarkerStatus::Other(value.to_string())
    }

    pub fn id(&self) -> Option<&MarkerId> {
        match self {
            MarkerStatus::Streaming(id) | MarkerStatus::Completed(id) | MarkerStatus::Error(id) => {
                Some(id)
            }
            _ => None,
        }
    }

    /// Whether this marker asks for a new generation.
    pub fn is_triggerable(&self) -> bool {
        matches!(self, MarkerStatus::Start)
    }

    /// Forward-only transitions. Resets to `idle` go through [`reset_status`].
    pub fn can_advance_to(&self, next: &MarkerStatus) -> bool {
        use MarkerStatus::*;
        match (self, next) {
            (Start, Streaming(_)) => true,
            (Streaming(_), Completed(_) | Error(_)) => true,
            (Idle | Completed(_) | Error(_) | Other(_), Start) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerStatus::Idle => f.write_str("idle"),
            MarkerStatus::Start => f.write_str("start"),
            MarkerStatus::Streaming(id) => write!(f, "streaming_{id}"),
            MarkerStatus::Completed(id) => write!(f, "completed_{id}"),
            MarkerStatus::Error(id) => write!(f, "error_{id}"),
            MarkerStatus::Other(raw) => f.write_str(raw),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentMarker
// ---------------------------------------------------------------------------

/// One parsed marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMarker {
    /// Zero-based line index in the document it was parsed from.
    pub line: usize,
    pub indent: String,
    /// All `key=value` pairs in document order, `status` included.
    pub params: Vec<(String, String)>,
    pub status: MarkerStatus,
}

impl DocumentMarker {
    /// Parse a single line; `None` if it is not a marker line.
    pub fn parse_line(line_no: usize, line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let indent = line[..line.len() - trimmed.len()].to_string();
        let rest = strip_prefix(trimmed.trim_end())?;

        let mut params = Vec::new();
        for item in rest.split(',') {
            let item = item.trim();
            let Some((key, value)) = item.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            params.push((key.to_string(), value.trim().to_string()));
        }

        let status = params
            .iter()
            .find(|(k, _)| k == STATUS_KEY)
            .map(|(_, v)| MarkerStatus::parse(v))
            .unwrap_or(MarkerStatus::Idle);

        Some(Self {
            line: line_no,
            indent,
            params,
            status,
        })
    }

    /// Opaque parameters for the generator (everything except `status`).
    pub fn options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params
            .iter()
            .filter(|(k, _)| k != STATUS_KEY)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Copy of this marker carrying `status`, keeping key order.
    pub fn with_status(&self, status: MarkerStatus) -> Self {
        let mut params = self.params.clone();
        match params.iter_mut().find(|(k, _)| k == STATUS_KEY) {
            Some((_, v)) => *v = status.to_string(),
            None => params.push((STATUS_KEY.to_string(), status.to_string())),
        }
        Self {
            line: self.line,
            indent: self.indent.clone(),
            params,
            status,
        }
    }

    /// Render back to a marker line (no line terminator).
    pub fn render(&self) -> String {
        let pairs: Vec<String> = self.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{} {}", self.indent, PARAMETER_PREFIX, pairs.join(", "))
    }
}

/// Accept `%parameters:` as well as `% parameters:`.
fn strip_prefix(trimmed: &str) -> Option<&str> {
    let rest = trimmed.strip_prefix('%')?;
    let rest = rest.trim_start().strip_prefix("parameters:")?;
    Some(rest)
}

/// All marker lines in `document`, in order.
pub fn find_markers(document: &str) -> Vec<DocumentMarker> {
    document
        .lines()
        .enumerate()
        .filter_map(|(n, line)| DocumentMarker::parse_line(n, line))
        .collect()
}

/// The first marker that asks for a generation, if any.
pub fn live_marker(document: &str) -> Option<DocumentMarker> {
    find_markers(document)
        .into_iter()
        .find(|m| m.status.is_triggerable())
}

/// Rewrite the first marker whose status equals `from` so it carries `to`.
///
/// Fails if no such marker exists or if the move is not a forward transition.
pub fn rewrite_status(
    document: &str,
    from: &MarkerStatus,
    to: MarkerStatus,
) -> Result<String, MarkerError> {
    if !from.can_advance_to(&to) {
        return Err(MarkerError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    replace_first(document, |m| &m.status == from, to).ok_or_else(|| MarkerError::NotFound {
        status: from.to_string(),
    })
}

/// Operator reset: force the first marker with status `from` to `to`,
/// bypassing the forward-only rule.
pub fn reset_status(
    document: &str,
    from: &MarkerStatus,
    to: MarkerStatus,
) -> Result<String, MarkerError> {
    replace_first(document, |m| &m.status == from, to).ok_or_else(|| MarkerError::NotFound {
        status: from.to_string(),
    })
}

fn replace_first(
    document: &str,
    matches: impl Fn(&DocumentMarker) -> bool,
    to: MarkerStatus,
) -> Option<String> {
    let mut out = String::with_capacity(document.len() + 16);
    let mut done = false;
    for (n, chunk) in document.split_inclusive('\n').enumerate() {
        if !done {
            let body = chunk.trim_end_matches(&['\n', '\r'][..]);
            if let Some(marker) = DocumentMarker::parse_line(n, body) {
                if matches(&marker) {
                    out.push_str(&marker.with_status(to.clone()).render());
                    out.push_str(&chunk[body.len()..]);
                    done = true;
                    continue;
                }
            }
        }
        out.push_str(chunk);
    }
    done.then_some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\\begin{user}\nHow much is 1+1?\n%parameters: model=o1, status=start\n\\end{user}\n";

    #[test]
    fn parses_status_and_options() {
        let markers = find_markers(DOC);
        assert_eq!(markers.len(), 1);
        let m = &markers[0];
        assert_eq!(m.line, 2);
        assert_eq!(m.status, MarkerStatus::Start);
        assert_eq!(m.option("model"), Some("o1"));
        assert_eq!(m.options().count(), 1);
    }

    #[test]
    fn missing_status_means_idle() {
        let m = DocumentMarker::parse_line(0, "  %parameters: model=gpt").unwrap();
        assert_eq!(m.status, MarkerStatus::Idle);
        assert_eq!(m.indent, "  ");
    }

    #[test]
    fn spaced_prefix_is_accepted() {
        let m = DocumentMarker::parse_line(0, "% parameters: status=start").unwrap();
        assert_eq!(m.status, MarkerStatus::Start);
        assert!(DocumentMarker::parse_line(0, "% just a comment").is_none());
    }

    #[test]
    fn status_values_roundtrip_through_display() {
        for raw in [
            "idle",
            "start",
            "streaming_20260101120000000001",
            "completed_20260101120000000001",
            "error_20260101120000000001",
        ] {
            assert_eq!(MarkerStatus::parse(raw).to_string(), raw);
        }
        assert_eq!(
            MarkerStatus::parse("Reasoning_20250101_120000_123456"),
            MarkerStatus::Streaming(MarkerId("20250101_120000_123456".into()))
        );
        assert_eq!(
            MarkerStatus::parse("done"),
            MarkerStatus::Other("done".into())
        );
    }

    #[test]
    fn rewrite_keeps_other_keys_and_order() {
        let id = MarkerId("20260101120000000001".into());
        let out = rewrite_status(DOC, &MarkerStatus::Start, MarkerStatus::Streaming(id)).unwrap();
        assert!(out.contains("%parameters: model=o1, status=streaming_20260101120000000001\n"));
        assert!(out.starts_with("\\begin{user}\n"));
        assert!(out.ends_with("\\end{user}\n"));
        assert!(live_marker(&out).is_none());
    }

    #[test]
    fn rewrite_preserves_crlf() {
        let doc = "a\r\n%parameters: status=start\r\nb\r\n";
        let id = MarkerId("1".into());
        let out = rewrite_status(doc, &MarkerStatus::Start, MarkerStatus::Streaming(id)).unwrap();
        assert_eq!(out, "a\r\n%parameters: status=streaming_1\r\nb\r\n");
    }

    #[test]
    fn backwards_transition_is_rejected() {
        let id = MarkerId("1".into());
        let err = rewrite_status(DOC, &MarkerStatus::Completed(id), MarkerStatus::Start);
        assert!(err.is_err());
        let err = rewrite_status(DOC, &MarkerStatus::Start, MarkerStatus::Idle).unwrap_err();
        assert!(matches!(err, MarkerError::IllegalTransition { .. }));
    }

    #[test]
    fn reset_bypasses_forward_rule() {
        let doc = "%parameters: status=streaming_7\n";
        let out = reset_status(
            doc,
            &MarkerStatus::Streaming(MarkerId("7".into())),
            MarkerStatus::Idle,
        )
        .unwrap();
        assert_eq!(out, "%parameters: status=idle\n");
    }

    #[test]
    fn missing_marker_is_reported() {
        let err = rewrite_status(
            "no markers here\n",
            &MarkerStatus::Start,
            MarkerStatus::Streaming(MarkerId("1".into())),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MarkerError::NotFound {
                status: "start".into()
            }
        );
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let far_future = MarkerId("99990101000000000000".into());
        let next = MarkerId::next_after(Some(&far_future));
        assert!(next.as_number() > far_future.as_number());
        assert_eq!(next.0.len(), 20);

        let a = MarkerId::next_after(None);
        let b = MarkerId::next_after(Some(&a));
        assert!(b.as_number() > a.as_number());
        assert!(a.0.len() >= 14 && a.0.chars().all(|c| c.is_ascii_digit()));
    }
}
