//! Queue-name templates
//!
//! A template mixes literal text with `${category:key}` placeholders, where
//! `category` is `query` or `cookie`. All spaces and newlines are removed from
//! the raw template before it is compiled.

use axum::http::{header, HeaderMap, Uri};

use crate::error::{Error, Result};

/// Longest queue name the broker accepts, in bytes
pub const MAX_QUEUE_NAME: usize = 255;

/// Prefix reserved by the broker (compared case-insensitively)
pub const RESERVED_PREFIX: &str = "amq.";

/// Request parameters a template can refer to
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

impl RequestParams {
    /// Collect query parameters and cookies from a request
    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        let query = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let cookies = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_string(), value.to_string()))
            })
            .collect();

        Self { query, cookies }
    }

    /// Add a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a cookie
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// First value of a query parameter
    pub fn query(&self, key: &str) -> Option<&str> {
        first(&self.query, key)
    }

    /// First value of a cookie
    pub fn cookie(&self, name: &str) -> Option<&str> {
        first(&self.cookies, name)
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Resolves the queue name for a request
pub trait Pattern: Send + Sync + 'static {
    /// Evaluate against a request and validate the result as a queue name
    fn apply(&self, request: &RequestParams) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { category: String, key: String },
}

/// A compiled queue-name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePattern {
    segments: Vec<Segment>,
}

impl QueuePattern {
    /// Compile a template
    pub fn new(template: &str) -> Self {
        let stripped: String = template.chars().filter(|c| *c != ' ' && *c != '\n').collect();
        Self {
            segments: compile(&stripped),
        }
    }

    /// Substitute every placeholder without validating the result
    ///
    /// Fails with [`Error::MissingParameter`] on the first placeholder that
    /// cannot be resolved to a non-empty value.
    pub fn substitute(&self, request: &RequestParams) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { category, key } => {
                    out.push_str(resolve(request, category, key)?);
                }
            }
        }
        Ok(out)
    }
}

impl Pattern for QueuePattern {
    fn apply(&self, request: &RequestParams) -> Result<String> {
        let queue = self.substitute(request)?;
        validate_queue_name(&queue)?;
        Ok(queue)
    }
}

/// Check a queue name against the broker's naming rules
pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.is_empty() || queue.len() > MAX_QUEUE_NAME {
        return Err(Error::InvalidQueueName);
    }
    let reserved = queue
        .get(..RESERVED_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(RESERVED_PREFIX));
    if reserved {
        return Err(Error::InvalidQueueName);
    }
    Ok(())
}

fn resolve<'a>(request: &'a RequestParams, category: &str, key: &str) -> Result<&'a str> {
    let value = match category {
        "query" => request.query(key),
        "cookie" => request.cookie(key),
        _ => None,
    };
    value.filter(|v| !v.is_empty()).ok_or(Error::MissingParameter)
}

fn compile(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        match placeholder(&rest[start + 2..]) {
            Some((category, key, len)) => {
                literal.push_str(&rest[..start]);
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder {
                    category: category.to_string(),
                    key: key.to_string(),
                });
                rest = &rest[start + 2 + len..];
            }
            None => {
                // not a placeholder, keep `$` and rescan from the next char
                literal.push_str(&rest[..start + 1]);
                rest = &rest[start + 1..];
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Parse `category:key}` and return both parts plus the consumed length
fn placeholder(s: &str) -> Option<(&str, &str, usize)> {
    let colon = s.find(':')?;
    let category = &s[..colon];
    let tail = &s[colon + 1..];
    let close = tail.find('}')?;
    let key = &tail[..close];
    if category.is_empty() || key.is_empty() {
        return None;
    }
    Some((category, key, colon + 1 + close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(query: &str, cookie: &str) -> RequestParams {
        let uri: Uri = format!("/?{query}").parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        RequestParams::from_request(&uri, &headers)
    }

    #[test]
    fn test_substitute_samples() {
        let samples = [
            ("", "", "", Some("")),
            ("${unknown:foo}", "", "", None),
            ("${query:oid}", "", "", None),
            ("${query:oid}", "oid=", "", None),
            ("${query:oid}", "oid=123", "", Some("123")),
            (" ${ query : oid } ", "oid=123", "", Some("123")),
            (" x${ query\n : oid }x ", "oid=123", "", Some("x123x")),
            ("${cookie:sid}", "", "", None),
            ("${cookie:sid}", "", "sid=", None),
            ("${cookie:sid}", "", "sid=123", Some("123")),
            (" ${ cookie : sid } ", "", "sid=123", Some("123")),
            (" x${ cookie\n : sid }x ", "", "sid=123", Some("x123x")),
            ("${query:oid}-${cookie:sid}", "", "", None),
            ("${query:oid}-${cookie:sid}", "oid=", "sid=", None),
            ("${query:oid}-${cookie:sid}", "oid=ABC", "sid=123", Some("ABC-123")),
            (" ${ query : oid } ${ cookie : sid } ", "oid=ABC", "sid=123", Some("ABC123")),
            ("x${query :oid\n} x${ cookie\n : sid }x ", "oid=ABC", "sid=123", Some("xABCx123x")),
        ];

        for (i, (template, query, cookie, expect)) in samples.into_iter().enumerate() {
            let result = QueuePattern::new(template).substitute(&params(query, cookie));
            match expect {
                Some(expect) => assert_eq!(result.unwrap(), expect, "sample {i}"),
                None => assert!(
                    matches!(result, Err(Error::MissingParameter)),
                    "sample {i}: {result:?}"
                ),
            }
        }
    }

    #[test]
    fn test_apply_rejects_empty_name() {
        let pattern = QueuePattern::new("");
        assert!(matches!(
            pattern.apply(&RequestParams::default()),
            Err(Error::InvalidQueueName)
        ));
    }

    #[test]
    fn test_apply_queue_name_limits() {
        let pattern = QueuePattern::new("${query:id}");

        assert!(matches!(
            pattern.apply(&RequestParams::default()),
            Err(Error::MissingParameter)
        ));

        let ok = RequestParams::default().with_query("id", "X".repeat(255));
        assert_eq!(pattern.apply(&ok).unwrap().len(), 255);

        let long = RequestParams::default().with_query("id", "X".repeat(256));
        assert!(matches!(pattern.apply(&long), Err(Error::InvalidQueueName)));

        for name in ["amq.foo", "aMq.foo", "AMQ.", "amq.gen-123"] {
            let reserved = RequestParams::default().with_query("id", name);
            assert!(
                matches!(pattern.apply(&reserved), Err(Error::InvalidQueueName)),
                "{name}"
            );
        }

        let similar = RequestParams::default().with_query("id", "amqfoo");
        assert_eq!(pattern.apply(&similar).unwrap(), "amqfoo");
    }

    #[test]
    fn test_literal_text_is_preserved() {
        let pattern = QueuePattern::new("$not-a-placeholder.${query:id}.${broken");
        let request = RequestParams::default().with_query("id", "7");
        assert_eq!(pattern.apply(&request).unwrap(), "$not-a-placeholder.7.${broken");
    }

    #[test]
    fn test_query_values_are_decoded() {
        let request = params("id=a%2Fb&id=second", "");
        let pattern = QueuePattern::new("${query:id}");
        assert_eq!(pattern.apply(&request).unwrap(), "a/b");
    }

    #[test]
    fn test_cookie_header_parsing() {
        let request = params("", "theme=dark; sid=abc ; other=1");
        assert_eq!(request.cookie("sid"), Some("abc"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.cookie("missing"), None);
    }

    #[test]
    fn test_query_and_cookie_combined() {
        let request = RequestParams::default()
            .with_query("tenant", "acme")
            .with_cookie("sid", "42");
        let pattern = QueuePattern::new("${query:tenant}.${cookie:sid}");
        assert_eq!(pattern.apply(&request).unwrap(), "acme.42");
    }
}
