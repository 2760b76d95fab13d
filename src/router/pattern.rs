//! Route path patterns.
//!
//! A pattern is a `/`-separated list of segments. Each segment is one of:
//!
//! | Segment            | Matches                                   | Captured as        |
//! |--------------------|-------------------------------------------|--------------------|
//! | `users`            | exactly `users`                           | *(nothing)*        |
//! | `${id}`            | one segment                               | `id`               |
//! | `${id:\d+}`        | one segment matching the regex            | `id`               |
//! | `${id:<N>}`        | one segment matching the `N` alias        | `id`               |
//! | `*{rest}`          | one or more trailing segments             | `rest` (joined)    |
//!
//! Captured values are percent-decoded. Trailing slashes are ignored on both
//! the pattern and the path.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use regex::Regex;
use thiserror::Error;

/// Path parameters extracted from a matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Errors found while compiling a pattern. Raised at registration time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("parameter `{token}` must end with '}}'")]
    Unterminated { token: String },

    #[error("segment `{segment}` mixes a parameter with literal text")]
    MixedSegment { segment: String },

    #[error("parameter in `{token}` has no name")]
    EmptyName { token: String },

    #[error("parameter name `{name}` is used twice")]
    DuplicateName { name: String },

    #[error("splat parameter `{token}` can't contain a pattern")]
    SplatWithPattern { token: String },

    #[error("a path can contain only one splat parameter: {path}")]
    MultipleSplats { path: String },

    #[error("the splat parameter must be the last segment: {path}")]
    NonTrailingSplat { path: String },

    #[error("unknown pattern alias `<{alias}>`")]
    UnknownAlias { alias: String },

    #[error("invalid regex for parameter `{name}`: {reason}")]
    InvalidRegex { name: String, reason: String },
}

/// The pattern aliases every router starts with.
pub fn default_aliases() -> HashMap<String, String> {
    [
        ("A", "[a-zA-Z_]+"),
        ("N", "[0-9]+"),
        ("AN", "[0-9a-zA-Z_]+"),
        ("A+", "[a-zA-Z_-]+"),
        ("AN+", "[0-9a-zA-Z_-]+"),
    ]
    .into_iter()
    .map(|(alias, regex)| (alias.to_owned(), regex.to_owned()))
    .collect()
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param { name: String, regex: Option<Regex> },
    Splat { name: String },
}

/// How specific a pattern is. Larger wins when several main routes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    class: u8,
    literals: usize,
}

/// A compiled route path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    any: bool,
    case_sensitive: bool,
}

impl PathPattern {
    /// A pattern matching every path, the root included. Used by filters,
    /// not-found and exception routes registered without a path.
    pub fn any() -> Self {
        Self {
            raw: "*".to_owned(),
            segments: Vec::new(),
            any: true,
            case_sensitive: true,
        }
    }

    /// Compiles `path`, resolving `${name:<alias>}` through `aliases`.
    pub fn parse(
        path: &str,
        aliases: &HashMap<String, String>,
        case_sensitive: bool,
    ) -> Result<Self, PatternError> {
        let raw = normalize(path);
        let tokens: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();

        let splats = tokens.iter().filter(|t| t.starts_with("*{")).count();
        if splats > 1 {
            return Err(PatternError::MultipleSplats { path: raw });
        }

        let mut names: Vec<String> = Vec::new();
        let mut segments = Vec::with_capacity(tokens.len());
        for (index, token) in tokens.iter().enumerate() {
            let segment = parse_segment(token, aliases)?;
            match &segment {
                Segment::Param { name, .. } | Segment::Splat { name } => {
                    if names.iter().any(|n| n == name) {
                        return Err(PatternError::DuplicateName { name: name.clone() });
                    }
                    names.push(name.clone());
                }
                Segment::Literal(_) => {}
            }
            if matches!(segment, Segment::Splat { .. }) && index + 1 != tokens.len() {
                return Err(PatternError::NonTrailingSplat { path: raw });
            }
            segments.push(segment);
        }

        Ok(Self {
            raw,
            segments,
            any: false,
            case_sensitive,
        })
    }

    /// The normalized pattern source, `*` for [`PathPattern::any`].
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `true` when the pattern has neither parameters nor a splat.
    pub fn is_literal(&self) -> bool {
        !self.any && self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn has_params(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param { .. }))
    }

    /// `Some(name)` when the last segment is a splat.
    pub fn splat_name(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::Splat { name }) => Some(name),
            _ => None,
        }
    }

    /// The literal prefix before the splat, e.g. `/one` for `/one/*{path}`.
    pub fn splat_prefix(&self) -> String {
        let literals: Vec<&str> = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .filter_map(|s| match s {
                Segment::Literal(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        format!("/{}", literals.join("/"))
    }

    pub fn specificity(&self) -> Specificity {
        let class = if self.any {
            0
        } else if self.is_literal() {
            3
        } else if self.splat_name().is_none() {
            2
        } else {
            1
        };
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        Specificity { class, literals }
    }

    /// Matches `path` (without query string), returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        if self.any {
            return Some(PathParams::new());
        }

        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = PathParams::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    let part = decode(parts.get(index)?);
                    let equal = if self.case_sensitive {
                        *literal == part
                    } else {
                        literal.eq_ignore_ascii_case(&part)
                    };
                    if !equal {
                        return None;
                    }
                }
                Segment::Param { name, regex } => {
                    let value = decode(parts.get(index)?);
                    if let Some(regex) = regex {
                        if !regex.is_match(&value) {
                            return None;
                        }
                    }
                    params.insert(name.clone(), value);
                }
                Segment::Splat { name } => {
                    let rest = parts.get(index..).filter(|rest| !rest.is_empty())?;
                    let joined: Vec<String> = rest.iter().map(|p| decode(p)).collect();
                    params.insert(name.clone(), joined.join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    };
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn parse_segment(token: &str, aliases: &HashMap<String, String>) -> Result<Segment, PatternError> {
    let is_param = token.starts_with("${");
    let is_splat = token.starts_with("*{");

    if !is_param && !is_splat {
        if token.contains("${") || token.contains("*{") {
            return Err(PatternError::MixedSegment {
                segment: token.to_owned(),
            });
        }
        return Ok(Segment::Literal(decode(token)));
    }

    let Some(inner) = token.get(2..).and_then(|t| t.strip_suffix('}')) else {
        return Err(PatternError::Unterminated {
            token: token.to_owned(),
        });
    };

    if is_splat {
        if inner.contains(':') {
            return Err(PatternError::SplatWithPattern {
                token: token.to_owned(),
            });
        }
        if inner.is_empty() {
            return Err(PatternError::EmptyName {
                token: token.to_owned(),
            });
        }
        return Ok(Segment::Splat {
            name: inner.to_owned(),
        });
    }

    let (name, pattern) = match inner.split_once(':') {
        Some((name, pattern)) => (name, Some(pattern)),
        None => (inner, None),
    };
    if name.is_empty() {
        return Err(PatternError::EmptyName {
            token: token.to_owned(),
        });
    }

    let regex = match pattern {
        None => None,
        Some(pattern) => {
            let source = match pattern.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
                Some(alias) => aliases
                    .get(alias)
                    .ok_or_else(|| PatternError::UnknownAlias {
                        alias: alias.to_owned(),
                    })?
                    .as_str(),
                None => pattern,
            };
            let compiled =
                Regex::new(&format!("^(?:{source})$")).map_err(|e| PatternError::InvalidRegex {
                    name: name.to_owned(),
                    reason: e.to_string(),
                })?;
            Some(compiled)
        }
    };

    Ok(Segment::Param {
        name: name.to_owned(),
        regex,
    })
}
