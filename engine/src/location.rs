//! Positional locators into book content.
//!
//! Notes and reading positions point into the book with EPUB canonical
//! fragment identifiers:
//!
//! ```text
//! epubcfi(/6/4[chap01]!/4/2/1:10)
//! epubcfi(/6/4!/4/10,/1:0,/3:5)      range: parent, start, end
//! ```
//!
//! A CFI is order-comparable but not a simple offset, so this module parses
//! just enough of the grammar to compare two locations in reading order.
//! Id and text assertions are accepted and ignored.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One step of a CFI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `/n`: the n-th child node.
    Element(u32),
    /// `!`: step into the referenced document.
    Indirection,
}

impl Ord for Step {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Step::Element(a), Step::Element(b)) => a.cmp(b),
            (Step::Indirection, Step::Indirection) => Ordering::Equal,
            (Step::Indirection, Step::Element(_)) => Ordering::Less,
            (Step::Element(_), Step::Indirection) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Step {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A resolved path with an optional terminal character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiPath {
    pub steps: Vec<Step>,
    pub offset: Option<u32>,
}

impl Ord for CfiPath {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.steps.iter().zip(other.steps.iter()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        match self.steps.len().cmp(&other.steps.len()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self.offset, other.offset) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialOrd for CfiPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed CFI. Ranges are ordered by their start.
#[derive(Debug, Clone)]
pub struct Cfi {
    raw: String,
    start: CfiPath,
    end: Option<CfiPath>,
}

impl Cfi {
    /// The point (or range start) this CFI designates.
    pub fn start(&self) -> &CfiPath {
        &self.start
    }

    /// End of a range CFI.
    pub fn end(&self) -> Option<&CfiPath> {
        self.end.as_ref()
    }

    pub fn is_range(&self) -> bool {
        self.end.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Cfi {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl Eq for Cfi {}

impl Ord for Cfi {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for Cfi {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cfi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Cfi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

/// Parse a CFI string.
pub fn parse(input: &str) -> Result<Cfi> {
    let fail = |reason: &str| Error::InvalidLocation {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let body = input
        .trim()
        .strip_prefix("epubcfi(")
        .ok_or_else(|| fail("must start with 'epubcfi('"))?
        .strip_suffix(')')
        .ok_or_else(|| fail("must end with ')'"))?;
    if body.is_empty() {
        return Err(fail("empty path"));
    }

    let parts = split_range(body);
    let (start, end) = match parts.as_slice() {
        [path] => (parse_path(path).map_err(|r| fail(&r))?, None),
        [parent, start, end] => {
            let parent = parse_path(parent).map_err(|r| fail(&r))?;
            if parent.offset.is_some() {
                return Err(fail("range parent cannot carry an offset"));
            }
            let start = parse_path(start).map_err(|r| fail(&r))?;
            let end = parse_path(end).map_err(|r| fail(&r))?;
            (join(&parent, start), Some(join(&parent, end)))
        }
        _ => return Err(fail("range must have a parent, start and end")),
    };

    Ok(Cfi {
        raw: input.trim().to_string(),
        start,
        end,
    })
}

fn join(parent: &CfiPath, local: CfiPath) -> CfiPath {
    let mut steps = parent.steps.clone();
    steps.extend(local.steps);
    CfiPath {
        steps,
        offset: local.offset,
    }
}

/// Split on commas that are not inside an assertion bracket.
fn split_range(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut escaped = false;
    let mut last = 0;
    for (i, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '^' => escaped = true,
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[last..]);
    parts
}

fn parse_path(path: &str) -> std::result::Result<CfiPath, String> {
    let bytes = path.as_bytes();
    let mut pos = 0;
    let mut steps = Vec::new();
    let mut offset = None;

    while pos < bytes.len() {
        match bytes[pos] {
            b'/' => {
                pos += 1;
                let n = read_number(bytes, &mut pos)
                    .ok_or_else(|| format!("expected number at {pos}"))?;
                steps.push(Step::Element(n));
            }
            b'!' => {
                pos += 1;
                steps.push(Step::Indirection);
            }
            b'[' => skip_assertion(bytes, &mut pos)?,
            b':' => {
                pos += 1;
                let n = read_number(bytes, &mut pos)
                    .ok_or_else(|| format!("expected character offset at {pos}"))?;
                offset = Some(n);
                if pos < bytes.len() && bytes[pos] == b'[' {
                    skip_assertion(bytes, &mut pos)?;
                }
                if pos != bytes.len() {
                    return Err(format!("trailing input after offset at {pos}"));
                }
            }
            // Temporal and spatial offsets do not take part in ordering.
            b'~' | b'@' => break,
            other => return Err(format!("unexpected '{}' at {pos}", other as char)),
        }
    }

    if steps.is_empty() && offset.is_none() {
        return Err("path has no steps".to_string());
    }
    Ok(CfiPath { steps, offset })
}

fn read_number(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    std::str::from_utf8(&bytes[start..*pos]).ok()?.parse().ok()
}

fn skip_assertion(bytes: &[u8], pos: &mut usize) -> std::result::Result<(), String> {
    let open = *pos;
    *pos += 1;
    let mut escaped = false;
    while *pos < bytes.len() {
        let b = bytes[*pos];
        *pos += 1;
        if escaped {
            escaped = false;
        } else if b == b'^' {
            escaped = true;
        } else if b == b']' {
            return Ok(());
        }
    }
    Err(format!("unclosed bracket at {open}"))
}

/// Compare two CFI strings; `None` if either does not parse.
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    Some(parse(a).ok()?.cmp(&parse(b).ok()?))
}
