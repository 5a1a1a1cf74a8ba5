//! Escaping of arbitrary text into valid node names, and path handling.
//!
//! Node names cannot contain `/` or NUL, and a leading `.` would make a
//! name collide with the relative-path components `.` and `..`. Escaping
//! maps those to backslash-hex forms and doubles literal backslashes:
//!
//! | character        | escaped   |
//! |------------------|-----------|
//! | NUL              | `\x00`    |
//! | `/`              | `\x2f`    |
//! | `\`              | `\\`      |
//! | leading `.` (each) | `\x2e`  |
//!
//! [`unescape`] inverts this and also decodes `\xYY`, `\uYYYY` and
//! `\UYYYYYYYY` written by hand.

use crate::error::{MarshalError, Result};

/// Escapes one path component.
pub fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    let mut chars = segment.chars().peekable();
    while chars.next_if_eq(&'.').is_some() {
        out.push_str("\\x2e");
    }
    for c in chars {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\x2f"),
            '\0' => out.push_str("\\x00"),
            c => out.push(c),
        }
    }
    out
}

/// Decodes an escaped component.
///
/// A run of backslashes is read pairwise: each `\\` yields one backslash and
/// an odd trailing backslash must start a hex or unicode escape.
pub fn unescape(name: &str) -> Result<String> {
    if !name.contains('\\') {
        return Ok(name.to_string());
    }
    let invalid = || MarshalError::InvalidEscape {
        name: name.to_string(),
    };

    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits = match chars.next() {
            Some('\\') => {
                out.push('\\');
                continue;
            }
            Some('x') => 2,
            Some('u') => 4,
            Some('U') => 8,
            _ => return Err(invalid()),
        };
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = chars.next().and_then(|d| d.to_digit(16)).ok_or_else(invalid)?;
            code = (code << 4) | digit;
        }
        out.push(char::from_u32(code).ok_or_else(invalid)?);
    }
    Ok(out)
}

/// A path given either raw (already escaped, `/`-separated) or as a list of
/// unescaped components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePath {
    Raw(String),
    Parts(Vec<String>),
}

impl From<&str> for NodePath {
    fn from(path: &str) -> Self {
        NodePath::Raw(path.to_string())
    }
}

impl From<String> for NodePath {
    fn from(path: String) -> Self {
        NodePath::Raw(path)
    }
}

impl From<&String> for NodePath {
    fn from(path: &String) -> Self {
        NodePath::Raw(path.clone())
    }
}

impl From<Vec<String>> for NodePath {
    fn from(parts: Vec<String>) -> Self {
        NodePath::Parts(parts)
    }
}

impl From<&[&str]> for NodePath {
    fn from(parts: &[&str]) -> Self {
        NodePath::Parts(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for NodePath {
    fn from(parts: [&str; N]) -> Self {
        NodePath::Parts(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl NodePath {
    /// The escaped, normalized absolute path.
    pub fn to_escaped(&self) -> String {
        match self {
            NodePath::Raw(path) => normalize_path(path),
            NodePath::Parts(parts) => {
                let escaped: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                normalize_path(&format!("/{}", escaped.join("/")))
            }
        }
    }
}

/// Lexically normalizes a POSIX path into absolute form: repeated and
/// trailing slashes collapse, `.` disappears and `..` removes its parent.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Splits a path into its containing group and target name.
///
/// The root itself yields `("/", ".")`.
pub fn process_path(path: &NodePath) -> (String, String) {
    let full = path.to_escaped();
    match full.rfind('/') {
        Some(0) if full.len() == 1 => ("/".to_string(), ".".to_string()),
        Some(0) => ("/".to_string(), full[1..].to_string()),
        Some(i) => (full[..i].to_string(), full[i + 1..].to_string()),
        None => ("/".to_string(), full),
    }
}

/// Joins a group path and a child name.
pub fn join_path(group: &str, name: &str) -> String {
    if group.ends_with('/') {
        format!("{}{}", group, name)
    } else {
        format!("{}/{}", group, name)
    }
}
