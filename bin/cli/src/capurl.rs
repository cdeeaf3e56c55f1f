// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! `.ocap` capability-URL parsing: a text file with an
//! optional shebang line, whose remaining lines concatenate and trim down
//! to a single `d-<token>` ref string. Pipes and file paths are treated
//! identically.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

pub fn parse_capability_text(text: &str) -> String {
    let mut lines = text.lines().peekable();
    if let Some(first) = lines.peek() {
        if first.starts_with("#!") {
            lines.next();
        }
    }
    lines.map(str::trim).collect()
}

/// Resolves a CLI-supplied ref argument: `-` reads stdin, an existing file
/// path is read as a `.ocap` file, anything else is taken as a literal ref
/// string already (a bare kref or `d-<token>`).
pub fn resolve_ref(raw: &str) -> io::Result<String> {
    if raw == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(parse_capability_text(&buf));
    }
    let path = Path::new(raw);
    if path.is_file() {
        let text = fs::read_to_string(path)?;
        return Ok(parse_capability_text(&text));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shebang_line_is_dropped() {
        let text = "#!/usr/bin/env ocap-ref\n  d-123e4567-e89b-12d3-a456-426614174000  \n";
        assert_eq!(parse_capability_text(text), "d-123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn multiple_lines_concatenate_trimmed() {
        let text = "  d-abc\n  def  \n";
        assert_eq!(parse_capability_text(text), "d-abcdef");
    }

    #[test]
    fn no_shebang_is_fine() {
        assert_eq!(parse_capability_text("d-xyz\n"), "d-xyz");
    }
}
