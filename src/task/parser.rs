//! Text processing for generated programs.
//!
//! Language model responses mix prose with code. The functions here locate
//! Python-style function definitions (`def name(params):` followed by an
//! indented body), pull out the one that matches the task's declared
//! signature, splice candidate functions back into the template program and
//! derive deterministic structural signatures used for clustering.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::FunctionSignature;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "False", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "None", "nonlocal", "not", "or", "pass", "raise", "return", "True", "try", "while",
    "with", "yield",
];

/// Lines bounding a function definition inside a larger text.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpan {
    /// Name as written in the source.
    pub name: String,
    /// First line (the `def` line).
    pub start: usize,
    /// One past the last non-blank line of the body.
    pub end: usize,
    /// Indentation of the `def` line.
    pub indent: usize,
    /// Dedented header, from `def` up to and including the closing `:`.
    pub header: String,
    /// Dedented function text, newline terminated.
    pub text: String,
}

impl FunctionSpan {
    /// The body following the header (may start on the header line).
    pub fn body(&self) -> &str {
        &self.text[self.header.len()..]
    }
}

/// The program extracted from a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFunction {
    pub source: String,
    pub thought: Option<String>,
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn def_remainder(trimmed: &str) -> Option<&str> {
    trimmed
        .strip_prefix("def ")
        .or_else(|| trimmed.strip_prefix("async def "))
}

/// Finds the line holding the `:` that closes a header starting at `start`,
/// together with the byte offset just past that `:` within the line.
fn header_end(lines: &[&str], start: usize) -> Option<(usize, usize)> {
    let mut depth: i32 = 0;
    let mut seen_paren = false;

    for (offset, line) in lines.iter().enumerate().skip(start).take(32) {
        for (pos, c) in line.char_indices() {
            match c {
                '(' | '[' | '{' => {
                    depth += 1;
                    seen_paren = true;
                }
                ')' | ']' | '}' => depth -= 1,
                '#' if depth == 0 => break,
                ':' if depth == 0 && seen_paren => return Some((offset, pos + 1)),
                _ => {}
            }
        }
    }
    None
}

/// Removes `indent` leading whitespace bytes, or all leading whitespace when
/// the line is indented less than that.
fn dedent_line(line: &str, indent: usize) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() >= indent && bytes[..indent].iter().all(u8::is_ascii_whitespace) {
        &line[indent..]
    } else {
        line.trim_start()
    }
}

fn dedent(lines: &[&str], indent: usize) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(dedent_line(line, indent));
        text.push('\n');
    }
    text
}

/// Locates every top-level function definition in `code`.
///
/// Functions nested inside another definition's body are part of that body
/// and are not reported separately.
pub fn find_functions(code: &str) -> Vec<FunctionSpan> {
    let lines: Vec<&str> = code.lines().collect();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        let indent = indentation(line);

        let name: String = match def_remainder(trimmed) {
            Some(rest) => rest.chars().take_while(|c| is_identifier_char(*c)).collect(),
            None => String::new(),
        };
        if name.is_empty() {
            i += 1;
            continue;
        }
        let Some((header_line, header_col)) = header_end(&lines, i) else {
            i += 1;
            continue;
        };

        let mut end = header_line + 1;
        let mut cursor = end;
        while cursor < lines.len() {
            let candidate = lines[cursor];
            if candidate.trim().is_empty() {
                cursor += 1;
                continue;
            }
            if indentation(candidate) <= indent {
                break;
            }
            cursor += 1;
            end = cursor;
        }

        let text = dedent(&lines[i..end], indent);
        // Cut the closing line at its colon before dedenting it.
        let mut header = dedent(&lines[i..header_line], indent);
        header.push_str(dedent_line(&lines[header_line][..header_col], indent));

        spans.push(FunctionSpan {
            name,
            start: i,
            end,
            indent,
            header,
            text,
        });
        i = end;
    }

    spans
}

/// Returns the contents of fenced code blocks, in order of appearance.
pub fn code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block),
                None => current = Some(String::new()),
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }

    blocks
}

fn strip_code_blocks(text: &str) -> String {
    let mut prose = String::new();
    let mut inside = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if !inside {
            prose.push_str(line);
            prose.push('\n');
        }
    }
    prose
}

/// Extracts the first brace-delimited rationale from the prose of a response.
///
/// When the response has no fenced code, only the text before the first
/// `def` is considered so that dictionary literals are not mistaken for prose.
pub fn extract_thought(text: &str) -> Option<String> {
    let prose = if text.contains("```") {
        strip_code_blocks(text)
    } else {
        match text.find("def ") {
            Some(pos) => text[..pos].to_string(),
            None => text.to_string(),
        }
    };

    let start = prose.find('{')?;
    let mut depth = 0;
    for (pos, c) in prose[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let inner = prose[start + 1..start + pos].trim();
                    return (!inner.is_empty()).then(|| inner.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns the docstring of a function, if its body starts with one.
pub fn docstring(source: &str) -> Option<String> {
    let span = find_functions(source).into_iter().next()?;
    let body = span.body();
    let trimmed = body.trim_start();
    let quote = ["\"\"\"", "'''"].into_iter().find(|q| trimmed.starts_with(q))?;
    let rest = &trimmed[quote.len()..];
    let close = rest.find(quote)?;
    let inner = rest[..close].trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

/// Renames the first function defined in `source`.
pub fn rename_function(source: &str, new_name: &str) -> String {
    let mut renamed = String::with_capacity(source.len() + new_name.len());
    let mut done = false;

    for line in source.split_inclusive('\n') {
        if !done {
            let trimmed = line.trim_start();
            if let Some(rest) = def_remainder(trimmed) {
                let name_len = rest.chars().take_while(|c| is_identifier_char(*c)).count();
                if name_len > 0 {
                    let prefix_len = line.len() - rest.len();
                    renamed.push_str(&line[..prefix_len]);
                    renamed.push_str(new_name);
                    renamed.push_str(&rest[name_len..]);
                    done = true;
                    continue;
                }
            }
        }
        renamed.push_str(line);
    }

    renamed
}

/// Parses the version suffix of `<base>_v<N>` names.
fn version_of(found: &str, base: &str) -> Option<u32> {
    found
        .strip_prefix(base)?
        .strip_prefix("_v")
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))?
        .parse()
        .ok()
}

fn matching_function(code: &str, signature: &FunctionSignature) -> Option<FunctionSpan> {
    let mut best: Option<(u32, FunctionSpan)> = None;

    for span in find_functions(code) {
        let rank = if span.name == signature.name() {
            u32::MAX
        } else {
            match version_of(&span.name, signature.name()) {
                Some(version) => version,
                None => continue,
            }
        };
        let Ok(found) = FunctionSignature::parse(&span.header) else {
            continue;
        };
        if found.parameters().len() != signature.parameters().len()
            || span.body().trim().is_empty()
        {
            continue;
        }
        if best.as_ref().map_or(true, |(r, _)| rank >= *r) {
            best = Some((rank, span));
        }
    }

    best.map(|(_, span)| span)
}

/// Accepts a completion made only of indented body lines.
fn body_only(code: &str) -> Option<String> {
    let first = code.lines().find(|l| !l.trim().is_empty())?;
    if indentation(first) == 0 {
        return None;
    }

    let mut body = String::new();
    for line in code.lines().skip_while(|l| l.trim().is_empty()) {
        if !line.trim().is_empty() && indentation(line) == 0 {
            break;
        }
        body.push_str(line);
        body.push('\n');
    }
    let body = body.trim_end().to_string();
    (!body.is_empty()).then_some(body)
}

/// Extracts the candidate function matching `signature` from a response.
///
/// # Errors
///
/// Returns a description of the problem when no structurally valid function
/// body can be found.
pub fn parse_response(
    text: &str,
    signature: &FunctionSignature,
) -> std::result::Result<ParsedFunction, String> {
    if text.trim().is_empty() {
        return Err("empty response".to_string());
    }

    let mut sources = code_blocks(text);
    sources.push(text.to_string());

    let thought = extract_thought(text);

    for code in &sources {
        if let Some(span) = matching_function(code, signature) {
            let source = if span.name == signature.name() {
                span.text
            } else {
                rename_function(&span.text, signature.name())
            };
            let thought = thought.clone().or_else(|| docstring(&source));
            return Ok(ParsedFunction { source, thought });
        }
    }

    if !text.contains("def ") {
        for code in &sources {
            if let Some(body) = body_only(code) {
                let source = format!("{}\n{}\n", signature.header(), body);
                return Ok(ParsedFunction { source, thought });
            }
        }
    }

    Err(format!(
        "no function matching `{}` with {} parameter(s) found in response",
        signature.name(),
        signature.parameters().len()
    ))
}

/// Replaces the function `function_name` inside `program` with `source`,
/// re-indenting it to the original definition's level.
///
/// Returns `None` if `program` does not define `function_name`.
pub fn replace_function(program: &str, function_name: &str, source: &str) -> Option<String> {
    let span = find_functions(program)
        .into_iter()
        .find(|span| span.name == function_name)?;
    let lines: Vec<&str> = program.lines().collect();
    let padding = " ".repeat(span.indent);

    let mut assembled = String::with_capacity(program.len() + source.len());
    for line in &lines[..span.start] {
        assembled.push_str(line);
        assembled.push('\n');
    }
    for line in source.trim_end().lines() {
        if !line.trim().is_empty() {
            assembled.push_str(&padding);
            assembled.push_str(line);
        }
        assembled.push('\n');
    }
    for line in &lines[span.end..] {
        assembled.push_str(line);
        assembled.push('\n');
    }

    Some(assembled)
}

fn tokens(source: &str) -> Vec<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '"' || c == '\'' {
            let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
            let quote_len = if triple { 3 } else { 1 };
            i += quote_len;
            while i < chars.len() {
                if chars[i] == '\\' {
                    i += 2;
                    continue;
                }
                if chars[i] == c
                    && (!triple || (i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c))
                {
                    i += quote_len;
                    break;
                }
                i += 1;
            }
            tokens.push("str".to_string());
        } else if c.is_ascii_digit()
            || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
        {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.' || chars[i] == '_')
            {
                i += 1;
            }
            tokens.push("num".to_string());
        } else if is_identifier_char(c) {
            let start = i;
            while i < chars.len() && is_identifier_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if KEYWORDS.contains(&word.as_str()) {
                tokens.push(word);
            } else {
                tokens.push("id".to_string());
            }
        } else {
            tokens.push(c.to_string());
            i += 1;
        }
    }

    tokens
}

/// Hash of the token-kind stream of `source`.
///
/// Identifiers, numbers and strings are abstracted and comments dropped, so
/// programs that differ only in naming, constants or formatting collide.
pub fn structural_signature(source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    for token in tokens(source) {
        token.hash(&mut hasher);
    }
    hasher.finish()
}

/// Hash of `source` with whitespace runs collapsed.
pub fn textual_signature(source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    for word in source.split_whitespace() {
        word.hash(&mut hasher);
    }
    hasher.finish()
}
