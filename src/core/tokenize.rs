//! Purpose: Split delimited text into fields and escape field values for writing.
//! Exports: `LineTokenizer`, `Field`, `escape_field`, `count_records`, `COMMENT_MARKER`, `QUOTE`.
//! Role: Lowest layer of the text format; knows nothing about types or schemas.
//! Invariants: `escape_field` output always tokenizes back to the original text.
//! Invariants: Tokenizing never fails on content; only I/O errors surface.
use std::borrow::Cow;
use std::io::{self, BufRead};

pub const COMMENT_MARKER: char = '#';
pub const QUOTE: char = '"';

/// One field of a record. `quoted` tells an explicit `""` apart from an absent value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Field {
    pub text: String,
    pub quoted: bool,
}

impl Field {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
        }
    }

    pub fn is_blank(&self) -> bool {
        !self.quoted && self.text.trim().is_empty()
    }
}

pub struct LineTokenizer<R> {
    source: R,
    separator: char,
    line: u64,
    record_line: u64,
    buf: String,
}

impl<R: BufRead> LineTokenizer<R> {
    pub fn new(source: R, separator: char) -> Self {
        Self {
            source,
            separator,
            line: 0,
            record_line: 0,
            buf: String::new(),
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Line number (1-based) where the most recent record started.
    pub fn line(&self) -> u64 {
        self.record_line
    }

    /// Next usable record. Comment and blank lines are skipped; a quoted span that
    /// is still open at the end of a line continues on the following line.
    pub fn next_record(&mut self) -> io::Result<Option<Vec<Field>>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.starts_with(COMMENT_MARKER) {
                continue;
            }
            self.record_line = self.line;
            if let Some(fields) = self.tokenize(&line)? {
                return Ok(Some(fields));
            }
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.source.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        // A trailing `\r` stays: it is content inside a quoted span, and outside one
        // it is whitespace that field trimming drops.
        if self.buf.ends_with('\n') {
            self.buf.pop();
        }
        Ok(Some(self.buf.clone()))
    }

    fn tokenize(&mut self, first: &str) -> io::Result<Option<Vec<Field>>> {
        let mut chars: Vec<char> = first.chars().collect();
        let mut pos = 0;
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut in_quotes = false;
        let mut after_quote = false;
        let mut content = false;

        loop {
            let Some(&c) = chars.get(pos) else {
                if in_quotes {
                    if let Some(next) = self.read_line()? {
                        field.push('\n');
                        chars = next.chars().collect();
                        pos = 0;
                        continue;
                    }
                    // Unterminated span at end of input: keep what was scanned.
                }
                break;
            };

            if in_quotes {
                if c == QUOTE {
                    if chars.get(pos + 1) == Some(&QUOTE) {
                        field.push(QUOTE);
                        pos += 2;
                    } else {
                        in_quotes = false;
                        after_quote = true;
                        pos += 1;
                    }
                } else {
                    field.push(c);
                    pos += 1;
                }
                continue;
            }

            pos += 1;
            if c == self.separator {
                fields.push(finish_field(std::mem::take(&mut field), quoted));
                quoted = false;
                after_quote = false;
                content = true;
                continue;
            }
            if c == COMMENT_MARKER {
                break;
            }
            if after_quote {
                // Anything between a closing quote and the separator is dropped.
                continue;
            }
            if c == QUOTE && field.trim().is_empty() {
                field.clear();
                in_quotes = true;
                quoted = true;
                content = true;
                continue;
            }
            if !c.is_whitespace() {
                content = true;
            }
            field.push(c);
        }

        if !content {
            return Ok(None);
        }
        fields.push(finish_field(field, quoted));
        Ok(Some(fields))
    }
}

fn finish_field(text: String, quoted: bool) -> Field {
    if quoted {
        return Field { text, quoted };
    }
    let trimmed = text.trim();
    if trimmed.len() == text.len() {
        return Field::plain(text);
    }
    Field::plain(trimmed)
}

/// Quote `text` when it would not survive tokenizing as a bare field.
pub fn escape_field(text: &str, separator: char) -> Cow<'_, str> {
    let needs_quotes = text.is_empty()
        || text.starts_with(char::is_whitespace)
        || text.ends_with(char::is_whitespace)
        || text
            .chars()
            .any(|c| c == separator || c == QUOTE || c == '\n' || c == '\r' || c == COMMENT_MARKER);
    if !needs_quotes {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 2);
    out.push(QUOTE);
    for c in text.chars() {
        if c == QUOTE {
            out.push(QUOTE);
        }
        out.push(c);
    }
    out.push(QUOTE);
    Cow::Owned(out)
}

/// Counts usable records without decoding them. Multi-line quoted fields count once.
pub fn count_records<R: BufRead>(source: R, separator: char) -> io::Result<u64> {
    let mut tokenizer = LineTokenizer::new(source, separator);
    let mut count = 0u64;
    while tokenizer.next_record()?.is_some() {
        count += 1;
    }
    Ok(count)
}
