//! Parser for annotated SQL migration files.
//!
//! ```sql
//! -- +migrate Up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- +migrate StatementBegin
//! CREATE TRIGGER users_touch AFTER UPDATE ON users BEGIN
//!     SELECT 1;
//! END;
//! -- +migrate StatementEnd
//!
//! -- +migrate Down
//! DROP TABLE users;
//! ```
//!
//! `-- +migrate NO TRANSACTION` anywhere in the file runs both directions
//! outside a wrapping transaction. The `-- +goose` prefix is accepted too.

use super::LoadError;

const DIRECTIVE_PREFIXES: &[&str] = &["-- +migrate", "-- +goose"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub transactional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Up,
    Down,
    StatementBegin,
    StatementEnd,
    NoTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

fn parse_directive(line: &str) -> Option<Result<Directive, String>> {
    let trimmed = line.trim();
    let rest = DIRECTIVE_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))?;
    let directive = match rest.trim() {
        "Up" => Directive::Up,
        "Down" => Directive::Down,
        "StatementBegin" => Directive::StatementBegin,
        "StatementEnd" => Directive::StatementEnd,
        "NO TRANSACTION" => Directive::NoTransaction,
        other => return Some(Err(format!("unknown directive {other:?}"))),
    };
    Some(Ok(directive))
}

/// True when the last word before any `--` comment word ends with `;`.
/// Only whitespace-separated words starting with `--` begin a comment, so
/// `--` inside a quoted literal is left alone.
fn ends_with_semicolon(line: &str) -> bool {
    let mut last = "";
    for word in line.split_whitespace() {
        if word.starts_with("--") {
            break;
        }
        last = word;
    }
    last.ends_with(';')
}

struct Parser<'a> {
    source_name: &'a str,
    section: Section,
    seen_up: bool,
    seen_down: bool,
    in_block: bool,
    buffer: String,
    up: Vec<String>,
    down: Vec<String>,
    transactional: bool,
}

impl<'a> Parser<'a> {
    fn new(source_name: &'a str) -> Self {
        Self {
            source_name,
            section: Section::Preamble,
            seen_up: false,
            seen_down: false,
            in_block: false,
            buffer: String::new(),
            up: Vec::new(),
            down: Vec::new(),
            transactional: true,
        }
    }

    fn malformed(&self, line_no: usize, reason: impl Into<String>) -> LoadError {
        LoadError::Malformed {
            source_name: self.source_name.to_string(),
            reason: format!("line {}: {}", line_no, reason.into()),
        }
    }

    fn flush(&mut self) {
        let statement = std::mem::take(&mut self.buffer);
        let target = match self.section {
            Section::Up => &mut self.up,
            Section::Down => &mut self.down,
            Section::Preamble => return,
        };
        target.push(statement);
    }

    fn finish_section(&self, line_no: usize) -> Result<(), LoadError> {
        if self.in_block {
            return Err(self.malformed(line_no, "unterminated StatementBegin block"));
        }
        if !self.buffer.trim().is_empty() {
            return Err(self.malformed(
                line_no,
                format!("unfinished statement, missing semicolon? {:?}", self.buffer.trim()),
            ));
        }
        Ok(())
    }

    fn directive(&mut self, line_no: usize, directive: Directive) -> Result<(), LoadError> {
        match directive {
            Directive::Up => {
                if self.seen_up {
                    return Err(self.malformed(line_no, "duplicate Up marker"));
                }
                self.finish_section(line_no)?;
                self.seen_up = true;
                self.section = Section::Up;
            }
            Directive::Down => {
                if !self.seen_up {
                    return Err(LoadError::DownWithoutUp {
                        source_name: self.source_name.to_string(),
                    });
                }
                if self.seen_down {
                    return Err(self.malformed(line_no, "duplicate Down marker"));
                }
                self.finish_section(line_no)?;
                self.seen_down = true;
                self.section = Section::Down;
            }
            Directive::StatementBegin => {
                if self.section == Section::Preamble {
                    return Err(self.malformed(line_no, "StatementBegin before Up marker"));
                }
                if self.in_block {
                    return Err(self.malformed(line_no, "nested StatementBegin"));
                }
                if !self.buffer.trim().is_empty() {
                    return Err(self.malformed(line_no, "StatementBegin inside an unfinished statement"));
                }
                self.buffer.clear();
                self.in_block = true;
            }
            Directive::StatementEnd => {
                if !self.in_block {
                    return Err(self.malformed(line_no, "StatementEnd without StatementBegin"));
                }
                self.in_block = false;
                if self.buffer.trim().is_empty() {
                    self.buffer.clear();
                } else {
                    self.flush();
                }
            }
            Directive::NoTransaction => self.transactional = false,
        }
        Ok(())
    }

    fn line(&mut self, line: &str) {
        if self.section == Section::Preamble {
            return;
        }
        if self.in_block {
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return;
        }

        let trimmed = line.trim();
        // Blank lines and whole-line comments between statements are noise
        if trimmed.starts_with("--") || (trimmed.is_empty() && self.buffer.trim().is_empty()) {
            return;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        if ends_with_semicolon(line) {
            self.flush();
        }
    }
}

/// Split an annotated SQL file into its up and down statements.
pub fn parse_sql(source_name: &str, content: &str) -> Result<ParsedSql, LoadError> {
    let mut parser = Parser::new(source_name);
    let mut last_line = 0;

    for (index, line) in content.lines().enumerate() {
        last_line = index + 1;
        match parse_directive(line) {
            Some(Ok(directive)) => parser.directive(last_line, directive)?,
            Some(Err(reason)) => return Err(parser.malformed(last_line, reason)),
            None => parser.line(line),
        }
    }
    parser.finish_section(last_line)?;

    if !parser.seen_up {
        return Err(LoadError::Malformed {
            source_name: source_name.to_string(),
            reason: "no Up marker found".to_string(),
        });
    }
    if parser.up.is_empty() {
        return Err(LoadError::EmptyUp {
            source_name: source_name.to_string(),
        });
    }

    Ok(ParsedSql {
        up: parser.up,
        down: parser.down,
        transactional: parser.transactional,
    })
}
