//! Line-oriented parser building the token tree

use std::path::Path;

use super::{
    Dialect, TemplateError, TemplateErrorKind,
    token::{Child, IfToken, InlinePart, InlineToken, Token},
};

impl Dialect {
    /// Split a block directive line into its indentation and directive body
    fn block_directive(self, line: &str) -> Option<(&str, &str)> {
        let stripped = line.trim_start();
        let indent = &line[..line.len() - stripped.len()];
        let rest = match self {
            Self::Default => stripped.strip_prefix("#!")?,
            Self::Html => stripped.strip_prefix("{#!")?.trim_end().strip_suffix("#}")?,
        };
        rest.starts_with(char::is_whitespace)
            .then(|| (indent, rest.trim()))
    }

    /// Opening delimiter of an inline directive, up to and excluding `(`
    const fn inline_open(self) -> &'static str {
        match self {
            Self::Default => "#!",
            Self::Html => "{#!",
        }
    }

    /// What must follow the closing `)` of an inline directive
    const fn inline_close(self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Html => "#}",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Keyword {
    If,
    Elif,
    Else,
    Endif,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    keyword: Keyword,
    condition: Option<String>,
    statement: Option<String>,
}

impl Keyword {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::If => "if",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::Endif => "endif",
        }
    }
}

/// Byte offsets of `s` that are outside quotes and brackets
fn top_level_positions(s: &str) -> Vec<usize> {
    let mut positions = Vec::with_capacity(s.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' if !prev.is_some_and(char::is_alphanumeric) => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if depth == 0 => positions.push(i),
                _ => {}
            },
        }
        prev = Some(c);
    }
    positions
}

/// Split `if COND: STMT` style text at the colon ending the condition
fn split_condition(rest: &str) -> Option<(&str, &str)> {
    top_level_positions(rest)
        .into_iter()
        .find(|&i| rest[i..].starts_with(':'))
        .map(|i| (rest[..i].trim(), rest[i + 1..].trim_start()))
}

fn parse_directive(body: &str) -> Result<Directive, TemplateErrorKind> {
    let body = body.trim_start();
    let malformed = || TemplateErrorKind::MalformedDirective(body.trim_end().to_owned());
    let statement = |s: &str| (!s.trim().is_empty()).then(|| s.to_owned());

    if body.trim_end() == "endif" {
        return Ok(Directive {
            keyword: Keyword::Endif,
            condition: None,
            statement: None,
        });
    }
    if let Some(rest) = body.strip_prefix("else") {
        let rest = rest.trim_start().strip_prefix(':').ok_or_else(malformed)?;
        return Ok(Directive {
            keyword: Keyword::Else,
            condition: None,
            statement: statement(rest.trim_start()),
        });
    }
    let (keyword, rest) = if let Some(rest) = body.strip_prefix("elif") {
        (Keyword::Elif, rest)
    } else if let Some(rest) = body.strip_prefix("if") {
        (Keyword::If, rest)
    } else {
        return Err(malformed());
    };
    if !rest.starts_with(char::is_whitespace) {
        return Err(malformed());
    }
    let (condition, stmt) = split_condition(rest).ok_or_else(malformed)?;
    if condition.is_empty() {
        return Err(malformed());
    }
    Ok(Directive {
        keyword,
        condition: Some(condition.to_owned()),
        statement: statement(stmt),
    })
}

enum Line<'a> {
    Text(&'a str),
    Directive {
        indent: &'a str,
        directive: Directive,
    },
}

/// One branch while a chain is being collected
struct Branch {
    line: usize,
    condition: Option<String>,
    statement: Option<InlineToken>,
    children: Vec<Child>,
}

pub(crate) struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    dialect: Dialect,
    path: Option<&'a Path>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(text: &'a str, dialect: Dialect, path: Option<&'a Path>) -> Self {
        Self {
            lines: text.split('\n').collect(),
            pos: 0,
            dialect,
            path,
        }
    }

    fn error(&self, line: usize, kind: TemplateErrorKind) -> TemplateError {
        TemplateError {
            path: self.path.map(Path::to_path_buf),
            line,
            kind,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Token, TemplateError> {
        let children = self.parse_children(false)?;
        Ok(Token { line: 1, children })
    }

    /// The next line, classified, with its 1-based number
    fn peek(&self) -> Result<Option<(usize, Line<'a>)>, TemplateError> {
        let Some(&text) = self.lines.get(self.pos) else {
            return Ok(None);
        };
        let line = self.pos + 1;
        let Some((indent, body)) = self.dialect.block_directive(text) else {
            return Ok(Some((line, Line::Text(text))));
        };
        let directive = parse_directive(body).map_err(|kind| self.error(line, kind))?;
        Ok(Some((line, Line::Directive { indent, directive })))
    }

    /// Parse lines until a directive that continues or closes an enclosing chain
    fn parse_children(&mut self, nested: bool) -> Result<Vec<Child>, TemplateError> {
        let mut children = Vec::new();
        while let Some((line, next)) = self.peek()? {
            match next {
                Line::Text(text) => {
                    self.pos += 1;
                    children.push(self.text_child(text, line)?);
                }
                Line::Directive { indent, directive } => match directive.keyword {
                    Keyword::If => {
                        self.pos += 1;
                        children.push(Child::If(self.parse_if(line, indent, directive)?));
                    }
                    _ if nested => break,
                    keyword => {
                        return Err(self.error(
                            line,
                            TemplateErrorKind::UnmatchedDirective {
                                directive: keyword.as_str(),
                            },
                        ));
                    }
                },
            }
        }
        Ok(children)
    }

    fn text_child(&self, text: &str, line: usize) -> Result<Child, TemplateError> {
        if text.contains(&format!("{}(", self.dialect.inline_open())) {
            return self.parse_inline(text, line).map(Child::Inline);
        }
        Ok(Child::Text {
            line,
            text: text.to_owned(),
        })
    }

    /// Parse an `if` chain whose first directive was just consumed
    fn parse_if(
        &mut self,
        opened: usize,
        indent: &str,
        first: Directive,
    ) -> Result<IfToken, TemplateError> {
        let mut branches: Vec<Branch> = Vec::new();
        let mut has_body = false;
        let mut seen_else = false;
        let mut current = (opened, indent.to_owned(), first);

        loop {
            let (line, indent, directive) = current;
            let statement = directive
                .statement
                .as_deref()
                .map(|stmt| self.parse_inline(&format!("{indent}{stmt}"), line))
                .transpose()?;
            let children = if statement.is_some() {
                Vec::new()
            } else {
                has_body = true;
                self.parse_children(true)?
            };
            seen_else |= directive.keyword == Keyword::Else;
            branches.push(Branch {
                line,
                condition: directive.condition,
                statement,
                children,
            });

            match self.peek()? {
                Some((line, Line::Directive { indent, directive }))
                    if matches!(directive.keyword, Keyword::Elif | Keyword::Else) =>
                {
                    if seen_else {
                        return Err(self.error(
                            line,
                            TemplateErrorKind::MalformedDirective(format!(
                                "`{}` after `else`",
                                directive.keyword.as_str()
                            )),
                        ));
                    }
                    self.pos += 1;
                    current = (line, indent.to_owned(), directive);
                }
                Some((_, Line::Directive { directive, .. }))
                    if has_body && directive.keyword == Keyword::Endif =>
                {
                    self.pos += 1;
                    break;
                }
                None if has_body => {
                    return Err(self.error(opened, TemplateErrorKind::UnclosedIf { opened }));
                }
                Some((line, _)) if has_body => {
                    return Err(self.error(
                        line,
                        TemplateErrorKind::MalformedDirective(
                            "a branch with a statement cannot have a body; expected elif, else \
                             or endif"
                                .to_owned(),
                        ),
                    ));
                }
                _ => break,
            }
        }

        Ok(link(branches).unwrap_or_else(|| IfToken {
            line: opened,
            condition: None,
            statement: None,
            children: Vec::new(),
            next: None,
        }))
    }

    /// Split a line into text and inline `if` chains
    fn parse_inline(&self, text: &str, line: usize) -> Result<InlineToken, TemplateError> {
        let open = format!("{}(", self.dialect.inline_open());
        let close = self.dialect.inline_close();
        let mut parts = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(&open) {
            if start > 0 {
                parts.push(InlinePart::Text(rest[..start].to_owned()));
            }
            let after_open = &rest[start + open.len()..];
            let end = closing_paren(after_open).ok_or_else(|| {
                self.error(
                    line,
                    TemplateErrorKind::MalformedInline(format!(
                        "unbalanced parentheses in `{}`",
                        &rest[start..]
                    )),
                )
            })?;
            let content = &after_open[..end];
            let tail = after_open[end + 1..].strip_prefix(close).ok_or_else(|| {
                self.error(
                    line,
                    TemplateErrorKind::MalformedInline(format!(
                        "inline directive `{}{content})` is not closed by `{close}`",
                        open
                    )),
                )
            })?;
            parts.push(InlinePart::If(self.parse_inline_chain(content, line)?));
            rest = tail;
        }
        if !rest.is_empty() {
            parts.push(InlinePart::Text(rest.to_owned()));
        }
        Ok(InlineToken { line, parts })
    }

    /// `if C: S[ elif C: S][ else: S]`
    fn parse_inline_chain(&self, content: &str, line: usize) -> Result<IfToken, TemplateError> {
        let malformed = |message: String| self.error(line, TemplateErrorKind::MalformedInline(message));
        let content = content.trim_start();
        if !content.starts_with("if") {
            return Err(malformed(format!("`{content}` does not start with `if`")));
        }

        let mut bounds = vec![0];
        for i in top_level_positions(content) {
            let tail = &content[i..];
            let after_space = content[..i].ends_with(char::is_whitespace);
            if i > 0 && after_space && (tail.starts_with("elif ") || tail.starts_with("else:")) {
                bounds.push(i);
            }
        }
        bounds.push(content.len());

        let mut branches = Vec::with_capacity(bounds.len() - 1);
        let mut seen_else = false;
        for window in bounds.windows(2) {
            let segment = &content[window[0]..window[1]];
            // whitespace before `elif` / `else` separates branches
            let segment = if window[1] < content.len() {
                segment.trim_end()
            } else {
                segment
            };
            let directive = parse_directive(segment).map_err(|kind| self.error(line, kind))?;
            match directive.keyword {
                Keyword::If if window[0] == 0 => {}
                Keyword::Elif | Keyword::Else if !seen_else && window[0] > 0 => {}
                keyword => {
                    return Err(malformed(format!(
                        "unexpected `{}` in `{content}`",
                        keyword.as_str()
                    )));
                }
            }
            seen_else |= directive.keyword == Keyword::Else;
            let statement = self.parse_inline(directive.statement.as_deref().unwrap_or(""), line)?;
            branches.push(Branch {
                line,
                condition: directive.condition,
                statement: Some(statement),
                children: Vec::new(),
            });
        }
        link(branches).ok_or_else(|| malformed(format!("empty inline directive `{content}`")))
    }
}

/// Index of the `)` closing an already opened `(`
fn closing_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' if !prev.is_some_and(char::is_alphanumeric) => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        prev = Some(c);
    }
    None
}

/// Chain collected branches through `next`
fn link(branches: Vec<Branch>) -> Option<IfToken> {
    branches.into_iter().rev().fold(None, |next, branch| {
        Some(IfToken {
            line: branch.line,
            condition: branch.condition,
            statement: branch.statement,
            children: branch.children,
            next: next.map(Box::new),
        })
    })
}
