//! The preprocessor's syntax tree and its renderer

use handlebars::Handlebars;
use log::trace;

use super::{Context, TemplateError, TemplateErrorKind, expr};

/// A sequence of lines: the whole template, or the body of a branch
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Token {
    pub line: usize,
    pub children: Vec<Child>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    /// A line copied verbatim (apart from `{{ }}` substitution)
    Text { line: usize, text: String },
    /// A line containing inline directives
    Inline(InlineToken),
    If(IfToken),
}

/// Text interleaved with inline `if` chains
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InlineToken {
    pub line: usize,
    pub parts: Vec<InlinePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlinePart {
    Text(String),
    If(IfToken),
}

/// One branch of an `if` / `elif` / `else` chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfToken {
    pub line: usize,
    /// `None` for `else`
    pub condition: Option<String>,
    /// Set for single-line branches; the whole output of the branch
    pub statement: Option<InlineToken>,
    pub children: Vec<Child>,
    /// The chained `elif` / `else`
    pub next: Option<Box<Self>>,
}

impl IfToken {
    /// Branches of this chain, in order
    pub fn branches(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |branch| branch.next.as_deref())
    }
}

/// What a node renders to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Text(String),
    /// An `if` with no matching branch; filtered out by the parent
    Excluded,
}

pub(crate) struct Renderer<'a> {
    pub(crate) context: &'a Context,
    pub(crate) engine: Handlebars<'static>,
    pub(crate) path: Option<&'a std::path::Path>,
}

impl Renderer<'_> {
    fn error(&self, line: usize, kind: TemplateErrorKind) -> TemplateError {
        TemplateError {
            path: self.path.map(std::path::Path::to_path_buf),
            line,
            kind,
        }
    }

    fn substitute(&self, text: &str, line: usize) -> Result<String, TemplateError> {
        if !text.contains("{{") {
            return Ok(text.to_owned());
        }
        self.engine
            .render_template(text, self.context)
            .map_err(|err| self.error(line, TemplateErrorKind::Render(err.to_string())))
    }

    /// Pick the first branch whose condition holds
    fn select<'t>(&self, chain: &'t IfToken) -> Result<Option<&'t IfToken>, TemplateError> {
        for branch in chain.branches() {
            let Some(condition) = &branch.condition else {
                return Ok(Some(branch));
            };
            let invalid = |message: String| {
                self.error(
                    branch.line,
                    TemplateErrorKind::Evaluation {
                        condition: condition.clone(),
                        message,
                    },
                )
            };
            let value = expr::parse(condition)
                .and_then(|parsed| parsed.eval(self.context))
                .map_err(invalid)?;
            trace!("line {}: `{condition}` -> {value}", branch.line);
            if expr::is_truthy(&value) {
                return Ok(Some(branch));
            }
        }
        Ok(None)
    }
}

impl Token {
    /// Render the children, dropping excluded ones, joined by newlines
    pub(crate) fn render(&self, renderer: &Renderer<'_>) -> Result<Rendered, TemplateError> {
        render_children(&self.children, renderer)
    }
}

fn render_children(children: &[Child], renderer: &Renderer<'_>) -> Result<Rendered, TemplateError> {
    let mut lines = Vec::with_capacity(children.len());
    for child in children {
        if let Rendered::Text(text) = child.render(renderer)? {
            lines.push(text);
        }
    }
    if lines.is_empty() && !children.is_empty() {
        return Ok(Rendered::Excluded);
    }
    Ok(Rendered::Text(lines.join("\n")))
}

impl Child {
    fn render(&self, renderer: &Renderer<'_>) -> Result<Rendered, TemplateError> {
        match self {
            Self::Text { line, text } => renderer.substitute(text, *line).map(Rendered::Text),
            Self::Inline(inline) => inline.render(renderer).map(Rendered::Text),
            Self::If(chain) => chain.render(renderer),
        }
    }
}

impl InlineToken {
    pub(crate) fn render(&self, renderer: &Renderer<'_>) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.assemble(renderer, &mut out)?;
        renderer.substitute(&out, self.line)
    }

    /// Resolve the directives without substituting
    fn assemble(&self, renderer: &Renderer<'_>, out: &mut String) -> Result<(), TemplateError> {
        for part in &self.parts {
            match part {
                InlinePart::Text(text) => out.push_str(text),
                InlinePart::If(chain) => {
                    if let Some(branch) = renderer.select(chain)?
                        && let Some(statement) = &branch.statement
                    {
                        statement.assemble(renderer, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl IfToken {
    fn render(&self, renderer: &Renderer<'_>) -> Result<Rendered, TemplateError> {
        let Some(branch) = renderer.select(self)? else {
            return Ok(Rendered::Excluded);
        };
        if let Some(statement) = &branch.statement {
            return statement.render(renderer).map(Rendered::Text);
        }
        if branch.children.is_empty() {
            return Ok(Rendered::Excluded);
        }
        render_children(&branch.children, renderer)
    }
}
