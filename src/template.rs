//! Shell command templates with `{name}` parameters.
//!
//! Templates are parsed once when the configuration is loaded, so that a typo in a
//! parameter name is reported before any command runs. `{{` and `}}` produce literal braces.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed `{{` at byte {position} in `{template}`")]
    Unclosed { template: String, position: usize },
    #[error("unmatched `}}` at byte {position} in `{template}`")]
    UnmatchedClose { template: String, position: usize },
    #[error("invalid parameter name `{name}` in `{template}`")]
    InvalidName { template: String, name: String },
    #[error("unknown parameter `{name}` in `{template}`")]
    UnknownParameter { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|&(_, c)| c) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed {
                            template: source.to_string(),
                            position,
                        });
                    }
                    if !is_valid_name(&name) {
                        return Err(TemplateError::InvalidName {
                            template: source.to_string(),
                            name,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Param(name));
                }
                '}' => {
                    return Err(TemplateError::UnmatchedClose {
                        template: source.to_string(),
                        position,
                    });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            template: source.to_string(),
            segments,
        })
    }

    /// Parameter names in order of appearance. Repeated parameters are yielded each time.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Checks that every parameter is accepted by `is_known`.
    pub fn validate(&self, is_known: impl Fn(&str) -> bool) -> Result<(), TemplateError> {
        match self.params().find(|name| !is_known(*name)) {
            Some(name) => Err(TemplateError::UnknownParameter {
                template: self.template.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Substitutes every parameter with its value from `context`. Values are inserted
    /// verbatim; quoting is up to the template author.
    pub fn render(&self, context: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => match context.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(TemplateError::UnknownParameter {
                            template: self.template.clone(),
                            name: name.clone(),
                        });
                    }
                },
            }
        }
        Ok(out)
    }

    pub fn source(&self) -> &str {
        &self.template
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
