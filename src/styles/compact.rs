//! Built-in postprocess stages

use anyhow::Result;

use super::{Minifier, MinifyRequest, PostprocessRequest, Postprocessor, Processed};

/// Leaves content untouched. Used when no environment transform is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPostprocessor;

impl Postprocessor for PassthroughPostprocessor {
    fn process(&self, request: &PostprocessRequest) -> Result<Processed> {
        Ok(Processed {
            css: request.content.clone(),
            warnings: Vec::new(),
        })
    }
}

/// Whitespace and comment compaction.
///
/// Targets are accepted but not consulted: compaction never rewrites
/// declarations, so its output is valid for every target.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactMinifier;

impl Minifier for CompactMinifier {
    fn minify(&self, request: &MinifyRequest) -> Result<Processed> {
        let (css, warnings) = compact_css(&request.content);
        let warnings = warnings
            .into_iter()
            .map(|w| format!("{}: {}", request.source_file.display(), w))
            .collect();
        Ok(Processed { css, warnings })
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '{' | '}' | ':' | ';' | ',' | '>')
}

/// Compacts `input`, returning the output and any structural warnings.
pub fn compact_css(input: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(input.len());
    let mut warnings = Vec::new();
    let mut chars = input.chars().peekable();
    let mut pending_space = false;
    let mut depth: usize = 0;
    // One entry per open block: true when it holds declarations.
    let mut blocks: Vec<bool> = Vec::new();
    let mut statement_start = 0;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                push_space(&mut out, &mut pending_space);
                out.push(c);
                let mut escaped = false;
                let mut closed = false;
                for s in chars.by_ref() {
                    out.push(s);
                    if escaped {
                        escaped = false;
                    } else if s == '\\' {
                        escaped = true;
                    } else if s == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    warnings.push("unterminated string".to_string());
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        closed = true;
                        break;
                    }
                    prev = s;
                }
                if !closed {
                    warnings.push("unterminated comment".to_string());
                }
                pending_space = true;
            }
            c if c.is_whitespace() => pending_space = true,
            // `a :hover` and `a:hover` select different elements
            ':' if !blocks.last().copied().unwrap_or(false) => {
                push_space(&mut out, &mut pending_space);
                out.push(c);
            }
            c if is_delimiter(c) => {
                pending_space = false;
                match c {
                    '{' => {
                        depth += 1;
                        blocks.push(!holds_rules(&out[statement_start..]));
                    }
                    '}' => {
                        if depth == 0 {
                            warnings.push("unexpected \"}\"".to_string());
                        } else {
                            depth -= 1;
                            blocks.pop();
                        }
                        if out.ends_with(';') {
                            out.pop();
                        }
                    }
                    _ => {}
                }
                out.push(c);
                if matches!(c, '{' | '}' | ';') {
                    statement_start = out.len();
                }
            }
            _ => {
                push_space(&mut out, &mut pending_space);
                out.push(c);
            }
        }
    }

    if depth > 0 {
        warnings.push("expected \"}\" to close block".to_string());
    }

    (out, warnings)
}

/// Conditional group at-rules whose blocks contain rules, not declarations.
fn holds_rules(prelude: &str) -> bool {
    ["@media", "@supports", "@container", "@layer", "@document", "@scope"]
        .iter()
        .any(|at| prelude.starts_with(at))
}

fn push_space(out: &mut String, pending: &mut bool) {
    if *pending && out.chars().last().is_some_and(|last| !is_delimiter(last)) {
        out.push(' ');
    }
    *pending = false;
}
