//! The narrow evaluator behind the `script` pseudonym scheme.
//!
//! A user expression is plain text with `{...}` substitutions:
//!
//! ```text
//! {prefix}-{upper(left(hash(idIn), 6))}
//! ```
//!
//! Variables: `idIn`, `idType`, `prefix`, `brokerName`, `mappingCount`.
//! Functions: `hash(s)` (SHA-256, lowercase hex), `upper(s)`, `lower(s)`,
//! `left(s, n)`. Evaluation is non-looping by construction; the only
//! resource bound that matters is the output-length cap. Any error makes
//! the broker fall back to its default scheme.

use sha2::{Digest, Sha256};

/// Hard cap on generated pseudonym length.
pub const MAX_OUTPUT_LEN: usize = 64;

/// The evaluation context handed to a user expression.
#[derive(Debug, Clone)]
pub struct ScriptContext<'a> {
    pub id_in: &'a str,
    pub id_type: &'a str,
    pub prefix: &'a str,
    pub broker_name: &'a str,
    pub mapping_count: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("unterminated substitution")]
    Unterminated,

    #[error("unknown variable or function: {0}")]
    Unknown(String),

    #[error("bad arguments for {0}")]
    BadArguments(String),

    #[error("output exceeds {MAX_OUTPUT_LEN} characters")]
    TooLong,

    #[error("expression produced an empty pseudonym")]
    Empty,
}

/// Evaluate an expression against a context.
pub fn evaluate(expression: &str, ctx: &ScriptContext<'_>) -> Result<String, SandboxError> {
    let mut out = String::new();
    let mut rest = expression;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = find_matching_brace(after).ok_or(SandboxError::Unterminated)?;
        out.push_str(&eval_term(after[..close].trim(), ctx)?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    if out.is_empty() {
        return Err(SandboxError::Empty);
    }
    if out.len() > MAX_OUTPUT_LEN {
        return Err(SandboxError::TooLong);
    }
    Ok(out)
}

fn find_matching_brace(s: &str) -> Option<usize> {
    s.find('}')
}

fn eval_term(term: &str, ctx: &ScriptContext<'_>) -> Result<String, SandboxError> {
    // Quoted literal
    if let Some(stripped) = term.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Ok(stripped.to_string());
    }
    // Variable
    match term {
        "idIn" => return Ok(ctx.id_in.to_string()),
        "idType" => return Ok(ctx.id_type.to_string()),
        "prefix" => return Ok(ctx.prefix.to_string()),
        "brokerName" => return Ok(ctx.broker_name.to_string()),
        "mappingCount" => return Ok(ctx.mapping_count.to_string()),
        _ => {}
    }
    // Function call
    if let Some((name, args)) = term
        .split_once('(')
        .and_then(|(n, a)| a.strip_suffix(')').map(|a| (n.trim(), a)))
    {
        let args = split_args(args);
        return match name {
            "hash" => {
                let [arg] = args.as_slice() else {
                    return Err(SandboxError::BadArguments("hash".into()));
                };
                let value = eval_term(arg, ctx)?;
                let mut hasher = Sha256::new();
                hasher.update(value.as_bytes());
                Ok(hex::encode(hasher.finalize()))
            }
            "upper" => {
                let [arg] = args.as_slice() else {
                    return Err(SandboxError::BadArguments("upper".into()));
                };
                Ok(eval_term(arg, ctx)?.to_uppercase())
            }
            "lower" => {
                let [arg] = args.as_slice() else {
                    return Err(SandboxError::BadArguments("lower".into()));
                };
                Ok(eval_term(arg, ctx)?.to_lowercase())
            }
            "left" => {
                let [arg, n] = args.as_slice() else {
                    return Err(SandboxError::BadArguments("left".into()));
                };
                let n: usize = n
                    .trim()
                    .parse()
                    .map_err(|_| SandboxError::BadArguments("left".into()))?;
                let value = eval_term(arg, ctx)?;
                Ok(value.chars().take(n).collect())
            }
            other => Err(SandboxError::Unknown(other.to_string())),
        };
    }
    // Bare number (argument position)
    if term.chars().all(|c| c.is_ascii_digit()) && !term.is_empty() {
        return Ok(term.to_string());
    }
    Err(SandboxError::Unknown(term.to_string()))
}

/// Split on top-level commas (no nested parens tracking needed beyond one
/// level of function nesting).
fn split_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = args[start..].trim();
    if !last.is_empty() || !out.is_empty() {
        out.push(last);
    }
    out
}
