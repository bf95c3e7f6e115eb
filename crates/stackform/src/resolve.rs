//! Resolution.
//!
//! Resolution turns an unresolved document (one that may carry token
//! markers) into plain data. It is a single recursive walk over
//! [`CfnValue`]: tokens are looked up in the arena, their producers run,
//! the produced values are themselves resolved, and any registered
//! post-processor runs once on the final result.

use std::{panic::Location, rc::Rc};

use crate::{
    construct::Node,
    token::{Fragment, Resolvable, TokenRegistry, TypeHint, BEGIN_LIST_TOKEN_MARKER},
    value::CfnValue,
    Error, Result,
};

/// Tokens resolving to tokens is fine, but not forever.
const MAX_RESOLVE_DEPTH: usize = 256;

/// Joins the resolved fragments of a tokenized string back together.
pub trait FragmentJoin {
    fn join(&self, left: &CfnValue, right: &CfnValue) -> Result<CfnValue>;
}

/// The default join: stringify scalars, drop nothing-values, and refuse
/// lists and maps inside string concatenation.
pub struct StringConcat;

impl FragmentJoin for StringConcat {
    fn join(&self, left: &CfnValue, right: &CfnValue) -> Result<CfnValue> {
        let mut out = String::new();
        for part in [left, right] {
            match part {
                CfnValue::Null => {}
                CfnValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                CfnValue::Number(n) => {
                    if n.fract() == 0.0 && n.is_finite() {
                        out.push_str(&format!("{}", *n as i64));
                    } else {
                        out.push_str(&format!("{n}"));
                    }
                }
                CfnValue::String(s) => out.push_str(s),
                other => {
                    return Err(Error::UnsupportedConcat { kind: other.kind() });
                }
            }
        }
        Ok(CfnValue::String(out))
    }
}

/// A hook that runs once on a token's fully-resolved value.
pub trait PostProcess {
    fn post_process(&self, value: CfnValue, ctx: &mut ResolveContext) -> Result<CfnValue>;
}

/// The state threaded through one resolution walk.
pub struct ResolveContext {
    scope: Node,
    preparing: bool,
    depth: usize,
    post: Option<Rc<dyn PostProcess>>,
    concat: Rc<dyn FragmentJoin>,
}

impl ResolveContext {
    pub fn new(scope: Node, preparing: bool) -> Self {
        Self {
            scope,
            preparing,
            depth: 0,
            post: None,
            concat: Rc::new(StringConcat),
        }
    }

    pub fn with_concat(mut self, concat: Rc<dyn FragmentJoin>) -> Self {
        self.concat = concat;
        self
    }

    /// The construct from whose perspective this walk runs, typically the
    /// stack whose document is being resolved.
    pub fn scope(&self) -> &Node {
        &self.scope
    }

    /// True during the preparing pass of synthesis, where cross-stack
    /// references register their exports and dependencies. The document
    /// produced by a preparing walk is discarded.
    pub fn preparing(&self) -> bool {
        self.preparing
    }

    pub fn tokens(&self) -> TokenRegistry {
        self.scope.tokens()
    }

    /// Register a hook to run once on the resolved value of the token
    /// currently being resolved.
    pub fn register_post_process(&mut self, post: Rc<dyn PostProcess>) {
        self.post = Some(post);
    }

    /// Resolve a value, substituting every token marker it carries.
    pub fn resolve(&mut self, value: &CfnValue) -> Result<CfnValue> {
        self.depth += 1;
        if self.depth > MAX_RESOLVE_DEPTH {
            return Err(Error::RecursionLimit);
        }
        let result = self.resolve_inner(value);
        self.depth -= 1;
        result
    }

    fn resolve_inner(&mut self, value: &CfnValue) -> Result<CfnValue> {
        match value {
            CfnValue::Null | CfnValue::Bool(_) => Ok(value.clone()),
            CfnValue::Number(n) => match self.tokens().lookup_number(*n) {
                Some(token) => self.resolve_token(token),
                None => Ok(value.clone()),
            },
            CfnValue::String(s) => self.resolve_string(s),
            CfnValue::List(xs) => self.resolve_list(xs),
            CfnValue::Map(m) => {
                let mut out = std::collections::BTreeMap::new();
                for (key, entry) in m {
                    if crate::token::is_unresolved(key) {
                        return Err(Error::TokenKey { key: key.clone() });
                    }
                    let resolved = self.resolve(entry)?;
                    if !resolved.is_null() {
                        out.insert(key.clone(), resolved);
                    }
                }
                Ok(CfnValue::Map(out))
            }
        }
    }

    fn resolve_string(&mut self, s: &str) -> Result<CfnValue> {
        let mut fragments = self.tokens().split(s);
        // A string that is exactly one token substitutes structurally:
        // the token's value is returned as-is, even a map or a list.
        if fragments.len() == 1 {
            return match fragments.swap_remove(0) {
                Fragment::Literal(literal) => Ok(CfnValue::String(literal)),
                Fragment::Token(token) => self.resolve_token(token),
            };
        }
        let mut acc = CfnValue::Null;
        for fragment in fragments {
            let part = match fragment {
                Fragment::Literal(literal) => CfnValue::String(literal),
                Fragment::Token(token) => self.resolve_token(token)?,
            };
            acc = self.concat.join(&acc, &part)?;
        }
        Ok(acc)
    }

    fn resolve_list(&mut self, xs: &[CfnValue]) -> Result<CfnValue> {
        if let [CfnValue::String(only)] = xs {
            if let Some(token) = self.tokens().lookup_list(only) {
                // A token declaring a scalar shape can never satisfy a
                // list position; reject it before running its producer.
                match token.type_hint() {
                    TypeHint::List | TypeHint::Any => {}
                    hint => {
                        return Err(Error::InvalidListToken {
                            got: format!("a token declared as {}", hint.name()),
                        })
                    }
                }
                let resolved = self.resolve_token(token)?;
                return match resolved {
                    CfnValue::List(_) | CfnValue::Null => Ok(resolved),
                    other => Err(Error::InvalidListToken {
                        got: other.kind().to_owned(),
                    }),
                };
            }
        }
        // A list token stands for the whole list. Elements next to it, or
        // text concatenated around it, have nowhere to go.
        for x in xs {
            if let CfnValue::String(s) = x {
                if self.tokens().lookup_list(s).is_some() {
                    return Err(Error::ListTokenElements {
                        got: format!("a list of {} elements", xs.len()),
                    });
                }
                if s.contains(BEGIN_LIST_TOKEN_MARKER) && crate::token::is_unresolved(s) {
                    return Err(Error::ListTokenConcat { got: s.clone() });
                }
            }
        }
        let mut out = vec![];
        for x in xs {
            let resolved = self.resolve(x)?;
            if !resolved.is_null() {
                out.push(resolved);
            }
        }
        Ok(CfnValue::List(out))
    }

    /// Resolve one token: run its producer, recurse into the produced
    /// value, then apply the post-processor the producer registered, if
    /// any. Failures are wrapped once, tagged with the token's creation
    /// site.
    fn resolve_token(&mut self, token: Rc<dyn Resolvable>) -> Result<CfnValue> {
        let site = token.creation_site();
        let saved = self.post.take();
        let result = (|| {
            let produced = token.resolve(self)?;
            let recursed = self.resolve(&produced)?;
            match self.post.take() {
                Some(post) => post.post_process(recursed, self),
                None => Ok(recursed),
            }
        })();
        self.post = saved;
        result.map_err(|e| enrich(e, site))
    }

    #[cfg(test)]
    pub(crate) fn test_context(tokens: &TokenRegistry) -> ResolveContext {
        ResolveContext::new(Node::root(tokens.clone()), false)
    }
}

/// Wrap a failure in a resolution error carrying the creation site of the
/// failed token. Already-wrapped errors pass through so the outermost
/// token doesn't bury the message.
fn enrich(err: Error, site: Option<&'static Location<'static>>) -> Error {
    match err {
        already @ Error::Resolution { .. } => already,
        other => Error::Resolution {
            message: other.to_string(),
            site: site.map(|l| l.to_string()),
        },
    }
}
