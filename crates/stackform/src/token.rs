//! Tokens.
//!
//! A token is a placeholder for a value that is only known at synthesis
//! time. Tokens are encoded as reversible marker strings (or NaN-boxed
//! numbers) so they can travel through ordinary `String`, `Vec<String>`
//! and `f64` fields, and are registered in a per-app [`TokenRegistry`]
//! that maps each marker back to the [`Resolvable`] that produces its
//! final value.

use std::{cell::RefCell, collections::HashMap, panic::Location, rc::Rc};

use crate::{resolve::ResolveContext, value::CfnValue, Result};

/// Marker that begins an embedded string token.
pub const BEGIN_STRING_TOKEN_MARKER: &str = "${Token[";
/// Marker that begins an embedded list token.
pub const BEGIN_LIST_TOKEN_MARKER: &str = "#{Token[";
/// Marker that ends an embedded token.
pub const END_TOKEN_MARKER: &str = "]}";

/// High 16 bits tagging a NaN-boxed number token; the low 48 bits carry
/// the registry key.
const NUMBER_TOKEN_TAG: u64 = 0xFFFB_0000_0000_0000;
const NUMBER_TOKEN_TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const NUMBER_TOKEN_KEY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// The kind of value a token is expected to resolve to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeHint {
    String,
    Number,
    List,
    Any,
}

impl TypeHint {
    pub fn name(self) -> &'static str {
        match self {
            TypeHint::String => "string",
            TypeHint::Number => "number",
            TypeHint::List => "list",
            TypeHint::Any => "any",
        }
    }
}

/// A value that can be resolved at synthesis time.
pub trait Resolvable {
    /// Produce the token's value. The result may itself contain further
    /// token markers; the resolver recurses until none remain.
    fn resolve(&self, ctx: &mut ResolveContext) -> Result<CfnValue>;

    /// Where this resolvable was created, appended to resolution errors
    /// so "where did this value come from" is answerable.
    fn creation_site(&self) -> Option<&'static Location<'static>> {
        None
    }

    /// The kind of value this token is expected to resolve to. The
    /// resolver rejects a token standing in a list position whose hint
    /// declares a scalar shape, without running its producer.
    fn type_hint(&self) -> TypeHint {
        TypeHint::Any
    }

    /// A short name embedded in the marker string to keep unresolved
    /// output legible.
    fn display_hint(&self) -> Option<&str> {
        None
    }
}

/// A piece of a tokenized string.
pub enum Fragment {
    Literal(String),
    Token(Rc<dyn Resolvable>),
}

/// Returns whether a string carries at least one embedded token marker.
///
/// This is a syntactic check: it recognizes the marker pattern whether or
/// not the marker is registered in any live registry.
pub fn is_unresolved(s: &str) -> bool {
    for begin in [BEGIN_STRING_TOKEN_MARKER, BEGIN_LIST_TOKEN_MARKER] {
        if let Some(at) = s.find(begin) {
            if s[at + begin.len()..].contains(END_TOKEN_MARKER) {
                return true;
            }
        }
    }
    false
}

#[derive(Default)]
struct RegistryInner {
    next_key: u64,
    tokens: HashMap<u64, Rc<dyn Resolvable>>,
}

/// The arena of live tokens for one app.
///
/// Created together with the [`App`](crate::App) and discarded with it;
/// markers are injective for the registry's lifetime and values are never
/// reused across apps. Cloning the registry clones a handle to the same
/// arena.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("len", &self.inner.borrow().tokens.len())
            .finish()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, resolvable: Rc<dyn Resolvable>) -> (u64, String) {
        let mut inner = self.inner.borrow_mut();
        let key = inner.next_key;
        inner.next_key += 1;
        let display = sanitize_display(resolvable.display_hint().unwrap_or("TOKEN"));
        log::trace!("registered token '{display}.{key}'");
        inner.tokens.insert(key, resolvable);
        (key, display)
    }

    /// Wrap a resolvable into a string carrying an embedded marker.
    pub fn as_string(&self, resolvable: Rc<dyn Resolvable>) -> String {
        let (key, display) = self.register(resolvable);
        format!("{BEGIN_STRING_TOKEN_MARKER}{display}.{key}{END_TOKEN_MARKER}")
    }

    /// Wrap a resolvable into a single-element list carrying an embedded
    /// marker. The token must resolve to a list; the resolver forbids
    /// adding elements next to the marker.
    pub fn as_list(&self, resolvable: Rc<dyn Resolvable>) -> Vec<String> {
        let (key, display) = self.register(resolvable);
        vec![format!(
            "{BEGIN_LIST_TOKEN_MARKER}{display}.{key}{END_TOKEN_MARKER}"
        )]
    }

    /// Wrap a resolvable into a NaN-boxed number carrying the registry
    /// key in its mantissa.
    pub fn as_number(&self, resolvable: Rc<dyn Resolvable>) -> f64 {
        let (key, _) = self.register(resolvable);
        debug_assert!(key <= NUMBER_TOKEN_KEY_MASK, "token key space exhausted");
        f64::from_bits(NUMBER_TOKEN_TAG | (key & NUMBER_TOKEN_KEY_MASK))
    }

    fn lookup_key(&self, key: u64) -> Option<Rc<dyn Resolvable>> {
        self.inner.borrow().tokens.get(&key).cloned()
    }

    /// Reverse a marker body of the form `display.key`.
    fn lookup_body(&self, body: &str) -> Option<Rc<dyn Resolvable>> {
        let (_, key) = body.rsplit_once('.')?;
        self.lookup_key(key.parse().ok()?)
    }

    /// Reverse a string that consists of exactly one string-token marker.
    pub fn lookup_string(&self, s: &str) -> Option<Rc<dyn Resolvable>> {
        let body = s
            .strip_prefix(BEGIN_STRING_TOKEN_MARKER)?
            .strip_suffix(END_TOKEN_MARKER)?;
        if body.contains(END_TOKEN_MARKER) {
            return None;
        }
        self.lookup_body(body)
    }

    /// Reverse a string that consists of exactly one list-token marker.
    pub fn lookup_list(&self, s: &str) -> Option<Rc<dyn Resolvable>> {
        let body = s
            .strip_prefix(BEGIN_LIST_TOKEN_MARKER)?
            .strip_suffix(END_TOKEN_MARKER)?;
        if body.contains(END_TOKEN_MARKER) {
            return None;
        }
        self.lookup_body(body)
    }

    /// Reverse a NaN-boxed number token.
    pub fn lookup_number(&self, n: f64) -> Option<Rc<dyn Resolvable>> {
        let bits = n.to_bits();
        if bits & NUMBER_TOKEN_TAG_MASK != NUMBER_TOKEN_TAG {
            return None;
        }
        self.lookup_key(bits & NUMBER_TOKEN_KEY_MASK)
    }

    /// Split a string into literal and token fragments.
    ///
    /// Marker-shaped text that is not registered in this arena is kept as
    /// a literal.
    pub fn split(&self, s: &str) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let mut rest = s;
        while let Some(at) = rest.find(BEGIN_STRING_TOKEN_MARKER) {
            let Some(end) = rest[at..].find(END_TOKEN_MARKER) else {
                break;
            };
            let marker = &rest[at..at + end + END_TOKEN_MARKER.len()];
            match self.lookup_string(marker) {
                Some(token) => {
                    if at > 0 {
                        fragments.push(Fragment::Literal(rest[..at].to_owned()));
                    }
                    fragments.push(Fragment::Token(token));
                }
                None => {
                    fragments.push(Fragment::Literal(rest[..at + marker.len()].to_owned()));
                }
            }
            rest = &rest[at + marker.len()..];
        }
        if !rest.is_empty() || fragments.is_empty() {
            fragments.push(Fragment::Literal(rest.to_owned()));
        }
        fragments
    }
}

/// Keep marker displays to characters that cannot collide with the
/// marker delimiters.
fn sanitize_display(display: &str) -> String {
    let cleaned: String = display
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect();
    if cleaned.is_empty() {
        "TOKEN".to_owned()
    } else {
        cleaned
    }
}
