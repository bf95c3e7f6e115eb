//! Lazily-produced values.
//!
//! A lazy value defers the production of a string, number or list until
//! resolution time. The producer runs against the final state of the
//! construct tree, so it observes every mutation made after the token was
//! handed out.

use std::{panic::Location, rc::Rc};

use crate::{
    resolve::ResolveContext,
    token::{Resolvable, TokenRegistry, TypeHint},
    value::CfnValue,
    Result,
};

/// Options for creating a lazy value.
#[derive(Default)]
pub struct LazyOptions {
    /// A short name embedded in the token marker, to keep unresolved
    /// output legible.
    pub display_hint: Option<String>,
    /// When set, a lazy list that produces an empty list resolves to
    /// nothing at all, and the entry holding it is dropped.
    pub omit_empty_list: bool,
}

struct LazyValue {
    produce: Box<dyn Fn(&mut ResolveContext) -> Result<CfnValue>>,
    site: &'static Location<'static>,
    hint: TypeHint,
    display: Option<String>,
}

impl Resolvable for LazyValue {
    fn resolve(&self, ctx: &mut ResolveContext) -> Result<CfnValue> {
        (self.produce)(ctx)
    }

    fn creation_site(&self) -> Option<&'static Location<'static>> {
        Some(self.site)
    }

    fn type_hint(&self) -> TypeHint {
        self.hint
    }

    fn display_hint(&self) -> Option<&str> {
        self.display.as_deref()
    }
}

/// Namespace for creating lazily-produced values.
///
/// Each constructor registers a producer and returns a token in the
/// matching encoding. A producer that returns `Ok(None)` resolves to
/// nothing, and the entry holding it is dropped from the document.
pub struct Lazy;

impl Lazy {
    /// A string whose value is produced at resolution time.
    #[track_caller]
    pub fn string(
        tokens: &TokenRegistry,
        produce: impl Fn(&mut ResolveContext) -> Result<Option<String>> + 'static,
    ) -> String {
        Self::string_with(tokens, LazyOptions::default(), produce)
    }

    #[track_caller]
    pub fn string_with(
        tokens: &TokenRegistry,
        options: LazyOptions,
        produce: impl Fn(&mut ResolveContext) -> Result<Option<String>> + 'static,
    ) -> String {
        let site = Location::caller();
        tokens.as_string(Rc::new(LazyValue {
            produce: Box::new(move |ctx| Ok(CfnValue::from(produce(ctx)?))),
            site,
            hint: TypeHint::String,
            display: options.display_hint,
        }))
    }

    /// A number whose value is produced at resolution time.
    #[track_caller]
    pub fn number(
        tokens: &TokenRegistry,
        produce: impl Fn(&mut ResolveContext) -> Result<Option<f64>> + 'static,
    ) -> f64 {
        let site = Location::caller();
        tokens.as_number(Rc::new(LazyValue {
            produce: Box::new(move |ctx| Ok(CfnValue::from(produce(ctx)?))),
            site,
            hint: TypeHint::Number,
            display: None,
        }))
    }

    /// A list whose elements are produced at resolution time.
    #[track_caller]
    pub fn list(
        tokens: &TokenRegistry,
        produce: impl Fn(&mut ResolveContext) -> Result<Option<Vec<String>>> + 'static,
    ) -> Vec<String> {
        Self::list_with(tokens, LazyOptions::default(), produce)
    }

    #[track_caller]
    pub fn list_with(
        tokens: &TokenRegistry,
        options: LazyOptions,
        produce: impl Fn(&mut ResolveContext) -> Result<Option<Vec<String>>> + 'static,
    ) -> Vec<String> {
        let site = Location::caller();
        let omit_empty = options.omit_empty_list;
        tokens.as_list(Rc::new(LazyValue {
            produce: Box::new(move |ctx| {
                Ok(match produce(ctx)? {
                    Some(xs) if xs.is_empty() && omit_empty => CfnValue::Null,
                    Some(xs) => CfnValue::from(xs),
                    None => CfnValue::Null,
                })
            }),
            site,
            hint: TypeHint::List,
            display: options.display_hint,
        }))
    }

    /// An arbitrary document value produced at resolution time, returned
    /// as a string token. When the token is the entire string being
    /// resolved, the produced value is substituted structurally, so it
    /// may be a map or a list.
    #[track_caller]
    pub fn any(
        tokens: &TokenRegistry,
        produce: impl Fn(&mut ResolveContext) -> Result<CfnValue> + 'static,
    ) -> String {
        Self::any_with(tokens, LazyOptions::default(), produce)
    }

    #[track_caller]
    pub fn any_with(
        tokens: &TokenRegistry,
        options: LazyOptions,
        produce: impl Fn(&mut ResolveContext) -> Result<CfnValue> + 'static,
    ) -> String {
        let site = Location::caller();
        tokens.as_string(Rc::new(LazyValue {
            produce: Box::new(produce),
            site,
            hint: TypeHint::Any,
            display: options.display_hint,
        }))
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn producer_sees_late_mutation() {
        let tokens = TokenRegistry::new();
        let items: Rc<RefCell<Vec<String>>> = Default::default();

        let shared = items.clone();
        let list = Lazy::list(&tokens, move |_| Ok(Some(shared.borrow().clone())));

        // Mutations after the token is handed out are still observed.
        items.borrow_mut().push("late".to_owned());

        let token = tokens.lookup_list(&list[0]).unwrap();
        let mut ctx = ResolveContext::test_context(&tokens);
        assert_eq!(
            CfnValue::from(vec!["late".to_owned()]),
            token.resolve(&mut ctx).unwrap()
        );
    }

    #[test]
    fn none_resolves_to_null() {
        let tokens = TokenRegistry::new();
        let s = Lazy::string(&tokens, |_| Ok(None));
        let token = tokens.lookup_string(&s).unwrap();
        let mut ctx = ResolveContext::test_context(&tokens);
        assert!(token.resolve(&mut ctx).unwrap().is_null());
    }

    #[test]
    fn empty_list_can_be_omitted() {
        let tokens = TokenRegistry::new();
        let list = Lazy::list_with(
            &tokens,
            LazyOptions {
                omit_empty_list: true,
                ..Default::default()
            },
            |_| Ok(Some(vec![])),
        );
        let token = tokens.lookup_list(&list[0]).unwrap();
        let mut ctx = ResolveContext::test_context(&tokens);
        assert!(token.resolve(&mut ctx).unwrap().is_null());
    }

    #[test]
    fn creation_site_is_recorded() {
        let tokens = TokenRegistry::new();
        let s = Lazy::string(&tokens, |_| Ok(Some("x".to_owned())));
        let token = tokens.lookup_string(&s).unwrap();
        let site = token.creation_site().unwrap();
        assert!(site.file().ends_with("lazy.rs"));
    }
}
