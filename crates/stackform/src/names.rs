//! Unique identifiers.
//!
//! Logical ids and generated names are derived from construct paths: a
//! human-readable portion built from the path components plus a short
//! hash of the full path, so renaming a construct changes its id but
//! nothing else does.

use std::rc::Rc;

use crate::{construct::Node, stack::StackInner, token::is_unresolved, utils, Error, Result};

/// Components with this id are dropped from both the human portion and
/// the hash, so refactoring a construct into a `Default` wrapper keeps
/// ids stable.
const HIDDEN_ID: &str = "Default";

/// Components with this id still count toward the hash but are hidden
/// from the human portion.
const HIDDEN_FROM_HUMAN_ID: &str = "Resource";

const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;
const MAX_ID_LEN: usize = 255;

/// Options for [`unique_resource_name`] and [`make_unique_resource_name`].
pub struct UniqueResourceNameOptions {
    /// Longest name the target accepts, hash included.
    pub max_length: usize,
    /// Placed between the human components and before the hash.
    pub separator: String,
    /// Characters kept in addition to ASCII alphanumerics.
    pub allowed_special_characters: String,
}

impl Default for UniqueResourceNameOptions {
    fn default() -> Self {
        Self {
            max_length: 256,
            separator: String::new(),
            allowed_special_characters: String::new(),
        }
    }
}

/// Calculate a collision-resistant identifier from path components, fit
/// for a CloudFormation logical id.
///
/// A single component that is already clean is returned as-is, so
/// top-level constructs keep the ids their authors wrote.
pub fn unique_id(components: &[String]) -> Result<String> {
    let components: Vec<&String> = components.iter().filter(|c| *c != HIDDEN_ID).collect();
    if components.is_empty() {
        return Err(Error::EmptyIdComponents);
    }

    if let [only] = components.as_slice() {
        let candidate = strip_chars(only, "");
        if !candidate.is_empty() && candidate.chars().count() <= MAX_ID_LEN {
            return Ok(candidate);
        }
    }

    let hash = path_hash(&components);
    let human: String = remove_dupes(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(|c| strip_chars(c, ""))
        .collect();
    let human = if human.chars().count() > MAX_HUMAN_LEN {
        split_in_middle(&human, MAX_HUMAN_LEN)
    } else {
        human
    };
    Ok(format!("{human}{hash}"))
}

/// Calculate a unique name from path components, fit for targets with
/// their own length and character constraints (bucket names, role names).
pub fn make_unique_resource_name(
    components: &[String],
    options: &UniqueResourceNameOptions,
) -> Result<String> {
    let components: Vec<&String> = components.iter().filter(|c| *c != HIDDEN_ID).collect();
    if components.is_empty() {
        return Err(Error::EmptyIdComponents);
    }
    let separator = &options.separator;
    if options.max_length < HASH_LEN + separator.chars().count() {
        return Err(Error::NameLengthBudget {
            max_length: options.max_length,
        });
    }

    if let [only] = components.as_slice() {
        let candidate = strip_chars(only, &options.allowed_special_characters);
        if !candidate.is_empty() && candidate.chars().count() <= options.max_length {
            return Ok(candidate);
        }
    }

    let hash = path_hash(&components);
    let human = remove_dupes(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(|c| strip_chars(c, &options.allowed_special_characters))
        .filter(|c| !c.is_empty())
        .collect::<Vec<String>>()
        .join(separator);
    if human.is_empty() {
        return Err(Error::UnprintableName {
            components: components
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("/"),
        });
    }

    let budget = options.max_length - HASH_LEN - separator.chars().count();
    let human = if human.chars().count() > budget {
        split_in_middle(&human, budget)
    } else {
        human
    };
    Ok(format!("{human}{separator}{hash}"))
}

/// Like [`make_unique_resource_name`], anchored at the nearest ancestor
/// stack with a concrete name: the stack's name leads the components, so
/// the generated name survives refactors above the stack.
pub fn unique_resource_name(node: &Node, options: &UniqueResourceNameOptions) -> Result<String> {
    let scopes = node.scopes();
    let anchor: Option<(usize, Rc<StackInner>)> =
        scopes.iter().enumerate().rev().find_map(|(at, scope)| {
            let stack = scope.attachment()?.downcast::<StackInner>().ok()?;
            (!is_unresolved(&stack.stack_name)).then_some((at, stack))
        });
    let components: Vec<String> = match anchor {
        Some((at, stack)) => std::iter::once(stack.stack_name.clone())
            .chain(scopes[at + 1..].iter().map(Node::id))
            .collect(),
        None => node.path(),
    };
    make_unique_resource_name(&components, options)
}

/// 8 uppercase hex characters of the SHA-256 of the `/`-joined path.
fn path_hash(components: &[&String]) -> String {
    let joined = components
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/");
    utils::sha256_hex(&[&joined])[..HASH_LEN].to_uppercase()
}

fn strip_chars(s: &str, allowed: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || allowed.contains(*c))
        .collect()
}

/// Drop a component when the previous one already ends with it, so
/// `Pipeline/PipelineStage/Stage` reads `PipelineStage` rather than
/// stuttering.
fn remove_dupes<'a>(components: &[&'a String]) -> Vec<&'a String> {
    let mut out: Vec<&String> = vec![];
    for component in components {
        match out.last() {
            Some(prev) if prev.ends_with(component.as_str()) => {}
            _ => out.push(component),
        }
    }
    out
}

/// Keep the first and last halves of an over-long name, dropping the
/// middle; the hash keeps the result unique.
fn split_in_middle(s: &str, max: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let prefix = max / 2 + max % 2;
    let suffix = max / 2;
    chars[..prefix]
        .iter()
        .chain(chars[chars.len() - suffix..].iter())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn path(components: &[&str]) -> Vec<String> {
        components.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn single_clean_component_is_kept_verbatim() {
        assert_eq!("MyBucket", unique_id(&path(&["MyBucket"])).unwrap());
        // Stripped but still no hash.
        assert_eq!("MyBucket", unique_id(&path(&["My-Bucket"])).unwrap());
    }

    #[test]
    fn nested_paths_gain_a_hash_suffix() {
        let id = unique_id(&path(&["Stack", "Bucket"])).unwrap();
        assert!(id.starts_with("StackBucket"), "{id}");
        assert_eq!("StackBucket".len() + HASH_LEN, id.len());
        assert!(id[id.len() - HASH_LEN..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn ids_are_deterministic_and_path_sensitive() {
        let a = unique_id(&path(&["Stack", "Bucket"])).unwrap();
        let b = unique_id(&path(&["Stack", "Bucket"])).unwrap();
        let c = unique_id(&path(&["Other", "Bucket"])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn default_components_are_invisible() {
        assert_eq!(
            unique_id(&path(&["Stack", "Default", "Bucket"])).unwrap(),
            unique_id(&path(&["Stack", "Bucket"])).unwrap()
        );
    }

    #[test]
    fn resource_components_are_hidden_but_hashed() {
        let with = unique_id(&path(&["Stack", "Bucket", "Resource"])).unwrap();
        let without = unique_id(&path(&["Stack", "Bucket"])).unwrap();
        assert!(with.starts_with("StackBucket"), "{with}");
        assert_ne!(with, without);
    }

    #[test]
    fn stuttering_components_are_deduped() {
        let id = unique_id(&path(&["Pipeline", "PipelineStage", "Stage"])).unwrap();
        assert!(id.starts_with("PipelinePipelineStage"), "{id}");
        assert!(!id.starts_with("PipelinePipelineStageStage"), "{id}");
    }

    #[test]
    fn empty_components_are_rejected() {
        assert!(matches!(unique_id(&[]), Err(Error::EmptyIdComponents)));
        assert!(matches!(
            unique_id(&path(&["Default"])),
            Err(Error::EmptyIdComponents)
        ));
    }

    #[test]
    fn resource_names_honor_separator_and_budget() {
        let name = make_unique_resource_name(
            &path(&["Prod", "Service", "Bucket"]),
            &UniqueResourceNameOptions {
                max_length: 30,
                separator: "-".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(name.len() <= 30, "{name}");
        assert!(name.contains('-'), "{name}");
        assert!(name.starts_with("Prod-"), "{name}");
    }

    #[test]
    fn over_long_names_are_trimmed_in_the_middle() {
        let long = "a".repeat(200);
        let name = make_unique_resource_name(
            &[long.clone(), "End".to_owned()],
            &UniqueResourceNameOptions {
                max_length: 64,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(64, name.len());
        // The trailing human characters survive the trim.
        assert!(name[..64 - HASH_LEN].ends_with("End"), "{name}");
    }

    #[test]
    fn unprintable_names_are_rejected() {
        assert!(matches!(
            make_unique_resource_name(
                &path(&["---", "!!!"]),
                &UniqueResourceNameOptions::default()
            ),
            Err(Error::UnprintableName { .. })
        ));
    }

    #[test]
    fn tiny_budgets_are_rejected() {
        assert!(matches!(
            make_unique_resource_name(
                &path(&["A", "B"]),
                &UniqueResourceNameOptions {
                    max_length: 6,
                    ..Default::default()
                }
            ),
            Err(Error::NameLengthBudget { .. })
        ));
    }

    #[test]
    fn anchored_names_lead_with_the_stack_name() {
        use crate::{
            stack::{Stack, StackProps},
            token::TokenRegistry,
        };
        let root = Node::root(TokenRegistry::new());
        let stack = Stack::new(
            &root,
            "Tenant",
            StackProps {
                stack_name: Some("prod-tenant".to_owned()),
                ..Default::default()
            },
        )
        .unwrap();
        let queue = stack.node().new_child("Queue").unwrap();
        let name = unique_resource_name(
            &queue,
            &UniqueResourceNameOptions {
                separator: "-".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(name.starts_with("prodtenant-Queue"), "{name}");
    }

    #[test]
    fn allowed_special_characters_survive() {
        let name = make_unique_resource_name(
            &path(&["my.service", "queue"]),
            &UniqueResourceNameOptions {
                allowed_special_characters: ".".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(name.starts_with("my.service"), "{name}");
    }
}
