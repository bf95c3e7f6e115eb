//! Resources and physical names.
//!
//! A physical name is what the service calls a resource (a bucket name,
//! a role name), as opposed to its logical id in the template. Leaving
//! the name to CloudFormation is the best default, but a resource that
//! is consumed from another environment must have a concrete name known
//! at synthesis time. [`PhysicalName::GenerateIfNeeded`] bridges the
//! two: the name stays unset until the first cross-environment use, then
//! a deterministic one is generated.

use std::{cell::RefCell, rc::Rc};

use crate::{
    construct::Node,
    lazy::Lazy,
    names,
    stack::{ArnComponents, Stack, StackInner},
    token::is_unresolved,
    utils, Error, Result,
};

/// How a resource gets its service-side name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PhysicalName {
    /// Let CloudFormation pick a name at deploy time. Such a resource
    /// cannot be referenced from another environment.
    #[default]
    CloudFormationDefault,
    /// Use this name. A concrete name can cross environments; a
    /// tokenized one cannot.
    Of(String),
    /// No name unless the resource is used across environments, in which
    /// case a deterministic name is generated at synthesis time.
    GenerateIfNeeded,
}

#[derive(Default)]
pub struct ResourceProps {
    pub physical_name: PhysicalName,
}

pub(crate) struct ResourceInner {
    path: String,
    /// Unique id of the construct path, feeding generated names.
    uid: String,
    stack: Rc<StackInner>,
    /// Name given at construction, when there was one.
    explicit: Option<String>,
    /// Generated name, filled on first cross-environment use.
    generated: RefCell<Option<String>>,
    allow_cross_environment: bool,
    generate_on_demand: bool,
}

impl ResourceInner {
    /// The concrete name, once one exists.
    fn concrete_name(&self) -> Option<String> {
        self.explicit
            .clone()
            .or_else(|| self.generated.borrow().clone())
    }

    /// Fail fast when this resource cannot be used across environments;
    /// otherwise make sure it has a concrete name.
    pub(crate) fn enable_cross_environment(&self) -> Result<()> {
        if !self.allow_cross_environment {
            return Err(Error::CrossEnvironmentName {
                path: self.path.clone(),
            });
        }
        if self.generate_on_demand && self.generated.borrow().is_none() {
            let name = generate_physical_name(&self.stack, &self.uid, &self.path)?;
            log::debug!("generated physical name '{name}' for '{}'", self.path);
            *self.generated.borrow_mut() = Some(name);
        }
        Ok(())
    }
}

/// A construct with a physical name, the base for anything that can be
/// consumed across stacks and environments.
#[derive(Clone)]
pub struct Resource {
    node: Node,
    stack: Stack,
    inner: Rc<ResourceInner>,
    /// What `physical_name()` hands out: the explicit name, or a token
    /// that resolves to the generated name (or to nothing).
    name: String,
}

impl Resource {
    pub fn new(scope: &Node, id: &str, props: ResourceProps) -> Result<Resource> {
        let node = scope.new_child(id)?;
        let stack = Stack::of(&node)?;
        let uid = names::unique_id(&node.path())?;
        let tokens = node.tokens();

        let (explicit, allow_cross_environment, generate_on_demand) = match &props.physical_name {
            PhysicalName::CloudFormationDefault => (None, false, false),
            PhysicalName::Of(name) if !is_unresolved(name) => (Some(name.clone()), true, false),
            PhysicalName::Of(name) => (Some(name.clone()), false, false),
            PhysicalName::GenerateIfNeeded => (None, true, true),
        };

        let inner = Rc::new(ResourceInner {
            path: node.path_str(),
            uid,
            stack: stack.inner.clone(),
            explicit,
            generated: Default::default(),
            allow_cross_environment,
            generate_on_demand,
        });

        let name = match &inner.explicit {
            Some(name) => name.clone(),
            // Resolves to the generated name if one was required, and to
            // nothing otherwise, leaving the property unset.
            None => {
                let reader = inner.clone();
                Lazy::string(&tokens, move |_| Ok(reader.generated.borrow().clone()))
            }
        };

        Ok(Resource {
            node,
            stack,
            inner,
            name,
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// The name to pass into the resource's name property. May be a
    /// token; resolves to nothing when CloudFormation should pick the
    /// name.
    pub fn physical_name(&self) -> String {
        self.name.clone()
    }

    /// Declare that this resource is consumed from another environment.
    pub fn enable_cross_environment(&self) -> Result<()> {
        self.inner.enable_cross_environment()
    }

    /// Wrap a deploy-time name attribute (eg the `Ref` of a bucket) so
    /// that consumers in another environment get the concrete physical
    /// name instead.
    pub fn resource_name_attribute(&self, name_attribute: String) -> String {
        let inner = self.inner.clone();
        Lazy::string(&self.node.tokens(), move |ctx| {
            let consuming = Stack::of(ctx.scope())?;
            if consuming.account() == inner.stack.account
                && consuming.region() == inner.stack.region
            {
                Ok(Some(name_attribute.clone()))
            } else {
                inner.enable_cross_environment()?;
                Ok(inner.concrete_name())
            }
        })
    }

    /// Like [`Resource::resource_name_attribute`], for ARN attributes:
    /// cross-environment consumers get an ARN assembled from the
    /// producing stack's environment and the concrete physical name.
    pub fn resource_arn_attribute(
        &self,
        arn_attribute: String,
        components: ArnComponents,
    ) -> String {
        let inner = self.inner.clone();
        Lazy::string(&self.node.tokens(), move |ctx| {
            let consuming = Stack::of(ctx.scope())?;
            if consuming.account() == inner.stack.account
                && consuming.region() == inner.stack.region
            {
                Ok(Some(arn_attribute.clone()))
            } else {
                inner.enable_cross_environment()?;
                let mut components = components.clone();
                if components.resource_name.is_none() {
                    components.resource_name = inner.concrete_name();
                }
                Ok(Some(inner.stack.format_arn(&components)))
            }
        })
    }
}

/// First 25 characters of the stack name, last 24 characters of the
/// construct's unique id, then 12 hex characters digesting the prefix,
/// the suffix, the region and the account, all lowercased. Deterministic
/// across synthesis runs and machines.
fn generate_physical_name(stack: &StackInner, uid: &str, path: &str) -> Result<String> {
    let region = match stack.region.as_deref() {
        Some(region) if !is_unresolved(region) && !region.is_empty() => region,
        _ => {
            return Err(Error::UnresolvedEnvironment {
                path: path.to_owned(),
                coordinate: "region",
            })
        }
    };
    let account = match stack.account.as_deref() {
        Some(account) if !is_unresolved(account) && !account.is_empty() => account,
        _ => {
            return Err(Error::UnresolvedEnvironment {
                path: path.to_owned(),
                coordinate: "account",
            })
        }
    };
    let prefix: String = stack.stack_name.chars().take(25).collect();
    let id_chars: Vec<char> = uid.chars().collect();
    let suffix: String = id_chars[id_chars.len().saturating_sub(24)..].iter().collect();
    let hash = &utils::sha256_hex(&[&prefix, &suffix, region, account])[..12];
    Ok(format!("{prefix}{suffix}{hash}").to_lowercase())
}
