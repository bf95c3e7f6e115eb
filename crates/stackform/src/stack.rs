//! Stacks and CloudFormation intrinsics.
//!
//! A stack is the unit of deployment: it owns resources, renders to one
//! template, and carries the target environment (account and region).
//! Referencing a resource from another stack goes through a reference
//! token that decides, at resolution time, whether to emit a plain
//! intrinsic, an export/import pair, or an error.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{
    construct::Node,
    names::{self, UniqueResourceNameOptions},
    resolve::ResolveContext,
    token::{is_unresolved, Resolvable, TypeHint},
    value::CfnValue,
    Error, Result,
};

/// The deployment target of a stack. A missing coordinate means the
/// stack is environment-agnostic in that dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

#[derive(Default)]
pub struct StackProps {
    pub env: Environment,
    /// Explicit stack name; defaults to a name derived from the node
    /// path.
    pub stack_name: Option<String>,
}

pub(crate) struct StackInner {
    pub(crate) stack_name: String,
    pub(crate) account: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) path: String,
    resources: RefCell<Vec<Rc<CfnResourceInner>>>,
    outputs: RefCell<BTreeMap<String, CfnValue>>,
    dependencies: RefCell<Vec<Rc<StackInner>>>,
}

impl StackInner {
    fn same_environment(&self, other: &StackInner) -> bool {
        self.account == other.account && self.region == other.region
    }

    pub(crate) fn format_arn(&self, components: &ArnComponents) -> String {
        let partition = components.partition.as_deref().unwrap_or("aws");
        let region = components
            .region
            .clone()
            .or_else(|| self.region.clone())
            .unwrap_or_default();
        let account = components
            .account
            .clone()
            .or_else(|| self.account.clone())
            .unwrap_or_default();
        let mut arn = format!(
            "arn:{partition}:{}:{region}:{account}:{}",
            components.service, components.resource
        );
        if let (Some(name), Some(sep)) = (
            components.resource_name.as_deref(),
            components.format.separator(),
        ) {
            arn.push(sep);
            arn.push_str(name);
        }
        arn
    }

    /// Whether `self` reaches `target` through recorded dependencies.
    fn depends_on(self: &Rc<Self>, target: &Rc<StackInner>) -> bool {
        if Rc::ptr_eq(self, target) {
            return true;
        }
        self.dependencies
            .borrow()
            .iter()
            .any(|dep| dep.depends_on(target))
    }

    pub(crate) fn add_dependency(self: &Rc<Self>, on: &Rc<StackInner>) -> Result<()> {
        if self
            .dependencies
            .borrow()
            .iter()
            .any(|dep| Rc::ptr_eq(dep, on))
        {
            return Ok(());
        }
        if on.depends_on(self) {
            return Err(Error::DependencyCycle {
                from: self.path.clone(),
                to: on.path.clone(),
            });
        }
        log::debug!("stack '{}' now depends on '{}'", self.path, on.path);
        self.dependencies.borrow_mut().push(on.clone());
        Ok(())
    }
}

/// A deployable unit of resources rendering to one template.
#[derive(Clone)]
pub struct Stack {
    node: Node,
    pub(crate) inner: Rc<StackInner>,
}

impl Stack {
    pub fn new(scope: &Node, id: &str, props: StackProps) -> Result<Stack> {
        let node = scope.new_child(id)?;
        let stack_name = match props.stack_name {
            Some(name) => {
                validate_stack_name(&name)?;
                name
            }
            None => names::make_unique_resource_name(
                &node.path(),
                &UniqueResourceNameOptions {
                    max_length: 128,
                    ..Default::default()
                },
            )?,
        };
        log::debug!("new stack '{stack_name}' at '{}'", node.path_str());
        let inner = Rc::new(StackInner {
            stack_name,
            account: props.env.account,
            region: props.env.region,
            path: node.path_str(),
            resources: Default::default(),
            outputs: Default::default(),
            dependencies: Default::default(),
        });
        node.attach(inner.clone());
        Ok(Stack { node, inner })
    }

    /// The stack a construct belongs to: the nearest enclosing node with
    /// a stack attached, the node itself included.
    pub fn of(node: &Node) -> Result<Stack> {
        node.scopes()
            .iter()
            .rev()
            .find_map(Stack::attached)
            .ok_or_else(|| Error::MissingStack {
                path: node.path_str(),
            })
    }

    pub(crate) fn attached(node: &Node) -> Option<Stack> {
        let inner = node.attachment()?.downcast::<StackInner>().ok()?;
        Some(Stack {
            node: node.clone(),
            inner,
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn stack_name(&self) -> String {
        self.inner.stack_name.clone()
    }

    pub fn account(&self) -> Option<String> {
        self.inner.account.clone()
    }

    pub fn region(&self) -> Option<String> {
        self.inner.region.clone()
    }

    /// The environment coordinate, eg `aws://111111111111/us-east-1`.
    pub fn environment(&self) -> String {
        format!(
            "aws://{}/{}",
            self.inner.account.as_deref().unwrap_or("unknown-account"),
            self.inner.region.as_deref().unwrap_or("unknown-region"),
        )
    }

    /// The id this stack's artifacts are filed under.
    pub fn artifact_id(&self) -> String {
        self.node.path().join("-")
    }

    /// Record a deployment-ordering dependency on another stack.
    pub fn add_dependency(&self, on: &Stack) -> Result<()> {
        self.inner.add_dependency(&on.inner)
    }

    pub(crate) fn dependency_paths(&self) -> Vec<String> {
        self.inner
            .dependencies
            .borrow()
            .iter()
            .map(|dep| dep.path.clone())
            .collect()
    }

    /// Assemble an ARN from components, defaulting the partition, region
    /// and account from this stack's environment.
    pub fn format_arn(&self, components: &ArnComponents) -> String {
        self.inner.format_arn(components)
    }

    /// Render this stack's document. During a preparing walk the output
    /// is discarded; it only runs so reference tokens can register their
    /// exports and dependencies.
    pub(crate) fn render(&self, preparing: bool) -> Result<CfnValue> {
        let mut ctx = ResolveContext::new(self.node.clone(), preparing);
        let resources: Vec<Rc<CfnResourceInner>> = self.inner.resources.borrow().clone();
        let mut rendered = BTreeMap::new();
        for resource in resources {
            let unresolved = resource.properties.borrow().clone();
            let properties = ctx.resolve(&unresolved)?;
            let mut entry = BTreeMap::new();
            entry.insert("Type".to_owned(), CfnValue::from(resource.ty.as_str()));
            match properties {
                CfnValue::Null => {}
                CfnValue::Map(m) if m.is_empty() => {}
                properties => {
                    entry.insert("Properties".to_owned(), properties);
                }
            }
            rendered.insert(resource.logical_id.clone(), CfnValue::Map(entry));
        }
        let mut doc = BTreeMap::new();
        doc.insert("Resources".to_owned(), CfnValue::Map(rendered));
        let outputs = self.inner.outputs.borrow().clone();
        if !outputs.is_empty() {
            doc.insert("Outputs".to_owned(), CfnValue::Map(outputs));
        }
        Ok(CfnValue::Map(doc))
    }

    /// The fully-resolved template, as JSON.
    ///
    /// Runs its own preparing walk first, so exports this stack consumes
    /// are registered with their producing stacks.
    pub fn to_template(&self) -> Result<serde_json::Value> {
        let _ = self.render(true)?;
        Ok(self.render(false)?.to_json())
    }
}

fn validate_stack_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = !is_unresolved(name)
        && name.len() <= 128
        && chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidStackName {
            name: name.to_owned(),
        })
    }
}

/// How the resource name is glued onto the end of an ARN.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArnFormat {
    /// `arn:aws:s3:::bucket-name` style, no separate resource name.
    NoResourceName,
    /// `arn:aws:lambda:region:account:function:name` style.
    ColonResourceName,
    /// `arn:aws:iam::account:role/name` style.
    #[default]
    SlashResourceName,
}

impl ArnFormat {
    fn separator(&self) -> Option<char> {
        match self {
            ArnFormat::NoResourceName => None,
            ArnFormat::ColonResourceName => Some(':'),
            ArnFormat::SlashResourceName => Some('/'),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ArnComponents {
    /// Defaults to `aws`.
    pub partition: Option<String>,
    pub service: String,
    /// Defaults to the stack's region.
    pub region: Option<String>,
    /// Defaults to the stack's account.
    pub account: Option<String>,
    pub resource: String,
    pub resource_name: Option<String>,
    pub format: ArnFormat,
}

pub(crate) struct CfnResourceInner {
    pub(crate) logical_id: String,
    ty: String,
    properties: RefCell<CfnValue>,
    pub(crate) path: String,
}

/// A raw CloudFormation resource: a type name and a bag of properties.
#[derive(Clone)]
pub struct CfnResource {
    node: Node,
    stack: Stack,
    inner: Rc<CfnResourceInner>,
}

impl std::fmt::Debug for CfnResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfnResource")
            .field("logical_id", &self.inner.logical_id)
            .field("type", &self.inner.ty)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl CfnResource {
    pub fn new(scope: &Node, id: &str, ty: &str, properties: CfnValue) -> Result<CfnResource> {
        let node = scope.new_child(id)?;
        let stack = Stack::of(&node)?;
        let below_stack = node.path()[stack.node.path().len()..].to_vec();
        let logical_id = names::unique_id(&below_stack)?;
        log::trace!(
            "new resource '{ty}' at '{}' as '{logical_id}'",
            node.path_str()
        );
        let inner = Rc::new(CfnResourceInner {
            logical_id,
            ty: ty.to_owned(),
            properties: RefCell::new(properties),
            path: node.path_str(),
        });
        stack.inner.resources.borrow_mut().push(inner.clone());
        node.attach(inner.clone());
        Ok(CfnResource { node, stack, inner })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn logical_id(&self) -> String {
        self.inner.logical_id.clone()
    }

    pub fn set_property(&self, key: &str, value: CfnValue) {
        let mut properties = self.inner.properties.borrow_mut();
        let mut map = match properties.clone() {
            CfnValue::Map(m) => m,
            _ => BTreeMap::new(),
        };
        map.insert(key.to_owned(), value);
        *properties = CfnValue::Map(map);
    }

    /// A token for this resource's `Ref` value.
    pub fn ref_token(&self) -> String {
        self.reference(None)
    }

    /// A token for one of this resource's attributes, via `Fn::GetAtt`.
    pub fn get_att(&self, attribute: &str) -> String {
        self.reference(Some(attribute.to_owned()))
    }

    fn reference(&self, attribute: Option<String>) -> String {
        self.node.tokens().as_string(Rc::new(CfnReference {
            target: self.inner.clone(),
            producer: self.stack.inner.clone(),
            attribute,
        }))
    }
}

/// A deferred reference to a resource, resolved from the consuming
/// stack's point of view.
struct CfnReference {
    target: Rc<CfnResourceInner>,
    producer: Rc<StackInner>,
    attribute: Option<String>,
}

impl CfnReference {
    fn intrinsic(&self) -> CfnValue {
        match &self.attribute {
            None => CfnValue::object([("Ref", CfnValue::from(self.target.logical_id.as_str()))]),
            Some(attribute) => CfnValue::object([(
                "Fn::GetAtt",
                CfnValue::List(vec![
                    CfnValue::from(self.target.logical_id.as_str()),
                    CfnValue::from(attribute.as_str()),
                ]),
            )]),
        }
    }

    fn export_name(&self) -> String {
        match &self.attribute {
            None => format!("{}:{}", self.producer.stack_name, self.target.logical_id),
            Some(attribute) => format!(
                "{}:{}:{}",
                self.producer.stack_name, self.target.logical_id, attribute
            ),
        }
    }

    fn output_logical_id(&self) -> String {
        let raw = format!(
            "ExportsOutput{}{}",
            self.target.logical_id,
            self.attribute.as_deref().unwrap_or("Ref")
        );
        raw.chars().filter(char::is_ascii_alphanumeric).collect()
    }
}

impl Resolvable for CfnReference {
    fn resolve(&self, ctx: &mut ResolveContext) -> Result<CfnValue> {
        let consumer = Stack::of(ctx.scope())?;
        if Rc::ptr_eq(&consumer.inner, &self.producer) {
            return Ok(self.intrinsic());
        }
        if !consumer.inner.same_environment(&self.producer) {
            return Err(Error::CrossEnvironmentReference {
                resource: self.target.path.clone(),
                consumer: consumer.inner.path.clone(),
                producer: self.producer.path.clone(),
            });
        }
        let export_name = self.export_name();
        if ctx.preparing() {
            self.producer.outputs.borrow_mut().insert(
                self.output_logical_id(),
                CfnValue::object([
                    ("Value", self.intrinsic()),
                    (
                        "Export",
                        CfnValue::object([("Name", CfnValue::from(export_name.as_str()))]),
                    ),
                ]),
            );
            consumer.inner.add_dependency(&self.producer)?;
        }
        Ok(CfnValue::object([(
            "Fn::ImportValue",
            CfnValue::from(export_name.as_str()),
        )]))
    }

    fn type_hint(&self) -> TypeHint {
        TypeHint::String
    }

    fn display_hint(&self) -> Option<&str> {
        Some(&self.target.logical_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::TokenRegistry;

    fn root() -> Node {
        Node::root(TokenRegistry::new())
    }

    fn env(account: &str, region: &str) -> Environment {
        Environment {
            account: Some(account.to_owned()),
            region: Some(region.to_owned()),
        }
    }

    #[test]
    fn default_stack_name_comes_from_the_path() {
        let stack = Stack::new(&root(), "Prod", StackProps::default()).unwrap();
        assert_eq!("Prod", stack.stack_name());
    }

    #[test]
    fn explicit_stack_names_are_validated() {
        let root = root();
        assert!(Stack::new(
            &root,
            "A",
            StackProps {
                stack_name: Some("my-stack-1".to_owned()),
                ..Default::default()
            }
        )
        .is_ok());
        let too_long = "x".repeat(129);
        for (i, bad) in ["1leading-digit", "has_underscore", "", too_long.as_str()]
            .into_iter()
            .enumerate()
        {
            let result = Stack::new(
                &root.new_child(&format!("S{i}")).unwrap(),
                "S",
                StackProps {
                    stack_name: Some(bad.to_owned()),
                    ..Default::default()
                },
            );
            assert!(
                matches!(result, Err(Error::InvalidStackName { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn environment_renders_placeholders() {
        let root = root();
        let agnostic = Stack::new(&root, "A", StackProps::default()).unwrap();
        assert_eq!("aws://unknown-account/unknown-region", agnostic.environment());
        let pinned = Stack::new(
            &root,
            "B",
            StackProps {
                env: env("111111111111", "us-east-1"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!("aws://111111111111/us-east-1", pinned.environment());
    }

    #[test]
    fn logical_ids_are_relative_to_the_stack() {
        let stack = Stack::new(&root(), "Prod", StackProps::default()).unwrap();
        let bucket = CfnResource::new(
            stack.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        // A single clean component keeps its id without a hash.
        assert_eq!("Bucket", bucket.logical_id());

        let nested = stack.node().new_child("Storage").unwrap();
        let deep = CfnResource::new(
            &nested,
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        assert!(deep.logical_id().starts_with("StorageBucket"));
    }

    #[test]
    fn resources_are_debuggable() {
        let stack = Stack::new(&root(), "Prod", StackProps::default()).unwrap();
        let bucket = CfnResource::new(
            stack.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        let rendered = format!("{bucket:?}");
        assert!(rendered.contains("Bucket"), "{rendered}");
        assert!(rendered.contains("AWS::S3::Bucket"), "{rendered}");

        // Result combinators need the Ok type to be Debug.
        let err = CfnResource::new(
            stack.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateConstructId { .. }), "{err}");
    }

    #[test]
    fn same_stack_references_are_intrinsics() {
        let stack = Stack::new(&root(), "Prod", StackProps::default()).unwrap();
        let bucket = CfnResource::new(
            stack.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        CfnResource::new(
            stack.node(),
            "Topic",
            "AWS::SNS::Topic",
            CfnValue::object([("TopicName", CfnValue::String(bucket.ref_token()))]),
        )
        .unwrap();
        let template = stack.to_template().unwrap();
        assert_eq!(
            serde_json::json!({ "Ref": "Bucket" }),
            template["Resources"]["Topic"]["Properties"]["TopicName"]
        );
    }

    #[test]
    fn cross_stack_references_become_exports_and_imports() {
        let root = root();
        let producing = Stack::new(
            &root,
            "Producer",
            StackProps {
                env: env("111111111111", "us-east-1"),
                ..Default::default()
            },
        )
        .unwrap();
        let consuming = Stack::new(
            &root,
            "Consumer",
            StackProps {
                env: env("111111111111", "us-east-1"),
                ..Default::default()
            },
        )
        .unwrap();
        let bucket = CfnResource::new(
            producing.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        CfnResource::new(
            consuming.node(),
            "Reader",
            "AWS::IAM::Role",
            CfnValue::object([("BucketArn", CfnValue::String(bucket.get_att("Arn")))]),
        )
        .unwrap();

        let consumer_template = consuming.to_template().unwrap();
        assert_eq!(
            serde_json::json!({ "Fn::ImportValue": "Producer:Bucket:Arn" }),
            consumer_template["Resources"]["Reader"]["Properties"]["BucketArn"]
        );

        let producer_template = producing.to_template().unwrap();
        assert_eq!(
            serde_json::json!({
                "Value": { "Fn::GetAtt": ["Bucket", "Arn"] },
                "Export": { "Name": "Producer:Bucket:Arn" },
            }),
            producer_template["Outputs"]["ExportsOutputBucketArn"]
        );
        assert_eq!(vec!["Producer".to_owned()], consuming.dependency_paths());
    }

    #[test]
    fn cross_environment_references_are_rejected() {
        let root = root();
        let producing = Stack::new(
            &root,
            "Producer",
            StackProps {
                env: env("111111111111", "us-east-1"),
                ..Default::default()
            },
        )
        .unwrap();
        let consuming = Stack::new(
            &root,
            "Consumer",
            StackProps {
                env: env("222222222222", "eu-west-1"),
                ..Default::default()
            },
        )
        .unwrap();
        let bucket = CfnResource::new(
            producing.node(),
            "Bucket",
            "AWS::S3::Bucket",
            CfnValue::object::<&str, _>([]),
        )
        .unwrap();
        CfnResource::new(
            consuming.node(),
            "Reader",
            "AWS::IAM::Role",
            CfnValue::object([("Bucket", CfnValue::String(bucket.ref_token()))]),
        )
        .unwrap();
        let err = consuming.to_template().unwrap_err();
        assert!(
            matches!(&err, Error::Resolution { message, .. }
                if message.contains("cross-stack references are only supported within the same environment")),
            "{err}"
        );
    }

    #[test]
    fn dependency_cycles_are_rejected_up_front() {
        let root = root();
        let a = Stack::new(&root, "A", StackProps::default()).unwrap();
        let b = Stack::new(&root, "B", StackProps::default()).unwrap();
        let c = Stack::new(&root, "C", StackProps::default()).unwrap();
        a.add_dependency(&b).unwrap();
        b.add_dependency(&c).unwrap();
        // Re-adding is fine.
        a.add_dependency(&b).unwrap();
        assert!(matches!(
            c.add_dependency(&a),
            Err(Error::DependencyCycle { .. })
        ));
        assert!(matches!(
            a.add_dependency(&a),
            Err(Error::DependencyCycle { .. })
        ));
    }

    #[test]
    fn arns_are_formatted_per_arn_format() {
        let stack = Stack::new(
            &root(),
            "S",
            StackProps {
                env: env("111111111111", "us-east-1"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            "arn:aws:iam::111111111111:role/my-role",
            stack.format_arn(&ArnComponents {
                service: "iam".to_owned(),
                region: Some(String::new()),
                resource: "role".to_owned(),
                resource_name: Some("my-role".to_owned()),
                format: ArnFormat::SlashResourceName,
                ..Default::default()
            })
        );
        assert_eq!(
            "arn:aws:lambda:us-east-1:111111111111:function:fn",
            stack.format_arn(&ArnComponents {
                service: "lambda".to_owned(),
                resource: "function".to_owned(),
                resource_name: Some("fn".to_owned()),
                format: ArnFormat::ColonResourceName,
                ..Default::default()
            })
        );
        assert_eq!(
            "arn:aws:s3:::my-bucket",
            stack.format_arn(&ArnComponents {
                service: "s3".to_owned(),
                region: Some(String::new()),
                account: Some(String::new()),
                resource: "my-bucket".to_owned(),
                format: ArnFormat::NoResourceName,
                ..Default::default()
            })
        );
    }
}
