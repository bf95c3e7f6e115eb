//! # Stackform
//!
//! Stackform is a library for describing cloud infrastructure as a tree of
//! typed constructs and synthesizing that tree into CloudFormation
//! templates. It provides the machinery that makes forward references
//! possible: values that are not known while the tree is being built (a
//! resource's deploy-time name, an ARN of a resource declared two stacks
//! over) are represented as *tokens* — reversible placeholder strings that
//! are substituted with their final values in a single resolution pass at
//! synthesis time.
//!
//! ## Key Features
//!
//! - **Construct tree**: a hierarchy of named nodes (app → stacks →
//!   resources) with stable paths and collision-resistant logical
//!   identifiers derived from those paths.
//! - **Tokens and lazy values**: embed a placeholder for a not-yet-known
//!   value inside any string, list, or map, and have it resolved right
//!   before the template is written. Producers run at resolution time, so
//!   they observe every mutation made while the tree was assembled.
//! - **Cross-stack references**: referencing a resource from a sibling
//!   stack in the same environment wires up CloudFormation exports and
//!   imports and records the stack dependency; referencing it from a
//!   different account or region resolves to a deterministic, generated
//!   physical name instead.
//!
//! ## Concepts
//!
//! Stackform operates on two views of every value:
//!
//! - **Unresolved**: the value as written in Rust code. It may contain
//!   token markers standing in for values that only exist at synthesis
//!   time.
//! - **Resolved**: the value as it appears in the emitted template, after
//!   the resolver has substituted every marker.
//!
//! Synthesis walks each stack's document twice: a *preparing* pass that
//! lets cross-stack references register exports and dependencies, and a
//! final pass that produces the template files and the assembly manifest.
//!
//! An example usage can be found in `crates/stackform/src/test.rs`,
//! demonstrating how to define stacks and resources using the library's
//! primitives.
//!
//! ## Error Handling
//!
//! Stackform exposes a comprehensive error enum [`Error`], which
//! encompasses all possible errors that may occur during construction and
//! synthesis. Functions that can result in errors return a `Result` type
//! with this [`Error`], ensuring robust error handling throughout the
//! library.

pub mod app;
pub mod construct;
pub mod lazy;
pub mod names;
pub mod resolve;
pub mod resource;
pub mod stack;
pub mod token;
pub mod utils;
pub mod value;

pub use app::{App, CloudAssembly};
pub use construct::Node;
pub use lazy::{Lazy, LazyOptions};
pub use names::{make_unique_resource_name, unique_id, unique_resource_name, UniqueResourceNameOptions};
pub use resolve::{FragmentJoin, PostProcess, ResolveContext, StringConcat};
pub use resource::{PhysicalName, Resource, ResourceProps};
pub use stack::{ArnComponents, ArnFormat, CfnResource, Environment, Stack, StackProps};
pub use token::{is_unresolved, Resolvable, TokenRegistry, TypeHint};
pub use value::CfnValue;

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
pub enum Error {
    #[snafu(display("{source}:\n{}",
                source.chain()
                    .map(|e| format!("{e}"))
                    .collect::<Vec<_>>()
                    .join("\n -> ")))]
    Other { source: anyhow::Error },

    #[snafu(display(
        "'{id}' is not a valid construct id - ids must be non-empty and must not contain '/'"
    ))]
    InvalidConstructId { id: String },

    #[snafu(display("There is already a construct with id '{id}' in '{path}'"))]
    DuplicateConstructId { id: String, path: String },

    #[snafu(display("Construct '{path}' does not belong to a stack"))]
    MissingStack { path: String },

    #[snafu(display(
        "Stack name '{name}' must match ^[A-Za-z][A-Za-z0-9-]*$ and be no longer than 128 characters"
    ))]
    InvalidStackName { name: String },

    #[snafu(display("Unable to calculate a unique id for an empty set of components"))]
    EmptyIdComponents,

    #[snafu(display("Unable to generate a name: max length {max_length} cannot fit the hash suffix"))]
    NameLengthBudget { max_length: usize },

    #[snafu(display("Unable to generate a name from '{components}': nothing printable remains"))]
    UnprintableName { components: String },

    #[snafu(display(
        "Cannot generate a physical name for '{path}', because the {coordinate} is un-resolved or missing"
    ))]
    UnresolvedEnvironment {
        path: String,
        coordinate: &'static str,
    },

    #[snafu(display(
        "Cannot use resource '{path}' in a cross-environment fashion, the resource's physical \
        name must be explicitly set or use `PhysicalName::GenerateIfNeeded`"
    ))]
    CrossEnvironmentName { path: String },

    #[snafu(display(
        "Stack '{consumer}' cannot reference '{resource}' in stack '{producer}': cross-stack \
        references are only supported within the same environment, use the resource's physical \
        name or ARN attribute instead"
    ))]
    CrossEnvironmentReference {
        resource: String,
        consumer: String,
        producer: String,
    },

    #[snafu(display("Cannot add elements to list token, got: {got}"))]
    ListTokenElements { got: String },

    #[snafu(display("Cannot concatenate strings in a tokenized string array, got: {got}"))]
    ListTokenConcat { got: String },

    #[snafu(display("A list token must resolve to a list, got: {got}"))]
    InvalidListToken { got: String },

    #[snafu(display("Map keys must be resolved before synthesis, got token in key: '{key}'"))]
    TokenKey { key: String },

    #[snafu(display("Cannot concatenate a {kind} into a string"))]
    UnsupportedConcat { kind: &'static str },

    #[snafu(display(
        "Unable to resolve value: recursion depth exceeded (a token may resolve to itself)"
    ))]
    RecursionLimit,

    #[snafu(display("Resolution error: {message}{}",
            site.as_deref()
                .map(|s| format!("\nvalue created at {s}"))
                .unwrap_or_default()))]
    Resolution {
        message: String,
        site: Option<String>,
    },

    #[snafu(display("Adding a dependency from '{from}' to '{to}' would create a cycle"))]
    DependencyCycle { from: String, to: String },

    #[snafu(display("Could not build schedule: {msg}"))]
    Schedule { msg: String },

    #[snafu(display("Could not serialize '{name}': {source}"))]
    Serialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not deserialize '{name}': {source}"))]
    Deserialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not create file {path:?}: {source}"))]
    CreateFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not write file {path:?}: {source}"))]
    WriteFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not read file {path:?}: {source}"))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not find an artifact by the id '{id}'"))]
    MissingArtifact { id: String },
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Error::Other { source }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
