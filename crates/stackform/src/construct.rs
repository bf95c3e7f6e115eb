//! The construct tree.
//!
//! Constructs form a tree of named nodes rooted at the app. A node's
//! *path* (the ids from the root down, joined with `/`) is the stable
//! address everything else keys off of: logical ids, generated names and
//! error messages all derive from it.
//!
//! The tree is an arena held behind a shared handle. [`Node`] is a cheap
//! clonable index into that arena, so scopes can be passed around freely
//! without reference cycles between parents and children.

use std::{any::Any, cell::RefCell, rc::Rc};

use crate::{token::TokenRegistry, Error, Result};

struct NodeData {
    id: String,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Domain object living at this node, downcast by its owner.
    attachment: Option<Rc<dyn Any>>,
}

struct Tree {
    nodes: Vec<NodeData>,
    tokens: TokenRegistry,
}

/// A handle to one node of the construct tree.
#[derive(Clone)]
pub struct Node {
    tree: Rc<RefCell<Tree>>,
    index: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.index == other.index
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("path", &self.path_str()).finish()
    }
}

impl Node {
    /// Create the root of a new tree. The root has the empty id and does
    /// not participate in paths.
    pub fn root(tokens: TokenRegistry) -> Node {
        Node {
            tree: Rc::new(RefCell::new(Tree {
                nodes: vec![NodeData {
                    id: String::new(),
                    parent: None,
                    children: vec![],
                    attachment: None,
                }],
                tokens,
            })),
            index: 0,
        }
    }

    /// Add a child construct under this node.
    ///
    /// Ids must be non-empty, must not contain `/`, and must be unique
    /// among this node's children.
    pub fn new_child(&self, id: &str) -> Result<Node> {
        if id.is_empty() || id.contains('/') {
            return Err(Error::InvalidConstructId { id: id.to_owned() });
        }
        let mut tree = self.tree.borrow_mut();
        let taken = tree.nodes[self.index]
            .children
            .iter()
            .any(|&child| tree.nodes[child].id == id);
        if taken {
            return Err(Error::DuplicateConstructId {
                id: id.to_owned(),
                path: path_str_of(&tree, self.index),
            });
        }
        let index = tree.nodes.len();
        tree.nodes.push(NodeData {
            id: id.to_owned(),
            parent: Some(self.index),
            children: vec![],
            attachment: None,
        });
        tree.nodes[self.index].children.push(index);
        log::trace!("added construct '{}'", path_str_of(&tree, index));
        Ok(Node {
            tree: self.tree.clone(),
            index,
        })
    }

    pub fn id(&self) -> String {
        self.tree.borrow().nodes[self.index].id.clone()
    }

    /// The ids from the root down to this node, excluding the root.
    pub fn path(&self) -> Vec<String> {
        path_of(&self.tree.borrow(), self.index)
    }

    /// The path joined with `/`.
    pub fn path_str(&self) -> String {
        path_str_of(&self.tree.borrow(), self.index)
    }

    /// The parent node, if this is not the root.
    pub fn scope(&self) -> Option<Node> {
        self.tree.borrow().nodes[self.index].parent.map(|index| Node {
            tree: self.tree.clone(),
            index,
        })
    }

    /// All nodes from the root down to and including this one.
    pub fn scopes(&self) -> Vec<Node> {
        let tree = self.tree.borrow();
        let mut indices = vec![self.index];
        let mut cursor = self.index;
        while let Some(parent) = tree.nodes[cursor].parent {
            indices.push(parent);
            cursor = parent;
        }
        indices
            .into_iter()
            .rev()
            .map(|index| Node {
                tree: self.tree.clone(),
                index,
            })
            .collect()
    }

    pub fn children(&self) -> Vec<Node> {
        self.tree.borrow().nodes[self.index]
            .children
            .iter()
            .map(|&index| Node {
                tree: self.tree.clone(),
                index,
            })
            .collect()
    }

    /// This node and every node beneath it, in preorder.
    pub fn find_all(&self) -> Vec<Node> {
        let tree = self.tree.borrow();
        let mut found = vec![];
        let mut pending = vec![self.index];
        while let Some(index) = pending.pop() {
            found.push(Node {
                tree: self.tree.clone(),
                index,
            });
            // Reversed so children come off the stack in insertion order.
            pending.extend(tree.nodes[index].children.iter().rev());
        }
        found
    }

    /// Attach the domain object that lives at this node.
    pub fn attach(&self, attachment: Rc<dyn Any>) {
        self.tree.borrow_mut().nodes[self.index].attachment = Some(attachment);
    }

    pub fn attachment(&self) -> Option<Rc<dyn Any>> {
        self.tree.borrow().nodes[self.index].attachment.clone()
    }

    /// The token arena shared by every node of this tree.
    pub fn tokens(&self) -> TokenRegistry {
        self.tree.borrow().tokens.clone()
    }
}

fn path_of(tree: &Tree, index: usize) -> Vec<String> {
    let mut ids = vec![];
    let mut cursor = index;
    while let Some(parent) = tree.nodes[cursor].parent {
        ids.push(tree.nodes[cursor].id.clone());
        cursor = parent;
    }
    ids.reverse();
    ids
}

fn path_str_of(tree: &Tree, index: usize) -> String {
    path_of(tree, index).join("/")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paths_exclude_the_root() {
        let root = Node::root(TokenRegistry::new());
        let stack = root.new_child("Stack").unwrap();
        let bucket = stack.new_child("Bucket").unwrap();
        assert_eq!("", root.path_str());
        assert_eq!("Stack/Bucket", bucket.path_str());
        assert_eq!(vec!["Stack".to_owned(), "Bucket".to_owned()], bucket.path());
    }

    #[test]
    fn ids_are_validated() {
        let root = Node::root(TokenRegistry::new());
        assert!(matches!(
            root.new_child(""),
            Err(Error::InvalidConstructId { .. })
        ));
        assert!(matches!(
            root.new_child("a/b"),
            Err(Error::InvalidConstructId { .. })
        ));
    }

    #[test]
    fn sibling_ids_must_be_unique() {
        let root = Node::root(TokenRegistry::new());
        root.new_child("Stack").unwrap();
        assert!(matches!(
            root.new_child("Stack"),
            Err(Error::DuplicateConstructId { .. })
        ));
        // The same id under a different parent is fine.
        let other = root.new_child("Other").unwrap();
        other.new_child("Stack").unwrap();
    }

    #[test]
    fn scopes_run_root_to_self() {
        let root = Node::root(TokenRegistry::new());
        let stack = root.new_child("Stack").unwrap();
        let bucket = stack.new_child("Bucket").unwrap();
        let scopes = bucket.scopes();
        assert_eq!(3, scopes.len());
        assert_eq!(root, scopes[0]);
        assert_eq!(bucket, scopes[2]);
    }

    #[test]
    fn find_all_is_preorder() {
        let root = Node::root(TokenRegistry::new());
        let a = root.new_child("A").unwrap();
        a.new_child("A1").unwrap();
        root.new_child("B").unwrap();
        let paths: Vec<String> = root.find_all().iter().map(Node::path_str).collect();
        assert_eq!(vec!["", "A", "A/A1", "B"], paths);
    }
}
