//! Recursive traversal of directory trees.
use std::collections::BTreeMap;

use crate::error::Error;

/// Something with lazily loaded children, keyed by RDN.
pub trait ChildrenProvider: Sized {
	/// The children, loading them on first access.
	fn children_mut(&mut self) -> Result<&mut BTreeMap<String, Self>, Error>;
}

/// Visit `root` and everything below it, parents before their children and
/// siblings in key order. `visit` receives each node with its depth, `0`
/// for the root. The first error stops the walk.
pub fn walk<N, F>(root: &mut N, mut visit: F) -> Result<(), Error>
where
	N: ChildrenProvider,
	F: FnMut(&N, usize) -> Result<(), Error>,
{
	walk_at(root, 0, &mut visit)
}

/// Visit `node` at `depth`, then its subtree.
fn walk_at<N, F>(node: &mut N, depth: usize, visit: &mut F) -> Result<(), Error>
where
	N: ChildrenProvider,
	F: FnMut(&N, usize) -> Result<(), Error>,
{
	visit(node, depth)?;
	for child in node.children_mut()?.values_mut() {
		walk_at(child, depth + 1, visit)?;
	}
	Ok(())
}
