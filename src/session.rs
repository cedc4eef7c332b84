//! The directory session capability.
//!
//! Everything above the transport talks to the directory through the
//! [`Session`] trait: collections are built from its search cursors and
//! nodes commit their changes through it. [`Ldap`](crate::ldap::Ldap) is the
//! implementation backed by a live connection.
use std::{collections::BTreeMap, fmt, sync::Arc};

use ldap3::Scope;
use serde::Serialize;

use crate::{
	collection::Collection,
	cursor::{Cursor, DefaultCursor},
	dn::{CaseFold, Dn},
	entry::Entry,
	error::{Error, NO_SUCH_OBJECT},
	filter::Filter,
};

/// Attribute names mapped to their values.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// A shared handle to a session. Nodes hold one of these without owning the
/// connection behind it.
pub type SessionRef = Arc<dyn Session>;

/// Modifications to apply to a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
	/// Values to add to attributes that did not exist before
	pub add: Attributes,
	/// Attributes to remove. An empty value list removes the whole attribute.
	pub delete: Attributes,
	/// Attributes whose values are replaced entirely
	pub replace: Attributes,
}

impl ChangeSet {
	/// Whether there is nothing to change.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.add.is_empty() && self.delete.is_empty() && self.replace.is_empty()
	}

	/// Drop every change to `attribute`.
	pub fn remove(&mut self, attribute: &str) {
		self.add.remove(attribute);
		self.delete.remove(attribute);
		self.replace.remove(attribute);
	}
}

/// A connection to a directory, as far as this library needs one.
///
/// All operations block until the server answered. Failures reported by the
/// server surface as [`Error::Operation`] carrying the LDAP result code.
pub trait Session: fmt::Debug + Send + Sync {
	/// The DN below which this session operates.
	fn base_dn(&self) -> &Dn;

	/// The case folding applied to DNs created by this session.
	fn case_fold(&self) -> CaseFold {
		self.base_dn().case_fold()
	}

	/// Search below `base`, optionally sorting by the first value of `sort`.
	/// An empty attribute list requests all user attributes.
	fn search(
		&self,
		filter: &Filter,
		base: &Dn,
		scope: Scope,
		attributes: &[&str],
		sort: Option<&str>,
	) -> Result<DefaultCursor, Error>;

	/// Create an entry.
	fn add(&self, dn: &Dn, attributes: &Attributes) -> Result<(), Error>;

	/// Apply modifications to an entry.
	fn update(&self, dn: &Dn, changes: &ChangeSet) -> Result<(), Error>;

	/// Delete an entry, with `recursive` all of its descendants first.
	fn delete(&self, dn: &Dn, recursive: bool) -> Result<(), Error>;

	/// Move an entry. With `emulate` set, a server refusing the operation is
	/// worked around by copying the entry (and with `recursive` its subtree)
	/// and deleting the original.
	fn rename(&self, from: &Dn, to: &Dn, recursive: bool, emulate: bool) -> Result<(), Error>;

	/// Fetch a single entry. A missing entry is `Ok(None)` unless
	/// `throw_on_missing` is set.
	fn get_entry(
		&self,
		dn: &Dn,
		attributes: &[&str],
		throw_on_missing: bool,
	) -> Result<Option<Entry>, Error> {
		let found = self
			.search(&Filter::any("objectClass"), dn, Scope::Base, attributes, None)
			.and_then(|cursor| {
				let mut collection = Collection::plain(cursor);
				let first = collection.get_first()?.cloned();
				Ok(first)
			});
		match found {
			Ok(Some(entry)) => Ok(Some(entry)),
			Ok(None) if throw_on_missing => Err(Error::Operation {
				code: NO_SUCH_OBJECT,
				text: format!("{dn} does not exist"),
				context: "getting entry".to_owned(),
			}),
			Err(err) if err.is_not_found() && !throw_on_missing => Ok(None),
			other => other,
		}
	}

	/// Whether an entry exists.
	fn exists(&self, dn: &Dn) -> Result<bool, Error> {
		match self.count(&Filter::any("objectClass"), dn, Scope::Base) {
			Ok(count) => Ok(count > 0),
			Err(err) if err.is_not_found() => Ok(false),
			Err(err) => Err(err),
		}
	}

	/// Number of entries matching a search.
	fn count(&self, filter: &Filter, base: &Dn, scope: Scope) -> Result<usize, Error> {
		Ok(self.search(filter, base, scope, &["1.1"], None)?.count())
	}

	/// Search and wrap the result in a collection of plain entries.
	fn search_entries(
		&self,
		filter: &Filter,
		base: &Dn,
		scope: Scope,
		attributes: &[&str],
		sort: Option<&str>,
	) -> Result<Collection, Error> {
		Ok(Collection::plain(self.search(filter, base, scope, attributes, sort)?))
	}
}
