//! Editable directory entries.
//!
//! A [`Node`] holds the attributes of one entry together with a snapshot of
//! what was loaded from the directory. Edits are tracked against that
//! snapshot and written back with [`Node::update`], which issues the add,
//! delete, rename and modify operations the pending state calls for.
//!
//! Nodes can be used offline. Online operations need a [`SessionRef`],
//! either attached with [`Node::attach`] or handed to the operation itself.
use std::{collections::BTreeMap, iter};

use ldap3::Scope;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
	collection::{Collection, EntryFactory},
	converter,
	cursor::DefaultCursor,
	dn::{CaseFold, Dn},
	entry::Entry,
	error::Error,
	filter::Filter,
	session::{Attributes, ChangeSet, SessionRef},
	tree::ChildrenProvider,
};

/// Attributes maintained by the server. They are never written by a node.
pub const SYSTEM_ATTRIBUTES: &[&str] = &[
	"createtimestamp",
	"creatorsname",
	"entrycsn",
	"entrydn",
	"entryuuid",
	"hassubordinates",
	"modifiersname",
	"modifytimestamp",
	"structuralobjectclass",
	"subschemasubentry",
	"distinguishedname",
	"instancetype",
	"name",
	"objectcategory",
	"objectguid",
	"usnchanged",
	"usncreated",
	"whenchanged",
	"whencreated",
];

/// Attributes requested when loading nodes: all user and operational ones.
const ALL_ATTRIBUTES: &[&str] = &["*", "+"];

/// A collection yielding nodes attached to the session that searched them.
pub type NodeCollection = Collection<DefaultCursor, NodeEntries>;

/// One directory entry under edit.
///
/// Attribute names are case-insensitive and stored lowercased. The values of
/// the entry's RDN are always present in its attributes.
#[derive(Debug, Clone)]
pub struct Node {
	/// The DN the entry currently has in the directory
	dn: Dn,
	/// The DN the entry will be moved to on the next update
	new_dn: Option<Dn>,
	/// Attributes as edited
	current: Attributes,
	/// Attributes as loaded, empty for new entries
	original: Attributes,
	/// Whether the entry does not exist in the directory yet
	new: bool,
	/// Whether the entry is deleted on the next update
	delete: bool,
	/// The session online operations go through
	session: Option<SessionRef>,
	/// Loaded children, keyed by RDN with lowercased attribute types
	children: Option<BTreeMap<String, Node>>,
}

impl Node {
	/// A new entry with the given object classes. The RDN values are added
	/// to the attributes.
	pub fn create<S: AsRef<str>>(dn: Dn, object_classes: &[S]) -> Result<Self, Error> {
		let mut node = Node::from_attributes(dn, Attributes::new(), false);
		node.set_object_class(object_classes)?;
		Ok(node)
	}

	/// Build a node from attribute data. With `from_data_source` the data
	/// is taken to be what the directory holds, otherwise the node is new.
	///
	/// A `dn` key in `data` is ignored.
	#[must_use]
	pub fn from_attributes(dn: Dn, data: Attributes, from_data_source: bool) -> Self {
		let mut node = Node {
			dn,
			new_dn: None,
			current: Attributes::new(),
			original: Attributes::new(),
			new: true,
			delete: false,
			session: None,
			children: None,
		};
		node.load_data(normalize(data), from_data_source);
		node.ensure_rdn_attribute_values(false);
		node
	}

	/// Build a node from a plain entry.
	pub fn from_entry(entry: Entry, from_data_source: bool) -> Result<Self, Error> {
		let dn = Dn::parse(&entry.dn)?;
		Ok(Node::from_attributes(dn, entry.attrs, from_data_source))
	}

	/// Load an entry from the directory and attach the node to `session`.
	/// A missing entry is an error.
	pub fn from_ldap(dn: &Dn, session: &SessionRef) -> Result<Self, Error> {
		debug!(dn = %dn, "Loading node");
		let entry = session.get_entry(dn, ALL_ATTRIBUTES, true)?.ok_or(Error::Missing)?;
		let mut node = Node::from_entry(entry, true)?;
		node.dn.set_case_fold(session.case_fold());
		node.attach(session.clone())?;
		Ok(node)
	}

	/// Replace all data and reset the state flags.
	fn load_data(&mut self, data: Attributes, from_data_source: bool) {
		self.original = if from_data_source { data.clone() } else { Attributes::new() };
		self.current = data;
		self.children = None;
		self.new = !from_data_source;
		self.delete = false;
	}

	/// Make sure every value of the RDN is present in the attributes. With
	/// `overwrite` the RDN values replace whatever the attributes held.
	fn ensure_rdn_attribute_values(&mut self, overwrite: bool) {
		let Some(rdn) = self.dn().rdn().cloned() else {
			return;
		};
		for (attribute, value) in rdn.iter() {
			let attribute = attribute.to_lowercase();
			match self.current.get_mut(&attribute) {
				Some(values) if !overwrite => {
					if !values.iter().any(|existing| existing == value) {
						values.push(value.to_owned());
					}
				}
				_ => {
					self.current.insert(attribute, vec![value.to_owned()]);
				}
			}
		}
	}

	/// Fail if `name` must not be changed through the attribute methods:
	/// the `dn` pseudo attribute, attributes of the RDN and system
	/// attributes.
	pub fn assert_changeable(&self, name: &str) -> Result<(), Error> {
		let name = name.to_lowercase();
		if name == "dn" {
			return Err(Error::Precondition("the DN cannot be changed as an attribute".to_owned()));
		}
		if self
			.dn()
			.rdn()
			.is_some_and(|rdn| rdn.attributes().any(|attribute| attribute.eq_ignore_ascii_case(&name)))
		{
			return Err(Error::Precondition(format!(
				"cannot change attribute '{name}' because it is part of the RDN"
			)));
		}
		if SYSTEM_ATTRIBUTES.contains(&name.as_str()) {
			return Err(Error::Precondition(format!(
				"cannot change attribute '{name}' because it is read-only"
			)));
		}
		Ok(())
	}

	/// The values of an attribute, empty if it does not exist.
	#[must_use]
	pub fn attribute(&self, name: &str) -> &[String] {
		self.current.get(&name.to_lowercase()).map_or(&[][..], Vec::as_slice)
	}

	/// A single value of an attribute.
	#[must_use]
	pub fn attribute_at(&self, name: &str, index: usize) -> Option<&str> {
		self.attribute(name).get(index).map(String::as_str)
	}

	/// Whether an attribute exists. An attribute without values only counts
	/// with `empty_exists`.
	#[must_use]
	pub fn exists_attribute(&self, name: &str, empty_exists: bool) -> bool {
		self.current
			.get(&name.to_lowercase())
			.is_some_and(|values| empty_exists || !values.is_empty())
	}

	/// Whether an attribute holds all of `values`.
	#[must_use]
	pub fn attribute_has_value<S: AsRef<str>>(&self, name: &str, values: &[S]) -> bool {
		let existing = self.attribute(name);
		values.iter().all(|value| existing.iter().any(|candidate| candidate == value.as_ref()))
	}

	/// Replace the values of an attribute.
	pub fn set_attribute<S: AsRef<str>>(&mut self, name: &str, values: &[S]) -> Result<(), Error> {
		self.assert_changeable(name)?;
		self.current.insert(name.to_lowercase(), owned(values));
		Ok(())
	}

	/// Add values to an attribute, creating it if needed.
	pub fn append_to_attribute<S: AsRef<str>>(
		&mut self,
		name: &str,
		values: &[S],
	) -> Result<(), Error> {
		self.assert_changeable(name)?;
		self.current.entry(name.to_lowercase()).or_default().extend(owned(values));
		Ok(())
	}

	/// Remove all values of an attribute. The attribute is kept without
	/// values so the removal is written on the next update.
	pub fn delete_attribute(&mut self, name: &str) -> Result<(), Error> {
		self.assert_changeable(name)?;
		if let Some(values) = self.current.get_mut(&name.to_lowercase()) {
			values.clear();
		}
		Ok(())
	}

	/// Remove every occurrence of `values` from an attribute.
	pub fn remove_from_attribute<S: AsRef<str>>(
		&mut self,
		name: &str,
		values: &[S],
	) -> Result<(), Error> {
		self.assert_changeable(name)?;
		if let Some(existing) = self.current.get_mut(&name.to_lowercase()) {
			existing.retain(|value| !values.iter().any(|removed| removed.as_ref() == value));
		}
		Ok(())
	}

	/// Drop repeated values of an attribute, keeping the first occurrence.
	pub fn remove_duplicates_from_attribute(&mut self, name: &str) {
		if let Some(values) = self.current.get_mut(&name.to_lowercase()) {
			let mut seen = Vec::with_capacity(values.len());
			values.retain(|value| {
				if seen.contains(value) {
					false
				} else {
					seen.push(value.clone());
					true
				}
			});
		}
	}

	/// Replace the values of an attribute with booleans.
	pub fn set_bool_attribute(&mut self, name: &str, values: &[bool]) -> Result<(), Error> {
		let values: Vec<&str> = values.iter().map(|value| converter::to_ldap_bool(*value)).collect();
		self.set_attribute(name, &values)
	}

	/// A single value of an attribute, interpreted as a boolean.
	#[must_use]
	pub fn bool_attribute_at(&self, name: &str, index: usize) -> Option<Result<bool, Error>> {
		self.attribute_at(name, index).map(converter::from_ldap_bool)
	}

	/// Replace the values of an attribute with timestamps, written in UTC if
	/// `utc` is set and in their own offset otherwise.
	pub fn set_datetime_attribute(
		&mut self,
		name: &str,
		values: &[OffsetDateTime],
		utc: bool,
	) -> Result<(), Error> {
		let values = datetimes(values, utc)?;
		self.set_attribute(name, &values)
	}

	/// Add timestamps to an attribute.
	pub fn append_to_datetime_attribute(
		&mut self,
		name: &str,
		values: &[OffsetDateTime],
		utc: bool,
	) -> Result<(), Error> {
		let values = datetimes(values, utc)?;
		self.append_to_attribute(name, &values)
	}

	/// A single value of an attribute, interpreted as generalized time.
	#[must_use]
	pub fn datetime_attribute_at(
		&self,
		name: &str,
		index: usize,
	) -> Option<Result<OffsetDateTime, Error>> {
		self.attribute_at(name, index).map(converter::from_ldap_datetime)
	}

	/// The object classes of the entry.
	#[must_use]
	pub fn object_class(&self) -> &[String] {
		self.attribute("objectclass")
	}

	/// Replace the object classes.
	pub fn set_object_class<S: AsRef<str>>(&mut self, object_classes: &[S]) -> Result<(), Error> {
		self.set_attribute("objectclass", object_classes)
	}

	/// Add object classes.
	pub fn append_object_class<S: AsRef<str>>(
		&mut self,
		object_classes: &[S],
	) -> Result<(), Error> {
		self.append_to_attribute("objectclass", object_classes)
	}

	/// All attributes, optionally without the system attributes.
	#[must_use]
	pub fn data(&self, include_system: bool) -> Attributes {
		self.current
			.iter()
			.filter(|(name, _)| include_system || !SYSTEM_ATTRIBUTES.contains(&name.as_str()))
			.map(|(name, values)| (name.clone(), values.clone()))
			.collect()
	}

	/// The entry as a plain [`Entry`] under its effective DN.
	#[must_use]
	pub fn to_entry(&self) -> Entry {
		Entry { dn: self.dn().to_string(), attrs: self.current.clone(), ..Entry::default() }
	}

	/// The entry as a JSON object: `dn` first, then the attributes sorted by
	/// name.
	pub fn to_json(&self, include_system: bool) -> Result<String, Error> {
		/// Serialized form of a node
		#[derive(Serialize)]
		struct JsonNode {
			/// Effective DN
			dn: String,
			/// Attribute data
			#[serde(flatten)]
			attributes: Attributes,
		}
		Ok(serde_json::to_string(&JsonNode {
			dn: self.dn().to_string(),
			attributes: self.data(include_system),
		})?)
	}

	/// Attributes that differ from the loaded snapshot. New attributes only
	/// count if they have values.
	#[must_use]
	pub fn changed_data(&self) -> Attributes {
		self.current
			.iter()
			.filter(|(name, values)| match self.original.get(*name) {
				None => !values.is_empty(),
				Some(original) => original != *values,
			})
			.map(|(name, values)| (name.clone(), values.clone()))
			.collect()
	}

	/// The pending changes, split into the add, delete and replace parts of
	/// an LDAP modify operation.
	#[must_use]
	pub fn changes(&self) -> ChangeSet {
		let mut changes = ChangeSet::default();
		for (name, values) in &self.current {
			match self.original.get(name) {
				None if values.is_empty() => {}
				None => {
					changes.add.insert(name.clone(), values.clone());
				}
				Some(original) if original == values => {}
				Some(original) if original.is_empty() => {
					changes.add.insert(name.clone(), values.clone());
				}
				Some(_) if values.is_empty() => {
					changes.delete.insert(name.clone(), Vec::new());
				}
				Some(_) => {
					changes.replace.insert(name.clone(), values.clone());
				}
			}
		}
		changes
	}

	/// The DN the entry has in the directory.
	#[must_use]
	pub fn current_dn(&self) -> &Dn {
		&self.dn
	}

	/// The effective DN: the pending one if the entry is to be moved.
	#[must_use]
	pub fn dn(&self) -> &Dn {
		self.new_dn.as_ref().unwrap_or(&self.dn)
	}

	/// The RDN of the effective DN.
	#[must_use]
	pub fn rdn_string(&self) -> String {
		self.dn().rdn_string()
	}

	/// Change the DN. The entry is moved on the next update and the values
	/// of the new RDN replace the corresponding attributes.
	pub fn set_dn(&mut self, dn: Dn) {
		self.new_dn = Some(dn);
		self.ensure_rdn_attribute_values(true);
	}

	/// Alias of [`Node::set_dn`].
	pub fn move_to(&mut self, dn: Dn) {
		self.set_dn(dn);
	}

	/// Alias of [`Node::set_dn`].
	pub fn rename(&mut self, dn: Dn) {
		self.set_dn(dn);
	}

	/// Mark the entry for deletion on the next update.
	pub fn delete(&mut self) {
		self.delete = true;
	}

	/// Whether the entry does not exist in the directory yet.
	#[must_use]
	pub fn is_new(&self) -> bool {
		self.new
	}

	/// Whether the entry is deleted on the next update.
	#[must_use]
	pub fn will_be_deleted(&self) -> bool {
		self.delete
	}

	/// Whether the entry is moved on the next update.
	#[must_use]
	pub fn will_be_moved(&self) -> bool {
		if self.new || self.delete {
			return false;
		}
		self.new_dn.as_ref().is_some_and(|new_dn| *new_dn != self.dn)
	}

	/// Use `session` for online operations. The effective DN has to lie
	/// within the session's base DN. Loaded children are attached too.
	pub fn attach(&mut self, session: SessionRef) -> Result<(), Error> {
		if !self.dn().is_within(session.base_dn()) {
			return Err(Error::Precondition(format!(
				"{} is not within the session base {}",
				self.dn(),
				session.base_dn()
			)));
		}
		if let Some(children) = &mut self.children {
			for child in children.values_mut() {
				child.attach(session.clone())?;
			}
		}
		self.session = Some(session);
		Ok(())
	}

	/// Forget the session, here and in all loaded children. The session
	/// itself is left untouched.
	pub fn detach(&mut self) {
		self.session = None;
		if let Some(children) = &mut self.children {
			children.values_mut().for_each(Node::detach);
		}
	}

	/// Whether a session is attached.
	#[must_use]
	pub fn is_attached(&self) -> bool {
		self.session.is_some()
	}

	/// The attached session.
	#[must_use]
	pub fn session(&self) -> Option<&SessionRef> {
		self.session.as_ref()
	}

	/// The attached session, or [`Error::Detached`].
	fn require_session(&self) -> Result<&SessionRef, Error> {
		self.session.as_ref().ok_or(Error::Detached)
	}

	/// Write the pending state to the directory, attaching `session` first
	/// if given.
	///
	/// An entry marked for deletion is deleted if it exists. A new entry is
	/// added with all of its attributes. Otherwise a pending move is
	/// performed first, then the remaining changes are applied with a single
	/// modify operation.
	pub fn update(&mut self, session: Option<SessionRef>) -> Result<(), Error> {
		if let Some(session) = session {
			self.attach(session)?;
		}
		let session = self.require_session()?.clone();

		if self.delete {
			if session.exists(&self.dn)? {
				debug!(dn = %self.dn, "Deleting node");
				session.delete(&self.dn, false)?;
			}
			return Ok(());
		}

		if self.new {
			debug!(dn = %self.dn(), "Adding node");
			let data = self.data(true);
			session.add(self.dn(), &data)?;
			self.load_data(data, true);
			if let Some(new_dn) = self.new_dn.take() {
				self.dn = new_dn;
			}
			return Ok(());
		}

		let mut changes = self.changes();
		if self.will_be_moved() {
			if let Some(new_dn) = self.new_dn.clone() {
				debug!(from = %self.dn, to = %new_dn, "Moving node");
				let recursive = self.has_children()?;
				session.rename(&self.dn, &new_dn, recursive, false)?;
				if let Some(rdn) = new_dn.rdn() {
					for attribute in rdn.attributes() {
						changes.remove(&attribute.to_lowercase());
					}
				}
				self.dn = new_dn;
				self.new_dn = None;
				self.children = None;
			}
		}
		if !changes.is_empty() {
			debug!(dn = %self.dn, "Updating node");
			session.update(&self.dn, &changes)?;
		}
		self.original = self.current.clone();
		Ok(())
	}

	/// Whether the entry exists in the directory.
	pub fn exists(&self) -> Result<bool, Error> {
		self.require_session()?.exists(self.dn())
	}

	/// Replace all data with what the directory holds, attaching `session`
	/// first if given.
	pub fn reload(&mut self, session: Option<SessionRef>) -> Result<(), Error> {
		if let Some(session) = session {
			self.attach(session)?;
		}
		let session = self.require_session()?;
		let entry = session.get_entry(self.dn(), ALL_ATTRIBUTES, true)?.ok_or(Error::Missing)?;
		self.load_data(normalize(entry.attrs), true);
		Ok(())
	}

	/// Search below this entry. The resulting nodes are attached to the same
	/// session.
	pub fn search_subtree(
		&self,
		filter: &Filter,
		scope: Scope,
		sort: Option<&str>,
	) -> Result<NodeCollection, Error> {
		self.require_session()?.search_nodes(filter, self.dn(), scope, ALL_ATTRIBUTES, sort)
	}

	/// Search the direct children of this entry.
	pub fn search_children(
		&self,
		filter: &Filter,
		sort: Option<&str>,
	) -> Result<NodeCollection, Error> {
		self.search_subtree(filter, Scope::OneLevel, sort)
	}

	/// Number of entries below this one matching `filter`.
	pub fn count_subtree(&self, filter: &Filter, scope: Scope) -> Result<usize, Error> {
		self.require_session()?.count(filter, self.dn(), scope)
	}

	/// Number of direct children.
	pub fn count_children(&self) -> Result<usize, Error> {
		self.count_subtree(&Filter::any("objectClass"), Scope::OneLevel)
	}

	/// Whether the entry has children. Uses the loaded children if there
	/// are any, asks the directory if attached and reports `false`
	/// otherwise.
	pub fn has_children(&self) -> Result<bool, Error> {
		match &self.children {
			Some(children) => Ok(!children.is_empty()),
			None if self.is_attached() => Ok(self.count_children()? > 0),
			None => Ok(false),
		}
	}

	/// The direct children, keyed by their RDN with lowercased attribute
	/// types. Loaded on first access and cached afterwards. A detached node
	/// has no children.
	pub fn children(&mut self) -> Result<&mut BTreeMap<String, Node>, Error> {
		if self.children.is_none() {
			let mut loaded = BTreeMap::new();
			if self.is_attached() {
				let mut found = self.search_children(&Filter::any("objectClass"), None)?;
				for child in found.iter() {
					let child = child?;
					loaded.insert(child.dn().rdn_string_with(CaseFold::Lower), child);
				}
			}
			self.children = Some(loaded);
		}
		Ok(self.children.get_or_insert_with(BTreeMap::new))
	}

	/// Load the parent entry.
	pub fn parent(&self) -> Result<Node, Error> {
		let session = self.require_session()?;
		Node::from_ldap(&self.dn().parent_dn(1)?, session)
	}

	/// A sequence holding just this node, keyed by its RDN.
	#[must_use]
	pub fn singleton(&self) -> iter::Once<(String, &Node)> {
		iter::once((self.rdn_string(), self))
	}
}

impl ChildrenProvider for Node {
	fn children_mut(&mut self) -> Result<&mut BTreeMap<String, Self>, Error> {
		self.children()
	}
}

/// Materializes search results as [`Node`]s attached to a session.
#[derive(Debug, Clone)]
pub struct NodeEntries {
	/// Session the nodes are attached to
	session: SessionRef,
}

impl NodeEntries {
	/// Attach created nodes to `session`.
	#[must_use]
	pub fn new(session: SessionRef) -> Self {
		NodeEntries { session }
	}
}

impl EntryFactory for NodeEntries {
	type Item = Node;

	fn create_entry(&self, entry: Entry) -> Result<Node, Error> {
		let mut node = Node::from_entry(entry, true)?;
		node.dn.set_case_fold(self.session.case_fold());
		node.attach(self.session.clone())?;
		Ok(node)
	}
}

/// Node level operations on a shared session.
pub trait SessionNodes {
	/// Load the entry at `dn`.
	fn node(&self, dn: &Dn) -> Result<Node, Error>;

	/// Load the base entry of the session.
	fn base_node(&self) -> Result<Node, Error>;

	/// Search and wrap the result in a collection of attached nodes.
	fn search_nodes(
		&self,
		filter: &Filter,
		base: &Dn,
		scope: Scope,
		attributes: &[&str],
		sort: Option<&str>,
	) -> Result<NodeCollection, Error>;
}

impl SessionNodes for SessionRef {
	fn node(&self, dn: &Dn) -> Result<Node, Error> {
		Node::from_ldap(dn, self)
	}

	fn base_node(&self) -> Result<Node, Error> {
		Node::from_ldap(self.base_dn(), self)
	}

	fn search_nodes(
		&self,
		filter: &Filter,
		base: &Dn,
		scope: Scope,
		attributes: &[&str],
		sort: Option<&str>,
	) -> Result<NodeCollection, Error> {
		let cursor = self.search(filter, base, scope, attributes, sort)?;
		Ok(Collection::new(cursor, NodeEntries::new(self.clone())))
	}
}

/// Lowercase attribute names, merging values of names that only differ in
/// case, and drop the `dn` pseudo attribute.
fn normalize(data: Attributes) -> Attributes {
	let mut normalized = Attributes::new();
	for (name, values) in data {
		let name = name.to_lowercase();
		if name != "dn" {
			normalized.entry(name).or_default().extend(values);
		}
	}
	normalized
}

/// Owned copies of string values.
fn owned<S: AsRef<str>>(values: &[S]) -> Vec<String> {
	values.iter().map(|value| value.as_ref().to_owned()).collect()
}

/// Timestamps in generalized time.
fn datetimes(values: &[OffsetDateTime], utc: bool) -> Result<Vec<String>, Error> {
	values.iter().map(|value| converter::to_ldap_datetime(*value, utc)).collect()
}
