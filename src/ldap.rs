//! Blocking client for an LDAP server.

use std::{
	collections::{HashSet, VecDeque},
	fmt,
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use ldap3::{LdapConn, LdapError, LdapResult, Mod, Scope, SearchEntry, SearchResult};
use tracing::{debug, info, warn};

use crate::{
	config::Config,
	cursor::{natural_comparator, AttributeNameTreatment, Comparator, Cursor, DefaultCursor},
	dn::Dn,
	error::Error,
	filter::Filter,
	session::{Attributes, ChangeSet, Session},
};

/// Result codes after which a refused rename is emulated: `protocolError`,
/// `unavailableCriticalExtension`, `unwillingToPerform` and
/// `notAllowedOnNonLeaf`.
const RENAME_UNSUPPORTED: [u32; 4] = [2, 12, 53, 66];

/// Attributes maintained by Active Directory that cannot be written back.
const READ_ONLY_ATTRIBUTES: [&str; 10] = [
	"dn",
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

/// A [`Session`] backed by a synchronous `ldap3` connection.
///
/// The connection is guarded by a mutex, so one `Ldap` can be shared between
/// any number of nodes through a [`SessionRef`](crate::session::SessionRef).
pub struct Ldap {
	/// The connection to the server
	conn: Mutex<LdapConn>,
	/// Base of all operations
	base_dn: Dn,
	/// Timeout applied to every operation
	operation_timeout: Duration,
	/// Attribute renaming handed to every search cursor
	treatment: AttributeNameTreatment,
	/// Comparison handed to every search cursor
	comparator: Comparator,
}

impl Ldap {
	/// Connect to the server named in the configuration, binding with the
	/// configured credentials if there are any.
	pub fn connect(config: &Config) -> Result<Self, Error> {
		let base_dn = config.base_dn()?;
		let settings = config.connection.to_settings()?;
		debug!(url = %config.url, "connecting to LDAP server");
		let mut conn = LdapConn::from_url_with_settings(settings, &config.url)?;

		if let Some(bind_dn) = &config.bind_dn {
			let password = config.bind_password.as_deref().unwrap_or_default();
			let result = conn
				.with_timeout(config.connection.operation_timeout)
				.simple_bind(bind_dn, password)?;
			check(result, &format!("binding as {bind_dn}"))?;
			info!(dn = %bind_dn, "bound to LDAP server");
		}

		Ok(Ldap {
			conn: Mutex::new(conn),
			base_dn,
			operation_timeout: config.connection.operation_timeout,
			treatment: config.attribute_name_treatment.into(),
			comparator: natural_comparator(),
		})
	}

	/// Use a different attribute name treatment for search results.
	#[must_use]
	pub fn with_attribute_name_treatment(mut self, treatment: AttributeNameTreatment) -> Self {
		self.treatment = treatment;
		self
	}

	/// Use a different comparison function for sorted searches.
	#[must_use]
	pub fn with_sort_function(mut self, comparator: Comparator) -> Self {
		self.comparator = comparator;
		self
	}

	/// End the session with the server.
	pub fn unbind(&self) -> Result<(), Error> {
		self.connection()?.unbind()?;
		debug!("unbound from LDAP server");
		Ok(())
	}

	/// Copy an entry, with `recursive` its whole subtree, to `to`.
	///
	/// Stops at the first failure; entries copied up to that point stay.
	pub fn copy(&self, from: &Dn, to: &Dn, recursive: bool) -> Result<(), Error> {
		let entry = self.get_entry(from, &[], true)?.ok_or(Error::Missing)?;
		debug!(from = %from, to = %to, "copying entry");
		self.add(to, &entry.attrs)?;

		if recursive {
			for child in self.child_dns(from)? {
				let Some(rdn) = child.rdn() else { continue };
				let mut target = to.clone();
				target.prepend(rdn.clone())?;
				self.copy(&child, &target, true)?;
			}
		}
		Ok(())
	}

	/// Lock the connection.
	fn connection(&self) -> Result<MutexGuard<'_, LdapConn>, Error> {
		self.conn.lock().map_err(|_| Error::Invalid("LDAP connection lock poisoned".to_owned()))
	}

	/// DNs of the direct children of `dn`.
	fn child_dns(&self, dn: &Dn) -> Result<Vec<Dn>, Error> {
		let mut cursor = self.search(&Filter::any("objectClass"), dn, Scope::OneLevel, &["1.1"], None)?;
		let mut children = Vec::with_capacity(cursor.count());
		cursor.rewind();
		while let Some(child) = cursor.key()? {
			children.push(Dn::parse_with(&child, self.case_fold())?);
			cursor.advance();
		}
		Ok(children)
	}

	/// Issue a modify DN request.
	fn modify_dn(&self, from: &Dn, to: &Dn) -> Result<(), Error> {
		let new_rdn = to.rdn_string();
		let new_superior = to.parent_dn(1).ok().map(|parent| parent.to_string());
		let result = self.connection()?.with_timeout(self.operation_timeout).modifydn(
			&from.to_string(),
			&new_rdn,
			true,
			new_superior.as_deref(),
		)?;
		check(result, &format!("renaming {from} to {to}"))?;
		Ok(())
	}
}

impl Session for Ldap {
	fn base_dn(&self) -> &Dn {
		&self.base_dn
	}

	fn search(
		&self,
		filter: &Filter,
		base: &Dn,
		scope: Scope,
		attributes: &[&str],
		sort: Option<&str>,
	) -> Result<DefaultCursor, Error> {
		let base = base.to_string();
		let filter = filter.to_string();
		let attributes = if attributes.is_empty() { vec!["*"] } else { attributes.to_vec() };
		debug!(base = %base, filter = %filter, scope = ?scope, "searching");

		let SearchResult(entries, result) = self
			.connection()?
			.with_timeout(self.operation_timeout)
			.search(&base, scope, &filter, attributes)?;
		check(result, &format!("searching {base}"))?;

		let entries: Vec<SearchEntry> = entries.into_iter().map(SearchEntry::construct).collect();
		let mut cursor = DefaultCursor::new(entries)
			.with_attribute_name_treatment(self.treatment.clone())
			.with_sort_function(self.comparator.clone());
		if let Some(attribute) = sort {
			cursor.sort(attribute)?;
		}
		Ok(cursor)
	}

	fn add(&self, dn: &Dn, attributes: &Attributes) -> Result<(), Error> {
		let attributes = prepare_attributes(dn, attributes);
		debug!(dn = %dn, "adding entry");
		let result =
			self.connection()?.with_timeout(self.operation_timeout).add(&dn.to_string(), attributes)?;
		check(result, &format!("adding {dn}"))?;
		info!(dn = %dn, "added entry");
		Ok(())
	}

	fn update(&self, dn: &Dn, changes: &ChangeSet) -> Result<(), Error> {
		if changes.is_empty() {
			return Ok(());
		}
		debug!(dn = %dn, "modifying entry");
		let result = self
			.connection()?
			.with_timeout(self.operation_timeout)
			.modify(&dn.to_string(), modifications(changes))?;
		check(result, &format!("modifying {dn}"))?;
		info!(dn = %dn, "modified entry");
		Ok(())
	}

	fn delete(&self, dn: &Dn, recursive: bool) -> Result<(), Error> {
		if recursive {
			for child in self.child_dns(dn)? {
				self.delete(&child, true)?;
			}
		}
		debug!(dn = %dn, "deleting entry");
		let result = self.connection()?.with_timeout(self.operation_timeout).delete(&dn.to_string())?;
		check(result, &format!("deleting {dn}"))?;
		info!(dn = %dn, "deleted entry");
		Ok(())
	}

	fn rename(&self, from: &Dn, to: &Dn, recursive: bool, emulate: bool) -> Result<(), Error> {
		debug!(from = %from, to = %to, "renaming entry");
		match self.modify_dn(from, to) {
			Ok(()) => {}
			Err(err) if emulate && rename_unsupported(&err) => {
				warn!("Server refused to rename {from}, copying instead: {err}");
				self.copy(from, to, recursive)?;
				self.delete(from, recursive)?;
			}
			Err(err) => return Err(err),
		}
		info!(from = %from, to = %to, "renamed entry");
		Ok(())
	}
}

impl fmt::Debug for Ldap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Ldap")
			.field("base_dn", &self.base_dn.to_string())
			.field("operation_timeout", &self.operation_timeout)
			.field("treatment", &self.treatment)
			.finish_non_exhaustive()
	}
}

/// Turn a non-successful result into an [`Error::Operation`].
fn check(result: LdapResult, context: &str) -> Result<LdapResult, Error> {
	result.success().map_err(|err| match err {
		LdapError::LdapResult { result } => Error::operation(&result, context),
		err => Error::from(err),
	})
}

/// Whether a failed rename may be emulated by copying and deleting.
fn rename_unsupported(err: &Error) -> bool {
	err.code().is_some_and(|code| RENAME_UNSUPPORTED.contains(&code))
}

/// Attributes for an add request: values of the DN's own RDN are added if
/// missing, read-only and empty attributes are left out.
fn prepare_attributes(dn: &Dn, attributes: &Attributes) -> Vec<(String, HashSet<String>)> {
	let mut prepared: Vec<(String, VecDeque<String>)> = attributes
		.iter()
		.filter(|(name, values)| {
			!values.is_empty() && !READ_ONLY_ATTRIBUTES.contains(&name.to_lowercase().as_str())
		})
		.map(|(name, values)| (name.clone(), values.iter().cloned().collect()))
		.collect();

	for (attribute, value) in dn.rdn().into_iter().flat_map(|rdn| rdn.iter()) {
		let existing = prepared.iter().position(|(name, _)| name.eq_ignore_ascii_case(attribute));
		match existing {
			Some(index) => {
				let values = &mut prepared[index].1;
				if !values.iter().any(|existing| existing == value) {
					values.push_front(value.to_owned());
				}
			}
			None => prepared.push((attribute.to_owned(), VecDeque::from([value.to_owned()]))),
		}
	}

	prepared.into_iter().map(|(name, values)| (name, values.into_iter().collect())).collect()
}

/// Map a change set onto modify operations.
fn modifications(changes: &ChangeSet) -> Vec<Mod<String>> {
	let set = |values: &Vec<String>| values.iter().cloned().collect::<HashSet<_>>();
	let mut mods = Vec::new();
	mods.extend(changes.add.iter().map(|(name, values)| Mod::Add(name.clone(), set(values))));
	mods.extend(changes.delete.iter().map(|(name, values)| Mod::Delete(name.clone(), set(values))));
	mods.extend(
		changes.replace.iter().map(|(name, values)| Mod::Replace(name.clone(), set(values))),
	);
	mods
}
