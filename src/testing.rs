//! Test doubles for the cursor and session capabilities.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
};

use ldap3::{Scope, SearchEntry};

use crate::{
	cursor::{Cursor, DefaultCursor},
	dn::{CaseFold, Dn},
	entry::Entry,
	error::{Error, NO_SUCH_OBJECT},
	filter::Filter,
	session::{Attributes, ChangeSet, Session},
};

/// LDAP result code `notAllowedOnNonLeaf`
const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
/// LDAP result code `entryAlreadyExists`
const ENTRY_ALREADY_EXISTS: u32 = 68;

/// Build a raw search result.
pub(crate) fn search_entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
	SearchEntry {
		dn: dn.to_owned(),
		attrs: attrs
			.iter()
			.map(|(name, values)| {
				((*name).to_owned(), values.iter().map(|value| (*value).to_owned()).collect())
			})
			.collect(),
		bin_attrs: HashMap::new(),
	}
}

/// Call counters shared between a [`CountingCursor`] and the test observing
/// it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
	/// Entries handed out by `current`
	pub decoded: Arc<AtomicUsize>,
	/// Successful closes
	pub closed: Arc<AtomicUsize>,
	/// Rewinds
	pub rewound: Arc<AtomicUsize>,
}

/// A [`DefaultCursor`] that counts what is asked of it.
#[derive(Debug)]
pub(crate) struct CountingCursor {
	/// The cursor doing the work
	inner: DefaultCursor,
	/// Shared counters
	counters: Counters,
}

impl CountingCursor {
	/// Wrap the given results.
	pub(crate) fn new(entries: Vec<SearchEntry>) -> Self {
		CountingCursor { inner: DefaultCursor::new(entries), counters: Counters::default() }
	}

	/// Handles to the counters.
	pub(crate) fn counters(&self) -> Counters {
		self.counters.clone()
	}
}

impl Cursor for CountingCursor {
	fn count(&self) -> usize {
		self.inner.count()
	}

	fn current(&mut self) -> Result<Option<Entry>, Error> {
		let entry = self.inner.current()?;
		if entry.is_some() {
			self.counters.decoded.fetch_add(1, Ordering::SeqCst);
		}
		Ok(entry)
	}

	fn key(&mut self) -> Result<Option<String>, Error> {
		self.inner.key()
	}

	fn advance(&mut self) {
		self.inner.advance();
	}

	fn rewind(&mut self) {
		self.counters.rewound.fetch_add(1, Ordering::SeqCst);
		self.inner.rewind();
	}

	fn valid(&self) -> bool {
		self.inner.valid()
	}

	fn close(&mut self) -> bool {
		let closed = self.inner.close();
		if closed {
			self.counters.closed.fetch_add(1, Ordering::SeqCst);
		}
		closed
	}
}

/// An in-memory directory.
///
/// Filters are not evaluated, searches return everything in scope. Every
/// write is recorded and can be inspected with [`MockSession::ops`].
#[derive(Debug)]
pub(crate) struct MockSession {
	/// The session base
	base_dn: Dn,
	/// Entries keyed by their DN with lowercased attribute types
	entries: Mutex<BTreeMap<String, (Dn, Entry)>>,
	/// Log of write operations
	ops: Mutex<Vec<String>>,
}

impl MockSession {
	/// A directory holding only the base entry.
	pub(crate) fn new(base_dn: &str) -> Result<Self, Error> {
		let session = MockSession {
			base_dn: Dn::parse(base_dn)?,
			entries: Mutex::new(BTreeMap::new()),
			ops: Mutex::new(Vec::new()),
		};
		session.seed(base_dn, &[("objectclass", &["top"])])?;
		Ok(session)
	}

	/// Store an entry without recording an operation. The RDN values are
	/// added to the attributes.
	pub(crate) fn seed(&self, dn: &str, attrs: &[(&str, &[&str])]) -> Result<(), Error> {
		let parsed = Dn::parse(dn)?;
		let mut entry = Entry::from(search_entry(dn, attrs));
		if let Some(rdn) = parsed.rdn() {
			for (key, value) in rdn.iter() {
				let values = entry.attrs.entry(key.to_lowercase()).or_default();
				if !values.iter().any(|existing| existing == value) {
					values.push(value.to_owned());
				}
			}
		}
		self.entries.lock().unwrap().insert(key(&parsed), (parsed, entry));
		Ok(())
	}

	/// A stored entry.
	pub(crate) fn entry(&self, dn: &str) -> Option<Entry> {
		let dn = Dn::parse(dn).ok()?;
		self.entries.lock().unwrap().get(&key(&dn)).map(|(_, entry)| entry.clone())
	}

	/// The write operations performed so far.
	pub(crate) fn ops(&self) -> Vec<String> {
		self.ops.lock().unwrap().clone()
	}

	/// Record a write operation.
	fn record(&self, op: String) {
		self.ops.lock().unwrap().push(op);
	}
}

/// Map key of a DN.
fn key(dn: &Dn) -> String {
	dn.to_string_with(CaseFold::Lower)
}

/// Error for a missing entry.
fn missing(dn: &Dn) -> Error {
	Error::Operation { code: NO_SUCH_OBJECT, text: format!("{dn} not found"), context: "mock".to_owned() }
}

impl Session for MockSession {
	fn base_dn(&self) -> &Dn {
		&self.base_dn
	}

	fn search(
		&self,
		_filter: &Filter,
		base: &Dn,
		scope: Scope,
		_attributes: &[&str],
		sort: Option<&str>,
	) -> Result<DefaultCursor, Error> {
		let entries = self.entries.lock().unwrap();
		if !entries.contains_key(&key(base)) {
			return Err(missing(base));
		}
		let found = entries
			.values()
			.filter(|(dn, _)| match scope {
				Scope::Base => dn == base,
				Scope::OneLevel => dn.len() == base.len() + 1 && dn.is_descendant_of(base),
				Scope::Subtree => dn.is_within(base),
			})
			.map(|(_, entry)| SearchEntry {
				dn: entry.dn.clone(),
				attrs: entry.attrs.clone().into_iter().collect(),
				bin_attrs: HashMap::new(),
			})
			.collect();
		let mut cursor = DefaultCursor::new(found);
		if let Some(attribute) = sort {
			cursor.sort(attribute)?;
		}
		Ok(cursor)
	}

	fn add(&self, dn: &Dn, attributes: &Attributes) -> Result<(), Error> {
		let mut entries = self.entries.lock().unwrap();
		if entries.contains_key(&key(dn)) {
			return Err(Error::Operation {
				code: ENTRY_ALREADY_EXISTS,
				text: format!("{dn} exists"),
				context: "mock".to_owned(),
			});
		}
		let attrs =
			attributes.iter().filter(|(_, values)| !values.is_empty()).map(|(k, v)| (k.clone(), v.clone()));
		let entry = Entry { dn: dn.to_string(), attrs: attrs.collect(), ..Entry::default() };
		entries.insert(key(dn), (dn.clone(), entry));
		drop(entries);
		self.record(format!("add {dn}"));
		Ok(())
	}

	fn update(&self, dn: &Dn, changes: &ChangeSet) -> Result<(), Error> {
		let mut entries = self.entries.lock().unwrap();
		let (_, entry) = entries.get_mut(&key(dn)).ok_or_else(|| missing(dn))?;
		for (name, values) in &changes.add {
			entry.attrs.entry(name.clone()).or_default().extend(values.iter().cloned());
		}
		for (name, values) in &changes.delete {
			if values.is_empty() {
				entry.attrs.remove(name);
			} else if let Some(existing) = entry.attrs.get_mut(name) {
				existing.retain(|value| !values.contains(value));
			}
		}
		for (name, values) in &changes.replace {
			if values.is_empty() {
				entry.attrs.remove(name);
			} else {
				entry.attrs.insert(name.clone(), values.clone());
			}
		}
		drop(entries);
		self.record(format!("update {dn}"));
		Ok(())
	}

	fn delete(&self, dn: &Dn, recursive: bool) -> Result<(), Error> {
		let mut entries = self.entries.lock().unwrap();
		if !entries.contains_key(&key(dn)) {
			return Err(missing(dn));
		}
		let subtree: Vec<String> = entries
			.iter()
			.filter(|(_, (candidate, _))| candidate.is_descendant_of(dn))
			.map(|(key, _)| key.clone())
			.collect();
		if !subtree.is_empty() && !recursive {
			return Err(Error::Operation {
				code: NOT_ALLOWED_ON_NON_LEAF,
				text: format!("{dn} has children"),
				context: "mock".to_owned(),
			});
		}
		for child in subtree {
			entries.remove(&child);
		}
		entries.remove(&key(dn));
		drop(entries);
		self.record(format!("delete {dn}"));
		Ok(())
	}

	fn rename(&self, from: &Dn, to: &Dn, _recursive: bool, _emulate: bool) -> Result<(), Error> {
		let mut entries = self.entries.lock().unwrap();
		if !entries.contains_key(&key(from)) {
			return Err(missing(from));
		}
		if entries.contains_key(&key(to)) {
			return Err(Error::Operation {
				code: ENTRY_ALREADY_EXISTS,
				text: format!("{to} exists"),
				context: "mock".to_owned(),
			});
		}
		let moved: Vec<String> = entries
			.iter()
			.filter(|(_, (candidate, _))| candidate.is_within(from))
			.map(|(key, _)| key.clone())
			.collect();
		for old_key in moved {
			let Some((old_dn, mut entry)) = entries.remove(&old_key) else { continue };
			let depth = old_dn.len() - from.len();
			let rdns = old_dn.iter().take(depth).chain(to.iter()).cloned().collect();
			let new_dn = Dn::from_rdns(rdns, CaseFold::None)?;
			if depth == 0 {
				if let Some(rdn) = new_dn.rdn() {
					for (name, value) in rdn.iter() {
						entry.attrs.insert(name.to_lowercase(), vec![value.to_owned()]);
					}
				}
			}
			entry.dn = new_dn.to_string();
			entries.insert(key(&new_dn), (new_dn, entry));
		}
		drop(entries);
		self.record(format!("rename {from} -> {to}"));
		Ok(())
	}
}
