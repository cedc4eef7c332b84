//! Cached collections of search results.
//!
//! A [`Collection`] wraps a [`Cursor`] and remembers every entry it has
//! materialized, keyed by position. Iterating a second time is served from
//! that cache without decoding anything again, even after the cursor itself
//! reported exhaustion.
//!
//! What an entry turns into is decided by an [`EntryFactory`]: plain
//! [`Entry`] maps by default, or [`Node`](crate::node::Node)s when created
//! through [`NodeEntries`](crate::node::NodeEntries).
use std::{collections::BTreeMap, fmt};

use crate::{
	cursor::{Cursor, DefaultCursor},
	entry::Entry,
	error::Error,
};

/// Turns decoded entries into the representation a collection yields.
pub trait EntryFactory {
	/// The representation produced
	type Item: Clone + fmt::Debug;

	/// Materialize one entry.
	fn create_entry(&self, entry: Entry) -> Result<Self::Item, Error>;
}

/// Yields the decoded [`Entry`] unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEntries;

impl EntryFactory for PlainEntries {
	type Item = Entry;

	fn create_entry(&self, entry: Entry) -> Result<Entry, Error> {
		Ok(entry)
	}
}

/// A lazily materialized, cached view over a search result.
///
/// The cursor is closed when the collection is dropped.
#[derive(Debug)]
pub struct Collection<C: Cursor = DefaultCursor, F: EntryFactory = PlainEntries> {
	/// The underlying result set
	cursor: C,
	/// Materializes entries
	factory: F,
	/// Current position, `None` until first positioned
	position: Option<usize>,
	/// Entries materialized so far, by position
	cache: BTreeMap<usize, F::Item>,
}

impl<C: Cursor> Collection<C, PlainEntries> {
	/// Wrap a cursor, yielding plain entries.
	#[must_use]
	pub fn plain(cursor: C) -> Self {
		Self::new(cursor, PlainEntries)
	}
}

impl<C: Cursor, F: EntryFactory> Collection<C, F> {
	/// Wrap a cursor, materializing entries with `factory`.
	#[must_use]
	pub fn new(cursor: C, factory: F) -> Self {
		Collection { cursor, factory, position: None, cache: BTreeMap::new() }
	}

	/// Total number of entries, as reported by the cursor.
	#[must_use]
	pub fn count(&self) -> usize {
		self.cursor.count()
	}

	/// Move to the first entry.
	pub fn rewind(&mut self) {
		self.cursor.rewind();
		self.position = Some(0);
	}

	/// Move to the next entry. Whether there is one is only known by the next
	/// call to [`Collection::valid`] or [`Collection::current`].
	pub fn advance(&mut self) {
		self.cursor.advance();
		self.position = Some(self.position.map_or(0, |position| position + 1));
	}

	/// The entry at the current position, rewinding first if the collection
	/// has not been positioned yet.
	///
	/// Cached entries are returned without touching the cursor. A position
	/// the cursor has no entry for yields `None` and is not cached.
	pub fn current(&mut self) -> Result<Option<&F::Item>, Error> {
		if self.count() < 1 {
			return Ok(None);
		}
		let position = self.ensure_positioned();
		if !self.cache.contains_key(&position) {
			let Some(entry) = self.cursor.current()? else {
				return Ok(None);
			};
			let item = self.factory.create_entry(entry)?;
			self.cache.insert(position, item);
		}
		Ok(self.cache.get(&position))
	}

	/// The DN of the entry the cursor is positioned on.
	pub fn key(&mut self) -> Result<Option<String>, Error> {
		if self.count() < 1 {
			return Ok(None);
		}
		self.ensure_positioned();
		self.cursor.key()
	}

	/// Alias of [`Collection::key`].
	pub fn dn(&mut self) -> Result<Option<String>, Error> {
		self.key()
	}

	/// The current position, `None` before the collection was positioned.
	#[must_use]
	pub fn position(&self) -> Option<usize> {
		self.position
	}

	/// Whether the current position holds an entry, either cached or still
	/// available from the cursor.
	#[must_use]
	pub fn valid(&self) -> bool {
		self.position.is_some_and(|position| self.cache.contains_key(&position))
			|| self.cursor.valid()
	}

	/// Release the cursor. Returns `false` if it was already released.
	pub fn close(&mut self) -> bool {
		self.cursor.close()
	}

	/// The first entry, or `None` for an empty result.
	pub fn get_first(&mut self) -> Result<Option<&F::Item>, Error> {
		if self.count() < 1 {
			return Ok(None);
		}
		self.rewind();
		self.current()
	}

	/// Collect every entry.
	pub fn to_vec(&mut self) -> Result<Vec<F::Item>, Error> {
		self.iter().collect()
	}

	/// The wrapped cursor.
	#[must_use]
	pub fn inner(&self) -> &C {
		&self.cursor
	}

	/// The wrapped cursor, mutably. Reordering it does not invalidate
	/// entries that were already cached.
	pub fn inner_mut(&mut self) -> &mut C {
		&mut self.cursor
	}

	/// Iterate over all entries from the start, yielding clones of the
	/// cached items. Iteration stops after the first error.
	pub fn iter(&mut self) -> Iter<'_, C, F> {
		Iter { collection: self, started: false, done: false }
	}

	/// Rewind if not positioned yet and return the position.
	fn ensure_positioned(&mut self) -> usize {
		match self.position {
			Some(position) => position,
			None => {
				self.rewind();
				0
			}
		}
	}
}

impl<C: Cursor, F: EntryFactory> Drop for Collection<C, F> {
	fn drop(&mut self) {
		self.cursor.close();
	}
}

/// Iterator returned by [`Collection::iter`].
#[derive(Debug)]
pub struct Iter<'a, C: Cursor, F: EntryFactory> {
	/// The collection being iterated
	collection: &'a mut Collection<C, F>,
	/// Whether the collection was rewound yet
	started: bool,
	/// Set once exhausted or failed
	done: bool,
}

impl<C: Cursor, F: EntryFactory> Iterator for Iter<'_, C, F> {
	type Item = Result<F::Item, Error>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}
		if self.started {
			self.collection.advance();
		} else {
			self.started = true;
			if self.collection.count() < 1 {
				self.done = true;
				return None;
			}
			self.collection.rewind();
		}
		if !self.collection.valid() {
			self.done = true;
			return None;
		}
		match self.collection.current() {
			Ok(Some(item)) => Some(Ok(item.clone())),
			Ok(None) => {
				self.done = true;
				None
			}
			Err(err) => {
				self.done = true;
				Some(Err(err))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::sync::atomic::Ordering;

	use super::{Collection, EntryFactory};
	use crate::{
		cursor::Cursor,
		entry::{Entry, SearchEntryExt},
		error::Error,
		testing::{search_entry, CountingCursor},
	};

	/// A cursor over three people.
	fn people() -> CountingCursor {
		CountingCursor::new(vec![
			search_entry("uid=a,dc=example,dc=org", &[("uid", &["a"]), ("cn", &["Alice"])]),
			search_entry("uid=b,dc=example,dc=org", &[("uid", &["b"]), ("cn", &["Bob"])]),
			search_entry("uid=c,dc=example,dc=org", &[("uid", &["c"]), ("cn", &["Carol"])]),
		])
	}

	/// Fails on Bob.
	#[derive(Debug)]
	struct NoBob;

	impl EntryFactory for NoBob {
		type Item = String;

		fn create_entry(&self, entry: Entry) -> Result<String, Error> {
			match entry.attr_first("cn") {
				Some("Bob") => Err(Error::Invalid("Bob".to_owned())),
				other => Ok(other.unwrap_or_default().to_owned()),
			}
		}
	}

	#[test]
	fn caching_across_passes() -> Result<(), Box<dyn std::error::Error>> {
		let cursor = people();
		let counters = cursor.counters();
		let mut collection = Collection::plain(cursor);

		let first = collection.to_vec()?;
		assert_eq!(first.len(), 3);
		assert_eq!(counters.decoded.load(Ordering::SeqCst), 3);

		let second = collection.to_vec()?;
		assert_eq!(first, second);
		assert_eq!(counters.decoded.load(Ordering::SeqCst), 3, "second pass must hit the cache");
		Ok(())
	}

	#[test]
	fn manual_iteration() -> Result<(), Box<dyn std::error::Error>> {
		let mut collection = Collection::plain(people());
		assert_eq!(collection.position(), None);
		assert_eq!(collection.current()?.unwrap().dn, "uid=a,dc=example,dc=org");
		assert_eq!(collection.position(), Some(0));

		collection.advance();
		assert!(collection.valid());
		assert_eq!(collection.key()?.as_deref(), Some("uid=b,dc=example,dc=org"));
		assert_eq!(collection.dn()?.as_deref(), Some("uid=b,dc=example,dc=org"));
		assert_eq!(collection.current()?.unwrap().attr_first("cn"), Some("Bob"));

		collection.advance();
		collection.advance();
		assert!(!collection.valid());
		assert_eq!(collection.current()?, None);
		Ok(())
	}

	#[test]
	fn cached_positions_stay_valid() -> Result<(), Box<dyn std::error::Error>> {
		let mut collection = Collection::plain(people());
		collection.to_vec()?;
		assert!(!collection.inner().valid());
		assert!(collection.inner_mut().close());

		collection.rewind();
		assert!(collection.valid());
		assert_eq!(collection.current()?.unwrap().attr_first("uid"), Some("a"));
		Ok(())
	}

	#[test]
	fn empty_result() -> Result<(), Box<dyn std::error::Error>> {
		let mut collection = Collection::plain(CountingCursor::new(Vec::new()));
		assert_eq!(collection.count(), 0);
		assert_eq!(collection.get_first()?, None);
		assert_eq!(collection.current()?, None);
		assert_eq!(collection.key()?, None);
		assert!(!collection.valid());
		assert!(collection.to_vec()?.is_empty());
		assert_eq!(collection.inner().counters().rewound.load(Ordering::SeqCst), 0);
		Ok(())
	}

	#[test]
	fn get_first_rewinds() -> Result<(), Box<dyn std::error::Error>> {
		let mut collection = Collection::plain(people());
		collection.advance();
		collection.advance();
		assert_eq!(collection.get_first()?.unwrap().attr_first("uid"), Some("a"));
		assert_eq!(collection.position(), Some(0));
		Ok(())
	}

	#[test]
	fn close_once() {
		let cursor = people();
		let counters = cursor.counters();
		let mut collection = Collection::plain(cursor);
		assert!(collection.close());
		assert!(!collection.close());
		drop(collection);
		assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

		let cursor = people();
		let counters = cursor.counters();
		drop(Collection::plain(cursor));
		assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn factory_errors_stop_iteration() {
		let mut collection = Collection::new(people(), NoBob);
		let items: Vec<_> = collection.iter().collect();
		assert_eq!(items.len(), 2);
		assert_eq!(items[0].as_ref().unwrap(), "Alice");
		assert!(items[1].is_err());
	}
}
