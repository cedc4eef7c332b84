//! Cursors over search results.
//!
//! A [`Cursor`] is the low level, position based view on a result set that a
//! [`Collection`](crate::collection::Collection) builds its cache on top of.
//! [`DefaultCursor`] is the implementation returned by every
//! [`Session`](crate::session::Session) search. It decodes entries on demand,
//! renames attributes according to an [`AttributeNameTreatment`] and can
//! reorder the result set by an attribute value.
use std::{cmp::Ordering, fmt, sync::Arc};

use ldap3::SearchEntry;

use crate::{config::NameTreatment, entry::Entry, error::Error};

/// A position based cursor over a set of search results.
pub trait Cursor: fmt::Debug {
	/// Total number of entries in the result set.
	fn count(&self) -> usize;

	/// Decode the entry at the current position. An unpositioned cursor
	/// rewinds first. Returns `None` once the cursor is exhausted.
	fn current(&mut self) -> Result<Option<Entry>, Error>;

	/// The DN of the entry at the current position.
	fn key(&mut self) -> Result<Option<String>, Error>;

	/// Move to the next entry. No bounds checking is done here.
	fn advance(&mut self);

	/// Move to the first entry.
	fn rewind(&mut self);

	/// Whether the current position holds an entry.
	fn valid(&self) -> bool;

	/// Release the result set. Returns `false` if there was nothing left to
	/// release.
	fn close(&mut self) -> bool;
}

/// Transformation applied to attribute names when an entry is decoded.
#[derive(Clone, Default)]
pub enum AttributeNameTreatment {
	/// Lowercase names
	#[default]
	Lower,
	/// Uppercase names
	Upper,
	/// Keep names as returned by the server
	Native,
	/// Apply a caller supplied function
	Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl AttributeNameTreatment {
	/// Wrap a custom renaming function.
	pub fn custom(rename: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
		AttributeNameTreatment::Custom(Arc::new(rename))
	}

	/// Resolve a numeric treatment code: 1 is lower, 2 upper and 3 native.
	/// Anything else falls back to lower.
	#[must_use]
	pub fn from_code(code: i64) -> Self {
		match code {
			2 => AttributeNameTreatment::Upper,
			3 => AttributeNameTreatment::Native,
			_ => AttributeNameTreatment::Lower,
		}
	}

	/// Rename an attribute.
	#[must_use]
	pub fn apply(&self, name: &str) -> String {
		match self {
			AttributeNameTreatment::Lower => name.to_lowercase(),
			AttributeNameTreatment::Upper => name.to_uppercase(),
			AttributeNameTreatment::Native => name.to_owned(),
			AttributeNameTreatment::Custom(rename) => rename(name),
		}
	}
}

impl fmt::Debug for AttributeNameTreatment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AttributeNameTreatment::Lower => f.write_str("Lower"),
			AttributeNameTreatment::Upper => f.write_str("Upper"),
			AttributeNameTreatment::Native => f.write_str("Native"),
			AttributeNameTreatment::Custom(_) => f.write_str("Custom(..)"),
		}
	}
}

impl From<NameTreatment> for AttributeNameTreatment {
	fn from(treatment: NameTreatment) -> Self {
		match treatment {
			NameTreatment::Lower => AttributeNameTreatment::Lower,
			NameTreatment::Upper => AttributeNameTreatment::Upper,
			NameTreatment::Native => AttributeNameTreatment::Native,
		}
	}
}

/// Comparison function used to sort result sets. Returning an error aborts
/// the sort.
pub type Comparator = Arc<dyn Fn(&str, &str) -> Result<Ordering, Error> + Send + Sync>;

/// The default comparator, [`natural_case_cmp`].
#[must_use]
pub fn natural_comparator() -> Comparator {
	Arc::new(|a: &str, b: &str| Ok(natural_case_cmp(a, b)))
}

/// Case-insensitive natural order: runs of digits compare by numeric value,
/// so `file9` sorts before `file10`.
#[must_use]
pub fn natural_case_cmp(a: &str, b: &str) -> Ordering {
	let a: Vec<char> = a.to_lowercase().chars().collect();
	let b: Vec<char> = b.to_lowercase().chars().collect();
	let (mut i, mut j) = (0, 0);
	loop {
		match (a.get(i), b.get(j)) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
				let end_a = digit_run_end(&a, i);
				let end_b = digit_run_end(&b, j);
				let run_a = strip_zeros(&a[i..end_a]);
				let run_b = strip_zeros(&b[j..end_b]);
				match run_a.len().cmp(&run_b.len()).then_with(|| run_a.cmp(run_b)) {
					Ordering::Equal => {
						i = end_a;
						j = end_b;
					}
					ordering => return ordering,
				}
			}
			(Some(x), Some(y)) => match x.cmp(y) {
				Ordering::Equal => {
					i += 1;
					j += 1;
				}
				ordering => return ordering,
			},
		}
	}
}

/// Index after the run of ASCII digits starting at `start`.
fn digit_run_end(chars: &[char], start: usize) -> usize {
	chars[start..].iter().position(|ch| !ch.is_ascii_digit()).map_or(chars.len(), |len| start + len)
}

/// Drop leading zeros of a digit run.
fn strip_zeros(run: &[char]) -> &[char] {
	let zeros = run.iter().take_while(|ch| **ch == '0').count();
	&run[zeros..]
}

/// The cursor returned by session searches.
///
/// Holds the raw search results in memory and decodes one entry at a time.
pub struct DefaultCursor {
	/// Raw results, in iteration order
	entries: Vec<SearchEntry>,
	/// Number of results, retained after closing
	count: usize,
	/// Index of the current entry, `None` before the first rewind
	position: Option<usize>,
	/// Whether the result set was released
	closed: bool,
	/// Renaming applied to attribute names when decoding
	treatment: AttributeNameTreatment,
	/// Comparison used by [`DefaultCursor::sort`]
	comparator: Comparator,
}

impl DefaultCursor {
	/// Create a cursor over the given search results.
	#[must_use]
	pub fn new(entries: Vec<SearchEntry>) -> Self {
		DefaultCursor {
			count: entries.len(),
			entries,
			position: None,
			closed: false,
			treatment: AttributeNameTreatment::default(),
			comparator: natural_comparator(),
		}
	}

	/// Set the attribute name treatment, builder style.
	#[must_use]
	pub fn with_attribute_name_treatment(mut self, treatment: AttributeNameTreatment) -> Self {
		self.treatment = treatment;
		self
	}

	/// Set the comparison function, builder style.
	#[must_use]
	pub fn with_sort_function(mut self, comparator: Comparator) -> Self {
		self.comparator = comparator;
		self
	}

	/// Change the attribute name treatment.
	pub fn set_attribute_name_treatment(&mut self, treatment: AttributeNameTreatment) {
		self.treatment = treatment;
	}

	/// The attribute name treatment used when decoding.
	#[must_use]
	pub fn attribute_name_treatment(&self) -> &AttributeNameTreatment {
		&self.treatment
	}

	/// Change the comparison function used for sorting.
	pub fn set_sort_function(&mut self, comparator: Comparator) {
		self.comparator = comparator;
	}

	/// Reorder the result set by the first value of `attribute` (matched
	/// case-insensitively). Entries without the attribute sort as if the
	/// value were empty. Entries comparing equal keep their order.
	///
	/// A failing comparison aborts the sort and leaves the order untouched.
	pub fn sort(&mut self, attribute: &str) -> Result<(), Error> {
		if self.closed {
			return Err(Error::Sort("result set is already closed".to_owned()));
		}
		let keyed: Vec<(String, SearchEntry)> = self
			.entries
			.iter()
			.map(|entry| (sort_value(entry, attribute), entry.clone()))
			.collect();

		let mut sorted: Vec<(String, SearchEntry)> = Vec::with_capacity(keyed.len());
		for item in keyed {
			let (mut low, mut high) = (0, sorted.len());
			while low < high {
				let middle = low + (high - low) / 2;
				let ordering = (self.comparator)(&item.0, &sorted[middle].0).map_err(|err| match err {
					Error::Sort(_) => err,
					other => Error::Sort(other.to_string()),
				})?;
				if ordering == Ordering::Less {
					high = middle;
				} else {
					low = middle + 1;
				}
			}
			sorted.insert(low, item);
		}
		self.entries = sorted.into_iter().map(|(_, entry)| entry).collect();
		Ok(())
	}

	/// The raw result at the current position.
	fn entry(&self) -> Option<&SearchEntry> {
		if self.closed {
			return None;
		}
		self.entries.get(self.position?)
	}
}

/// First value of `attribute` in `entry`, empty if there is none.
fn sort_value(entry: &SearchEntry, attribute: &str) -> String {
	entry
		.attrs
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case(attribute))
		.and_then(|(_, values)| values.first())
		.cloned()
		.unwrap_or_default()
}

impl Cursor for DefaultCursor {
	fn count(&self) -> usize {
		self.count
	}

	fn current(&mut self) -> Result<Option<Entry>, Error> {
		if self.position.is_none() {
			self.rewind();
		}
		let treatment = &self.treatment;
		Ok(self.entry().map(|entry| Entry::from_search(entry.clone(), |name| treatment.apply(name))))
	}

	fn key(&mut self) -> Result<Option<String>, Error> {
		if self.position.is_none() {
			self.rewind();
		}
		Ok(self.entry().map(|entry| entry.dn.clone()))
	}

	fn advance(&mut self) {
		self.position = Some(self.position.map_or(0, |position| position.saturating_add(1)));
	}

	fn rewind(&mut self) {
		self.position = Some(0);
	}

	fn valid(&self) -> bool {
		self.entry().is_some()
	}

	fn close(&mut self) -> bool {
		if self.closed {
			return false;
		}
		self.closed = true;
		self.entries.clear();
		self.position = None;
		true
	}
}

impl fmt::Debug for DefaultCursor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DefaultCursor")
			.field("count", &self.count)
			.field("position", &self.position)
			.field("closed", &self.closed)
			.field("treatment", &self.treatment)
			.finish_non_exhaustive()
	}
}
