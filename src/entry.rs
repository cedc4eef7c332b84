//! Plain directory entries and helper methods for extracting data from them.
use std::collections::BTreeMap;

use ldap3::SearchEntry;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{converter, error::Error};

/// A directory entry as a plain attribute map.
///
/// This is the default representation produced by a
/// [`Collection`](crate::collection::Collection). Attribute names are
/// whatever the cursor's name treatment made of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entry {
	/// Distinguished name of the entry
	pub dn: String,
	/// Attributes with UTF-8 values
	pub attrs: BTreeMap<String, Vec<String>>,
	/// Attributes with values that are not valid UTF-8
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub bin_attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
	/// An entry without any attributes.
	#[must_use]
	pub fn new(dn: impl Into<String>) -> Self {
		Entry { dn: dn.into(), ..Entry::default() }
	}

	/// Convert a search result, passing every attribute name through
	/// `rename`.
	pub fn from_search(entry: SearchEntry, rename: impl Fn(&str) -> String) -> Self {
		let mut attrs: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for (name, values) in entry.attrs {
			attrs.entry(rename(&name)).or_default().extend(values);
		}
		let mut bin_attrs: BTreeMap<String, Vec<Vec<u8>>> = BTreeMap::new();
		for (name, values) in entry.bin_attrs {
			bin_attrs.entry(rename(&name)).or_default().extend(values);
		}
		Entry { dn: entry.dn, attrs, bin_attrs }
	}
}

impl From<SearchEntry> for Entry {
	fn from(entry: SearchEntry) -> Self {
		Entry::from_search(entry, str::to_owned)
	}
}

/// An extension trait for [`SearchEntry`] and [`Entry`] that provides
/// convenience methods for extracting data.
pub trait SearchEntryExt {
	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str>;

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]>;

	/// Get the first value of an attribute, interpreted as a boolean.
	fn bool_first(&self, attr: &str) -> Option<Result<bool, Error>> {
		self.attr_first(attr).map(converter::from_ldap_bool)
	}

	/// Get the first value of an attribute, interpreted as generalized time.
	fn datetime_first(&self, attr: &str) -> Option<Result<OffsetDateTime, Error>> {
		self.attr_first(attr).map(converter::from_ldap_datetime)
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		let attr = self.attrs.get(attr)?;
		attr.first().map(String::as_str)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(attr) = self.attrs.get(attr) {
			return attr.first().map(String::as_bytes);
		}

		if let Some(attr) = self.bin_attrs.get(attr) {
			return attr.first().map(Vec::as_slice);
		}
		None
	}
}

impl SearchEntryExt for Entry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		let attr = self.attrs.get(attr)?;
		attr.first().map(String::as_str)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(attr) = self.attrs.get(attr) {
			return attr.first().map(String::as_bytes);
		}
		self.bin_attrs.get(attr)?.first().map(Vec::as_slice)
	}
}
