//! Distinguished names.
//!
//! A [`Dn`] is an ordered list of [`Rdn`]s, most specific first, as in
//! `cn=Alice,ou=People,dc=example,dc=org`. Each RDN holds one or more
//! attribute type/value pairs (`cn=Alice+uid=alice`). Parsing and
//! serialization follow the string representation of RFC 4514: reserved
//! characters are escaped with a backslash, control characters and bytes of
//! non-printable sequences with a `\XX` hex pair.
//!
//! Attribute types are stored exactly as they were given. The [`CaseFold`]
//! of a DN only decides how the types are written out, so the original
//! spelling can always be recovered by switching back to [`CaseFold::None`].
use std::{fmt, slice, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
	converter::{hex_pair, push_hex},
	error::Error,
};

/// Characters that have to be escaped with a backslash inside a DN value
const RESERVED: &[u8] = b",+\"\\<>;=#";

/// How attribute type names are cased when a DN is serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFold {
	/// Keep the attribute types as they were given
	#[default]
	None,
	/// Uppercase attribute types
	Upper,
	/// Lowercase attribute types
	Lower,
}

impl CaseFold {
	/// Apply the case folding to an attribute type.
	#[must_use]
	pub fn apply(self, attribute: &str) -> String {
		match self {
			CaseFold::None => attribute.to_owned(),
			CaseFold::Upper => attribute.to_ascii_uppercase(),
			CaseFold::Lower => attribute.to_ascii_lowercase(),
		}
	}
}

/// A relative distinguished name: one component of a [`Dn`].
///
/// Pairs keep their insertion order, which is also the order they are
/// serialized in. Equality ignores both the order of the pairs and the case
/// of attribute types; values are compared exactly.
#[derive(Debug, Clone, Default, Eq)]
pub struct Rdn {
	/// Attribute type and raw (unescaped) value pairs
	parts: Vec<(String, String)>,
}

impl Rdn {
	/// Create a single-valued RDN.
	pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
		let mut rdn = Rdn::default();
		rdn.push(attribute, value)?;
		Ok(rdn)
	}

	/// Create a possibly multi-valued RDN from type/value pairs.
	pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Error>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let mut rdn = Rdn::default();
		for (attribute, value) in pairs {
			rdn.push(attribute, value)?;
		}
		if rdn.is_empty() {
			return Err(Error::DnSyntax("an RDN needs at least one attribute".to_owned()));
		}
		Ok(rdn)
	}

	/// Add another type/value pair, making this a multi-valued RDN.
	///
	/// Fails if the attribute type is malformed or already present.
	pub fn push(
		&mut self,
		attribute: impl Into<String>,
		value: impl Into<String>,
	) -> Result<(), Error> {
		let attribute = attribute.into();
		if !is_valid_attribute_type(&attribute) {
			return Err(Error::DnSyntax(format!("invalid attribute type {attribute:?}")));
		}
		if self.get(&attribute).is_some() {
			return Err(Error::DnSyntax(format!("attribute {attribute} appears twice in RDN")));
		}
		self.parts.push((attribute, value.into()));
		Ok(())
	}

	/// The value of an attribute type, matched case-insensitively.
	#[must_use]
	pub fn get(&self, attribute: &str) -> Option<&str> {
		self.parts
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(attribute))
			.map(|(_, value)| value.as_str())
	}

	/// Iterate over the type/value pairs in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.parts.iter().map(|(key, value)| (key.as_str(), value.as_str()))
	}

	/// The attribute types of this RDN in insertion order.
	pub fn attributes(&self) -> impl Iterator<Item = &str> {
		self.parts.iter().map(|(key, _)| key.as_str())
	}

	/// Number of type/value pairs.
	#[must_use]
	pub fn len(&self) -> usize {
		self.parts.len()
	}

	/// Whether this RDN has no pairs. Only possible for a default-constructed
	/// value, never for one taken from a [`Dn`].
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.parts.is_empty()
	}

	/// Serialize with the given case folding applied to attribute types.
	#[must_use]
	pub fn to_string_with(&self, case_fold: CaseFold) -> String {
		self.parts
			.iter()
			.map(|(key, value)| format!("{}={}", case_fold.apply(key), escape_value(value)))
			.collect::<Vec<_>>()
			.join("+")
	}

	/// A copy with case folding applied to the attribute types.
	#[must_use]
	pub fn folded(&self, case_fold: CaseFold) -> Self {
		Rdn {
			parts: self
				.parts
				.iter()
				.map(|(key, value)| (case_fold.apply(key), value.clone()))
				.collect(),
		}
	}
}

impl PartialEq for Rdn {
	fn eq(&self, other: &Self) -> bool {
		self.len() == other.len()
			&& self.parts.iter().all(|(key, value)| other.get(key) == Some(value.as_str()))
	}
}

impl fmt::Display for Rdn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_string_with(CaseFold::None))
	}
}

/// A distinguished name.
///
/// Equality compares the RDN components only, not the case folding setting.
#[derive(Debug, Clone, Default)]
pub struct Dn {
	/// Components, most specific first
	rdns: Vec<Rdn>,
	/// Case folding applied when serializing
	case_fold: CaseFold,
}

impl Dn {
	/// Parse a DN string without case folding. An empty or blank string is
	/// the root DN.
	pub fn parse(dn: &str) -> Result<Self, Error> {
		Self::parse_with(dn, CaseFold::None)
	}

	/// Parse a DN string, serializing it with the given case folding.
	pub fn parse_with(dn: &str, case_fold: CaseFold) -> Result<Self, Error> {
		let rdns = if dn.trim().is_empty() { Vec::new() } else { Self::explode(dn, CaseFold::None)? };
		Ok(Dn { rdns, case_fold })
	}

	/// Build a DN from its components.
	pub fn from_rdns(rdns: Vec<Rdn>, case_fold: CaseFold) -> Result<Self, Error> {
		if rdns.iter().any(Rdn::is_empty) {
			return Err(Error::DnSyntax("a DN cannot contain an empty RDN".to_owned()));
		}
		Ok(Dn { rdns, case_fold })
	}

	/// Build a DN from nested type/value pairs, one inner sequence per RDN.
	pub fn from_array<I, R, K, V>(array: I, case_fold: CaseFold) -> Result<Self, Error>
	where
		I: IntoIterator<Item = R>,
		R: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let rdns = array.into_iter().map(Rdn::from_pairs).collect::<Result<Vec<_>, _>>()?;
		Ok(Dn { rdns, case_fold })
	}

	/// Split a DN string into its components, applying `case_fold` to the
	/// attribute types. Unlike [`Dn::parse`] an empty string is an error.
	pub fn explode(dn: &str, case_fold: CaseFold) -> Result<Vec<Rdn>, Error> {
		let bytes = dn.as_bytes();
		let mut rdns = Vec::new();
		let mut rdn = Rdn::default();
		let mut pos = 0;
		loop {
			let Some(eq) = scan_key(bytes, pos) else {
				return Err(syntax(dn, "expected an attribute type followed by '='"));
			};
			let key = dn[pos..eq].trim();
			if !is_valid_attribute_type(key) {
				return Err(syntax(dn, "invalid attribute type"));
			}
			let (raw, end) = scan_value(dn, eq + 1)?;
			rdn.push(case_fold.apply(key), unescape_value(raw)?)?;
			match bytes.get(end) {
				Some(b'+') => {}
				Some(_) => rdns.push(std::mem::take(&mut rdn)),
				None => {
					rdns.push(rdn);
					return Ok(rdns);
				}
			}
			pos = end + 1;
		}
	}

	/// Check whether a string is a syntactically valid, non-empty DN.
	#[must_use]
	pub fn check_dn(dn: &str) -> bool {
		Self::explode(dn, CaseFold::None).is_ok()
	}

	/// Serialize a single RDN.
	#[must_use]
	pub fn implode_rdn(rdn: &Rdn, case_fold: CaseFold) -> String {
		rdn.to_string_with(case_fold)
	}

	/// Serialize a list of RDNs, joined by `separator` (`,` or `;`).
	#[must_use]
	pub fn implode_dn(rdns: &[Rdn], case_fold: CaseFold, separator: &str) -> String {
		rdns.iter().map(|rdn| rdn.to_string_with(case_fold)).collect::<Vec<_>>().join(separator)
	}

	/// Serialize with an explicit case folding instead of the instance's.
	#[must_use]
	pub fn to_string_with(&self, case_fold: CaseFold) -> String {
		Self::implode_dn(&self.rdns, case_fold, ",")
	}

	/// The components with the instance's case folding applied.
	#[must_use]
	pub fn to_array(&self) -> Vec<Rdn> {
		self.to_array_with(self.case_fold)
	}

	/// The components with the given case folding applied.
	#[must_use]
	pub fn to_array_with(&self, case_fold: CaseFold) -> Vec<Rdn> {
		self.rdns.iter().map(|rdn| rdn.folded(case_fold)).collect()
	}

	/// The case folding used when serializing.
	#[must_use]
	pub fn case_fold(&self) -> CaseFold {
		self.case_fold
	}

	/// Change the case folding in place.
	pub fn set_case_fold(&mut self, case_fold: CaseFold) {
		self.case_fold = case_fold;
	}

	/// The most specific component, `None` for the root DN.
	#[must_use]
	pub fn rdn(&self) -> Option<&Rdn> {
		self.rdns.first()
	}

	/// The most specific component as a string, empty for the root DN.
	#[must_use]
	pub fn rdn_string(&self) -> String {
		self.rdn_string_with(self.case_fold)
	}

	/// The most specific component serialized with the given case folding.
	#[must_use]
	pub fn rdn_string_with(&self, case_fold: CaseFold) -> String {
		self.rdn().map(|rdn| rdn.to_string_with(case_fold)).unwrap_or_default()
	}

	/// The DN `levels` steps up the tree. At least one component has to
	/// remain, so `levels` must be between 1 and `len() - 1`.
	pub fn parent_dn(&self, levels: usize) -> Result<Dn, Error> {
		if levels == 0 || levels >= self.rdns.len() {
			return Err(Error::Precondition(format!(
				"cannot retrieve parent {levels} levels up from {self}"
			)));
		}
		Ok(Dn { rdns: self.rdns[levels..].to_vec(), case_fold: self.case_fold })
	}

	/// Number of components.
	#[must_use]
	pub fn len(&self) -> usize {
		self.rdns.len()
	}

	/// Whether this is the root DN.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.rdns.is_empty()
	}

	/// Iterate over the components, most specific first.
	pub fn iter(&self) -> slice::Iter<'_, Rdn> {
		self.rdns.iter()
	}

	/// The component at `index`.
	#[must_use]
	pub fn get(&self, index: usize) -> Option<&Rdn> {
		self.rdns.get(index)
	}

	/// `length` components starting at `index`.
	#[must_use]
	pub fn slice(&self, index: usize, length: usize) -> Option<&[Rdn]> {
		self.rdns.get(index..index.checked_add(length)?)
	}

	/// Replace the component at `index`.
	pub fn set(&mut self, index: usize, rdn: Rdn) -> Result<&mut Self, Error> {
		let rdn = non_empty(rdn)?;
		let slot = self.rdns.get_mut(index).ok_or_else(|| out_of_range(index))?;
		*slot = rdn;
		Ok(self)
	}

	/// Remove `length` components starting at `index`.
	pub fn remove(&mut self, index: usize, length: usize) -> Result<&mut Self, Error> {
		let end = index.checked_add(length).filter(|end| *end <= self.rdns.len());
		let end = end.ok_or_else(|| out_of_range(index))?;
		self.rdns.drain(index..end);
		Ok(self)
	}

	/// Insert a component before `index`.
	pub fn insert(&mut self, index: usize, rdn: Rdn) -> Result<&mut Self, Error> {
		let rdn = non_empty(rdn)?;
		if index > self.rdns.len() {
			return Err(out_of_range(index));
		}
		self.rdns.insert(index, rdn);
		Ok(self)
	}

	/// Add a component at the least specific end.
	pub fn append(&mut self, rdn: Rdn) -> Result<&mut Self, Error> {
		self.rdns.push(non_empty(rdn)?);
		Ok(self)
	}

	/// Add a component at the most specific end.
	pub fn prepend(&mut self, rdn: Rdn) -> Result<&mut Self, Error> {
		self.rdns.insert(0, non_empty(rdn)?);
		Ok(self)
	}

	/// Whether `child` lies strictly below `parent`. Malformed input on
	/// either side yields `false`.
	#[must_use]
	pub fn is_child_of(child: &str, parent: &str) -> bool {
		match (Self::explode(child, CaseFold::None), Self::explode(parent, CaseFold::None)) {
			(Ok(child), Ok(parent)) => child.len() > parent.len() && ends_with(&child, &parent),
			_ => false,
		}
	}

	/// Whether this DN lies strictly below `ancestor`.
	#[must_use]
	pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
		self.len() > ancestor.len() && ends_with(&self.rdns, &ancestor.rdns)
	}

	/// Whether this DN is `ancestor` or lies below it.
	#[must_use]
	pub fn is_within(&self, ancestor: &Dn) -> bool {
		ends_with(&self.rdns, &ancestor.rdns)
	}

	/// Escape a value for use in a DN string.
	///
	/// Reserved characters (`,+"\<>;=#`) are prefixed with a backslash,
	/// control characters become `\XX` hex pairs and leading or trailing
	/// spaces become `\20`.
	#[must_use]
	pub fn escape_value(value: &str) -> String {
		escape_value(value)
	}

	/// Escape every value in a list, preserving order.
	#[must_use]
	pub fn escape_values<S: AsRef<str>>(values: &[S]) -> Vec<String> {
		values.iter().map(|value| escape_value(value.as_ref())).collect()
	}

	/// Reverse [`Dn::escape_value`].
	pub fn unescape_value(value: &str) -> Result<String, Error> {
		unescape_value(value)
	}

	/// Unescape every value in a list, preserving order.
	pub fn unescape_values<S: AsRef<str>>(values: &[S]) -> Result<Vec<String>, Error> {
		values.iter().map(|value| unescape_value(value.as_ref())).collect()
	}
}

impl PartialEq for Dn {
	fn eq(&self, other: &Self) -> bool {
		self.rdns == other.rdns
	}
}

impl Eq for Dn {}

impl fmt::Display for Dn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_string_with(self.case_fold))
	}
}

impl FromStr for Dn {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Dn::parse(s)
	}
}

impl<'a> IntoIterator for &'a Dn {
	type Item = &'a Rdn;
	type IntoIter = slice::Iter<'a, Rdn>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

/// Escape a DN value, see [`Dn::escape_value`].
fn escape_value(value: &str) -> String {
	let mut body = String::with_capacity(value.len());
	for ch in value.chars() {
		if ch.is_ascii() && RESERVED.contains(&(ch as u8)) {
			body.push('\\');
			body.push(ch);
		} else if (ch as u32) < 0x20 {
			push_hex(&mut body, ch as u8);
		} else {
			body.push(ch);
		}
	}

	let rest = body.trim_start_matches(' ');
	let leading = body.len() - rest.len();
	let inner = rest.trim_end_matches(' ');
	let trailing = rest.len() - inner.len();
	format!("{}{inner}{}", "\\20".repeat(leading), "\\20".repeat(trailing))
}

/// Unescape a DN value, see [`Dn::unescape_value`].
fn unescape_value(value: &str) -> Result<String, Error> {
	let bytes = value.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] != b'\\' {
			out.push(bytes[i]);
			i += 1;
			continue;
		}
		if let Some(byte) = hex_pair(bytes, i + 1) {
			out.push(byte);
			i += 3;
			continue;
		}
		match bytes.get(i + 1) {
			Some(&ch) if ch == b' ' || RESERVED.contains(&ch) => {
				out.push(ch);
				i += 2;
			}
			_ => return Err(syntax(value, "invalid escape sequence")),
		}
	}
	String::from_utf8(out).map_err(|_| syntax(value, "escaped bytes are not valid UTF-8"))
}

/// Find the `=` ending the attribute type that starts at `start`.
fn scan_key(bytes: &[u8], start: usize) -> Option<usize> {
	for (offset, byte) in bytes.get(start..)?.iter().enumerate() {
		match byte {
			b'=' => return Some(start + offset),
			b',' | b';' | b'+' => return None,
			_ => {}
		}
	}
	None
}

/// Scan the attribute value starting at `start`. Returns the raw, still
/// escaped value with surrounding whitespace removed and the index of the
/// separator that ended it (or the string length).
fn scan_value(dn: &str, start: usize) -> Result<(&str, usize), Error> {
	let bytes = dn.as_bytes();
	let mut i = start;
	while bytes.get(i) == Some(&b' ') {
		i += 1;
	}
	let value_start = i;

	if bytes.get(i) == Some(&b'"') {
		i += 1;
		loop {
			match bytes.get(i) {
				None => return Err(syntax(dn, "unterminated quoted value")),
				Some(b'\\') if i + 1 >= bytes.len() => {
					return Err(syntax(dn, "dangling escape"));
				}
				Some(b'\\') => i += 2,
				Some(b'"') => break,
				Some(_) => i += 1,
			}
		}
		let raw = &dn[value_start + 1..i];
		i += 1;
		while bytes.get(i) == Some(&b' ') {
			i += 1;
		}
		return match bytes.get(i) {
			None | Some(b',' | b';' | b'+') => Ok((raw, i)),
			Some(_) => Err(syntax(dn, "unexpected characters after quoted value")),
		};
	}

	loop {
		match bytes.get(i) {
			None | Some(b',' | b';' | b'+') => break,
			Some(b'\\') if i + 1 >= bytes.len() => return Err(syntax(dn, "dangling escape")),
			Some(b'\\') => i += 2,
			Some(b'=' | b'"' | b'<' | b'>') => {
				return Err(syntax(dn, "unescaped reserved character in value"));
			}
			Some(_) => i += 1,
		}
	}

	let mut end = i;
	while end > value_start && bytes[end - 1] == b' ' && !is_escaped(bytes, value_start, end - 1) {
		end -= 1;
	}
	Ok((&dn[value_start..end], i))
}

/// Whether the byte at `index` is preceded by an odd number of backslashes.
fn is_escaped(bytes: &[u8], from: usize, index: usize) -> bool {
	bytes[from..index].iter().rev().take_while(|byte| **byte == b'\\').count() % 2 == 1
}

/// Attribute types are either a keyword (`cn`, `given-name`) or a numeric
/// OID (`2.5.4.3`).
fn is_valid_attribute_type(attribute: &str) -> bool {
	let mut chars = attribute.chars();
	match chars.next() {
		Some(first) if first.is_ascii_alphabetic() => {
			chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
		}
		Some(first) if first.is_ascii_digit() => attribute
			.split('.')
			.all(|arc| !arc.is_empty() && arc.bytes().all(|byte| byte.is_ascii_digit())),
		_ => false,
	}
}

/// Whether `rdns` ends with the components of `suffix`.
fn ends_with(rdns: &[Rdn], suffix: &[Rdn]) -> bool {
	rdns.len() >= suffix.len() && rdns[rdns.len() - suffix.len()..] == *suffix
}

/// Reject RDNs without any pairs.
fn non_empty(rdn: Rdn) -> Result<Rdn, Error> {
	if rdn.is_empty() {
		return Err(Error::DnSyntax("a DN cannot contain an empty RDN".to_owned()));
	}
	Ok(rdn)
}

/// Error for a component index that does not exist.
fn out_of_range(index: usize) -> Error {
	Error::Precondition(format!("DN component index {index} is out of range"))
}

/// Syntax error for the given input.
fn syntax(input: &str, reason: &str) -> Error {
	Error::DnSyntax(format!("{input:?}: {reason}"))
}
