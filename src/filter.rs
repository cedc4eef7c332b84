//! Search filter construction.
//!
//! Filters are immutable values. Composition methods such as
//! [`Filter::negate`] or [`Filter::add_and`] leave the receiver untouched and
//! return a new filter, so a filter can be reused inside several composites.
//!
//! ```
//! use ldap_directory::filter::Filter;
//!
//! let filter = Filter::and([Filter::equals("objectClass", "person"), Filter::begins("cn", "Jo")]);
//! assert_eq!(filter.to_string(), "(&(objectClass=person)(cn=Jo*))");
//! ```
use std::fmt;

use crate::{converter, error::Error};

/// An LDAP search filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
	/// A pre-formed clause without its enclosing parentheses, e.g. `uid=foo`
	String(String),
	/// The result of substituting escaped arguments into a mask. Serialized
	/// verbatim, the mask is expected to carry its own parentheses.
	Mask(String),
	/// All sub-filters must match
	And(Vec<Filter>),
	/// Any sub-filter must match
	Or(Vec<Filter>),
	/// The wrapped filter must not match
	Not(Box<Filter>),
}

impl Filter {
	/// Wrap a filter clause body. The body is not escaped.
	#[must_use]
	pub fn string(body: impl Into<String>) -> Self {
		Filter::String(body.into())
	}

	/// Substitute `args` into a printf-style `mask`, escaping every argument
	/// with [`Filter::escape_value`] first.
	///
	/// Supported conversions are `%s`, the positional form `%1$s` and the
	/// literal `%%`. Missing arguments or any other conversion are an error.
	pub fn mask<S: AsRef<str>>(mask: &str, args: &[S]) -> Result<Self, Error> {
		let args: Vec<String> = args.iter().map(|arg| escape_value(arg.as_ref())).collect();
		Ok(Filter::Mask(format_mask(mask, &args)?))
	}

	/// Combine filters with a logical AND. Strings are promoted to
	/// [`Filter::String`].
	#[must_use]
	pub fn and<I, F>(filters: I) -> Self
	where
		I: IntoIterator<Item = F>,
		F: Into<Filter>,
	{
		Filter::And(filters.into_iter().map(Into::into).collect())
	}

	/// Combine filters with a logical OR. Strings are promoted to
	/// [`Filter::String`].
	#[must_use]
	pub fn or<I, F>(filters: I) -> Self
	where
		I: IntoIterator<Item = F>,
		F: Into<Filter>,
	{
		Filter::Or(filters.into_iter().map(Into::into).collect())
	}

	/// `(attribute=value)`
	#[must_use]
	pub fn equals(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "=", "", value, "")
	}

	/// `(attribute=value*)`
	#[must_use]
	pub fn begins(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "=", "", value, "*")
	}

	/// `(attribute=*value)`
	#[must_use]
	pub fn ends(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "=", "*", value, "")
	}

	/// `(attribute=*value*)`
	#[must_use]
	pub fn contains(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "=", "*", value, "*")
	}

	/// `(attribute>value)`
	#[must_use]
	pub fn greater(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, ">", "", value, "")
	}

	/// `(attribute>=value)`
	#[must_use]
	pub fn greater_or_equal(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, ">=", "", value, "")
	}

	/// `(attribute<value)`
	#[must_use]
	pub fn less(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "<", "", value, "")
	}

	/// `(attribute<=value)`
	#[must_use]
	pub fn less_or_equal(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "<=", "", value, "")
	}

	/// `(attribute~=value)`
	#[must_use]
	pub fn approx(attribute: &str, value: &str) -> Self {
		Self::clause(attribute, "~=", "", value, "")
	}

	/// Presence filter `(attribute=*)`.
	#[must_use]
	pub fn any(attribute: &str) -> Self {
		Filter::String(format!("{attribute}=*"))
	}

	/// Build a simple clause with an escaped value.
	fn clause(attribute: &str, operator: &str, prepend: &str, value: &str, append: &str) -> Self {
		Filter::String(format!("{attribute}{operator}{prepend}{}{append}", escape_value(value)))
	}

	/// The negation of this filter. Negating a [`Filter::Not`] returns the
	/// wrapped filter instead of nesting another negation.
	#[must_use]
	pub fn negate(&self) -> Self {
		match self {
			Filter::Not(inner) => (**inner).clone(),
			other => Filter::Not(Box::new(other.clone())),
		}
	}

	/// A new AND of this filter followed by `filters`.
	#[must_use]
	pub fn add_and<I, F>(&self, filters: I) -> Self
	where
		I: IntoIterator<Item = F>,
		F: Into<Filter>,
	{
		Filter::And(std::iter::once(self.clone()).chain(filters.into_iter().map(Into::into)).collect())
	}

	/// A new OR of this filter followed by `filters`.
	#[must_use]
	pub fn add_or<I, F>(&self, filters: I) -> Self
	where
		I: IntoIterator<Item = F>,
		F: Into<Filter>,
	{
		Filter::Or(std::iter::once(self.clone()).chain(filters.into_iter().map(Into::into)).collect())
	}

	/// A copy of this logical filter with `filter` appended to its operands.
	///
	/// Only [`Filter::And`] and [`Filter::Or`] have operands to add to.
	pub fn add_filter(&self, filter: impl Into<Filter>) -> Result<Self, Error> {
		let mut new = self.clone();
		match &mut new {
			Filter::And(filters) | Filter::Or(filters) => filters.push(filter.into()),
			other => {
				return Err(Error::Filter(format!("cannot add an operand to {other}")));
			}
		}
		Ok(new)
	}

	/// Escape a value for use inside a filter: `\`, `*`, `(` and `)` become
	/// `\5c`, `\2a`, `\28` and `\29`, control characters `\XX`.
	#[must_use]
	pub fn escape_value(value: &str) -> String {
		escape_value(value)
	}

	/// Escape every value in a list, preserving order.
	#[must_use]
	pub fn escape_values<S: AsRef<str>>(values: &[S]) -> Vec<String> {
		values.iter().map(|value| escape_value(value.as_ref())).collect()
	}

	/// Decode the `\XX` hex escapes of a filter value.
	pub fn unescape_value(value: &str) -> Result<String, Error> {
		converter::hex32_to_asc(value)
	}

	/// Unescape every value in a list, preserving order.
	pub fn unescape_values<S: AsRef<str>>(values: &[S]) -> Result<Vec<String>, Error> {
		values.iter().map(|value| converter::hex32_to_asc(value.as_ref())).collect()
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Filter::String(body) => write!(f, "({body})"),
			Filter::Mask(text) => f.write_str(text),
			Filter::And(filters) => write_logical(f, '&', filters),
			Filter::Or(filters) => write_logical(f, '|', filters),
			Filter::Not(inner) => write!(f, "(!{inner})"),
		}
	}
}

impl From<&str> for Filter {
	fn from(body: &str) -> Self {
		Filter::String(body.to_owned())
	}
}

impl From<String> for Filter {
	fn from(body: String) -> Self {
		Filter::String(body)
	}
}

/// Write a logical filter, operands directly follow each other.
fn write_logical(f: &mut fmt::Formatter<'_>, symbol: char, filters: &[Filter]) -> fmt::Result {
	write!(f, "({symbol}")?;
	for filter in filters {
		write!(f, "{filter}")?;
	}
	f.write_str(")")
}

/// Escape a filter value, see [`Filter::escape_value`].
fn escape_value(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for ch in value.chars() {
		match ch {
			'\\' => escaped.push_str("\\5c"),
			'*' => escaped.push_str("\\2a"),
			'(' => escaped.push_str("\\28"),
			')' => escaped.push_str("\\29"),
			ch => escaped.push(ch),
		}
	}
	converter::asc_to_hex32(&escaped)
}

/// Substitute `args` into `mask` as described on [`Filter::mask`].
fn format_mask(mask: &str, args: &[String]) -> Result<String, Error> {
	let mut out = String::with_capacity(mask.len());
	let mut chars = mask.chars().peekable();
	let mut next = 0;
	while let Some(ch) = chars.next() {
		if ch != '%' {
			out.push(ch);
			continue;
		}
		let mut digits = String::new();
		while let Some(digit) = chars.next_if(char::is_ascii_digit) {
			digits.push(digit);
		}
		let index = if digits.is_empty() {
			None
		} else if chars.next_if_eq(&'$').is_some() {
			let position = digits.parse::<usize>().ok().filter(|position| *position > 0);
			let position = position
				.ok_or_else(|| Error::Filter(format!("invalid argument position in {mask:?}")))?;
			Some(position - 1)
		} else {
			return Err(Error::Filter(format!("unsupported conversion in {mask:?}")));
		};
		match chars.next() {
			Some('%') if index.is_none() => out.push('%'),
			Some('s') => {
				let index = index.unwrap_or_else(|| {
					next += 1;
					next - 1
				});
				let arg = args
					.get(index)
					.ok_or_else(|| Error::Filter(format!("too few arguments for {mask:?}")))?;
				out.push_str(arg);
			}
			_ => return Err(Error::Filter(format!("unsupported conversion in {mask:?}"))),
		}
	}
	Ok(out)
}
