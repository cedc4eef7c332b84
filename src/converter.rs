//! Conversion between native values and their LDAP string representations.
//!
//! Only the boundary of value coercion lives here: hex escaping of control
//! characters shared by the DN and filter escaping rules, booleans, and
//! generalized time.
use std::fmt::Write as _;

use time::{format_description::FormatItem, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::Error;

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[FormatItem<'_>] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// Generalized time with an explicit numeric offset instead of `Z`
const OFFSET_TIME_FORMAT: &[FormatItem<'_>] = time::macros::format_description!(
	"[year][month][day][hour][minute][second][offset_hour sign:mandatory][offset_minute]"
);

/// Replace every ASCII control character (below 0x20) with a `\XX` hex
/// escape.
#[must_use]
pub fn asc_to_hex32(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for ch in value.chars() {
		if (ch as u32) < 0x20 {
			push_hex(&mut out, ch as u8);
		} else {
			out.push(ch);
		}
	}
	out
}

/// Decode every `\XX` hex escape back into the byte it stands for.
///
/// Consecutive escapes are collected before decoding so multi-byte UTF-8
/// sequences survive. Fails if the decoded bytes are not valid UTF-8.
pub fn hex32_to_asc(value: &str) -> Result<String, Error> {
	let bytes = value.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'\\' {
			if let Some(byte) = hex_pair(bytes, i + 1) {
				out.push(byte);
				i += 3;
				continue;
			}
		}
		out.push(bytes[i]);
		i += 1;
	}
	String::from_utf8(out).map_err(|_| Error::Invalid(format!("{value} is not valid UTF-8")))
}

/// Append `\xx` (lowercase hex) for the given byte.
pub(crate) fn push_hex(out: &mut String, byte: u8) {
	// Writing into a String cannot fail
	let _ = write!(out, "\\{byte:02x}");
}

/// Decode the two hex digits starting at `at`, if there are any.
pub(crate) fn hex_pair(bytes: &[u8], at: usize) -> Option<u8> {
	let high = (*bytes.get(at)? as char).to_digit(16)?;
	let low = (*bytes.get(at + 1)? as char).to_digit(16)?;
	u8::try_from(high * 16 + low).ok()
}

/// Convert a boolean to its LDAP representation.
#[must_use]
pub fn to_ldap_bool(value: bool) -> &'static str {
	if value {
		"TRUE"
	} else {
		"FALSE"
	}
}

/// Parse an LDAP boolean. Only the exact strings `TRUE` and `FALSE` are
/// accepted.
pub fn from_ldap_bool(value: &str) -> Result<bool, Error> {
	match value {
		"TRUE" => Ok(true),
		"FALSE" => Ok(false),
		other => Err(Error::Invalid(format!("{other} is not an LDAP boolean"))),
	}
}

/// Format a timestamp as generalized time. With `utc` set, the value is
/// converted to UTC first; a zero offset is always written as `Z`.
pub fn to_ldap_datetime(value: OffsetDateTime, utc: bool) -> Result<String, Error> {
	let value = if utc { value.to_offset(UtcOffset::UTC) } else { value };
	if value.offset().is_utc() {
		Ok(value.format(&TIME_FORMAT)?)
	} else {
		Ok(value.format(&OFFSET_TIME_FORMAT)?)
	}
}

/// Parse generalized time ending either in `Z` or a `±HHMM` offset.
pub fn from_ldap_datetime(value: &str) -> Result<OffsetDateTime, Error> {
	let value = value.trim();
	if value.ends_with('Z') {
		Ok(PrimitiveDateTime::parse(value, &TIME_FORMAT)?.assume_utc())
	} else {
		Ok(OffsetDateTime::parse(value, &OFFSET_TIME_FORMAT)?)
	}
}
