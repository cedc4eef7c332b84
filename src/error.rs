//! Error codes

/// LDAP result code `noSuchObject`
pub const NO_SUCH_OBJECT: u32 = 32;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A distinguished name did not conform to the string representation
	/// grammar, or an RDN could not be assembled from its parts.
	#[error("Invalid DN syntax: {0}")]
	DnSyntax(String),
	/// A filter could not be constructed from the given input.
	#[error("Invalid filter: {0}")]
	Filter(String),
	/// The directory server rejected an operation.
	#[error("{context} failed: {text} (result code {code})")]
	Operation {
		/// The LDAP result code reported by the server
		code: u32,
		/// The diagnostic message reported by the server
		text: String,
		/// What was being attempted
		context: String,
	},
	/// An operation was attempted that the target object does not permit,
	/// e.g. changing an attribute that is part of the RDN.
	#[error("Precondition failed: {0}")]
	Precondition(String),
	/// Sorting a result set failed.
	#[error("Sorting result set failed: {0}")]
	Sort(String),
	/// An online operation was requested on a node without a session.
	#[error("No directory session attached")]
	Detached,
	/// A required attribute or entry was missing.
	#[error("Missing data")]
	Missing,
	/// The contents of an attribute or setting did not conform to the
	/// expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// A time value was malformed and failed to parse.
	#[error("Malformed time")]
	Time(#[from] time::error::Parse),
	/// A time value could not be formatted.
	#[error("Time formatting failed")]
	TimeFormat(#[from] time::error::Format),
	/// TLS configuration could not be built.
	#[error(transparent)]
	Tls(#[from] rustls::Error),
	/// Reading certificates or keys failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Serializing a node failed.
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(ldap3::LdapError),
}

impl Error {
	/// Create an [`Error::Operation`] from a non-successful result.
	pub(crate) fn operation(result: &ldap3::LdapResult, context: impl Into<String>) -> Self {
		Error::Operation { code: result.rc, text: result.text.clone(), context: context.into() }
	}

	/// The LDAP result code, if this error originates from the server.
	#[must_use]
	pub fn code(&self) -> Option<u32> {
		match self {
			Error::Operation { code, .. } => Some(*code),
			_ => None,
		}
	}

	/// Check if this error indicates the addressed entry does not exist.
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		matches!(self, Error::Operation { code: NO_SUCH_OBJECT, .. })
	}

	/// Check if this error was raised while parsing or constructing a DN or
	/// filter.
	#[must_use]
	pub fn is_syntax_error(&self) -> bool {
		matches!(self, Error::DnSyntax(_) | Error::Filter(_))
	}

	/// Check if this error is a violated contract, such as modifying a
	/// protected attribute.
	#[must_use]
	pub fn is_precondition(&self) -> bool {
		matches!(self, Error::Precondition(_) | Error::Sort(_))
	}
}

impl From<ldap3::LdapError> for Error {
	fn from(err: ldap3::LdapError) -> Self {
		match err {
			ldap3::LdapError::LdapResult { result } => Error::operation(&result, "LDAP operation"),
			err => Error::Ldap(err),
		}
	}
}
