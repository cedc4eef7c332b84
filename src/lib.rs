//! Object oriented access to LDAP directories.
//!
//! The library models the pieces a directory client keeps reaching for:
//! distinguished names that can be parsed, edited and serialized losslessly
//! ([`dn`]), search filters built from composable values ([`filter`]),
//! result sets that are decoded lazily and cached so iterating them again
//! does not go back to the server ([`collection`]), and editable entries that
//! track their own changes and write them back with the right mix of add,
//! delete, rename and modify operations ([`node`]).
//!
//! Everything that talks to a server goes through the [`Session`] trait.
//! [`Ldap`] implements it on top of a blocking [`ldap3::LdapConn`].
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate is
//! an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ldap_directory::{
//!     config::{Config, ConnectionConfig, NameTreatment},
//!     dn::CaseFold,
//!     filter::Filter,
//!     ldap3::Scope,
//!     node::SessionNodes,
//!     Ldap, SessionRef,
//! };
//! use url::Url;
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldap://localhost:1389")?,
//!     connection: ConnectionConfig::default(),
//!     bind_dn: Some("cn=admin,dc=example,dc=org".to_owned()),
//!     bind_password: Some("adminpassword".to_owned()),
//!     base_dn: "dc=example,dc=org".to_owned(),
//!     case_fold: CaseFold::None,
//!     attribute_name_treatment: NameTreatment::Lower,
//! };
//! let session: SessionRef = Arc::new(Ldap::connect(&config)?);
//!
//! let filter = Filter::equals("objectClass", "inetOrgPerson").add_and([Filter::begins("cn", "A")]);
//! let mut people =
//!     session.search_nodes(&filter, session.base_dn(), Scope::Subtree, &["*"], Some("cn"))?;
//! for person in people.iter() {
//!     let mut person = person?;
//!     person.set_attribute("description", &["starts with an A"])?;
//!     person.update(None)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Operations block the calling thread. A [`Ldap`] serializes access to its
//!   connection, so sharing one between threads does not parallelize
//!   anything.
//! * Search results are held in memory completely, paging controls are not
//!   used.
//! * Schema information is not consulted, attribute names are compared
//!   case-insensitively and values exactly.

pub mod collection;
pub mod config;
pub mod converter;
pub mod cursor;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod node;
pub mod session;
pub mod tree;

#[cfg(test)]
mod testing;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	collection::Collection,
	config::{Config, ConnectionConfig},
	dn::{CaseFold, Dn, Rdn},
	entry::{Entry, SearchEntryExt},
	error::Error,
	filter::Filter,
	ldap::Ldap,
	node::{Node, SessionNodes},
	session::{Session, SessionRef},
};
