//! Config for the LDAP client.
use std::{
	fs::File,
	io::BufReader,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
	dn::{CaseFold, Dn},
	error::Error,
};

/// LDAP configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// The DN to bind as. Binds anonymously if unset
	#[serde(default)]
	pub bind_dn: Option<String>,
	/// The password for the bind DN
	#[serde(default)]
	pub bind_password: Option<String>,
	/// The DN below which all operations take place
	pub base_dn: String,
	/// How attribute types in DNs created by the session are cased
	#[serde(default)]
	pub case_fold: CaseFold,
	/// How attribute names of search results are cased
	#[serde(default)]
	pub attribute_name_treatment: NameTreatment,
}

impl Config {
	/// The configured base DN, with the configured case folding.
	pub fn base_dn(&self) -> Result<Dn, Error> {
		Dn::parse_with(&self.base_dn, self.case_fold)
	}
}

/// Casing of attribute names in search results.
///
/// Arbitrary renaming functions can be set on
/// [`Ldap`](crate::ldap::Ldap) directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameTreatment {
	/// Lowercase attribute names
	#[default]
	Lower,
	/// Uppercase attribute names
	Upper,
	/// Keep the names the server sent
	Native,
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	#[serde(default)]
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		ConnectionConfig {
			timeout: 5,
			operation_timeout: Duration::from_secs(5),
			tls: TLSConfig::default(),
		}
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let client_identity =
				match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
					(Some(key_path), Some(cert_path)) => Some((key_path, cert_path)),
					(None, None) => None,
					_ => Err(Error::Invalid(
						"Both a client certificate and key file in PKCS8 format must be specified"
							.to_owned(),
					))?,
				};

			let mut roots = RootCertStore::empty();
			let (added, _) = roots.add_parsable_certificates(&read_certificates(path)?);
			if added == 0 {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}
			let builder = ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let config = match client_identity {
				Some((key_path, cert_path)) => {
					let certificates =
						read_certificates(cert_path)?.into_iter().map(Certificate).collect();
					let key = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(
						key_path,
					)?))?
					.into_iter()
					.next()
					.map(PrivateKey)
					.ok_or_else(|| Error::Invalid("Could not read client key".to_owned()))?;
					builder.with_client_auth_cert(certificates, key)?
				}
				None => builder.with_no_client_auth(),
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

/// Read all PEM encoded certificates from a file.
fn read_certificates(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
	let certificates = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))?;
	if certificates.is_empty() {
		return Err(Error::Invalid(format!("No certificate found in {}", path.display())));
	}
	Ok(certificates)
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used, clippy::items_after_statements)]

	use std::{io::ErrorKind, path::PathBuf};

	use super::{Config, ConnectionConfig, NameTreatment, TLSConfig};
	use crate::{dn::CaseFold, error};

	#[test]
	fn deserialize_minimal() -> Result<(), Box<dyn std::error::Error>> {
		let config: Config = serde_json::from_str(
			r#"{ "url": "ldap://localhost:1389", "base_dn": "dc=example,dc=org" }"#,
		)?;
		assert_eq!(config.case_fold, CaseFold::None);
		assert_eq!(config.attribute_name_treatment, NameTreatment::Lower);
		assert_eq!(config.connection.timeout, 5);
		assert!(config.bind_dn.is_none());
		assert_eq!(config.base_dn()?.to_string(), "dc=example,dc=org");
		Ok(())
	}

	#[test]
	fn deserialize_full() -> Result<(), Box<dyn std::error::Error>> {
		let config: Config = serde_json::from_str(
			r#"{
				"url": "ldaps://ldap.example.org",
				"connection": {
					"timeout": 10,
					"operation_timeout": { "secs": 2, "nanos": 0 },
					"tls": { "starttls": true, "no_tls_verify": false }
				},
				"bind_dn": "cn=admin,dc=example,dc=org",
				"bind_password": "adminpassword",
				"base_dn": "dc=example,dc=org",
				"case_fold": "upper",
				"attribute_name_treatment": "native"
			}"#,
		)?;
		assert!(config.connection.tls.starttls);
		assert_eq!(config.connection.operation_timeout.as_secs(), 2);
		assert_eq!(config.attribute_name_treatment, NameTreatment::Native);
		assert_eq!(config.base_dn()?.to_string(), "DC=example,DC=org");
		Ok(())
	}

	#[test]
	fn test_tls_config() -> Result<(), Box<dyn std::error::Error>> {
		// no custom TLS setup
		ConnectionConfig::default().to_settings()?;

		// invalid crt test
		assert!(matches!(
			ConnectionConfig {
				tls: TLSConfig {
					root_certificates_path: Some(PathBuf::from("src/config.rs")),
					..TLSConfig::default()
				},
				..ConnectionConfig::default()
			}
			.to_settings()
			.err()
			.unwrap(),
			error::Error::Invalid(_)
		));

		// key without certificate
		assert!(matches!(
			ConnectionConfig {
				tls: TLSConfig {
					client_key_path: Some(PathBuf::from("client.key")),
					root_certificates_path: Some(PathBuf::from("RootCA.crt")),
					..TLSConfig::default()
				},
				..ConnectionConfig::default()
			}
			.to_settings()
			.err()
			.unwrap(),
			error::Error::Invalid(_)
		));

		// invalid path test
		assert!(matches!(
			ConnectionConfig {
				tls: TLSConfig {
					client_key_path: Some(PathBuf::from("invalid_path")),
					client_certificate_path: Some(PathBuf::from("invalid_path")),
					root_certificates_path: Some(PathBuf::from("invalid_path")),
					starttls: false,
					no_tls_verify: false,
				},
				timeout: 5,
				operation_timeout: std::time::Duration::from_secs(5),
			}
			.to_settings()
			.err()
			.unwrap(),
			error::Error::Io(io_err) if io_err.kind() == ErrorKind::NotFound
		));

		Ok(())
	}
}
