use std::{error::Error, sync::Arc};

use ldap3::{LdapConn, Scope, SearchEntry};
use ldap_directory::{
	config::{Config, ConnectionConfig, NameTreatment},
	dn::CaseFold,
	Ldap, SessionRef,
};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

pub const BASE_DN: &str = "dc=example,dc=org";

pub fn init_tracing() {
	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_filter).try_init();
}

pub fn config() -> Config {
	Config {
		url: Url::parse("ldap://localhost:1389").unwrap(),
		connection: ConnectionConfig::default(),
		bind_dn: Some("cn=admin,dc=example,dc=org".to_owned()),
		bind_password: Some("adminpassword".to_owned()),
		base_dn: BASE_DN.to_owned(),
		case_fold: CaseFold::None,
		attribute_name_treatment: NameTreatment::Lower,
	}
}

pub fn session() -> Result<SessionRef, Box<dyn Error>> {
	Ok(Arc::new(Ldap::connect(&config())?))
}

pub fn ldap_connect() -> Result<LdapConn, Box<dyn Error>> {
	let mut ldap = LdapConn::new("ldap://localhost:1389")?;
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword")?.success()?;
	Ok(ldap)
}

pub fn ldap_add_organizational_unit(ldap: &mut LdapConn, ou: &str) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={ou},{BASE_DN}"),
		vec![("objectClass", ["organizationalUnit"].into()), ("ou", [ou].into())],
	)?
	.success()?;
	Ok(())
}

/// Delete an organizational unit with everything below it, ignoring a
/// missing unit.
pub fn ldap_delete_organizational_unit(ldap: &mut LdapConn, ou: &str) -> Result<(), Box<dyn Error>> {
	let base = format!("ou={ou},{BASE_DN}");
	let Ok(result) = ldap.search(&base, Scope::Subtree, "(objectClass=*)", vec!["1.1"]) else {
		return Ok(());
	};
	let Ok((entries, _)) = result.success() else {
		return Ok(());
	};
	let mut dns: Vec<String> = entries.into_iter().map(|entry| SearchEntry::construct(entry).dn).collect();
	dns.sort_by_key(|dn| std::cmp::Reverse(dn.matches(',').count()));
	for dn in dns {
		ldap.delete(&dn)?.success()?;
	}
	Ok(())
}

pub fn ldap_add_user(ldap: &mut LdapConn, ou: &str, cn: &str, sn: &str) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={cn},ou={ou},{BASE_DN}"),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("cn", [cn].into()),
			("sn", [sn].into()),
		],
	)?
	.success()?;
	Ok(())
}

pub fn ldap_search_user(
	ldap: &mut LdapConn,
	ou: &str,
	cn: &str,
) -> Result<Option<SearchEntry>, Box<dyn Error>> {
	let result = ldap.search(
		&format!("cn={cn},ou={ou},{BASE_DN}"),
		Scope::Base,
		"(objectClass=inetOrgPerson)",
		vec!["*"],
	)?;
	if result.1.rc == 32 {
		return Ok(None);
	}
	let (entries, _) = result.success()?;
	Ok(entries.into_iter().next().map(SearchEntry::construct))
}
