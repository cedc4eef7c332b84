#![allow(
	clippy::dbg_macro,
	clippy::expect_used,
	clippy::missing_docs_in_private_items,
	clippy::print_stderr,
	clippy::print_stdout,
	clippy::unwrap_used,
	clippy::bool_assert_comparison
)]
use std::error::Error;

use ldap3::Scope;
use ldap_directory::{
	entry::SearchEntryExt,
	filter::Filter,
	node::{Node, SessionNodes},
	tree::walk,
	Dn, Session,
};
use serial_test::serial;

mod common;

use common::{
	init_tracing, ldap_add_organizational_unit, ldap_add_user, ldap_connect,
	ldap_delete_organizational_unit, ldap_search_user, session,
};

#[ignore = "docker"]
#[test]
#[serial]
fn node_lifecycle_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect()?;
	ldap_delete_organizational_unit(&mut ldap, "users")?;
	ldap_add_organizational_unit(&mut ldap, "users")?;
	let session = session()?;

	let mut node = Node::create(Dn::parse("cn=user01,ou=users,dc=example,dc=org")?, &["inetOrgPerson"])?;
	node.set_attribute("sn", &["User1"])?;
	node.set_attribute("displayName", &["MyName1"])?;
	node.update(Some(session.clone()))?;
	assert!(!node.is_new());

	let entry = ldap_search_user(&mut ldap, "users", "user01")?.unwrap();
	assert_eq!(entry.attr_first("cn"), Some("user01"));
	assert_eq!(entry.attr_first("displayName"), Some("MyName1"));

	node.set_attribute("displayName", &["MyName2"])?;
	node.delete_attribute("sn")?;
	node.set_attribute("sn", &["Renamed"])?;
	node.append_to_attribute("mail", &["user01@example.org"])?;
	node.update(None)?;

	let entry = ldap_search_user(&mut ldap, "users", "user01")?.unwrap();
	assert_eq!(entry.attr_first("displayName"), Some("MyName2"));
	assert_eq!(entry.attr_first("sn"), Some("Renamed"));
	assert_eq!(entry.attr_first("mail"), Some("user01@example.org"));

	node.rename(Dn::parse("cn=user02,ou=users,dc=example,dc=org")?);
	node.set_attribute("displayName", &["MyName3"])?;
	node.update(None)?;
	assert!(ldap_search_user(&mut ldap, "users", "user01")?.is_none());
	let entry = ldap_search_user(&mut ldap, "users", "user02")?.unwrap();
	assert_eq!(entry.attr_first("displayName"), Some("MyName3"));

	let mut reloaded = session.node(node.dn())?;
	assert_eq!(reloaded.attribute("cn"), ["user02"]);
	assert_eq!(reloaded.parent()?.dn().to_string(), "ou=users,dc=example,dc=org");

	reloaded.delete();
	reloaded.update(None)?;
	assert!(!reloaded.exists()?);
	assert!(ldap_search_user(&mut ldap, "users", "user02")?.is_none());

	ldap_delete_organizational_unit(&mut ldap, "users")?;
	Ok(())
}

#[ignore = "docker"]
#[test]
#[serial]
fn search_collection_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect()?;
	ldap_delete_organizational_unit(&mut ldap, "users")?;
	ldap_add_organizational_unit(&mut ldap, "users")?;
	ldap_add_user(&mut ldap, "users", "user10", "Ten")?;
	ldap_add_user(&mut ldap, "users", "user9", "Nine")?;
	ldap_add_user(&mut ldap, "users", "user11", "Eleven")?;
	let session = session()?;

	let base = Dn::parse("ou=users,dc=example,dc=org")?;
	let filter = Filter::equals("objectClass", "inetOrgPerson");
	assert_eq!(session.count(&filter, &base, Scope::OneLevel)?, 3);

	let mut entries = session.search_entries(&filter, &base, Scope::OneLevel, &["cn", "sn"], Some("cn"))?;
	let names: Vec<String> =
		entries.to_vec()?.iter().map(|entry| entry.attr_first("cn").unwrap().to_owned()).collect();
	assert_eq!(names, ["user9", "user10", "user11"]);
	assert_eq!(entries.to_vec()?.len(), 3);

	let none = Filter::equals("cn", "nobody");
	let mut empty = session.search_entries(&none, &base, Scope::OneLevel, &[], None)?;
	assert_eq!(empty.count(), 0);
	assert!(empty.get_first()?.is_none());

	let either = Filter::or([Filter::equals("cn", "user9"), Filter::equals("cn", "user11")]);
	let mut nodes = session.search_nodes(&either, &base, Scope::Subtree, &["*"], None)?;
	for node in nodes.iter() {
		assert!(node?.is_attached());
	}
	assert_eq!(nodes.count(), 2);

	let missing = Dn::parse("ou=missing,dc=example,dc=org")?;
	assert!(session.search(&filter, &missing, Scope::Base, &[], None).unwrap_err().is_not_found());
	assert_eq!(session.get_entry(&missing, &[], false)?, None);

	ldap_delete_organizational_unit(&mut ldap, "users")?;
	Ok(())
}

#[ignore = "docker"]
#[test]
#[serial]
fn subtree_operations_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect()?;
	ldap_delete_organizational_unit(&mut ldap, "users")?;
	ldap_delete_organizational_unit(&mut ldap, "staff")?;
	ldap_add_organizational_unit(&mut ldap, "users")?;
	ldap_add_user(&mut ldap, "users", "user01", "One")?;
	ldap_add_user(&mut ldap, "users", "user02", "Two")?;
	let session = session()?;

	let mut root = session.node(&Dn::parse("ou=users,dc=example,dc=org")?)?;
	assert!(root.has_children()?);
	let mut visited = Vec::new();
	walk(&mut root, |node, depth| {
		visited.push((depth, node.rdn_string()));
		Ok(())
	})?;
	assert_eq!(visited, [(0, "ou=users".to_owned()), (1, "cn=user01".to_owned()), (1, "cn=user02".to_owned())]);

	let users = Dn::parse("ou=users,dc=example,dc=org")?;
	let staff = Dn::parse("ou=staff,dc=example,dc=org")?;
	session.rename(&users, &staff, true, true)?;
	assert!(!session.exists(&users)?);
	assert!(session.exists(&Dn::parse("cn=user01,ou=staff,dc=example,dc=org")?)?);

	assert!(session.delete(&staff, false).is_err());
	session.delete(&staff, true)?;
	assert!(!session.exists(&staff)?);
	Ok(())
}
