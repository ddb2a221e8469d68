//! Writing to the directory.
//!
//! Every method issues single add, modify, delete or modify-DN requests. When
//! one logical change needs several of them (creating nested OUs) they run in
//! order and the first failure is returned, naming the step that failed.

use std::{collections::HashSet, net::Ipv4Addr};

use ldap3::{Mod, Scope};
use tracing::{debug, info, instrument};

use crate::{
	attribute::ip2int,
	client::AdClient,
	config::ConnectionParams,
	connection::Connector,
	dn::{dn2domain, escape_value, Dn, DnError},
	error::{code, Error, Kind},
	filter::Filter,
	model::{attr, UserAccountControl},
	negotiator,
	query::NO_ATTRIBUTES,
};

/// Encode a password the way Active Directory expects it in `unicodePwd`:
/// surrounded by double quotes and encoded as UTF-16LE.
#[must_use]
pub fn encode_password(password: &str) -> Vec<u8> {
	format!("\"{password}\"").encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// A set of attribute values in wire form.
fn value_set<V: Into<Vec<u8>>>(values: impl IntoIterator<Item = V>) -> HashSet<Vec<u8>> {
	values.into_iter().map(Into::into).collect()
}

/// One attribute of an add request.
fn attribute<V: Into<Vec<u8>>>(
	name: &str,
	values: impl IntoIterator<Item = V>,
) -> (Vec<u8>, HashSet<Vec<u8>>) {
	(name.as_bytes().to_vec(), value_set(values))
}

/// Replace all values of an attribute.
fn replace<V: Into<Vec<u8>>>(name: &str, values: impl IntoIterator<Item = V>) -> Mod<Vec<u8>> {
	Mod::Replace(name.as_bytes().to_vec(), value_set(values))
}

/// Parse a DN supplied for a mutation.
fn parse_dn(dn: &str) -> Result<Dn, Error> {
	dn.parse().map_err(|err| Error::operational(format!("invalid DN {dn:?}: {err}"), code::PARAMS_ERROR))
}

/// Reject an empty argument before any I/O.
fn require(name: &str, value: &str) -> Result<(), Error> {
	if value.trim().is_empty() {
		Err(Error::operational(format!("{name} cannot be empty"), code::PARAMS_ERROR))
	} else {
		Ok(())
	}
}

/// Check that a DN names an OU below `DC=` components only, leaf first.
fn check_ou_syntax(ou: &str) -> Result<Dn, Error> {
	let syntax_error = |detail: &str| {
		Error::operational(format!("invalid OU {ou:?}: {detail}"), code::OU_SYNTAX_ERROR)
	};
	let dn: Dn = ou.parse().map_err(|err: DnError| syntax_error(&err.to_string()))?;
	if !dn.rdn().is_some_and(|rdn| rdn.matches_attribute("OU")) {
		return Err(syntax_error("must start with OU="));
	}
	let mut in_domain = false;
	for rdn in dn.rdns() {
		if rdn.matches_attribute("DC") {
			in_domain = true;
		} else if !rdn.matches_attribute("OU") || in_domain {
			return Err(syntax_error("only OU= components followed by DC= components are allowed"));
		}
	}
	Ok(dn)
}

/// Generate setters for single valued user attributes.
macro_rules! user_attribute_setters {
	($($(#[$doc:meta])* $name:ident => $attribute:literal;)*) => {
		$(
			$(#[$doc])*
			pub async fn $name(&self, user: &str, value: &str) -> Result<(), Error> {
				self.set_object_attribute(user, $attribute, value).await
			}
		)*
	};
}

impl<K: Connector> AdClient<K> {
	/// Resolve an object given by DN or short name for a mutation.
	async fn resolve(&self, object: &str) -> Result<String, Error> {
		self.get_object_dn(object).await.map_err(|err| err.into_kind(Kind::Operational))
	}

	/// Create a user account, disabled and with a non-expiring password.
	///
	/// The container has to exist. Returns the DN of the new account.
	#[instrument(skip(self))]
	pub async fn create_user(
		&self,
		cn: &str,
		container: &str,
		short_name: &str,
	) -> Result<String, Error> {
		require("common name", cn)?;
		require("short name", short_name)?;
		let container = parse_dn(container)?;
		let session = self.bound(Kind::Operational)?;

		let dn = format!("CN={},{container}", escape_value(cn));
		let control = UserAccountControl::NORMAL_ACCOUNT
			| UserAccountControl::ACCOUNTDISABLE
			| UserAccountControl::DONT_EXPIRE_PASSWORD;
		let attrs = vec![
			attribute(attr::OBJECT_CLASS, ["top", "person", "organizationalPerson", "user"]),
			attribute("cn", [cn]),
			attribute(attr::SAM_ACCOUNT_NAME, [short_name]),
			attribute(
				attr::USER_PRINCIPAL_NAME,
				[format!("{short_name}@{}", dn2domain(&container))],
			),
			attribute(attr::USER_ACCOUNT_CONTROL, [control.bits().to_string()]),
		];
		session.add(&dn, attrs).await.map_err(|err| err.context(&format!("creating user {dn}")))?;
		info!(%dn, "Created user");
		Ok(dn)
	}

	/// Create a group with the server's default group type.
	///
	/// The container has to exist. Returns the DN of the new group.
	#[instrument(skip(self))]
	pub async fn create_group(
		&self,
		cn: &str,
		container: &str,
		short_name: &str,
	) -> Result<String, Error> {
		require("common name", cn)?;
		require("short name", short_name)?;
		let container = parse_dn(container)?;
		let session = self.bound(Kind::Operational)?;

		let dn = format!("CN={},{container}", escape_value(cn));
		let attrs = vec![
			attribute(attr::OBJECT_CLASS, ["top", "group"]),
			attribute("cn", [cn]),
			attribute(attr::SAM_ACCOUNT_NAME, [short_name]),
		];
		session.add(&dn, attrs).await.map_err(|err| err.context(&format!("creating group {dn}")))?;
		info!(%dn, "Created group");
		Ok(dn)
	}

	/// Create a workstation account.
	///
	/// The container has to exist. Returns the DN of the new account.
	#[instrument(skip(self))]
	pub async fn create_computer(&self, name: &str, container: &str) -> Result<String, Error> {
		require("computer name", name)?;
		let container = parse_dn(container)?;
		let session = self.bound(Kind::Operational)?;

		let dn = format!("CN={},{container}", escape_value(name));
		let control =
			UserAccountControl::WORKSTATION_TRUST_ACCOUNT | UserAccountControl::PASSWD_NOTREQD;
		let attrs = vec![
			attribute(
				attr::OBJECT_CLASS,
				["top", "person", "organizationalPerson", "user", "computer"],
			),
			attribute("cn", [name]),
			attribute(attr::SAM_ACCOUNT_NAME, [format!("{}$", name.to_uppercase())]),
			attribute(attr::USER_ACCOUNT_CONTROL, [control.bits().to_string()]),
		];
		session
			.add(&dn, attrs)
			.await
			.map_err(|err| err.context(&format!("creating computer {dn}")))?;
		info!(%dn, "Created computer");
		Ok(dn)
	}

	/// Create an organizational unit and any missing parent OUs.
	///
	/// The DN must consist of `OU=` components followed by `DC=` components,
	/// otherwise [`code::OU_SYNTAX_ERROR`] is returned. Existing OUs are left
	/// alone. Returns the DNs created, parents first; empty when the OU
	/// already existed.
	#[instrument(skip(self))]
	pub async fn create_ou(&self, ou: &str) -> Result<Vec<String>, Error> {
		let dn = check_ou_syntax(ou)?;
		let session = self.bound(Kind::Operational)?;

		let mut missing = Vec::new();
		let mut current = Some(dn);
		while let Some(candidate) = current {
			if !candidate.rdn().is_some_and(|rdn| rdn.matches_attribute("OU")) {
				break;
			}
			let exists = self
				.if_dn_exists(&candidate.to_string(), None)
				.await
				.map_err(|err| err.into_kind(Kind::Operational))?;
			if exists {
				break;
			}
			current = candidate.parent();
			missing.push(candidate);
		}

		let mut created = Vec::new();
		for dn in missing.into_iter().rev() {
			let name = dn.rdn().map(|rdn| rdn.value().to_owned()).unwrap_or_default();
			let dn = dn.to_string();
			let attrs = vec![
				attribute(attr::OBJECT_CLASS, ["top", "organizationalUnit"]),
				attribute(attr::OU, [name]),
			];
			match session.add(&dn, attrs).await {
				Ok(()) => {
					info!(%dn, "Created organizational unit");
					created.push(dn);
				}
				Err(err) if err.code() == code::ENTRY_ALREADY_EXISTS => {
					debug!(%dn, "Organizational unit appeared concurrently");
				}
				Err(err) => return Err(err.context(&format!("creating {dn}"))),
			}
		}
		Ok(created)
	}

	/// Delete the entry at `dn`. Entries with children cannot be deleted.
	#[instrument(skip(self))]
	pub async fn delete_dn(&self, dn: &str) -> Result<(), Error> {
		parse_dn(dn)?;
		let session = self.bound(Kind::Operational)?;
		session.delete(dn).await?;
		info!(%dn, "Deleted entry");
		Ok(())
	}

	/// Give the entry at `dn` a new RDN, e.g. `CN=New Name`, keeping it in
	/// the same container. Returns the new DN.
	#[instrument(skip(self))]
	pub async fn rename_dn(&self, dn: &str, new_rdn: &str) -> Result<String, Error> {
		let current = parse_dn(dn)?;
		let rdn = parse_dn(new_rdn)?;
		if rdn.rdns().len() != 1 {
			return Err(Error::operational(
				format!("{new_rdn:?} is not a single RDN"),
				code::PARAMS_ERROR,
			));
		}
		let session = self.bound(Kind::Operational)?;
		session.modify_dn(dn, new_rdn, None).await?;
		let new_dn = match current.parent() {
			Some(parent) => format!("{rdn},{parent}"),
			None => rdn.to_string(),
		};
		info!(old = %dn, new = %new_dn, "Renamed entry");
		Ok(new_dn)
	}

	/// Change the common name of an object given by DN or short name.
	async fn rename_cn(&self, object: &str, new_cn: &str) -> Result<String, Error> {
		require("common name", new_cn)?;
		let dn = self.resolve(object).await?;
		self.rename_dn(&dn, &format!("CN={}", escape_value(new_cn))).await
	}

	/// Change the common name of a user. The logon names stay as they are.
	pub async fn rename_user(&self, user: &str, new_cn: &str) -> Result<String, Error> {
		self.rename_cn(user, new_cn).await
	}

	/// Change the common name of a group.
	pub async fn rename_group(&self, group: &str, new_cn: &str) -> Result<String, Error> {
		self.rename_cn(group, new_cn).await
	}

	/// Move an object into another container, keeping its RDN. Returns the
	/// new DN.
	#[instrument(skip(self))]
	pub async fn move_object(&self, object: &str, new_container: &str) -> Result<String, Error> {
		let container = parse_dn(new_container)?;
		let dn = self.resolve(object).await?;
		let rdn = parse_dn(&dn)?
			.rdn()
			.map(ToString::to_string)
			.ok_or_else(|| Error::operational(format!("{dn:?} has no RDN"), code::PARAMS_ERROR))?;
		let session = self.bound(Kind::Operational)?;
		session.modify_dn(&dn, &rdn, Some(new_container)).await?;
		let new_dn = format!("{rdn},{container}");
		info!(old = %dn, new = %new_dn, "Moved entry");
		Ok(new_dn)
	}

	/// Move a user into another container.
	pub async fn move_user(&self, user: &str, new_container: &str) -> Result<String, Error> {
		self.move_object(user, new_container).await
	}

	/// Apply modifications to an object given by DN or short name.
	async fn modify_object(&self, object: &str, mods: Vec<Mod<Vec<u8>>>) -> Result<String, Error> {
		let dn = self.resolve(object).await?;
		let session = self.bound(Kind::Operational)?;
		session.modify(&dn, mods).await?;
		Ok(dn)
	}

	/// Set an attribute to a single value, replacing whatever it held.
	pub async fn set_object_attribute(
		&self,
		object: &str,
		attribute: &str,
		value: &str,
	) -> Result<(), Error> {
		self.set_object_attribute_values(object, attribute, &[value]).await
	}

	/// Set an attribute to the given values, replacing whatever it held.
	#[instrument(skip(self, values))]
	pub async fn set_object_attribute_values(
		&self,
		object: &str,
		attribute: &str,
		values: &[&str],
	) -> Result<(), Error> {
		require("attribute name", attribute)?;
		let dn = self.modify_object(object, vec![replace(attribute, values.iter().copied())]).await?;
		debug!(%dn, %attribute, values = values.len(), "Attribute set");
		Ok(())
	}

	/// Remove all values of an attribute. Clearing an absent attribute
	/// succeeds.
	#[instrument(skip(self))]
	pub async fn clear_object_attribute(&self, object: &str, attribute: &str) -> Result<(), Error> {
		require("attribute name", attribute)?;
		let dn = self.modify_object(object, vec![replace::<Vec<u8>>(attribute, [])]).await?;
		debug!(%dn, %attribute, "Attribute cleared");
		Ok(())
	}

	/// Resolve a group and a user to DNs and check whether the user is a
	/// direct member.
	async fn membership(&self, group: &str, user: &str) -> Result<(String, String, bool), Error> {
		let group = self.resolve(group).await?;
		let user = self.resolve(user).await?;
		let session = self.bound(Kind::Operational)?;
		let filter = Filter::eq(attr::MEMBER, user.as_str()).to_string();
		let found = session
			.search(&group, Scope::Base, &filter, &[NO_ATTRIBUTES])
			.await
			.map_err(|err| err.into_kind(Kind::Operational))?;
		Ok((group, user, !found.is_empty()))
	}

	/// Add a user to a group. Adding a member twice succeeds.
	#[instrument(skip(self))]
	pub async fn group_add_user(&self, group: &str, user: &str) -> Result<(), Error> {
		let (group, user, is_member) = self.membership(group, user).await?;
		if is_member {
			debug!(%group, %user, "Already a member");
			return Ok(());
		}
		let session = self.bound(Kind::Operational)?;
		let mods = vec![Mod::Add(attr::MEMBER.as_bytes().to_vec(), value_set([user.as_str()]))];
		match session.modify(&group, mods).await {
			Ok(()) => {
				info!(%group, %user, "Added group member");
				Ok(())
			}
			Err(err)
				if matches!(err.code(), code::ATTRIBUTE_OR_VALUE_EXISTS | code::ENTRY_ALREADY_EXISTS) =>
			{
				Ok(())
			}
			Err(err) => Err(err),
		}
	}

	/// Remove a user from a group. Removing a non-member succeeds.
	#[instrument(skip(self))]
	pub async fn group_remove_user(&self, group: &str, user: &str) -> Result<(), Error> {
		let (group, user, is_member) = self.membership(group, user).await?;
		if !is_member {
			debug!(%group, %user, "Not a member");
			return Ok(());
		}
		let session = self.bound(Kind::Operational)?;
		let mods = vec![Mod::Delete(attr::MEMBER.as_bytes().to_vec(), value_set([user.as_str()]))];
		match session.modify(&group, mods).await {
			Ok(()) => {
				info!(%group, %user, "Removed group member");
				Ok(())
			}
			Err(err) if err.code() == code::NO_SUCH_ATTRIBUTE => Ok(()),
			Err(err) => Err(err),
		}
	}

	/// Set or clear `ACCOUNTDISABLE`, writing only when it changes.
	async fn set_disabled(&self, user: &str, disabled: bool) -> Result<(), Error> {
		let found = self
			.get_object_attributes(user, &[attr::USER_ACCOUNT_CONTROL])
			.await
			.map_err(|err| err.into_kind(Kind::Operational))?;
		let mut control = UserAccountControl::from_object(&found).map_err(|err| {
			Error::operational(format!("{}: {err}", found.dn), code::ATTRIBUTE_ENTRY_NOT_FOUND)
		})?;
		if control.contains(UserAccountControl::ACCOUNTDISABLE) == disabled {
			return Ok(());
		}
		control.set(UserAccountControl::ACCOUNTDISABLE, disabled);
		let session = self.bound(Kind::Operational)?;
		session
			.modify(&found.dn, vec![replace(attr::USER_ACCOUNT_CONTROL, [control.bits().to_string()])])
			.await?;
		info!(dn = %found.dn, disabled, "Account state changed");
		Ok(())
	}

	/// Enable a user account.
	#[instrument(skip(self))]
	pub async fn enable_user(&self, user: &str) -> Result<(), Error> {
		self.set_disabled(user, false).await
	}

	/// Disable a user account.
	#[instrument(skip(self))]
	pub async fn disable_user(&self, user: &str) -> Result<(), Error> {
		self.set_disabled(user, true).await
	}

	/// Clear the lockout of a user account.
	#[instrument(skip(self))]
	pub async fn unlock_user(&self, user: &str) -> Result<(), Error> {
		self.modify_object(user, vec![replace(attr::LOCKOUT_TIME, ["0"])]).await?;
		Ok(())
	}

	/// Allow a user to dial in.
	pub async fn set_user_dialin_allowed(&self, user: &str) -> Result<(), Error> {
		self.set_object_attribute(user, attr::ALLOW_DIALIN, "TRUE").await
	}

	/// Forbid a user to dial in.
	pub async fn set_user_dialin_disabled(&self, user: &str) -> Result<(), Error> {
		self.set_object_attribute(user, attr::ALLOW_DIALIN, "FALSE").await
	}

	/// Assign a framed IP address to a user.
	pub async fn set_user_ip_address(&self, user: &str, ip: &str) -> Result<(), Error> {
		let ip: Ipv4Addr = ip.trim().parse().map_err(|err| {
			Error::operational(format!("invalid IPv4 address {ip:?}: {err}"), code::PARAMS_ERROR)
		})?;
		self.set_object_attribute(user, attr::FRAMED_IP_ADDRESS, &ip2int(ip).to_string()).await
	}

	user_attribute_setters! {
		/// Set the surname of a user.
		set_user_sn => "sn";
		/// Set the initials of a user.
		set_user_initials => "initials";
		/// Set the given name of a user.
		set_user_given_name => "givenName";
		/// Set the display name of a user.
		set_user_display_name => "displayName";
		/// Set the room number of a user.
		set_user_room_number => "roomNumber";
		/// Set the street address of a user.
		set_user_address => "streetAddress";
		/// Set the notes of a user.
		set_user_info => "info";
		/// Set the job title of a user.
		set_user_title => "title";
		/// Set the department of a user.
		set_user_department => "department";
		/// Set the company of a user.
		set_user_company => "company";
		/// Set the telephone number of a user.
		set_user_phone => "telephoneNumber";
		/// Set the description of a user.
		set_user_description => "description";
	}

	/// Fail unless the session is protected, as AD refuses password writes
	/// otherwise.
	fn require_secure(&self) -> Result<(), Error> {
		let session = self.bound(Kind::Operational)?;
		if session.is_secure() {
			Ok(())
		} else {
			Err(Error::operational(
				format!("password changes need an encrypted connection, {} is not", session.bound_uri()),
				code::CONFIDENTIALITY_REQUIRED,
			))
		}
	}

	/// Reset the password of a user as an administrator.
	#[instrument(skip(self, password))]
	pub async fn set_user_password(&self, user: &str, password: &str) -> Result<(), Error> {
		self.require_secure()?;
		let dn = self
			.modify_object(user, vec![replace(attr::UNICODE_PWD, [encode_password(password)])])
			.await?;
		info!(%dn, "Password reset");
		Ok(())
	}

	/// Change the password of a user, proving knowledge of the old one.
	#[instrument(skip(self, old_password, new_password))]
	pub async fn change_user_password(
		&self,
		user: &str,
		old_password: &str,
		new_password: &str,
	) -> Result<(), Error> {
		self.require_secure()?;
		let name = attr::UNICODE_PWD.as_bytes().to_vec();
		let mods = vec![
			Mod::Delete(name.clone(), value_set([encode_password(old_password)])),
			Mod::Add(name, value_set([encode_password(new_password)])),
		];
		let dn = self.modify_object(user, mods).await?;
		info!(%dn, "Password changed");
		Ok(())
	}

	/// Check a password with a bind on a separate connection to the bound
	/// server. The session of the client is not touched.
	///
	/// Wrong credentials, an unknown user and an empty password give
	/// `Ok(false)`; failing to reach the server is an error.
	#[instrument(skip(self, password))]
	pub async fn check_user_password(&self, user: &str, password: &str) -> Result<bool, Error> {
		if password.is_empty() {
			return Ok(false);
		}
		let session = self.bound(Kind::Bind)?;
		let params = ConnectionParams {
			use_gssapi: false,
			..self.params.clone().unwrap_or_default()
		};
		let binddn = if user.contains('@') || user.parse::<Dn>().is_ok() {
			user.to_owned()
		} else {
			match self.get_object_dn(user).await {
				Ok(dn) => dn,
				Err(err) if err.code() == code::OBJECT_NOT_FOUND => return Ok(false),
				Err(err) => return Err(err.into_kind(Kind::Bind)),
			}
		};
		match negotiator::bind_one(&self.connector, &params, session.bound_uri(), &binddn, password)
			.await
		{
			Ok(probe) => {
				if let Err(err) = probe.unbind().await {
					debug!("Unbinding password check connection: {err}");
				}
				Ok(true)
			}
			Err(err) if err.code() == code::INVALID_CREDENTIALS => Ok(false),
			Err(err) => Err(err),
		}
	}
}
