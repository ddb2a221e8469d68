//! Reading from the directory.

use std::{
	collections::{HashSet, VecDeque},
	net::Ipv4Addr,
};

use ldap3::Scope;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
	attribute::{self, DecodeError, Guid, Sid},
	client::AdClient,
	connection::{Connection, Connector},
	dn::Dn,
	entry::{DirectoryObject, SearchEntryExt},
	error::{code, Error, Kind},
	filter::Filter,
	model::{
		attr, Computer, Group, ObjectKind, OrganizationalUnit, User, UserAccountControl, UserControl,
		UserControls, GROUP_ATTRIBUTES, USER_ATTRIBUTES, USER_CONTROL_ATTRIBUTES,
	},
	session::Session,
};

/// Attribute list requesting no attributes at all (RFC 4511 section 4.5.1.8).
pub(crate) const NO_ATTRIBUTES: &str = "1.1";

/// Filter matching every entry.
pub(crate) const ANY_OBJECT: &str = "(objectClass=*)";

/// Turn a malformed attribute value into an error.
fn malformed(dn: &str, err: &DecodeError) -> Error {
	Error::search(format!("{dn}: {err}"), code::ATTRIBUTE_ENTRY_NOT_FOUND)
}

/// The `sAMAccountName` of an entry, or its DN when it has none.
fn short_name(object: DirectoryObject) -> String {
	match object.attr_first(attr::SAM_ACCOUNT_NAME) {
		Some(name) => name.to_owned(),
		None => object.dn,
	}
}

/// Split a ranged attribute name such as `member;range=0-1499` into the
/// attribute name and the index of the last value returned. The index is
/// `None` for the final range (`member;range=1500-*`).
fn parse_range(key: &str) -> Option<(&str, Option<u64>)> {
	let (name, options) = key.split_once(';')?;
	let range = options.split(';').find_map(|option| option.strip_prefix("range="))?;
	let (_, end) = range.split_once('-')?;
	if end == "*" {
		Some((name, None))
	} else {
		end.parse().ok().map(|end| (name, Some(end)))
	}
}

/// Fetch the remaining values of attributes the server returned in ranges,
/// storing the complete list under the plain attribute name.
async fn complete_ranges<C: Connection>(
	session: &Session<C>,
	object: &mut DirectoryObject,
) -> Result<(), Error> {
	let ranged: Vec<String> =
		object.attrs.keys().filter(|key| parse_range(key).is_some()).cloned().collect();
	for key in ranged {
		let Some((name, mut end)) = parse_range(&key).map(|(name, end)| (name.to_owned(), end))
		else {
			continue;
		};
		let mut values = object.attrs.remove(&key).unwrap_or_default();
		while let Some(last) = end {
			let request = format!("{name};range={}-*", last + 1);
			let found = session.search(&object.dn, Scope::Base, ANY_OBJECT, &[&request]).await?;
			let next = found.into_iter().next().and_then(|entry| {
				entry.attrs.into_iter().find(|(key, _)| {
					parse_range(key).is_some_and(|(other, _)| other.eq_ignore_ascii_case(&name))
				})
			});
			let Some((next_key, next_values)) = next else {
				break;
			};
			values.extend(next_values);
			end = match parse_range(&next_key) {
				Some((_, Some(next_end))) if next_end > last => Some(next_end),
				_ => None,
			};
		}
		debug!(dn = %object.dn, attribute = %name, values = values.len(), "Read ranged attribute");
		object.attrs.entry(name).or_default().extend(values);
	}
	Ok(())
}

/// Read one entry by DN, `None` when it does not exist.
async fn read_entry<C: Connection>(
	session: &Session<C>,
	dn: &str,
	attributes: &[&str],
) -> Result<Option<DirectoryObject>, Error> {
	match session.search(dn, Scope::Base, ANY_OBJECT, attributes).await {
		Ok(found) => match found.into_iter().next() {
			Some(mut object) => {
				complete_ranges(session, &mut object).await?;
				Ok(Some(object))
			}
			None => Ok(None),
		},
		Err(err) if matches!(err.code(), code::NO_SUCH_OBJECT | code::INVALID_DN_SYNTAX) => Ok(None),
		Err(err) => Err(err),
	}
}

/// Check a caller supplied filter before anything is sent.
fn parse_filter(filter: &str) -> Result<Filter, Error> {
	Filter::parse(filter)
		.map_err(|err| Error::search(format!("invalid filter {filter:?}: {err}"), code::PARAMS_ERROR))
}

impl<K: Connector> AdClient<K> {
	/// Search the directory.
	///
	/// The filter is checked before anything is sent; a malformed filter
	/// fails with [`code::PARAMS_ERROR`]. All result pages are collected and
	/// returned in the order the server sent them. No match is an empty
	/// vector, not an error. An empty `attributes` slice requests all user
	/// attributes.
	pub async fn search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: &[&str],
	) -> Result<Vec<DirectoryObject>, Error> {
		let filter = parse_filter(filter)?;
		let session = self.bound(Kind::Search)?;
		session.search(base, scope, &filter.to_string(), attributes).await
	}

	/// Search and return only the DNs of the matching entries.
	pub async fn search_dn(
		&self,
		base: &str,
		filter: &str,
		scope: Scope,
	) -> Result<Vec<String>, Error> {
		let found = self.search(base, scope, filter, &[NO_ATTRIBUTES]).await?;
		Ok(found.into_iter().map(|object| object.dn).collect())
	}

	/// Whether `dn` exists, optionally also requiring an `objectClass` value.
	///
	/// A DN that does not exist, or is not a valid DN at all, gives `false`.
	/// Only failures of the search itself are errors.
	pub async fn if_dn_exists(&self, dn: &str, object_class: Option<&str>) -> Result<bool, Error> {
		let session = self.bound(Kind::Search)?;
		if dn.parse::<Dn>().is_err() {
			return Ok(false);
		}
		let filter = object_class.map_or_else(
			|| Filter::present(attr::OBJECT_CLASS),
			|class| Filter::eq(attr::OBJECT_CLASS, class),
		);
		match session.search(dn, Scope::Base, &filter.to_string(), &[NO_ATTRIBUTES]).await {
			Ok(found) => Ok(!found.is_empty()),
			Err(err) if matches!(err.code(), code::NO_SUCH_OBJECT | code::INVALID_DN_SYNTAX) => {
				Ok(false)
			}
			Err(err) => Err(err),
		}
	}

	/// Find an object given either its DN or its `sAMAccountName`.
	async fn locate(&self, object: &str, attributes: &[&str]) -> Result<DirectoryObject, Error> {
		let session = self.bound(Kind::Search)?;
		if object.parse::<Dn>().is_ok() {
			if let Some(found) = read_entry(session, object, attributes).await? {
				return Ok(found);
			}
		}
		let filter = Filter::eq(attr::SAM_ACCOUNT_NAME, object).to_string();
		let found = session.search(session.search_base(), Scope::Subtree, &filter, attributes).await?;
		let Some(mut found) = found.into_iter().next() else {
			return Err(Error::search(format!("object {object:?} not found"), code::OBJECT_NOT_FOUND));
		};
		complete_ranges(session, &mut found).await?;
		Ok(found)
	}

	/// The DN of an object given by DN or `sAMAccountName`.
	pub async fn get_object_dn(&self, object: &str) -> Result<String, Error> {
		self.locate(object, &[NO_ATTRIBUTES]).await.map(|found| found.dn)
	}

	/// Read attributes of an object given by DN or `sAMAccountName`.
	///
	/// Values the server split into ranges are fetched completely. An empty
	/// `attributes` slice reads all user attributes.
	pub async fn get_object_attributes(
		&self,
		object: &str,
		attributes: &[&str],
	) -> Result<DirectoryObject, Error> {
		self.locate(object, attributes).await
	}

	/// All values of one attribute, empty when the object does not have it.
	pub async fn get_object_attribute(
		&self,
		object: &str,
		attribute: &str,
	) -> Result<Vec<String>, Error> {
		let found = self.get_object_attributes(object, &[attribute]).await?;
		Ok(found.values(attribute).to_vec())
	}

	/// All values of one attribute in binary form.
	pub async fn get_object_binary_attribute(
		&self,
		object: &str,
		attribute: &str,
	) -> Result<Vec<Vec<u8>>, Error> {
		let found = self.get_object_attributes(object, &[attribute]).await?;
		Ok(found.bin_values(attribute).into_iter().map(<[u8]>::to_vec).collect())
	}

	/// The decoded `objectSid` of an object.
	pub async fn get_object_sid(&self, object: &str) -> Result<Sid, Error> {
		let found = self.get_object_attributes(object, &[attr::OBJECT_SID]).await?;
		match found.sid() {
			Some(sid) => sid.map_err(|err| malformed(&found.dn, &err)),
			None => Err(Error::search(
				format!("{} has no {}", found.dn, attr::OBJECT_SID),
				code::ATTRIBUTE_ENTRY_NOT_FOUND,
			)),
		}
	}

	/// The decoded `objectGUID` of an object.
	pub async fn get_object_guid(&self, object: &str) -> Result<Guid, Error> {
		let found = self.get_object_attributes(object, &[attr::OBJECT_GUID]).await?;
		match found.guid() {
			Some(guid) => guid.map_err(|err| malformed(&found.dn, &err)),
			None => Err(Error::search(
				format!("{} has no {}", found.dn, attr::OBJECT_GUID),
				code::ATTRIBUTE_ENTRY_NOT_FOUND,
			)),
		}
	}

	/// Groups a user is a member of, as short names.
	///
	/// With `nested` the groups of those groups are followed as well. Every
	/// group is visited once, so membership cycles are harmless.
	pub async fn get_user_groups(&self, user: &str, nested: bool) -> Result<Vec<String>, Error> {
		let user = self.get_object_dn(user).await?;
		let session = self.bound(Kind::Search)?;
		let mut seen = HashSet::from([user.to_lowercase()]);
		let mut queue = VecDeque::from([user]);
		let mut groups = Vec::new();
		while let Some(member) = queue.pop_front() {
			let filter = Filter::and([ObjectKind::Group.filter(), Filter::eq(attr::MEMBER, member.as_str())]);
			let found = session
				.search(
					session.search_base(),
					Scope::Subtree,
					&filter.to_string(),
					&[attr::SAM_ACCOUNT_NAME],
				)
				.await?;
			for group in found {
				if !seen.insert(group.dn.to_lowercase()) {
					continue;
				}
				if nested {
					queue.push_back(group.dn.clone());
				}
				groups.push(short_name(group));
			}
		}
		Ok(groups)
	}

	/// Members of a group, as short names.
	///
	/// With `nested` member groups are expanded into their members instead of
	/// being listed themselves. Every entry is visited once, so membership
	/// cycles are harmless. Members that no longer exist are listed by DN.
	pub async fn get_users_in_group(&self, group: &str, nested: bool) -> Result<Vec<String>, Error> {
		let group = self.get_object_attributes(group, &[attr::MEMBER]).await?;
		let session = self.bound(Kind::Search)?;
		let mut seen = HashSet::from([group.dn.to_lowercase()]);
		let mut queue: VecDeque<String> = group.values(attr::MEMBER).iter().cloned().collect();
		let mut members = Vec::new();
		while let Some(dn) = queue.pop_front() {
			if !seen.insert(dn.to_lowercase()) {
				continue;
			}
			let Some(entry) =
				read_entry(session, &dn, &[attr::OBJECT_CLASS, attr::SAM_ACCOUNT_NAME]).await?
			else {
				members.push(dn);
				continue;
			};
			let is_group = entry
				.values(attr::OBJECT_CLASS)
				.iter()
				.any(|class| class.eq_ignore_ascii_case(ObjectKind::Group.object_class()));
			if nested && is_group {
				if let Some(inner) = read_entry(session, &dn, &[attr::MEMBER]).await? {
					queue.extend(inner.values(attr::MEMBER).iter().cloned());
				}
			} else {
				members.push(short_name(entry));
			}
		}
		Ok(members)
	}

	/// Search below `base` and return the matching entries.
	async fn find(
		&self,
		base: Option<&str>,
		scope: Scope,
		filter: Filter,
		attributes: &[&str],
	) -> Result<Vec<DirectoryObject>, Error> {
		let session = self.bound(Kind::Search)?;
		let base = match base {
			Some(base) => {
				base.parse::<Dn>().map_err(|err| {
					Error::search(format!("invalid base {base:?}: {err}"), code::PARAMS_ERROR)
				})?;
				base
			}
			None => session.search_base(),
		};
		let mut found = session.search(base, scope, &filter.to_string(), attributes).await?;
		// A subtree search includes the base itself when it matches.
		if let Ok(base) = base.parse::<Dn>() {
			found.retain(|object| object.dn.parse::<Dn>().map_or(true, |dn| !dn.same_as(&base)));
		}
		Ok(found)
	}

	/// Short names of all objects of a kind below the search base.
	async fn list_names(&self, kind: ObjectKind) -> Result<Vec<String>, Error> {
		let found = self.find(None, Scope::Subtree, kind.filter(), &[attr::SAM_ACCOUNT_NAME]).await?;
		Ok(found.into_iter().map(short_name).collect())
	}

	/// Short names of all users.
	pub async fn get_users(&self) -> Result<Vec<String>, Error> {
		self.list_names(ObjectKind::User).await
	}

	/// Short names of all groups.
	pub async fn get_groups(&self) -> Result<Vec<String>, Error> {
		self.list_names(ObjectKind::Group).await
	}

	/// Short names of all computers.
	pub async fn get_computers(&self) -> Result<Vec<String>, Error> {
		self.list_names(ObjectKind::Computer).await
	}

	/// DNs of all organizational units.
	pub async fn get_ous(&self) -> Result<Vec<String>, Error> {
		let found =
			self.find(None, Scope::Subtree, ObjectKind::OrganizationalUnit.filter(), &[NO_ATTRIBUTES]).await?;
		Ok(found.into_iter().map(|object| object.dn).collect())
	}

	/// DNs of the objects inside an OU matching `filter`, the OU itself
	/// excluded. A malformed filter fails with [`code::PARAMS_ERROR`].
	pub async fn get_objects_in_ou(
		&self,
		ou: &str,
		filter: &str,
		scope: Scope,
	) -> Result<Vec<String>, Error> {
		self.dns_in_ou(ou, parse_filter(filter)?, scope).await
	}

	/// DNs of the entries inside an OU matching `filter`.
	async fn dns_in_ou(&self, ou: &str, filter: Filter, scope: Scope) -> Result<Vec<String>, Error> {
		let found = self.find(Some(ou), scope, filter, &[NO_ATTRIBUTES]).await?;
		Ok(found.into_iter().map(|object| object.dn).collect())
	}

	/// DNs of the organizational units inside an OU.
	pub async fn get_ous_in_ou(&self, ou: &str, scope: Scope) -> Result<Vec<String>, Error> {
		self.dns_in_ou(ou, ObjectKind::OrganizationalUnit.filter(), scope).await
	}

	/// Short names of the objects of a kind inside an OU.
	async fn names_in_ou(&self, ou: &str, kind: ObjectKind, scope: Scope) -> Result<Vec<String>, Error> {
		let found = self.find(Some(ou), scope, kind.filter(), &[attr::SAM_ACCOUNT_NAME]).await?;
		Ok(found.into_iter().map(short_name).collect())
	}

	/// Short names of the users inside an OU.
	pub async fn get_users_in_ou(&self, ou: &str, scope: Scope) -> Result<Vec<String>, Error> {
		self.names_in_ou(ou, ObjectKind::User, scope).await
	}

	/// Short names of the groups inside an OU.
	pub async fn get_groups_in_ou(&self, ou: &str, scope: Scope) -> Result<Vec<String>, Error> {
		self.names_in_ou(ou, ObjectKind::Group, scope).await
	}

	/// Short names of the computers inside an OU.
	pub async fn get_computers_in_ou(&self, ou: &str, scope: Scope) -> Result<Vec<String>, Error> {
		self.names_in_ou(ou, ObjectKind::Computer, scope).await
	}

	/// Short names of all disabled users.
	pub async fn get_disabled_users(&self) -> Result<Vec<String>, Error> {
		let filter = Filter::and([
			ObjectKind::User.filter(),
			Filter::bit_and(attr::USER_ACCOUNT_CONTROL, UserAccountControl::ACCOUNTDISABLE.bits()),
		]);
		let found = self.find(None, Scope::Subtree, filter, &[attr::SAM_ACCOUNT_NAME]).await?;
		Ok(found.into_iter().map(short_name).collect())
	}

	/// Short names of all users allowed to dial in.
	pub async fn get_dialin_users(&self) -> Result<Vec<String>, Error> {
		let filter =
			Filter::and([ObjectKind::User.filter(), Filter::eq(attr::ALLOW_DIALIN, "TRUE")]);
		let found = self.find(None, Scope::Subtree, filter, &[attr::SAM_ACCOUNT_NAME]).await?;
		Ok(found.into_iter().map(short_name).collect())
	}

	/// Whether a user may dial in. A user without the attribute may not.
	pub async fn if_dialin_user(&self, user: &str) -> Result<bool, Error> {
		let found = self.get_object_attributes(user, &[attr::ALLOW_DIALIN]).await?;
		Ok(found.attr_first(attr::ALLOW_DIALIN).is_some_and(|value| value.eq_ignore_ascii_case("TRUE")))
	}

	/// The display name of a user, if set.
	pub async fn get_user_display_name(&self, user: &str) -> Result<Option<String>, Error> {
		let found = self.get_object_attributes(user, &[attr::DISPLAY_NAME]).await?;
		Ok(found.attr_first(attr::DISPLAY_NAME).map(str::to_owned))
	}

	/// The framed IP address assigned to a user, if set.
	pub async fn get_user_ip_address(&self, user: &str) -> Result<Option<Ipv4Addr>, Error> {
		let found = self.get_object_attributes(user, &[attr::FRAMED_IP_ADDRESS]).await?;
		found
			.attr_first(attr::FRAMED_IP_ADDRESS)
			.map(attribute::int2ip)
			.transpose()
			.map_err(|err| malformed(&found.dn, &err))
	}

	/// The account state of a user.
	pub async fn get_user_controls(&self, user: &str) -> Result<UserControls, Error> {
		let found = self.get_object_attributes(user, &USER_CONTROL_ATTRIBUTES).await?;
		UserControls::from_object(&found, OffsetDateTime::now_utc())
			.map_err(|err| malformed(&found.dn, &err))
	}

	/// One facet of the account state of a user.
	pub async fn get_user_control(&self, user: &str, control: UserControl) -> Result<bool, Error> {
		Ok(self.get_user_controls(user).await?.get(control))
	}

	/// Whether the account has expired.
	pub async fn if_user_expired(&self, user: &str) -> Result<bool, Error> {
		self.get_user_control(user, UserControl::Expired).await
	}

	/// Whether the account is locked out.
	pub async fn if_user_locked(&self, user: &str) -> Result<bool, Error> {
		self.get_user_control(user, UserControl::Locked).await
	}

	/// Whether the account is disabled.
	pub async fn if_user_disabled(&self, user: &str) -> Result<bool, Error> {
		self.get_user_control(user, UserControl::Disabled).await
	}

	/// Whether the user has to change the password at next logon.
	pub async fn if_user_must_change_password(&self, user: &str) -> Result<bool, Error> {
		self.get_user_control(user, UserControl::MustChangePassword).await
	}

	/// Whether the password of the user never expires.
	pub async fn if_user_dont_expire_password(&self, user: &str) -> Result<bool, Error> {
		self.get_user_control(user, UserControl::DontExpirePassword).await
	}

	/// Typed view of a user.
	pub async fn get_user(&self, user: &str) -> Result<User, Error> {
		let found = self.get_object_attributes(user, &USER_ATTRIBUTES).await?;
		User::from_object(&found).map_err(|err| malformed(&found.dn, &err))
	}

	/// Typed view of a group, with the complete member list.
	pub async fn get_group(&self, group: &str) -> Result<Group, Error> {
		let found = self.get_object_attributes(group, &GROUP_ATTRIBUTES).await?;
		Group::from_object(&found).map_err(|err| malformed(&found.dn, &err))
	}

	/// Typed view of a computer.
	pub async fn get_computer(&self, computer: &str) -> Result<Computer, Error> {
		let found = self
			.get_object_attributes(
				computer,
				&[attr::SAM_ACCOUNT_NAME, attr::DNS_HOST_NAME, attr::USER_ACCOUNT_CONTROL],
			)
			.await?;
		Computer::from_object(&found).map_err(|err| malformed(&found.dn, &err))
	}

	/// Typed view of an organizational unit.
	pub async fn get_ou(&self, ou: &str) -> Result<OrganizationalUnit, Error> {
		let found = self.get_object_attributes(ou, &[attr::OU, attr::DESCRIPTION]).await?;
		Ok(OrganizationalUnit::from(&found))
	}
}

#[cfg(test)]
mod tests {
	use super::parse_range;

	#[test]
	fn ranged_attribute_names() {
		assert_eq!(parse_range("member;range=0-1499"), Some(("member", Some(1499))));
		assert_eq!(parse_range("member;range=1500-*"), Some(("member", None)));
		assert_eq!(parse_range("member"), None);
		assert_eq!(parse_range("userCertificate;binary"), None);
		assert_eq!(parse_range("member;range=0-x"), None);
	}
}
