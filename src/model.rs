//! Typed views over directory objects.
//!
//! Users, groups, OUs and computers are all plain [`DirectoryObject`]s in the
//! directory, told apart by `objectClass`. The views here pick out the
//! attributes each kind conventionally carries and decode the bitmask
//! attributes into named facets.

use std::{fmt, net::Ipv4Addr, str::FromStr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
	attribute::{self, DecodeError, Guid, Sid},
	entry::{DirectoryObject, SearchEntryExt},
	filter::Filter,
};

/// Attribute names used throughout the crate.
pub mod attr {
	/// `objectClass`
	pub const OBJECT_CLASS: &str = "objectClass";
	/// `objectCategory`
	pub const OBJECT_CATEGORY: &str = "objectCategory";
	/// `sAMAccountName`, the pre-Windows 2000 logon name
	pub const SAM_ACCOUNT_NAME: &str = "sAMAccountName";
	/// `userPrincipalName`
	pub const USER_PRINCIPAL_NAME: &str = "userPrincipalName";
	/// `userAccountControl`
	pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
	/// `msDS-User-Account-Control-Computed`, carries the live lockout and
	/// password expiry state
	pub const USER_ACCOUNT_CONTROL_COMPUTED: &str = "msDS-User-Account-Control-Computed";
	/// `pwdLastSet`
	pub const PWD_LAST_SET: &str = "pwdLastSet";
	/// `accountExpires`
	pub const ACCOUNT_EXPIRES: &str = "accountExpires";
	/// `lockoutTime`
	pub const LOCKOUT_TIME: &str = "lockoutTime";
	/// `unicodePwd`
	pub const UNICODE_PWD: &str = "unicodePwd";
	/// `msNPAllowDialin`
	pub const ALLOW_DIALIN: &str = "msNPAllowDialin";
	/// `msRADIUSFramedIPAddress`
	pub const FRAMED_IP_ADDRESS: &str = "msRADIUSFramedIPAddress";
	/// `member`
	pub const MEMBER: &str = "member";
	/// `memberOf`
	pub const MEMBER_OF: &str = "memberOf";
	/// `groupType`
	pub const GROUP_TYPE: &str = "groupType";
	/// `displayName`
	pub const DISPLAY_NAME: &str = "displayName";
	/// `description`
	pub const DESCRIPTION: &str = "description";
	/// `name`
	pub const NAME: &str = "name";
	/// `ou`
	pub const OU: &str = "ou";
	/// `objectSid`
	pub const OBJECT_SID: &str = "objectSid";
	/// `objectGUID`
	pub const OBJECT_GUID: &str = "objectGUID";
	/// `dNSHostName`
	pub const DNS_HOST_NAME: &str = "dNSHostName";
	/// `defaultNamingContext`, read from the root DSE
	pub const DEFAULT_NAMING_CONTEXT: &str = "defaultNamingContext";
}

bitflags! {
	/// Bits of the `userAccountControl` attribute.
	///
	/// The positions are fixed by Active Directory, see
	/// <https://learn.microsoft.com/en-us/troubleshoot/windows-server/active-directory/useraccountcontrol-manipulate-account-properties>.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct UserAccountControl: u32 {
		/// The logon script is run.
		const SCRIPT = 0x0001;
		/// The account is disabled.
		const ACCOUNTDISABLE = 0x0002;
		/// A home folder is required.
		const HOMEDIR_REQUIRED = 0x0008;
		/// The account is locked out.
		const LOCKOUT = 0x0010;
		/// No password is required.
		const PASSWD_NOTREQD = 0x0020;
		/// The user cannot change the password.
		const PASSWD_CANT_CHANGE = 0x0040;
		/// The user can send an encrypted password.
		const ENCRYPTED_TEXT_PWD_ALLOWED = 0x0080;
		/// Local user account for a user whose primary account is in another
		/// domain.
		const TEMP_DUPLICATE_ACCOUNT = 0x0100;
		/// A typical user account.
		const NORMAL_ACCOUNT = 0x0200;
		/// Trust account for a domain that trusts other domains.
		const INTERDOMAIN_TRUST_ACCOUNT = 0x0800;
		/// Computer account of a domain member.
		const WORKSTATION_TRUST_ACCOUNT = 0x1000;
		/// Computer account of a domain controller.
		const SERVER_TRUST_ACCOUNT = 0x2000;
		/// The password never expires.
		const DONT_EXPIRE_PASSWORD = 0x0001_0000;
		/// MNS logon account.
		const MNS_LOGON_ACCOUNT = 0x0002_0000;
		/// Interactive logon requires a smart card.
		const SMARTCARD_REQUIRED = 0x0004_0000;
		/// Trusted for Kerberos delegation.
		const TRUSTED_FOR_DELEGATION = 0x0008_0000;
		/// The security context is never delegated.
		const NOT_DELEGATED = 0x0010_0000;
		/// Only DES keys are used.
		const USE_DES_KEY_ONLY = 0x0020_0000;
		/// Kerberos pre-authentication is not required.
		const DONT_REQ_PREAUTH = 0x0040_0000;
		/// The password has expired.
		const PASSWORD_EXPIRED = 0x0080_0000;
		/// Trusted to authenticate for delegation.
		const TRUSTED_TO_AUTH_FOR_DELEGATION = 0x0100_0000;
		/// Read-only domain controller.
		const PARTIAL_SECRETS_ACCOUNT = 0x0400_0000;
	}
}

bitflags! {
	/// Bits of the `groupType` attribute.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct GroupType: u32 {
		/// Created by the system.
		const BUILTIN_LOCAL = 0x0000_0001;
		/// Global scope.
		const GLOBAL = 0x0000_0002;
		/// Domain local scope.
		const DOMAIN_LOCAL = 0x0000_0004;
		/// Universal scope.
		const UNIVERSAL = 0x0000_0008;
		/// APP_BASIC group for Windows Server Authorization Manager.
		const APP_BASIC = 0x0000_0010;
		/// APP_QUERY group for Windows Server Authorization Manager.
		const APP_QUERY = 0x0000_0020;
		/// Security group; distribution group when unset.
		const SECURITY = 0x8000_0000;
	}
}

/// Interpret an integer attribute as 32 flag bits. AD stores them as a
/// signed 32 bit integer, so `groupType` values are usually negative.
fn flag_bits(value: i64) -> Option<u32> {
	u32::try_from(value)
		.ok()
		.or_else(|| i32::try_from(value).ok().map(|signed| u32::from_be_bytes(signed.to_be_bytes())))
}

/// Read an integer flag attribute, absent meaning no flags set.
fn read_flags(object: &DirectoryObject, name: &str) -> Result<u32, DecodeError> {
	match object.int_first(name).transpose()? {
		None => Ok(0),
		Some(value) => flag_bits(value)
			.ok_or_else(|| DecodeError::Malformed { kind: "flags", value: value.to_string() }),
	}
}

impl UserAccountControl {
	/// Read `userAccountControl` from an object. Unknown bits are kept.
	pub fn from_object(object: &DirectoryObject) -> Result<Self, DecodeError> {
		read_flags(object, attr::USER_ACCOUNT_CONTROL).map(Self::from_bits_retain)
	}
}

impl GroupType {
	/// Read `groupType` from an object. Unknown bits are kept.
	pub fn from_object(object: &DirectoryObject) -> Result<Self, DecodeError> {
		read_flags(object, attr::GROUP_TYPE).map(Self::from_bits_retain)
	}

	/// The value as written to the directory.
	#[must_use]
	pub fn to_attribute(self) -> String {
		i32::from_be_bytes(self.bits().to_be_bytes()).to_string()
	}
}

/// The attributes needed to compute [`UserControls`].
pub const USER_CONTROL_ATTRIBUTES: [&str; 4] = [
	attr::USER_ACCOUNT_CONTROL,
	attr::USER_ACCOUNT_CONTROL_COMPUTED,
	attr::PWD_LAST_SET,
	attr::ACCOUNT_EXPIRES,
];

/// One of the named account state facets of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserControl {
	/// The account is disabled
	Disabled,
	/// The account is locked out
	Locked,
	/// The password never expires
	DontExpirePassword,
	/// The password must be changed at next logon
	MustChangePassword,
	/// The account has expired
	Expired,
}

impl UserControl {
	/// All facets, in a stable order.
	pub const ALL: [UserControl; 5] = [
		UserControl::Disabled,
		UserControl::Locked,
		UserControl::DontExpirePassword,
		UserControl::MustChangePassword,
		UserControl::Expired,
	];

	/// The conventional name of the facet.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			UserControl::Disabled => "disabled",
			UserControl::Locked => "locked",
			UserControl::DontExpirePassword => "dontExpirePassword",
			UserControl::MustChangePassword => "mustChangePassword",
			UserControl::Expired => "expired",
		}
	}
}

impl fmt::Display for UserControl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for UserControl {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|control| control.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| format!("unknown user control {s:?}"))
	}
}

/// Account state of a user, decoded from its control attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserControls {
	/// `ACCOUNTDISABLE` is set
	pub disabled: bool,
	/// The account is locked out
	pub locked: bool,
	/// `DONT_EXPIRE_PASSWORD` is set
	pub dont_expire_password: bool,
	/// `pwdLastSet` is 0 and the password is subject to expiry, or the
	/// server reports the password as expired
	pub must_change_password: bool,
	/// `accountExpires` lies in the past
	pub expired: bool,
}

impl UserControls {
	/// Decode the facets from an object carrying
	/// [`USER_CONTROL_ATTRIBUTES`], evaluating expiry against `now`.
	///
	/// Missing attributes count as unset flags and a never expiring account.
	pub fn from_object(object: &DirectoryObject, now: OffsetDateTime) -> Result<Self, DecodeError> {
		let uac = UserAccountControl::from_object(object)?;
		let computed = UserAccountControl::from_bits_retain(read_flags(
			object,
			attr::USER_ACCOUNT_CONTROL_COMPUTED,
		)?);
		let dont_expire_password = uac.contains(UserAccountControl::DONT_EXPIRE_PASSWORD);
		let pwd_last_set = object.int_first(attr::PWD_LAST_SET).transpose()?;
		let expires = object
			.attr_first(attr::ACCOUNT_EXPIRES)
			.map(attribute::parse_filetime)
			.transpose()?
			.flatten();

		Ok(Self {
			disabled: uac.contains(UserAccountControl::ACCOUNTDISABLE),
			locked: computed.contains(UserAccountControl::LOCKOUT)
				|| uac.contains(UserAccountControl::LOCKOUT),
			dont_expire_password,
			must_change_password: (pwd_last_set == Some(0) && !dont_expire_password)
				|| computed.contains(UserAccountControl::PASSWORD_EXPIRED),
			expired: expires.is_some_and(|expires| now > expires),
		})
	}

	/// Look up a single facet.
	#[must_use]
	pub fn get(&self, control: UserControl) -> bool {
		match control {
			UserControl::Disabled => self.disabled,
			UserControl::Locked => self.locked,
			UserControl::DontExpirePassword => self.dont_expire_password,
			UserControl::MustChangePassword => self.must_change_password,
			UserControl::Expired => self.expired,
		}
	}
}

/// The kinds of objects the client knows how to list and create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
	/// A person account
	User,
	/// A group
	Group,
	/// An organizational unit
	OrganizationalUnit,
	/// A computer account
	Computer,
}

impl ObjectKind {
	/// The filter selecting objects of this kind.
	#[must_use]
	pub fn filter(self) -> Filter {
		match self {
			ObjectKind::User => Filter::and([
				Filter::eq(attr::OBJECT_CLASS, "user"),
				Filter::eq(attr::OBJECT_CATEGORY, "person"),
			]),
			ObjectKind::Group => Filter::eq(attr::OBJECT_CLASS, "group"),
			ObjectKind::OrganizationalUnit => Filter::eq(attr::OBJECT_CLASS, "organizationalUnit"),
			ObjectKind::Computer => Filter::eq(attr::OBJECT_CLASS, "computer"),
		}
	}

	/// The most specific `objectClass` value of this kind.
	#[must_use]
	pub fn object_class(self) -> &'static str {
		match self {
			ObjectKind::User => "user",
			ObjectKind::Group => "group",
			ObjectKind::OrganizationalUnit => "organizationalUnit",
			ObjectKind::Computer => "computer",
		}
	}
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
	/// Distinguished name
	pub dn: String,
	/// Logon name
	pub sam_account_name: Option<String>,
	/// `user@domain` style logon name
	pub user_principal_name: Option<String>,
	/// Display name
	pub display_name: Option<String>,
	/// DNs of the groups the user is a direct member of
	pub member_of: Vec<String>,
	/// Raw account control flags
	pub account_control: UserAccountControl,
	/// Whether `msNPAllowDialin` is `TRUE`
	pub dialin_allowed: bool,
	/// The RADIUS framed IP address, if set
	pub ip_address: Option<Ipv4Addr>,
	/// Security identifier
	pub sid: Option<Sid>,
	/// Object GUID
	pub guid: Option<Guid>,
}

/// The attributes read for a [`User`].
pub const USER_ATTRIBUTES: [&str; 10] = [
	attr::SAM_ACCOUNT_NAME,
	attr::USER_PRINCIPAL_NAME,
	attr::DISPLAY_NAME,
	attr::MEMBER_OF,
	attr::USER_ACCOUNT_CONTROL,
	attr::ALLOW_DIALIN,
	attr::FRAMED_IP_ADDRESS,
	attr::OBJECT_SID,
	attr::OBJECT_GUID,
	attr::OBJECT_CLASS,
];

impl User {
	/// Build the view from a search result.
	pub fn from_object(object: &DirectoryObject) -> Result<Self, DecodeError> {
		Ok(Self {
			dn: object.dn.clone(),
			sam_account_name: object.attr_first(attr::SAM_ACCOUNT_NAME).map(String::from),
			user_principal_name: object.attr_first(attr::USER_PRINCIPAL_NAME).map(String::from),
			display_name: object.attr_first(attr::DISPLAY_NAME).map(String::from),
			member_of: object.values(attr::MEMBER_OF).to_vec(),
			account_control: UserAccountControl::from_object(object)?,
			dialin_allowed: object.bool_first(attr::ALLOW_DIALIN).transpose()?.unwrap_or(false),
			ip_address: object.attr_first(attr::FRAMED_IP_ADDRESS).map(attribute::int2ip).transpose()?,
			sid: object.sid().transpose()?,
			guid: object.guid().transpose()?,
		})
	}
}

/// A group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
	/// Distinguished name
	pub dn: String,
	/// Logon name of the group
	pub sam_account_name: Option<String>,
	/// Description
	pub description: Option<String>,
	/// DNs of the direct members
	pub members: Vec<String>,
	/// Scope and kind
	pub group_type: GroupType,
	/// Security identifier
	pub sid: Option<Sid>,
}

/// The attributes read for a [`Group`].
pub const GROUP_ATTRIBUTES: [&str; 5] =
	[attr::SAM_ACCOUNT_NAME, attr::DESCRIPTION, attr::MEMBER, attr::GROUP_TYPE, attr::OBJECT_SID];

impl Group {
	/// Build the view from a search result. `members` should already be the
	/// complete member list when the server split it into ranges.
	pub fn from_object(object: &DirectoryObject) -> Result<Self, DecodeError> {
		Ok(Self {
			dn: object.dn.clone(),
			sam_account_name: object.attr_first(attr::SAM_ACCOUNT_NAME).map(String::from),
			description: object.attr_first(attr::DESCRIPTION).map(String::from),
			members: object.values(attr::MEMBER).to_vec(),
			group_type: GroupType::from_object(object)?,
			sid: object.sid().transpose()?,
		})
	}

	/// Whether this is a security group rather than a distribution list.
	#[must_use]
	pub fn is_security(&self) -> bool {
		self.group_type.contains(GroupType::SECURITY)
	}
}

/// An organizational unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationalUnit {
	/// Distinguished name
	pub dn: String,
	/// The `ou` naming attribute
	pub name: Option<String>,
	/// Description
	pub description: Option<String>,
}

impl From<&DirectoryObject> for OrganizationalUnit {
	fn from(object: &DirectoryObject) -> Self {
		Self {
			dn: object.dn.clone(),
			name: object.attr_first(attr::OU).map(String::from),
			description: object.attr_first(attr::DESCRIPTION).map(String::from),
		}
	}
}

/// A computer account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computer {
	/// Distinguished name
	pub dn: String,
	/// Logon name, ending in `$`
	pub sam_account_name: Option<String>,
	/// Fully qualified host name
	pub dns_host_name: Option<String>,
	/// Raw account control flags
	pub account_control: UserAccountControl,
}

impl Computer {
	/// Build the view from a search result.
	pub fn from_object(object: &DirectoryObject) -> Result<Self, DecodeError> {
		Ok(Self {
			dn: object.dn.clone(),
			sam_account_name: object.attr_first(attr::SAM_ACCOUNT_NAME).map(String::from),
			dns_host_name: object.attr_first(attr::DNS_HOST_NAME).map(String::from),
			account_control: UserAccountControl::from_object(object)?,
		})
	}
}
