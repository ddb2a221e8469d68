//! An in-memory directory plugged into the client through the connection
//! seam, plus helpers to set it up.
#![allow(dead_code)]

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use ad_client::{
	connection::{AddAttributes, Connection, Connector, SearchPage, SearchRequest},
	discovery::{SrvResolver, SrvTarget},
	filter::MATCHING_RULE_BIT_AND,
	AdClient, ConnectionParams, Dn, Error, Filter,
};
use ldap3::{LdapError, LdapResult, Mod, Scope, SearchEntry};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const BASE: &str = "DC=example,DC=org";
pub const USERS: &str = "CN=Users,DC=example,DC=org";
pub const STAFF: &str = "OU=Staff,DC=example,DC=org";
pub const ADMIN_DN: &str = "CN=Administrator,CN=Users,DC=example,DC=org";
pub const ADMIN_PASSWORD: &str = "adminpassword";
pub const JDOE_DN: &str = "CN=John Doe,OU=Staff,DC=example,DC=org";
pub const JDOE_PASSWORD: &str = "Secret123!";
pub const ASMITH_DN: &str = "CN=Ann Smith,OU=Staff,DC=example,DC=org";
pub const VPN_DN: &str = "CN=vpn-users,CN=Users,DC=example,DC=org";

/// Log output for tests, controlled with `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// The binary layout of a SID with authority 5.
pub fn sid_bytes(sub_authorities: &[u32]) -> Vec<u8> {
	let mut bytes = vec![1, u8::try_from(sub_authorities.len()).unwrap(), 0, 0, 0, 0, 0, 5];
	for sub in sub_authorities {
		bytes.extend(sub.to_le_bytes());
	}
	bytes
}

/// The GUID `12345678-1234-5678-1234-567890abcdef` in directory byte order.
pub const GUID_BYTES: [u8; 16] = [
	0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x12, 0x34, 0x56, 0x78, 0x90, 0xab, 0xcd, 0xef,
];

/// Compare two values the way the directory does: DNs by their components,
/// everything else ignoring ASCII case.
fn same_value(a: &str, b: &str) -> bool {
	if a.eq_ignore_ascii_case(b) {
		return true;
	}
	match (a.parse::<Dn>(), b.parse::<Dn>()) {
		(Ok(a), Ok(b)) => a.same_as(&b),
		_ => false,
	}
}

fn same_bytes(a: &[u8], b: &[u8]) -> bool {
	match (std::str::from_utf8(a), std::str::from_utf8(b)) {
		(Ok(a), Ok(b)) => same_value(a, b),
		_ => a == b,
	}
}

fn result(rc: u32, text: &str) -> LdapResult {
	LdapResult {
		rc,
		matched: String::new(),
		text: text.to_owned(),
		refs: Vec::new(),
		ctrls: Vec::new(),
	}
}

fn success() -> LdapResult {
	result(0, "")
}

/// Decode a `unicodePwd` value back into the password.
pub fn decode_password(bytes: &[u8]) -> String {
	let units: Vec<u16> =
		bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])).collect();
	String::from_utf16(&units).unwrap().trim_matches('"').to_owned()
}

/// One stored entry.
#[derive(Debug, Clone)]
pub struct Entry {
	pub dn: String,
	pub attrs: Vec<(String, Vec<Vec<u8>>)>,
}

impl Entry {
	fn new(dn: &str) -> Self {
		Self { dn: dn.to_owned(), attrs: Vec::new() }
	}

	fn with(mut self, name: &str, values: &[&str]) -> Self {
		self.set(name, values.iter().map(|v| v.as_bytes().to_vec()).collect());
		self
	}

	fn with_bytes(mut self, name: &str, value: Vec<u8>) -> Self {
		self.set(name, vec![value]);
		self
	}

	fn position(&self, name: &str) -> Option<usize> {
		self.attrs.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
	}

	pub fn get(&self, name: &str) -> Option<&Vec<Vec<u8>>> {
		self.position(name).map(|i| &self.attrs[i].1)
	}

	pub fn strings(&self, name: &str) -> Vec<String> {
		self.get(name)
			.map(|values| values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
			.unwrap_or_default()
	}

	fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
		match self.position(name) {
			_ if values.is_empty() => self.remove(name),
			Some(i) => self.attrs[i].1 = values,
			None => self.attrs.push((name.to_owned(), values)),
		}
	}

	fn remove(&mut self, name: &str) {
		self.attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
	}

	fn parsed(&self) -> Dn {
		self.dn.parse().unwrap()
	}
}

/// Everything the fake servers share.
#[derive(Debug, Default)]
pub struct State {
	pub entries: Vec<Entry>,
	/// Passwords by DN
	pub passwords: Vec<(String, String)>,
	/// Hosts refusing connections
	pub unreachable: HashSet<String>,
	/// SRV records by name
	pub srv: HashMap<String, Vec<SrvTarget>>,
	/// Delay before answering searches
	pub search_delay: Option<Duration>,
	/// Cap on the page size the server honours
	pub max_page: Option<usize>,
	/// Number of `member` values returned per range
	pub range_size: Option<usize>,
	/// Hosts connected to, with the StartTLS flag
	pub connects: Vec<(String, bool)>,
	/// Hosts and DNs of simple binds
	pub binds: Vec<(String, String)>,
	/// Search pages served
	pub pages_served: usize,
	/// Successful writes, e.g. `add CN=x,DC=example,DC=org`
	pub writes: Vec<String>,
	/// Hosts whose root DSE cannot be read
	pub no_root_dse: HashSet<String>,
	/// Answer every paged search with this cookie instead of an offset
	pub stuck_cookie: Option<Vec<u8>>,
	/// Hosts unbound from
	pub unbinds: Vec<String>,
}

impl State {
	fn find(&self, dn: &str) -> Option<usize> {
		self.entries.iter().position(|entry| same_value(&entry.dn, dn))
	}

	pub fn entry(&self, dn: &str) -> Option<&Entry> {
		self.find(dn).map(|i| &self.entries[i])
	}

	fn password_of(&self, dn: &str) -> Option<&str> {
		self.passwords.iter().find(|(d, _)| same_value(d, dn)).map(|(_, pw)| pw.as_str())
	}

	fn set_password(&mut self, dn: &str, password: Option<String>) {
		self.passwords.retain(|(d, _)| !same_value(d, dn));
		if let Some(password) = password {
			self.passwords.push((dn.to_owned(), password));
		}
	}

	fn member_of(&self, dn: &str) -> Vec<String> {
		self.entries
			.iter()
			.filter(|group| group.strings("member").iter().any(|member| same_value(member, dn)))
			.map(|group| group.dn.clone())
			.collect()
	}

	fn values_of(&self, entry: &Entry, name: &str) -> Vec<String> {
		if name.eq_ignore_ascii_case("memberOf") {
			self.member_of(&entry.dn)
		} else if name.eq_ignore_ascii_case("distinguishedName") {
			vec![entry.dn.clone()]
		} else {
			entry.strings(name)
		}
	}

	fn matches(&self, entry: &Entry, filter: &Filter) -> bool {
		match filter {
			Filter::And(filters) => filters.iter().all(|f| self.matches(entry, f)),
			Filter::Or(filters) => filters.iter().any(|f| self.matches(entry, f)),
			Filter::Not(filter) => !self.matches(entry, filter),
			Filter::Equal(name, value) | Filter::Approx(name, value) => {
				let as_text = std::str::from_utf8(value)
					.is_ok_and(|text| self.values_of(entry, name).iter().any(|v| same_value(v, text)));
				as_text || entry.get(name).is_some_and(|values| values.iter().any(|v| v == value))
			}
			Filter::GreaterOrEqual(name, value) => {
				let value = String::from_utf8_lossy(value);
				self.values_of(entry, name).iter().any(|v| compare(v, &value).is_ge())
			}
			Filter::LessOrEqual(name, value) => {
				let value = String::from_utf8_lossy(value);
				self.values_of(entry, name).iter().any(|v| compare(v, &value).is_le())
			}
			Filter::Present(name) => !self.values_of(entry, name).is_empty(),
			Filter::Substring { attribute, initial, any, last } => {
				let lower = |part: &Vec<u8>| String::from_utf8_lossy(part).to_lowercase();
				self.values_of(entry, attribute).iter().any(|v| {
					let v = v.to_lowercase();
					let mut rest = v.as_str();
					if let Some(initial) = initial {
						match rest.strip_prefix(&lower(initial)) {
							Some(r) => rest = r,
							None => return false,
						}
					}
					for part in any {
						let part = lower(part);
						match rest.find(&part) {
							Some(i) => rest = &rest[i + part.len()..],
							None => return false,
						}
					}
					last.as_ref().map_or(true, |last| rest.ends_with(&lower(last)))
				})
			}
			Filter::Extensible { attribute, rule, value, .. } => {
				let Some(attribute) = attribute else { return false };
				let Some(mask) =
					std::str::from_utf8(value).ok().and_then(|value| value.parse::<i64>().ok())
				else {
					return false;
				};
				self.values_of(entry, attribute).iter().filter_map(|v| v.parse::<i64>().ok()).any(
					|v| {
						if rule.as_deref() == Some(MATCHING_RULE_BIT_AND) {
							v & mask == mask
						} else {
							v & mask != 0
						}
					},
				)
			}
		}
	}

	fn in_scope(entry: &Dn, base: &Dn, scope: Scope) -> bool {
		match scope {
			Scope::Base => entry.same_as(base),
			Scope::OneLevel => entry.parent().is_some_and(|parent| parent.same_as(base)),
			Scope::Subtree => entry.same_as(base) || entry.is_descendant_of(base),
		}
	}

	/// Select the requested attributes, splitting `member` into ranges when
	/// configured.
	fn project(&self, entry: &Entry, requested: &[String]) -> SearchEntry {
		let all = requested.is_empty() || requested.iter().any(|r| r == "*");
		let wanted = |name: &str| all || requested.iter().any(|r| r.eq_ignore_ascii_case(name));
		let mut selected: Vec<(String, Vec<Vec<u8>>)> = Vec::new();
		for (name, values) in &entry.attrs {
			if !wanted(name) {
				continue;
			}
			match self.range_size {
				Some(size) if name.eq_ignore_ascii_case("member") && values.len() > size => {
					selected.push((format!("{name};range=0-{}", size - 1), values[..size].to_vec()));
				}
				_ => selected.push((name.clone(), values.clone())),
			}
		}
		if requested.iter().any(|r| r.eq_ignore_ascii_case("memberOf")) {
			let groups = self.member_of(&entry.dn);
			if !groups.is_empty() {
				selected.push(("memberOf".to_owned(), groups.into_iter().map(String::into_bytes).collect()));
			}
		}
		for request in requested {
			let Some(start) = request
				.strip_prefix("member;range=")
				.and_then(|range| range.strip_suffix("-*"))
				.and_then(|start| start.parse::<usize>().ok())
			else {
				continue;
			};
			let values = entry.get("member").cloned().unwrap_or_default();
			let start = start.min(values.len());
			let end = self.range_size.map_or(values.len(), |size| (start + size).min(values.len()));
			let label = if end == values.len() { "*".to_owned() } else { (end - 1).to_string() };
			selected.push((format!("member;range={start}-{label}"), values[start..end].to_vec()));
		}

		let mut attrs = HashMap::new();
		let mut bin_attrs = HashMap::new();
		for (name, values) in selected {
			let text: Result<Vec<String>, _> = values.iter().map(|v| String::from_utf8(v.clone())).collect();
			match text {
				Ok(text) => {
					attrs.insert(name, text);
				}
				Err(_) => {
					bin_attrs.insert(name, values);
				}
			}
		}
		SearchEntry { dn: entry.dn.clone(), attrs, bin_attrs }
	}

	fn search(&mut self, request: &SearchRequest) -> SearchPage {
		let failed = |rc, text: &str| SearchPage {
			entries: Vec::new(),
			result: result(rc, text),
			cookie: Vec::new(),
		};
		let Ok(filter) = Filter::parse(&request.filter) else {
			return failed(87, "filter error");
		};
		if request.base.is_empty() && matches!(request.scope, Scope::Base) {
			let root = Entry::new("").with("defaultNamingContext", &[BASE]);
			self.pages_served += 1;
			return SearchPage {
				entries: vec![self.project(&root, &request.attributes)],
				result: success(),
				cookie: Vec::new(),
			};
		}
		let Ok(base) = request.base.parse::<Dn>() else {
			return failed(34, "invalid DN syntax");
		};
		if self.find(&request.base).is_none() {
			return failed(32, "0000208D: NameErr: DSID-0310028B, problem 2001 (NO_OBJECT)");
		}

		let matched: Vec<&Entry> = self
			.entries
			.iter()
			.filter(|entry| Self::in_scope(&entry.parsed(), &base, request.scope))
			.filter(|entry| self.matches(entry, &filter))
			.collect();
		let offset = std::str::from_utf8(&request.cookie)
			.ok()
			.and_then(|cookie| cookie.parse::<usize>().ok())
			.unwrap_or(0)
			.min(matched.len());
		let size = usize::try_from(request.page_size).unwrap().min(self.max_page.unwrap_or(usize::MAX));
		let end = (offset + size).min(matched.len());
		let entries = matched[offset..end].iter().map(|entry| self.project(entry, &request.attributes)).collect();
		let cookie = match &self.stuck_cookie {
			Some(stuck) => stuck.clone(),
			None if end < matched.len() => end.to_string().into_bytes(),
			None => Vec::new(),
		};
		self.pages_served += 1;
		SearchPage { entries, result: success(), cookie }
	}

	fn add(&mut self, dn: &str, attrs: AddAttributes) -> LdapResult {
		let Ok(parsed) = dn.parse::<Dn>() else {
			return result(34, "invalid DN syntax");
		};
		if self.find(dn).is_some() {
			return result(68, "00000524: UpdErr: DSID-031A11E2, problem 6005 (ENTRY_EXISTS)");
		}
		if let Some(parent) = parsed.parent() {
			if self.find(&parent.to_string()).is_none() {
				return result(32, "0000208D: NameErr: DSID-0310028B, problem 2001 (NO_OBJECT)");
			}
		}
		let mut entry = Entry::new(dn);
		for (name, values) in attrs {
			entry.set(&String::from_utf8(name).unwrap(), values.into_iter().collect());
		}
		if entry.get("objectCategory").is_none() {
			let classes = entry.strings("objectClass");
			let has = |class: &str| classes.iter().any(|c| c.eq_ignore_ascii_case(class));
			let category = ["computer", "person", "group", "organizationalUnit"]
				.into_iter()
				.find(|category| has(category));
			if let Some(category) = category {
				entry.set("objectCategory", vec![category.as_bytes().to_vec()]);
			}
		}
		self.entries.push(entry);
		self.writes.push(format!("add {dn}"));
		success()
	}

	fn modify(&mut self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> LdapResult {
		let Some(index) = self.find(dn) else {
			return result(32, "0000208D: NameErr: DSID-0310028B, problem 2001 (NO_OBJECT)");
		};
		let mut entry = self.entries[index].clone();
		let mut password = self.password_of(dn).map(str::to_owned);
		for modification in mods {
			match modification {
				Mod::Add(name, values) => {
					let name = String::from_utf8(name).unwrap();
					if name.eq_ignore_ascii_case("unicodePwd") {
						password = values.iter().next().map(|v| decode_password(v));
						continue;
					}
					let mut current = entry.get(&name).cloned().unwrap_or_default();
					for value in values {
						if current.iter().any(|c| same_bytes(c, &value)) {
							return result(20, "attribute or value exists");
						}
						current.push(value);
					}
					entry.set(&name, current);
				}
				Mod::Delete(name, values) => {
					let name = String::from_utf8(name).unwrap();
					if name.eq_ignore_ascii_case("unicodePwd") {
						let old = values.iter().next().map(|v| decode_password(v));
						if old.is_none() || old != password {
							return result(19, "0000056B: AtrErr: DSID-03191083, #1: wrong password");
						}
						password = None;
						continue;
					}
					let Some(current) = entry.get(&name).cloned() else {
						return result(16, "no such attribute");
					};
					if values.is_empty() {
						entry.remove(&name);
						continue;
					}
					let mut remaining = current;
					for value in values {
						let before = remaining.len();
						remaining.retain(|c| !same_bytes(c, &value));
						if remaining.len() == before {
							return result(16, "no such attribute");
						}
					}
					entry.set(&name, remaining);
				}
				Mod::Replace(name, values) => {
					let name = String::from_utf8(name).unwrap();
					if name.eq_ignore_ascii_case("unicodePwd") {
						password = values.iter().next().map(|v| decode_password(v));
						continue;
					}
					entry.set(&name, values.into_iter().collect());
				}
				Mod::Increment(..) => return result(53, "unwilling to perform"),
			}
		}
		self.entries[index] = entry;
		self.set_password(dn, password);
		self.writes.push(format!("modify {dn}"));
		success()
	}

	fn delete(&mut self, dn: &str) -> LdapResult {
		let Some(index) = self.find(dn) else {
			return result(32, "no such object");
		};
		let parsed = self.entries[index].parsed();
		if self.entries.iter().any(|entry| entry.parsed().parent().is_some_and(|p| p.same_as(&parsed))) {
			return result(66, "not allowed on non-leaf");
		}
		self.entries.remove(index);
		self.set_password(dn, None);
		self.writes.push(format!("delete {dn}"));
		success()
	}

	fn modify_dn(&mut self, dn: &str, rdn: &str, new_superior: Option<&str>) -> LdapResult {
		let Some(index) = self.find(dn) else {
			return result(32, "no such object");
		};
		let old = self.entries[index].parsed();
		let parent = match new_superior {
			Some(superior) => superior.to_owned(),
			None => old.parent().map(|p| p.to_string()).unwrap_or_default(),
		};
		if self.find(&parent).is_none() {
			return result(32, "no such object");
		}
		let new_dn = format!("{rdn},{parent}");
		if self.find(&new_dn).is_some() {
			return result(68, "entry already exists");
		}
		let Ok(new) = new_dn.parse::<Dn>() else {
			return result(34, "invalid DN syntax");
		};
		for entry in &mut self.entries {
			let current = entry.parsed();
			if current.same_as(&old) || current.is_descendant_of(&old) {
				let keep = current.rdns().len() - old.rdns().len();
				let mut rdns = current.rdns()[..keep].to_vec();
				rdns.extend(new.rdns().iter().cloned());
				entry.dn = Dn::from_rdns(rdns).to_string();
			}
			let members = entry.strings("member");
			if members.iter().any(|m| same_value(m, dn)) {
				let renamed = members
					.into_iter()
					.map(|m| if same_value(&m, dn) { new_dn.clone() } else { m })
					.map(String::into_bytes)
					.collect();
				entry.set("member", renamed);
			}
		}
		if let Some(naming) = new.rdn() {
			if let Some(index) = self.find(&new_dn) {
				self.entries[index].set(naming.attribute(), vec![naming.value().as_bytes().to_vec()]);
			}
		}
		let password = self.password_of(dn).map(str::to_owned);
		self.set_password(dn, None);
		self.set_password(&new_dn, password);
		self.writes.push(format!("modify_dn {dn} -> {new_dn}"));
		success()
	}

	fn simple_bind(&mut self, host: &str, binddn: &str, bindpw: &str) -> LdapResult {
		self.binds.push((host.to_owned(), binddn.to_owned()));
		let dn = self
			.entries
			.iter()
			.find(|entry| {
				entry.strings("userPrincipalName").iter().any(|upn| upn.eq_ignore_ascii_case(binddn))
			})
			.map_or_else(|| binddn.to_owned(), |entry| entry.dn.clone());
		if self.password_of(&dn).is_some_and(|password| password == bindpw) {
			success()
		} else {
			result(49, "80090308: LdapErr: DSID-0C09041C, comment: AcceptSecurityContext error, data 52e")
		}
	}
}

fn compare(a: &str, b: &str) -> std::cmp::Ordering {
	match (a.parse::<i64>(), b.parse::<i64>()) {
		(Ok(a), Ok(b)) => a.cmp(&b),
		_ => a.to_lowercase().cmp(&b.to_lowercase()),
	}
}

/// The fake directory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MockDirectory {
	state: Arc<Mutex<State>>,
}

impl MockDirectory {
	/// A domain `example.org` with an administrator, two staff users and an
	/// empty group.
	pub fn new() -> Self {
		let directory = Self::default();
		{
			let mut state = directory.state();
			state.entries = vec![
				Entry::new(BASE).with("objectClass", &["top", "domain", "domainDNS"]),
				Entry::new(USERS).with("objectClass", &["top", "container"]),
				Entry::new(ADMIN_DN)
					.with("objectClass", &["top", "person", "organizationalPerson", "user"])
					.with("objectCategory", &["person"])
					.with("sAMAccountName", &["Administrator"])
					.with("userAccountControl", &["66048"]),
				Entry::new(STAFF)
					.with("objectClass", &["top", "organizationalUnit"])
					.with("objectCategory", &["organizationalUnit"])
					.with("ou", &["Staff"]),
				Entry::new(JDOE_DN)
					.with("objectClass", &["top", "person", "organizationalPerson", "user"])
					.with("objectCategory", &["person"])
					.with("cn", &["John Doe"])
					.with("sAMAccountName", &["jdoe"])
					.with("userPrincipalName", &["jdoe@example.org"])
					.with("displayName", &["John Doe"])
					.with("userAccountControl", &["512"])
					.with("pwdLastSet", &["133000000000000000"])
					.with("accountExpires", &["9223372036854775807"])
					.with_bytes(
						"objectSid",
						sid_bytes(&[21, 1_004_336_348, 1_177_238_915, 682_003_330, 1105]),
					)
					.with_bytes("objectGUID", GUID_BYTES.to_vec()),
				Entry::new(ASMITH_DN)
					.with("objectClass", &["top", "person", "organizationalPerson", "user"])
					.with("objectCategory", &["person"])
					.with("cn", &["Ann Smith"])
					.with("sAMAccountName", &["asmith"])
					.with("userAccountControl", &["514"])
					.with("msNPAllowDialin", &["TRUE"]),
				Entry::new(VPN_DN)
					.with("objectClass", &["top", "group"])
					.with("objectCategory", &["group"])
					.with("sAMAccountName", &["vpn-users"])
					.with("groupType", &["-2147483646"]),
			];
			state.passwords = vec![
				(ADMIN_DN.to_owned(), ADMIN_PASSWORD.to_owned()),
				(JDOE_DN.to_owned(), JDOE_PASSWORD.to_owned()),
			];
		}
		directory
	}

	pub fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}

	/// Store an entry directly.
	pub fn insert(&self, dn: &str, attrs: &[(&str, &[&str])]) {
		let mut entry = Entry::new(dn);
		for (name, values) in attrs {
			entry.set(name, values.iter().map(|v| v.as_bytes().to_vec()).collect());
		}
		self.state().entries.push(entry);
	}

	/// Store a group with the given member DNs.
	pub fn insert_group(&self, dn: &str, name: &str, members: &[&str]) {
		self.insert(
			dn,
			&[
				("objectClass", &["top", "group"]),
				("objectCategory", &["group"]),
				("sAMAccountName", &[name]),
				("member", members),
			],
		);
	}

	/// Store a user account.
	pub fn insert_user(&self, dn: &str, name: &str, account_control: &str) {
		self.insert(
			dn,
			&[
				("objectClass", &["top", "person", "organizationalPerson", "user"]),
				("objectCategory", &["person"]),
				("sAMAccountName", &[name]),
				("userAccountControl", &[account_control]),
			],
		);
	}

	pub fn exists(&self, dn: &str) -> bool {
		self.state().find(dn).is_some()
	}

	pub fn values(&self, dn: &str, name: &str) -> Vec<String> {
		self.state().entry(dn).map(|entry| entry.strings(name)).unwrap_or_default()
	}

	pub fn password(&self, dn: &str) -> Option<String> {
		self.state().password_of(dn).map(str::to_owned)
	}

	pub fn entry_count(&self) -> usize {
		self.state().entries.len()
	}

	pub fn set_unreachable(&self, host: &str) {
		self.state().unreachable.insert(host.to_owned());
	}

	pub fn add_srv(&self, name: &str, targets: &[(u16, u16, &str)]) {
		let targets = targets
			.iter()
			.map(|(priority, weight, host)| SrvTarget {
				priority: *priority,
				weight: *weight,
				port: 389,
				host: (*host).to_owned(),
			})
			.collect();
		self.state().srv.insert(name.to_owned(), targets);
	}
}

impl SrvResolver for MockDirectory {
	async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Error> {
		Ok(self.state().srv.get(name).cloned().unwrap_or_default())
	}
}

impl Connector for MockDirectory {
	type Conn = MockConnection;

	async fn connect(
		&self,
		url: &Url,
		_params: &ConnectionParams,
		starttls: bool,
	) -> Result<MockConnection, Error> {
		let host = url.host_str().unwrap_or_default().to_owned();
		let mut state = self.state();
		state.connects.push((host.clone(), starttls));
		if state.unreachable.contains(&host) {
			return Err(Error::Bind {
				message: format!("Error connecting to {url}: connection refused"),
				code: 6,
			});
		}
		Ok(MockConnection { state: Arc::clone(&self.state), host })
	}
}

/// One connection to the fake directory.
#[derive(Debug)]
pub struct MockConnection {
	state: Arc<Mutex<State>>,
	host: String,
}

impl MockConnection {
	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}
}

impl Connection for MockConnection {
	async fn search_page(&mut self, request: &SearchRequest) -> Result<SearchPage, LdapError> {
		let delay = self.state().search_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.state();
		if request.base.is_empty() && state.no_root_dse.contains(&self.host) {
			return Ok(SearchPage {
				entries: Vec::new(),
				result: result(1, "000004DC: LdapErr: DSID-0C090A5C, comment: In order to perform this operation a successful bind must be completed"),
				cookie: Vec::new(),
			});
		}
		Ok(state.search(request))
	}

	async fn add(&mut self, dn: &str, attrs: AddAttributes) -> Result<LdapResult, LdapError> {
		Ok(self.state().add(dn, attrs))
	}

	async fn modify(&mut self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> Result<LdapResult, LdapError> {
		Ok(self.state().modify(dn, mods))
	}

	async fn delete(&mut self, dn: &str) -> Result<LdapResult, LdapError> {
		Ok(self.state().delete(dn))
	}

	async fn modify_dn(
		&mut self,
		dn: &str,
		rdn: &str,
		_delete_old: bool,
		new_superior: Option<&str>,
	) -> Result<LdapResult, LdapError> {
		Ok(self.state().modify_dn(dn, rdn, new_superior))
	}

	async fn simple_bind(&mut self, binddn: &str, bindpw: &str) -> Result<LdapResult, LdapError> {
		let host = self.host.clone();
		Ok(self.state().simple_bind(&host, binddn, bindpw))
	}

	async fn gssapi_bind(&mut self, _server_fqdn: &str) -> Result<LdapResult, LdapError> {
		Ok(result(7, "authMethodNotSupported"))
	}

	async fn unbind(&mut self) -> Result<(), LdapError> {
		let host = self.host.clone();
		self.state().unbinds.push(host);
		Ok(())
	}
}

/// Parameters binding as the administrator to the given URIs.
pub fn admin_params(uris: &[&str]) -> ConnectionParams {
	ConnectionParams::with_uris(uris.iter().copied(), ADMIN_DN, ADMIN_PASSWORD)
}

/// A client bound as the administrator to `ldap://dc1.example.org`.
pub async fn bound_client() -> (AdClient<MockDirectory>, MockDirectory) {
	init_tracing();
	let directory = MockDirectory::new();
	let mut client = AdClient::with_connector(directory.clone());
	client.login(admin_params(&["ldap://dc1.example.org"])).await.unwrap();
	(client, directory)
}
