//! A bound connection and the primitives issued over it.

use std::{
	fmt,
	future::Future,
	sync::atomic::{AtomicBool, Ordering},
	time::Duration,
};

use ldap3::{LdapError, LdapResult, Mod, Scope};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
	connection::{AddAttributes, Connection, SearchRequest, PAGE_SIZE},
	entry::DirectoryObject,
	error::{breaks_connection, code, describe_ldap_error, describe_result, Error, Kind},
};

/// How the session authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
	/// Simple bind with DN and password
	Simple,
	/// SASL/GSSAPI bind with a Kerberos ticket
	Gssapi,
}

impl fmt::Display for AuthMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			AuthMethod::Simple => "simple",
			AuthMethod::Gssapi => "GSSAPI",
		})
	}
}

/// How the connection is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
	/// Plain TCP
	Plain,
	/// TCP upgraded with the StartTLS extended operation
	StartTls,
	/// TLS on a dedicated port
	Ldaps,
	/// Local socket
	Ldapi,
}

impl Transport {
	/// Whether the transport protects what is sent over it.
	#[must_use]
	pub fn is_secure(self) -> bool {
		!matches!(self, Transport::Plain)
	}
}

/// One live bound connection.
///
/// Requests are serialized by a mutex, so a session can be shared between
/// tasks. A request that times out, or a broken transport, makes the session
/// unusable: every later request fails with
/// [`code::LDAP_CONNECTION_ERROR`] and the client has to bind again.
pub struct Session<C> {
	/// The connection, locked for the duration of each request
	conn: Mutex<C>,
	/// URI of the server the session is bound to
	pub(crate) bound_uri: String,
	/// Base DN for searches
	pub(crate) search_base: String,
	/// How the session authenticated
	pub(crate) auth_method: AuthMethod,
	/// How the connection is carried
	pub(crate) transport: Transport,
	/// Time to wait for each response
	pub(crate) timeout: Duration,
	/// Server side time limit for searches
	pub(crate) time_limit: Option<i32>,
	/// Cleared once the connection can no longer be trusted
	valid: AtomicBool,
}

impl<C: Connection> fmt::Debug for Session<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("bound_uri", &self.bound_uri)
			.field("search_base", &self.search_base)
			.field("auth_method", &self.auth_method)
			.field("transport", &self.transport)
			.field("valid", &self.is_valid())
			.finish_non_exhaustive()
	}
}

impl<C: Connection> Session<C> {
	/// Wrap a freshly bound connection.
	pub(crate) fn new(
		conn: C,
		bound_uri: String,
		auth_method: AuthMethod,
		transport: Transport,
		timeout: Duration,
	) -> Self {
		Self {
			conn: Mutex::new(conn),
			bound_uri,
			search_base: String::new(),
			auth_method,
			transport,
			timeout,
			time_limit: None,
			valid: AtomicBool::new(true),
		}
	}

	/// URI of the server the session is bound to.
	#[must_use]
	pub fn bound_uri(&self) -> &str {
		&self.bound_uri
	}

	/// Base DN used for searches.
	#[must_use]
	pub fn search_base(&self) -> &str {
		&self.search_base
	}

	/// How the session authenticated.
	#[must_use]
	pub fn auth_method(&self) -> AuthMethod {
		self.auth_method
	}

	/// How the connection is carried.
	#[must_use]
	pub fn transport(&self) -> Transport {
		self.transport
	}

	/// Whether the transport is TLS protected or local.
	#[must_use]
	pub fn is_secure(&self) -> bool {
		self.transport.is_secure()
	}

	/// Whether requests can still be issued.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::Acquire)
	}

	/// Mark the session unusable.
	fn invalidate(&self, reason: &str) {
		if self.valid.swap(false, Ordering::AcqRel) {
			warn!(uri = %self.bound_uri, "Session invalidated: {reason}");
		}
	}

	/// Fail early when the session is no longer usable.
	fn ensure_valid(&self, kind: Kind) -> Result<(), Error> {
		if self.is_valid() {
			Ok(())
		} else {
			Err(kind.error(
				format!("Failed to use LDAP connection handler: session to {} was lost", self.bound_uri),
				code::LDAP_CONNECTION_ERROR,
			))
		}
	}

	/// Take the connection. Fails when the session was lost, also while
	/// waiting behind another request.
	async fn acquire(&self, kind: Kind) -> Result<MutexGuard<'_, C>, Error> {
		self.ensure_valid(kind)?;
		let conn = self.conn.lock().await;
		self.ensure_valid(kind)?;
		Ok(conn)
	}

	/// Await a request under the network timeout, invalidating the session
	/// when the connection is left in an unknown state.
	async fn run<T>(
		&self,
		kind: Kind,
		request: impl Future<Output = Result<T, LdapError>>,
	) -> Result<T, Error> {
		match tokio::time::timeout(self.timeout, request).await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(err)) => {
				if breaks_connection(&err) {
					self.invalidate(&err.to_string());
				}
				let (rc, message) = describe_ldap_error(&err);
				Err(kind.error(message, rc))
			}
			Err(_) => {
				self.invalidate("request timed out");
				Err(kind.error(
					format!("no response from {} within {:?}", self.bound_uri, self.timeout),
					code::TIMEOUT,
				))
			}
		}
	}

	/// Turn a non-success result into an error.
	fn check(kind: Kind, result: &LdapResult) -> Result<(), Error> {
		if result.rc == 0 {
			Ok(())
		} else {
			let (rc, message) = describe_result(result);
			Err(kind.error(message, rc))
		}
	}

	/// Search and collect every page of the result.
	///
	/// An empty `attributes` slice requests all user attributes. Entries are
	/// returned in the order the server sent them.
	pub async fn search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: &[&str],
	) -> Result<Vec<DirectoryObject>, Error> {
		let mut conn = self.acquire(Kind::Search).await?;
		let mut request = SearchRequest {
			base: base.to_owned(),
			scope,
			filter: filter.to_owned(),
			attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
			time_limit: self.time_limit,
			page_size: PAGE_SIZE,
			cookie: Vec::new(),
		};
		let mut objects = Vec::new();
		let mut pages = 0_usize;
		loop {
			let page = self.run(Kind::Search, conn.search_page(&request)).await?;
			Self::check(Kind::Search, &page.result)?;
			pages += 1;
			objects.extend(page.entries.into_iter().map(DirectoryObject::from));
			if page.cookie.is_empty() {
				break;
			}
			if page.cookie == request.cookie {
				return Err(Error::operational(
					format!("server repeated the paging cookie after {pages} page(s) of {filter} below {base:?}"),
					code::LOOP_DETECT,
				));
			}
			request.cookie = page.cookie;
		}
		debug!(%base, %filter, entries = objects.len(), pages, "Search complete");
		Ok(objects)
	}

	/// Add an entry.
	pub async fn add(&self, dn: &str, attrs: AddAttributes) -> Result<(), Error> {
		let mut conn = self.acquire(Kind::Operational).await?;
		let result = self.run(Kind::Operational, conn.add(dn, attrs)).await?;
		Self::check(Kind::Operational, &result)
	}

	/// Modify an entry.
	pub async fn modify(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> Result<(), Error> {
		let mut conn = self.acquire(Kind::Operational).await?;
		let result = self.run(Kind::Operational, conn.modify(dn, mods)).await?;
		Self::check(Kind::Operational, &result)
	}

	/// Delete an entry.
	pub async fn delete(&self, dn: &str) -> Result<(), Error> {
		let mut conn = self.acquire(Kind::Operational).await?;
		let result = self.run(Kind::Operational, conn.delete(dn)).await?;
		Self::check(Kind::Operational, &result)
	}

	/// Rename and/or move an entry.
	pub async fn modify_dn(
		&self,
		dn: &str,
		rdn: &str,
		new_superior: Option<&str>,
	) -> Result<(), Error> {
		let mut conn = self.acquire(Kind::Operational).await?;
		let result = self.run(Kind::Operational, conn.modify_dn(dn, rdn, true, new_superior)).await?;
		Self::check(Kind::Operational, &result)
	}

	/// Bind the connection. Used during negotiation only.
	pub(crate) async fn bind(&self, bind: Bind<'_>) -> Result<(), Error> {
		let mut conn = self.conn.lock().await;
		let result = match bind {
			Bind::Simple { binddn, bindpw } => {
				self.run(Kind::Bind, conn.simple_bind(binddn, bindpw)).await?
			}
			Bind::Gssapi { server_fqdn } => self.run(Kind::Bind, conn.gssapi_bind(server_fqdn)).await?,
		};
		Self::check(Kind::Bind, &result)
	}

	/// Unbind and close the connection.
	pub async fn unbind(self) -> Result<(), Error> {
		let valid = self.is_valid();
		let mut conn = self.conn.into_inner();
		if !valid {
			return Ok(());
		}
		match tokio::time::timeout(self.timeout, conn.unbind()).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(err)) => {
				let (rc, message) = describe_ldap_error(&err);
				Err(Error::bind(message, rc))
			}
			Err(_) => Err(Error::bind("unbind timed out", code::TIMEOUT)),
		}
	}
}

/// Credentials for [`Session::bind`].
#[derive(Clone, Copy)]
pub(crate) enum Bind<'a> {
	/// Simple bind
	Simple {
		/// Bind DN
		binddn: &'a str,
		/// Password
		bindpw: &'a str,
	},
	/// SASL/GSSAPI bind
	Gssapi {
		/// Host name the service ticket is requested for
		server_fqdn: &'a str,
	},
}

impl fmt::Debug for Bind<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Bind::Simple { binddn, .. } => f.debug_struct("Simple").field("binddn", binddn).finish(),
			Bind::Gssapi { server_fqdn } => {
				f.debug_struct("Gssapi").field("server_fqdn", server_fqdn).finish()
			}
		}
	}
}
