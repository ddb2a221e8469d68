//! The transport seam: one connection to one directory server.
//!
//! [`Connector`] opens connections and [`Connection`] carries the individual
//! requests. The implementations here use `ldap3`; anything else speaking
//! the same operations (an in-memory directory in tests, for one) can be
//! plugged into [`AdClient`](crate::AdClient) instead.

use std::{collections::HashSet, future::Future};

use ldap3::{
	controls::{Control, ControlType, PagedResults, RawControl},
	LdapConnAsync, LdapError, LdapResult, Mod, Scope, SearchEntry, SearchOptions,
};
use tokio::task::JoinHandle;
use tracing::warn;
use url::Url;

use crate::{
	config::ConnectionParams,
	discovery::{DnsResolver, SrvResolver, SrvTarget},
	error::{code, Error},
};

/// Number of entries requested per page.
pub const PAGE_SIZE: i32 = 1000;

/// Attribute values keyed by attribute name, as sent in an add request.
pub type AddAttributes = Vec<(Vec<u8>, HashSet<Vec<u8>>)>;

/// Parameters of one page of a paged search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
	/// Base DN
	pub base: String,
	/// Search scope
	pub scope: Scope,
	/// Filter string
	pub filter: String,
	/// Requested attributes, empty for all user attributes
	pub attributes: Vec<String>,
	/// Server side time limit in seconds
	pub time_limit: Option<i32>,
	/// Maximum number of entries in the page
	pub page_size: i32,
	/// Cookie returned with the previous page, empty for the first
	pub cookie: Vec<u8>,
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
	/// Entries in the order the server sent them
	pub entries: Vec<SearchEntry>,
	/// Final result of the request
	pub result: LdapResult,
	/// Cookie for the next page, empty when this was the last one
	pub cookie: Vec<u8>,
}

/// A connection to a single directory server.
///
/// Requests are issued one at a time; callers serialize access.
pub trait Connection: Send {
	/// Fetch one page of a search.
	fn search_page(
		&mut self,
		request: &SearchRequest,
	) -> impl Future<Output = Result<SearchPage, LdapError>> + Send;

	/// Add an entry.
	fn add(
		&mut self,
		dn: &str,
		attrs: AddAttributes,
	) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// Apply modifications to an entry.
	fn modify(
		&mut self,
		dn: &str,
		mods: Vec<Mod<Vec<u8>>>,
	) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// Delete an entry.
	fn delete(&mut self, dn: &str) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// Rename and/or move an entry.
	fn modify_dn(
		&mut self,
		dn: &str,
		rdn: &str,
		delete_old: bool,
		new_superior: Option<&str>,
	) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// Simple bind.
	fn simple_bind(
		&mut self,
		binddn: &str,
		bindpw: &str,
	) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// SASL/GSSAPI bind against the server named `server_fqdn`.
	fn gssapi_bind(
		&mut self,
		server_fqdn: &str,
	) -> impl Future<Output = Result<LdapResult, LdapError>> + Send;

	/// Unbind and close the connection.
	fn unbind(&mut self) -> impl Future<Output = Result<(), LdapError>> + Send;
}

/// Opens connections and resolves service records.
pub trait Connector: SrvResolver + Send + Sync {
	/// The connection type produced.
	type Conn: Connection;

	/// Open a connection to `url`, upgrading it with StartTLS when
	/// `starttls` is set.
	fn connect(
		&self,
		url: &Url,
		params: &ConnectionParams,
		starttls: bool,
	) -> impl Future<Output = Result<Self::Conn, Error>> + Send;
}

/// [`Connector`] for real servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

impl SrvResolver for LdapConnector {
	async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Error> {
		DnsResolver.lookup_srv(name).await
	}
}

impl Connector for LdapConnector {
	type Conn = LdapConnection;

	async fn connect(
		&self,
		url: &Url,
		params: &ConnectionParams,
		starttls: bool,
	) -> Result<LdapConnection, Error> {
		let settings = params.to_settings(starttls).await?;
		let (conn, ldap) =
			LdapConnAsync::from_url_with_settings(settings, url).await.map_err(|err| {
				Error::bind(format!("Error connecting to {url}: {err}"), code::SERVER_CONNECT_FAILURE)
			})?;
		let driver = tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		Ok(LdapConnection { ldap, driver: Some(driver) })
	}
}

/// A connection opened by [`LdapConnector`].
#[derive(Debug)]
pub struct LdapConnection {
	/// Request handle
	ldap: ldap3::Ldap,
	/// Task driving the socket
	driver: Option<JoinHandle<()>>,
}

impl Connection for LdapConnection {
	async fn search_page(&mut self, request: &SearchRequest) -> Result<SearchPage, LdapError> {
		let paging = PagedResults { size: request.page_size, cookie: request.cookie.clone() };
		let mut options = SearchOptions::new();
		if let Some(limit) = request.time_limit {
			options = options.timelimit(limit);
		}
		let attrs: Vec<&str> = if request.attributes.is_empty() {
			vec!["*"]
		} else {
			request.attributes.iter().map(String::as_str).collect()
		};
		let ldap3::SearchResult(entries, result) = self
			.ldap
			.with_search_options(options)
			.with_controls(RawControl::from(paging))
			.search(&request.base, request.scope, &request.filter, attrs)
			.await?;

		let cookie = result
			.ctrls
			.iter()
			.find_map(|Control(kind, raw)| match kind {
				Some(ControlType::PagedResults) => Some(raw.parse::<PagedResults>().cookie),
				_ => None,
			})
			.unwrap_or_default();
		let entries = entries.into_iter().map(SearchEntry::construct).collect();
		Ok(SearchPage { entries, result, cookie })
	}

	async fn add(&mut self, dn: &str, attrs: AddAttributes) -> Result<LdapResult, LdapError> {
		self.ldap.add(dn, attrs).await
	}

	async fn modify(&mut self, dn: &str, mods: Vec<Mod<Vec<u8>>>) -> Result<LdapResult, LdapError> {
		self.ldap.modify(dn, mods).await
	}

	async fn delete(&mut self, dn: &str) -> Result<LdapResult, LdapError> {
		self.ldap.delete(dn).await
	}

	async fn modify_dn(
		&mut self,
		dn: &str,
		rdn: &str,
		delete_old: bool,
		new_superior: Option<&str>,
	) -> Result<LdapResult, LdapError> {
		self.ldap.modifydn(dn, rdn, delete_old, new_superior).await
	}

	async fn simple_bind(&mut self, binddn: &str, bindpw: &str) -> Result<LdapResult, LdapError> {
		self.ldap.simple_bind(binddn, bindpw).await
	}

	#[cfg(feature = "gssapi")]
	async fn gssapi_bind(&mut self, server_fqdn: &str) -> Result<LdapResult, LdapError> {
		self.ldap.sasl_gssapi_bind(server_fqdn).await
	}

	#[cfg(not(feature = "gssapi"))]
	async fn gssapi_bind(&mut self, _server_fqdn: &str) -> Result<LdapResult, LdapError> {
		// authMethodNotSupported
		Ok(LdapResult {
			rc: 7,
			matched: String::new(),
			text: "built without GSSAPI support".to_owned(),
			refs: Vec::new(),
			ctrls: Vec::new(),
		})
	}

	async fn unbind(&mut self) -> Result<(), LdapError> {
		self.ldap.unbind().await?;
		if let Some(driver) = self.driver.take() {
			if let Err(err) = driver.await {
				warn!("Failed to join background task: {err}");
			}
		}
		Ok(())
	}
}
