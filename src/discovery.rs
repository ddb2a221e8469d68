//! Finding the directory servers of a domain through DNS service records.
//!
//! Domain controllers register `_ldap._tcp.<domain>` and, per AD site,
//! `_ldap._tcp.<site>._sites.<domain>`. Servers of the client's own site are
//! preferred; the domain wide records are the fallback.

use std::{collections::HashSet, future::Future};

use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::error::{code, Error};

/// Default port of plain LDAP.
const LDAP_PORT: u16 = 389;
/// Default port of LDAP over TLS.
const LDAPS_PORT: u16 = 636;

/// One target of an SRV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
	/// Lower is preferred
	pub priority: u16,
	/// Higher is preferred among equal priorities
	pub weight: u16,
	/// Port of the LDAP service
	pub port: u16,
	/// Host name, without the trailing dot
	pub host: String,
}

impl SrvTarget {
	/// The URI to connect to this target with.
	#[must_use]
	pub fn uri(&self, ldaps: bool) -> String {
		if ldaps {
			format!("ldaps://{}:{LDAPS_PORT}", self.host)
		} else if self.port == LDAP_PORT || self.port == 0 {
			format!("ldap://{}", self.host)
		} else {
			format!("ldap://{}:{}", self.host, self.port)
		}
	}
}

/// Something that can look up SRV records.
pub trait SrvResolver {
	/// Look up the SRV records of `name`. An empty answer is not an error.
	fn lookup_srv(&self, name: &str) -> impl Future<Output = Result<Vec<SrvTarget>, Error>> + Send;
}

/// Resolver using the system DNS configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl SrvResolver for DnsResolver {
	async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Error> {
		let resolve_error = |err: &dyn std::fmt::Display| {
			Error::bind(
				format!("Error while resolving ldap server for {name}: {err}"),
				code::LDAP_RESOLV_ERROR,
			)
		};
		let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| resolve_error(&e))?;
		let lookup = resolver.srv_lookup(name).await.map_err(|e| resolve_error(&e))?;
		Ok(lookup
			.iter()
			.map(|srv| SrvTarget {
				priority: srv.priority(),
				weight: srv.weight(),
				port: srv.port(),
				host: srv.target().to_utf8().trim_end_matches('.').to_owned(),
			})
			.collect())
	}
}

/// The SRV names to query, most specific first.
#[must_use]
pub fn srv_names(domain: &str, site: Option<&str>) -> Vec<String> {
	let domain = domain.trim().trim_end_matches('.');
	let mut names = Vec::with_capacity(2);
	if let Some(site) = site.map(str::trim).filter(|s| !s.is_empty()) {
		names.push(format!("_ldap._tcp.{site}._sites.{domain}"));
	}
	names.push(format!("_ldap._tcp.{domain}"));
	names
}

/// Order targets by ascending priority, then descending weight, dropping
/// duplicate hosts.
#[must_use]
pub fn order_targets(mut targets: Vec<SrvTarget>) -> Vec<SrvTarget> {
	targets.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
	let mut seen = HashSet::new();
	targets.retain(|t| seen.insert(t.host.to_ascii_lowercase()));
	targets
}

/// Discover the server URIs of `domain`, trying the servers of `site` first.
///
/// Fails with [`code::LDAP_RESOLV_ERROR`] when no name yields any server.
pub async fn discover<R: SrvResolver + Sync>(
	resolver: &R,
	domain: &str,
	site: Option<&str>,
	ldaps: bool,
) -> Result<Vec<String>, Error> {
	let mut last_error = None;
	for name in srv_names(domain, site) {
		match resolver.lookup_srv(&name).await {
			Ok(targets) if !targets.is_empty() => {
				let uris: Vec<_> =
					order_targets(targets).iter().map(|target| target.uri(ldaps)).collect();
				debug!(%name, servers = ?uris, "Discovered directory servers");
				return Ok(uris);
			}
			Ok(_) => debug!(%name, "No SRV records"),
			Err(err) => {
				warn!(%name, "SRV lookup failed: {err}");
				last_error = Some(err);
			}
		}
	}
	Err(last_error.unwrap_or_else(|| {
		Error::bind(format!("No ldap servers found for {domain}"), code::LDAP_RESOLV_ERROR)
	}))
}

/// Look up the LDAP servers of a domain with the system resolver.
pub async fn get_ldap_servers(domain: &str, site: Option<&str>) -> Result<Vec<String>, Error> {
	discover(&DnsResolver, domain, site, false).await
}
