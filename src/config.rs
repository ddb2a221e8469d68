//! Connection parameters for the directory client.
use std::{
	fmt,
	io::BufReader,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};

use crate::{
	dn::{domain2dn, Dn},
	error::{code, Error},
};

/// Network timeout used when none is configured.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// How to find and bind to a directory server.
///
/// Either `uris` or `domain` must be set. When `uris` is non-empty the
/// servers are tried in the listed order; an entry without a scheme is taken
/// to be a domain name and replaced by the servers it advertises. Otherwise
/// the servers of `domain` (preferring those of `site`) are discovered
/// through DNS service records.
#[derive(Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConnectionParams {
	/// DNS name of the domain, e.g. `example.org`
	pub domain: Option<String>,
	/// AD site whose servers are preferred during discovery
	pub site: Option<String>,
	/// Explicit server URIs (`ldap://`, `ldaps://` or `ldapi://`)
	pub uris: Vec<String>,
	/// DN (or `user@domain` name) to bind as
	pub binddn: String,
	/// Password for the simple bind
	pub bindpw: String,
	/// Base DN for searches. Derived from `domain`, or read from the server,
	/// when unset.
	pub search_base: Option<String>,
	/// Require a TLS protected transport before binding. Plain `ldap://`
	/// servers are upgraded with StartTLS and never used without it.
	pub secured: bool,
	/// Bind with SASL/GSSAPI using the Kerberos credential cache instead of
	/// a password
	pub use_gssapi: bool,
	/// Upgrade `ldap://` connections with StartTLS even when not `secured`
	pub use_tls: bool,
	/// Connect to discovered servers over `ldaps://` on port 636
	pub use_ldaps: bool,
	/// Network timeout in seconds for connecting and for every request.
	/// Zero or negative selects [`DEFAULT_NETWORK_TIMEOUT`].
	pub nettimeout: i32,
	/// Server side time limit for searches in seconds. Negative for no
	/// limit.
	pub timelimit: i32,
	/// TLS settings
	pub tls: TlsConfig,
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection, in PKCS8 format
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl Default for ConnectionParams {
	fn default() -> Self {
		Self {
			domain: None,
			site: None,
			uris: Vec::new(),
			binddn: String::new(),
			bindpw: String::new(),
			search_base: None,
			secured: true,
			use_gssapi: false,
			use_tls: false,
			use_ldaps: false,
			nettimeout: -1,
			timelimit: -1,
			tls: TlsConfig::default(),
		}
	}
}

impl fmt::Debug for ConnectionParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionParams")
			.field("domain", &self.domain)
			.field("site", &self.site)
			.field("uris", &self.uris)
			.field("binddn", &self.binddn)
			.field("bindpw", &"***")
			.field("search_base", &self.search_base)
			.field("secured", &self.secured)
			.field("use_gssapi", &self.use_gssapi)
			.field("use_tls", &self.use_tls)
			.field("use_ldaps", &self.use_ldaps)
			.field("nettimeout", &self.nettimeout)
			.field("timelimit", &self.timelimit)
			.field("tls", &self.tls)
			.finish()
	}
}

/// A parameter error, raised before any network I/O.
fn params_error(message: impl Into<String>) -> Error {
	Error::bind(message, code::PARAMS_ERROR)
}

impl ConnectionParams {
	/// Parameters for binding to the given servers with a simple bind.
	#[must_use]
	pub fn with_uris<S: Into<String>>(
		uris: impl IntoIterator<Item = S>,
		binddn: impl Into<String>,
		bindpw: impl Into<String>,
	) -> Self {
		Self {
			uris: uris.into_iter().map(Into::into).collect(),
			binddn: binddn.into(),
			bindpw: bindpw.into(),
			..Self::default()
		}
	}

	/// Parameters for binding to a discovered server of `domain`.
	#[must_use]
	pub fn for_domain(
		domain: impl Into<String>,
		binddn: impl Into<String>,
		bindpw: impl Into<String>,
	) -> Self {
		Self {
			domain: Some(domain.into()),
			binddn: binddn.into(),
			bindpw: bindpw.into(),
			..Self::default()
		}
	}

	/// Check the parameters for mistakes that can be detected without
	/// talking to a server.
	pub fn validate(&self) -> Result<(), Error> {
		let has_domain = self.domain.as_deref().is_some_and(|d| !d.trim().is_empty());
		let has_uris = self.uris.iter().any(|u| !u.trim().is_empty());
		if !has_domain && !has_uris {
			return Err(params_error("either a domain or a list of server URIs is required"));
		}
		if let Some(base) = self.search_base.as_deref().filter(|b| !b.trim().is_empty()) {
			base.parse::<Dn>()
				.map_err(|err| params_error(format!("invalid search base {base:?}: {err}")))?;
		}
		if !self.use_gssapi && self.bindpw.is_empty() && !self.binddn.is_empty() {
			return Err(params_error(format!(
				"an empty password for {:?} would be an unauthenticated bind",
				self.binddn
			)));
		}
		match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
			(Some(_), Some(_)) if self.tls.root_certificates_path.is_none() => {
				return Err(params_error(
					"a client certificate requires a root certificates path",
				));
			}
			(Some(_), None) | (None, Some(_)) => {
				return Err(params_error(
					"Both a client certificate and key file in PKCS8 format must be specified",
				));
			}
			_ => {}
		}
		Ok(())
	}

	/// The effective network timeout.
	#[must_use]
	pub fn network_timeout(&self) -> Duration {
		u64::try_from(self.nettimeout)
			.ok()
			.filter(|secs| *secs > 0)
			.map_or(DEFAULT_NETWORK_TIMEOUT, Duration::from_secs)
	}

	/// The server side search time limit, `None` for no limit.
	#[must_use]
	pub fn time_limit(&self) -> Option<i32> {
		(self.timelimit >= 0).then_some(self.timelimit)
	}

	/// The search base known without asking a server: the configured one,
	/// else the naming context of the domain.
	#[must_use]
	pub fn configured_search_base(&self) -> Option<String> {
		self.search_base
			.as_deref()
			.map(str::trim)
			.filter(|b| !b.is_empty())
			.map(str::to_owned)
			.or_else(|| {
				self.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()).map(domain2dn)
			})
	}

	/// Create [`LdapConnSettings`] for one connection attempt.
	pub(crate) async fn to_settings(&self, starttls: bool) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(self.network_timeout());
		settings = settings.set_starttls(starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(config) = self.tls.client_config().await? {
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

impl TlsConfig {
	/// Build a rustls configuration when custom roots are configured.
	async fn client_config(&self) -> Result<Option<ClientConfig>, Error> {
		let Some(root_path) = &self.root_certificates_path else {
			return Ok(None);
		};

		let mut roots = RootCertStore::empty();
		let (added, _) = roots.add_parsable_certificates(&read_pem_certs(root_path).await?);
		if added == 0 {
			return Err(params_error(format!(
				"Could not read root certificate from {}",
				root_path.display()
			)));
		}
		let builder = ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

		let config = match (&self.client_key_path, &self.client_certificate_path) {
			(Some(key_path), Some(cert_path)) => {
				let chain =
					read_pem_certs(cert_path).await?.into_iter().map(Certificate).collect::<Vec<_>>();
				let key = read_file(key_path).await?;
				let key = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key.as_slice()))
					.ok()
					.and_then(|keys| keys.into_iter().next())
					.ok_or_else(|| params_error("Could not read client key in PKCS8 format"))?;
				builder
					.with_client_auth_cert(chain, PrivateKey(key))
					.map_err(|err| params_error(format!("Could not read client certificates: {err}")))?
			}
			(None, None) => builder.with_no_client_auth(),
			_ => {
				return Err(params_error(
					"Both a client certificate and key file in PKCS8 format must be specified",
				))
			}
		};
		Ok(Some(config))
	}
}

/// Read a file, reporting failures as parameter errors.
async fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
	tokio::fs::read(path)
		.await
		.map_err(|err| params_error(format!("Could not read {}: {err}", path.display())))
}

/// Read every PEM certificate in a file.
async fn read_pem_certs(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
	let pem = read_file(path).await?;
	let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
		.map_err(|err| params_error(format!("Could not parse {}: {err}", path.display())))?;
	if certs.is_empty() {
		return Err(params_error(format!("No certificates found in {}", path.display())));
	}
	Ok(certs)
}
