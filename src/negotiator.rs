//! Turning [`ConnectionParams`] into a bound [`Session`].
//!
//! Candidate servers are tried in order. The first one that connects, passes
//! the transport security requirements and accepts the bind wins; when all of
//! them fail the last failure is reported. There is no retry beyond that.

use ldap3::Scope;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
	config::ConnectionParams,
	connection::{Connection, Connector},
	discovery,
	entry::SearchEntryExt,
	error::{code, Error},
	model::attr,
	session::{AuthMethod, Bind, Session, Transport},
};

/// The server URIs to try, in order.
///
/// Explicit URIs come first, in the given order, with scheme-less entries
/// expanded through discovery. Without explicit URIs the servers of the
/// configured domain are discovered.
pub(crate) async fn candidates<K: Connector>(
	connector: &K,
	params: &ConnectionParams,
) -> Result<Vec<String>, Error> {
	let site = params.site.as_deref();
	let explicit: Vec<&str> =
		params.uris.iter().map(|u| u.trim()).filter(|u| !u.is_empty()).collect();
	if explicit.is_empty() {
		let domain = params.domain.as_deref().unwrap_or_default();
		return discovery::discover(connector, domain, site, params.use_ldaps).await;
	}

	let mut uris = Vec::new();
	let mut last_error = None;
	for entry in explicit {
		if entry.contains("://") {
			uris.push(entry.to_owned());
			continue;
		}
		match discovery::discover(connector, entry, site, params.use_ldaps).await {
			Ok(found) => uris.extend(found),
			Err(err) => last_error = Some(err),
		}
	}
	match last_error {
		Some(err) if uris.is_empty() => Err(err),
		_ => Ok(uris),
	}
}

/// Pick the transport for a URI and whether StartTLS is needed.
fn transport_for(url: &Url, params: &ConnectionParams) -> Result<(Transport, bool), Error> {
	match url.scheme() {
		"ldaps" => Ok((Transport::Ldaps, false)),
		"ldapi" => Ok((Transport::Ldapi, false)),
		"ldap" if params.secured || params.use_tls => Ok((Transport::StartTls, true)),
		"ldap" => Ok((Transport::Plain, false)),
		other => Err(Error::bind(format!("unsupported URI scheme {other:?}"), code::PARAMS_ERROR)),
	}
}

/// Connect and bind to one server.
#[instrument(level = "debug", skip(connector, params, bindpw))]
pub(crate) async fn bind_one<K: Connector>(
	connector: &K,
	params: &ConnectionParams,
	uri: &str,
	binddn: &str,
	bindpw: &str,
) -> Result<Session<K::Conn>, Error> {
	let url = Url::parse(uri)
		.map_err(|err| Error::bind(format!("invalid URI {uri:?}: {err}"), code::PARAMS_ERROR))?;
	let (transport, starttls) = transport_for(&url, params)?;

	let timeout = params.network_timeout();
	let conn = tokio::time::timeout(timeout, connector.connect(&url, params, starttls))
		.await
		.map_err(|_| {
			Error::bind(format!("Error in connecting to {uri}: timed out"), code::TIMEOUT)
		})??;

	let auth_method = if params.use_gssapi { AuthMethod::Gssapi } else { AuthMethod::Simple };
	let session = Session::new(conn, uri.to_owned(), auth_method, transport, timeout);
	let bind = match auth_method {
		AuthMethod::Gssapi => Bind::Gssapi {
			server_fqdn: url.host_str().ok_or_else(|| {
				Error::bind(format!("{uri} has no host name for GSSAPI"), code::PARAMS_ERROR)
			})?,
		},
		AuthMethod::Simple => Bind::Simple { binddn, bindpw },
	};
	if let Err(err) = session.bind(bind).await {
		if let Err(unbind_err) = session.unbind().await {
			debug!("Unbinding after failed bind: {unbind_err}");
		}
		return Err(err.context(&format!("Error while ldap binding to {uri} with {binddn:?}")));
	}
	Ok(session)
}

/// Establish a session according to `params`.
#[instrument(skip_all, fields(domain = ?params.domain, uris = ?params.uris))]
pub(crate) async fn negotiate<K: Connector>(
	connector: &K,
	params: &ConnectionParams,
) -> Result<Session<K::Conn>, Error> {
	params.validate()?;
	if params.use_gssapi && !cfg!(feature = "gssapi") {
		return Err(Error::bind(
			"GSSAPI bind requested but the crate was built without the gssapi feature",
			code::PARAMS_ERROR,
		));
	}

	let candidates = candidates(connector, params).await?;
	let mut last_error = None;
	for uri in &candidates {
		debug!(%uri, "Trying directory server");
		match bind_one(connector, params, uri, &params.binddn, &params.bindpw).await {
			Ok(mut session) => {
				session.time_limit = params.time_limit();
				let search_base = match params.configured_search_base() {
					Some(base) => base,
					None => match read_default_naming_context(&session).await {
						Ok(base) => base,
						Err(err) => {
							warn!(%uri, "Reading the root DSE failed: {err}");
							if let Err(unbind_err) = session.unbind().await {
								debug!("Unbinding after failed root DSE read: {unbind_err}");
							}
							last_error = Some(err);
							continue;
						}
					},
				};
				session.search_base = search_base;
				info!(
					uri = %session.bound_uri,
					auth = %session.auth_method,
					transport = ?session.transport,
					base = %session.search_base,
					"Bound to directory server"
				);
				return Ok(session);
			}
			Err(err) => {
				warn!(%uri, "Bind failed: {err}");
				last_error = Some(err);
			}
		}
	}

	Err(match last_error {
		Some(err) => Error::bind(
			format!(
				"no reachable server among {} candidate(s), last error: {}",
				candidates.len(),
				err.message()
			),
			err.code(),
		),
		None => Error::bind("no reachable server: no candidates", code::SERVER_CONNECT_FAILURE),
	})
}

/// Read the default naming context from the root DSE.
async fn read_default_naming_context<C: Connection>(
	session: &Session<C>,
) -> Result<String, Error> {
	let root = session
		.search("", Scope::Base, "(objectClass=*)", &[attr::DEFAULT_NAMING_CONTEXT])
		.await
		.map_err(|err| Error::bind(err.message(), err.code()))?;
	root.first()
		.and_then(|entry| entry.attr_first(attr::DEFAULT_NAMING_CONTEXT))
		.map(str::to_owned)
		.ok_or_else(|| {
			Error::bind(
				format!("{} does not advertise a default naming context", session.bound_uri),
				code::PARAMS_ERROR,
			)
		})
}
