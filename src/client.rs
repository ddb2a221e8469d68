//! The client handle owning one session.

use tracing::{debug, info};

use crate::{
	config::ConnectionParams,
	connection::{Connector, LdapConnector},
	error::{code, Error, Kind},
	negotiator,
	session::{AuthMethod, Session},
};

/// An Active Directory client.
///
/// A client owns at most one bound [`Session`]. It is created unbound; a
/// successful [`login`](Self::login) binds it, [`logout`](Self::logout)
/// releases the session. Operations on an unbound client fail with
/// [`code::LDAP_CONNECTION_ERROR`]. Clients share no state, so independent
/// clients can be used in parallel freely.
#[derive(Debug)]
pub struct AdClient<K: Connector = LdapConnector> {
	/// Opens connections
	pub(crate) connector: K,
	/// Parameters of the last successful login
	pub(crate) params: Option<ConnectionParams>,
	/// The bound session
	pub(crate) session: Option<Session<K::Conn>>,
}

impl Default for AdClient<LdapConnector> {
	fn default() -> Self {
		Self::new()
	}
}

impl AdClient<LdapConnector> {
	/// Create an unbound client talking to real servers.
	#[must_use]
	pub fn new() -> Self {
		Self::with_connector(LdapConnector)
	}
}

impl<K: Connector> AdClient<K> {
	/// Create an unbound client using the given connector.
	#[must_use]
	pub fn with_connector(connector: K) -> Self {
		Self { connector, params: None, session: None }
	}

	/// Bind according to `params`, replacing any existing session.
	///
	/// On failure the client is left unbound.
	pub async fn login(&mut self, params: ConnectionParams) -> Result<(), Error> {
		if let Err(err) = self.logout().await {
			debug!("Releasing previous session: {err}");
		}
		let session = negotiator::negotiate(&self.connector, &params).await?;
		self.session = Some(session);
		self.params = Some(params);
		Ok(())
	}

	/// Unbind and drop the session. Logging out an unbound client is a no-op.
	pub async fn logout(&mut self) -> Result<(), Error> {
		match self.session.take() {
			Some(session) => {
				info!(uri = %session.bound_uri(), "Logging out");
				session.unbind().await
			}
			None => Ok(()),
		}
	}

	/// Bind again with the parameters of the last successful login, e.g.
	/// after the session was lost to a timeout.
	pub async fn reconnect(&mut self) -> Result<(), Error> {
		let params = self.params.clone().ok_or_else(|| {
			Error::bind("reconnect without a previous login", code::LDAP_CONNECTION_ERROR)
		})?;
		self.login(params).await
	}

	/// The bound session, if any.
	#[must_use]
	pub fn session(&self) -> Option<&Session<K::Conn>> {
		self.session.as_ref()
	}

	/// Whether the client holds a usable session.
	#[must_use]
	pub fn is_bound(&self) -> bool {
		self.session.as_ref().is_some_and(Session::is_valid)
	}

	/// URI of the server the client is bound to.
	#[must_use]
	pub fn bound_uri(&self) -> Option<&str> {
		self.session.as_ref().map(Session::bound_uri)
	}

	/// Base DN used for searches.
	#[must_use]
	pub fn search_base(&self) -> Option<&str> {
		self.session.as_ref().map(Session::search_base)
	}

	/// How the session authenticated.
	#[must_use]
	pub fn auth_method(&self) -> Option<AuthMethod> {
		self.session.as_ref().map(Session::auth_method)
	}

	/// The session, or the error of `kind` reported when there is none.
	pub(crate) fn bound(&self, kind: Kind) -> Result<&Session<K::Conn>, Error> {
		self.session.as_ref().ok_or_else(|| {
			kind.error("Failed to use LDAP connection handler: not logged in", code::LDAP_CONNECTION_ERROR)
		})
	}
}
