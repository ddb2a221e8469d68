//! Client core for Active Directory.
//!
//! The library finds domain controllers for a domain through DNS service
//! records (or takes an explicit list of server URIs), binds to the first one
//! that accepts the configured credentials, and then offers searches and
//! directory changes phrased in Active Directory terms: users, groups,
//! organizational units, computers, account state and passwords.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use ad_client::{AdClient, ConnectionParams, Scope};
//!
//! // Parameters can also be deserialized with serde. They're hand-constructed
//! // here for demonstration purposes.
//! let params = ConnectionParams::for_domain(
//!     "example.org",
//!     "CN=svc-ad,CN=Users,DC=example,DC=org",
//!     "verysecret",
//! );
//!
//! let mut client = AdClient::new();
//! client.login(params).await?;
//! println!("Bound to {:?}", client.bound_uri());
//!
//! let staff = client.get_users_in_ou("OU=Staff,DC=example,DC=org", Scope::Subtree).await?;
//! for user in staff {
//!     let controls = client.get_user_controls(&user).await?;
//!     println!("{user}: disabled={}, locked={}", controls.disabled, controls.locked);
//! }
//!
//! client.create_ou("OU=Contractors,OU=Staff,DC=example,DC=org").await?;
//! client.group_add_user("vpn-users", "jdoe").await?;
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//! Every fallible call returns [`Error`], whose variant says whether binding,
//! reading or writing failed, and whose [`Error::code`] is either the LDAP
//! result code of the server or one of the client side codes in
//! [`error::code`].
//!
//! # Limitations
//! * One client holds one connection and requests over it are serialized.
//!   Use several clients for parallel work.
//! * A timed out request leaves the session unusable; there is no automatic
//!   rebind, call [`AdClient::reconnect`].
//! * Failover between servers only happens while binding.

pub mod attribute;
mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod model;
mod mutation;
mod negotiator;
mod query;
pub mod session;

pub use ldap3::{self, Scope, SearchEntry};

pub use crate::{
	attribute::{int2ip, ip2int, Guid, Sid},
	client::AdClient,
	config::{ConnectionParams, TlsConfig},
	discovery::get_ldap_servers,
	dn::{dn2domain, domain2dn, Dn},
	entry::{DirectoryObject, SearchEntryExt},
	error::Error,
	filter::Filter,
	model::{ObjectKind, UserControl, UserControls},
	mutation::encode_password,
	session::{AuthMethod, Session, Transport},
};
