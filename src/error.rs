//! Error codes

use ldap3::{LdapError, LdapResult};

/// Numeric error codes.
///
/// Codes coming from the directory server are LDAP result codes
/// ([RFC 4511 appendix A]) and are passed through unchanged. The constants
/// below cover failures detected on the client side.
///
/// [RFC 4511 appendix A]: https://www.rfc-editor.org/rfc/rfc4511#appendix-A
pub mod code {
	/// The operation succeeded.
	pub const SUCCESS: i32 = 1;
	/// There is no usable bound session.
	pub const LDAP_CONNECTION_ERROR: i32 = 2;
	/// A caller supplied argument was rejected before any I/O.
	pub const PARAMS_ERROR: i32 = 4;
	/// No candidate server could be connected to and bound.
	pub const SERVER_CONNECT_FAILURE: i32 = 6;
	/// The requested object does not exist.
	pub const OBJECT_NOT_FOUND: i32 = 8;
	/// The object exists but does not carry the requested attribute.
	pub const ATTRIBUTE_ENTRY_NOT_FOUND: i32 = 10;
	/// A DN passed for OU creation is not made of `OU=` and `DC=` parts.
	pub const OU_SYNTAX_ERROR: i32 = 12;
	/// Service record lookup for a domain failed.
	pub const LDAP_RESOLV_ERROR: i32 = 14;
	/// The transport to the server broke.
	pub const SERVER_DOWN: i32 = 81;
	/// A request did not complete within the network timeout.
	pub const TIMEOUT: i32 = 85;

	/// LDAP `timeLimitExceeded`.
	pub const TIME_LIMIT_EXCEEDED: i32 = 3;
	/// LDAP `confidentialityRequired`.
	pub const CONFIDENTIALITY_REQUIRED: i32 = 13;
	/// LDAP `noSuchAttribute`.
	pub const NO_SUCH_ATTRIBUTE: i32 = 16;
	/// LDAP `attributeOrValueExists`.
	pub const ATTRIBUTE_OR_VALUE_EXISTS: i32 = 20;
	/// LDAP `noSuchObject`.
	pub const NO_SUCH_OBJECT: i32 = 32;
	/// LDAP `invalidDNSyntax`.
	pub const INVALID_DN_SYNTAX: i32 = 34;
	/// LDAP `invalidCredentials`.
	pub const INVALID_CREDENTIALS: i32 = 49;
	/// LDAP `entryAlreadyExists`.
	pub const ENTRY_ALREADY_EXISTS: i32 = 68;
	/// LDAP `loopDetect`.
	pub const LOOP_DETECT: i32 = 71;
}

/// Errors that can occur when using this library.
///
/// The three variants follow the path an operation takes: connecting and
/// binding, reading, or writing. Every variant carries a human readable
/// message and a stable numeric [`code`] for coarse-grained branching.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// Connecting to or authenticating against a directory server failed.
	#[error("bind error ({code}): {message}")]
	Bind {
		/// Description of the failure
		message: String,
		/// Numeric code, see [`code`]
		code: i32,
	},
	/// A query failed. An empty result is never reported as this error.
	#[error("search error ({code}): {message}")]
	Search {
		/// Description of the failure
		message: String,
		/// Numeric code, see [`code`]
		code: i32,
	},
	/// An add, modify, rename or delete was rejected.
	#[error("operational error ({code}): {message}")]
	Operational {
		/// Description of the failure
		message: String,
		/// Numeric code, see [`code`]
		code: i32,
	},
}

impl Error {
	/// Create a [`Error::Bind`].
	pub(crate) fn bind(message: impl Into<String>, code: i32) -> Self {
		Error::Bind { message: message.into(), code }
	}

	/// Create a [`Error::Search`].
	pub(crate) fn search(message: impl Into<String>, code: i32) -> Self {
		Error::Search { message: message.into(), code }
	}

	/// Create a [`Error::Operational`].
	pub(crate) fn operational(message: impl Into<String>, code: i32) -> Self {
		Error::Operational { message: message.into(), code }
	}

	/// The numeric code of this error.
	#[must_use]
	pub fn code(&self) -> i32 {
		match self {
			Error::Bind { code, .. } | Error::Search { code, .. } | Error::Operational { code, .. } => {
				*code
			}
		}
	}

	/// The human readable message of this error.
	#[must_use]
	pub fn message(&self) -> &str {
		match self {
			Error::Bind { message, .. }
			| Error::Search { message, .. }
			| Error::Operational { message, .. } => message,
		}
	}

	/// Prefix the message with some context, keeping kind and code.
	#[must_use]
	pub(crate) fn context(self, context: &str) -> Self {
		match self {
			Error::Bind { message, code } => Error::bind(format!("{context}: {message}"), code),
			Error::Search { message, code } => Error::search(format!("{context}: {message}"), code),
			Error::Operational { message, code } => {
				Error::operational(format!("{context}: {message}"), code)
			}
		}
	}

	/// Report the same failure as an error of another kind.
	#[must_use]
	pub(crate) fn into_kind(self, kind: Kind) -> Self {
		match self {
			Error::Bind { message, code }
			| Error::Search { message, code }
			| Error::Operational { message, code } => kind.error(message, code),
		}
	}
}

/// Which [`Error`] variant a failure on a given path becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
	/// Connecting and binding
	Bind,
	/// Reading
	Search,
	/// Writing
	Operational,
}

impl Kind {
	/// Build the error of this kind.
	pub(crate) fn error(self, message: impl Into<String>, code: i32) -> Error {
		match self {
			Kind::Bind => Error::bind(message, code),
			Kind::Search => Error::search(message, code),
			Kind::Operational => Error::operational(message, code),
		}
	}
}

/// Extract the code and message of a non-successful LDAP result.
pub(crate) fn describe_result(result: &LdapResult) -> (i32, String) {
	let code = i32::try_from(result.rc).unwrap_or(i32::MAX);
	let message = if result.text.is_empty() {
		format!("{} ({})", result_name(result.rc), result.rc)
	} else {
		format!("{} ({}): {}", result_name(result.rc), result.rc, result.text.trim_end_matches('\0'))
	};
	(code, message)
}

/// Extract a code and message from an error raised by `ldap3`.
///
/// Results carried inside the error keep their LDAP code; everything else is
/// a transport level failure.
pub(crate) fn describe_ldap_error(err: &LdapError) -> (i32, String) {
	match err {
		LdapError::LdapResult { result } => describe_result(result),
		LdapError::Timeout { .. } => (code::TIMEOUT, err.to_string()),
		other => (code::SERVER_DOWN, other.to_string()),
	}
}

/// Whether an `ldap3` error leaves the connection in an unknown state.
pub(crate) fn breaks_connection(err: &LdapError) -> bool {
	matches!(
		err,
		LdapError::Io { .. }
			| LdapError::OpSend { .. }
			| LdapError::ResultRecv { .. }
			| LdapError::Timeout { .. }
			| LdapError::EndOfStream
	)
}

/// Short name of the common LDAP result codes.
fn result_name(rc: u32) -> &'static str {
	match rc {
		0 => "success",
		1 => "operationsError",
		2 => "protocolError",
		3 => "timeLimitExceeded",
		4 => "sizeLimitExceeded",
		8 => "strongerAuthRequired",
		10 => "referral",
		11 => "adminLimitExceeded",
		13 => "confidentialityRequired",
		16 => "noSuchAttribute",
		17 => "undefinedAttributeType",
		19 => "constraintViolation",
		20 => "attributeOrValueExists",
		21 => "invalidAttributeSyntax",
		32 => "noSuchObject",
		34 => "invalidDNSyntax",
		48 => "inappropriateAuthentication",
		49 => "invalidCredentials",
		50 => "insufficientAccessRights",
		51 => "busy",
		52 => "unavailable",
		53 => "unwillingToPerform",
		64 => "namingViolation",
		65 => "objectClassViolation",
		66 => "notAllowedOnNonLeaf",
		67 => "notAllowedOnRDN",
		68 => "entryAlreadyExists",
		69 => "objectClassModsProhibited",
		80 => "other",
		_ => "unknown",
	}
}

#[cfg(test)]
mod tests {
	use ldap3::LdapResult;

	use super::{code, describe_result, Error};

	fn result(rc: u32, text: &str) -> LdapResult {
		LdapResult { rc, matched: String::new(), text: text.to_owned(), refs: vec![], ctrls: vec![] }
	}

	#[test]
	fn server_codes_pass_through() {
		let (rc, message) = describe_result(&result(49, "80090308: LdapErr: DSID-0C09041C\0"));
		assert_eq!(rc, code::INVALID_CREDENTIALS);
		assert_eq!(message, "invalidCredentials (49): 80090308: LdapErr: DSID-0C09041C");

		let (rc, message) = describe_result(&result(32, ""));
		assert_eq!(rc, 32);
		assert_eq!(message, "noSuchObject (32)");
	}

	#[test]
	fn context_keeps_kind_and_code() {
		let err = Error::operational("entryAlreadyExists (68)", 68).context("creating OU=Test");
		assert_eq!(err.code(), 68);
		assert_eq!(err.message(), "creating OU=Test: entryAlreadyExists (68)");
		assert!(matches!(err, Error::Operational { .. }));
	}
}
