//! Distinguished name parsing, escaping and domain name conversions.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
	/// The distinguished name was empty.
	#[error("distinguished name cannot be empty")]
	Empty,
	/// A component was missing the `=` separating attribute and value.
	#[error("invalid distinguished name component: {0}")]
	InvalidComponent(String),
	/// A component was missing the attribute name to the left of the `=`.
	#[error("distinguished name component missing attribute: {0}")]
	MissingAttribute(String),
	/// The distinguished name ended with an escape character or contained a
	/// malformed hex escape.
	#[error("distinguished name contains an invalid escape sequence")]
	InvalidEscape,
}

/// Relative distinguished name, a single attribute/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
	/// Attribute type, e.g. `CN`
	attribute: String,
	/// Unescaped attribute value
	value: String,
}

impl Rdn {
	/// Create a new relative distinguished name from an unescaped value.
	#[must_use]
	pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
		Self { attribute: attribute.into(), value: value.into() }
	}

	/// Attribute portion of the RDN.
	#[must_use]
	pub fn attribute(&self) -> &str {
		&self.attribute
	}

	/// Unescaped value portion of the RDN.
	#[must_use]
	pub fn value(&self) -> &str {
		&self.value
	}

	/// Returns true if this RDN has the given attribute type (case-insensitive).
	#[must_use]
	pub fn matches_attribute(&self, attribute: &str) -> bool {
		self.attribute.eq_ignore_ascii_case(attribute)
	}
}

impl fmt::Display for Rdn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={}", self.attribute, escape_value(&self.value))
	}
}

/// A parsed distinguished name.
///
/// RDNs are stored leaf first, the way they are written. Multi-valued RDNs
/// (`a=b+c=d`) are kept as a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dn {
	/// Components, leaf first
	rdns: Vec<Rdn>,
}

impl Dn {
	/// Build a DN from RDNs given leaf first.
	#[must_use]
	pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
		Self { rdns }
	}

	/// The components, leaf first.
	#[must_use]
	pub fn rdns(&self) -> &[Rdn] {
		&self.rdns
	}

	/// The leaf component.
	#[must_use]
	pub fn rdn(&self) -> Option<&Rdn> {
		self.rdns.first()
	}

	/// The DN of the parent entry, `None` for a single component DN.
	#[must_use]
	pub fn parent(&self) -> Option<Dn> {
		(self.rdns.len() > 1).then(|| Dn { rdns: self.rdns[1..].to_vec() })
	}

	/// Compare two DNs ignoring the case of attribute types and values, which
	/// is how Active Directory compares them.
	#[must_use]
	pub fn same_as(&self, other: &Dn) -> bool {
		self.rdns.len() == other.rdns.len()
			&& self.rdns.iter().zip(&other.rdns).all(|(a, b)| {
				a.attribute.eq_ignore_ascii_case(&b.attribute)
					&& a.value.to_lowercase() == b.value.to_lowercase()
			})
	}

	/// Whether `self` lies strictly below `ancestor`.
	#[must_use]
	pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
		self.rdns.len() > ancestor.rdns.len()
			&& Dn { rdns: self.rdns[self.rdns.len() - ancestor.rdns.len()..].to_vec() }
				.same_as(ancestor)
	}
}

impl FromStr for Dn {
	type Err = DnError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(DnError::Empty);
		}
		let rdns = split_unescaped(s, ',')?
			.into_iter()
			.map(|component| {
				let component = component.trim();
				let (attribute, value) = split_once_unescaped(component, '=')
					.ok_or_else(|| DnError::InvalidComponent(component.to_owned()))?;
				let attribute = attribute.trim();
				if attribute.is_empty() {
					return Err(DnError::MissingAttribute(component.to_owned()));
				}
				Ok(Rdn::new(attribute, unescape_value(value.trim_start())?))
			})
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Dn { rdns })
	}
}

impl fmt::Display for Dn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, rdn) in self.rdns.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			write!(f, "{rdn}")?;
		}
		Ok(())
	}
}

/// Split on every occurrence of `sep` that is not escaped with a backslash.
fn split_unescaped(s: &str, sep: char) -> Result<Vec<&str>, DnError> {
	let mut parts = Vec::new();
	let mut start = 0;
	let mut escaped = false;
	for (i, c) in s.char_indices() {
		if escaped {
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if c == sep {
			parts.push(&s[start..i]);
			start = i + c.len_utf8();
		}
	}
	if escaped {
		return Err(DnError::InvalidEscape);
	}
	parts.push(&s[start..]);
	Ok(parts)
}

/// Split at the first unescaped `sep`.
fn split_once_unescaped(s: &str, sep: char) -> Option<(&str, &str)> {
	let mut escaped = false;
	for (i, c) in s.char_indices() {
		if escaped {
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if c == sep {
			return Some((&s[..i], &s[i + c.len_utf8()..]));
		}
	}
	None
}

/// Undo RFC 4514 escaping: `\,` style and `\2c` style.
fn unescape_value(value: &str) -> Result<String, DnError> {
	let bytes = value.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] != b'\\' {
			out.push(bytes[i]);
			i += 1;
			continue;
		}
		let next = *bytes.get(i + 1).ok_or(DnError::InvalidEscape)?;
		if next.is_ascii_hexdigit() {
			let hex = bytes.get(i + 1..i + 3).ok_or(DnError::InvalidEscape)?;
			let hex = std::str::from_utf8(hex).map_err(|_| DnError::InvalidEscape)?;
			out.push(u8::from_str_radix(hex, 16).map_err(|_| DnError::InvalidEscape)?);
			i += 3;
		} else {
			out.push(next);
			i += 2;
		}
	}
	String::from_utf8(out).map_err(|_| DnError::InvalidEscape)
}

/// Escape an attribute value for use inside a DN per RFC 4514.
#[must_use]
pub fn escape_value(value: &str) -> String {
	let mut result = String::with_capacity(value.len());
	let last = value.chars().count().saturating_sub(1);
	for (i, c) in value.chars().enumerate() {
		match c {
			',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
				result.push('\\');
				result.push(c);
			}
			'\0' => result.push_str("\\00"),
			'#' if i == 0 => result.push_str("\\23"),
			' ' if i == 0 || i == last => result.push_str("\\20"),
			_ => result.push(c),
		}
	}
	result
}

/// Convert a DNS domain name to the DN of its domain naming context.
///
/// `example.org` becomes `dc=example,dc=org`.
#[must_use]
pub fn domain2dn(domain: &str) -> String {
	domain
		.trim_end_matches('.')
		.split('.')
		.filter(|label| !label.is_empty())
		.map(|label| format!("dc={}", escape_value(label)))
		.collect::<Vec<_>>()
		.join(",")
}

/// Collect the `DC` components of a DN into a DNS domain name.
///
/// `CN=John,OU=Staff,DC=example,DC=org` becomes `example.org`.
#[must_use]
pub fn dn2domain(dn: &Dn) -> String {
	dn.rdns()
		.iter()
		.filter(|rdn| rdn.matches_attribute("dc"))
		.map(Rdn::value)
		.collect::<Vec<_>>()
		.join(".")
}
