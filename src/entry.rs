//! Directory objects and helper methods for extracting data from them.
use std::collections::BTreeMap;

use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};

use crate::attribute::{DecodeError, Guid, Sid};

/// An entry read from the directory: its DN plus every returned attribute.
///
/// Attributes are always multi-valued. Values that are valid UTF-8 are kept
/// in [`attrs`](Self::attrs), anything else (SIDs, GUIDs, certificates) in
/// [`bin_attrs`](Self::bin_attrs). Attribute names are matched
/// case-insensitively by the accessors, as LDAP requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryObject {
	/// Distinguished name of the entry
	pub dn: String,
	/// Textual attribute values
	pub attrs: BTreeMap<String, Vec<String>>,
	/// Binary attribute values
	pub bin_attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl From<SearchEntry> for DirectoryObject {
	fn from(entry: SearchEntry) -> Self {
		Self {
			dn: entry.dn,
			attrs: entry.attrs.into_iter().collect(),
			bin_attrs: entry.bin_attrs.into_iter().collect(),
		}
	}
}

impl DirectoryObject {
	/// Create an empty object with the given DN.
	#[must_use]
	pub fn new(dn: impl Into<String>) -> Self {
		Self { dn: dn.into(), ..Self::default() }
	}

	/// Add a textual attribute, replacing any earlier values.
	#[must_use]
	pub fn with_attr<V: Into<String>>(
		mut self,
		attr: impl Into<String>,
		values: impl IntoIterator<Item = V>,
	) -> Self {
		self.attrs.insert(attr.into(), values.into_iter().map(Into::into).collect());
		self
	}

	/// Look up an attribute name in a map ignoring case.
	fn lookup<'a, T>(map: &'a BTreeMap<String, Vec<T>>, attr: &str) -> Option<&'a Vec<T>> {
		map.get(attr).or_else(|| {
			map.iter().find(|(name, _)| name.eq_ignore_ascii_case(attr)).map(|(_, values)| values)
		})
	}

	/// Whether the attribute is present at all.
	#[must_use]
	pub fn has_attr(&self, attr: &str) -> bool {
		Self::lookup(&self.attrs, attr).is_some() || Self::lookup(&self.bin_attrs, attr).is_some()
	}

	/// The objectSid of the entry, decoded.
	pub fn sid(&self) -> Option<Result<Sid, DecodeError>> {
		self.bin_attr_first("objectSid").map(Sid::from_bytes)
	}

	/// The objectGUID of the entry, decoded.
	pub fn guid(&self) -> Option<Result<Guid, DecodeError>> {
		self.bin_attr_first("objectGUID").map(Guid::from_bytes)
	}
}

/// An extension trait for directory entries that provides convenience
/// methods for extracting data.
pub trait SearchEntryExt {
	/// All textual values of an attribute; empty when the attribute is absent.
	fn values(&self, attr: &str) -> &[String];

	/// All values of an attribute in binary form, textual ones included.
	fn bin_values(&self, attr: &str) -> Vec<&[u8]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.values(attr).first().map(String::as_str)
	}

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		self.bin_values(attr).into_iter().next()
	}

	/// Get the first value of an attribute, interpreted as a boolean.
	fn bool_first(&self, attr: &str) -> Option<Result<bool, DecodeError>> {
		match self.attr_first(attr) {
			Some("TRUE") => Some(Ok(true)),
			Some("FALSE") => Some(Ok(false)),
			Some(other) => Some(Err(DecodeError::Malformed { kind: "boolean", value: other.to_owned() })),
			None => None,
		}
	}

	/// Get the first value of an attribute, interpreted as an integer.
	fn int_first(&self, attr: &str) -> Option<Result<i64, DecodeError>> {
		self.attr_first(attr).map(|value| {
			value
				.trim()
				.parse()
				.map_err(|_| DecodeError::Malformed { kind: "integer", value: value.to_owned() })
		})
	}
}

impl SearchEntryExt for DirectoryObject {
	fn values(&self, attr: &str) -> &[String] {
		Self::lookup(&self.attrs, attr).map_or(&[][..], Vec::as_slice)
	}

	fn bin_values(&self, attr: &str) -> Vec<&[u8]> {
		if let Some(values) = Self::lookup(&self.attrs, attr) {
			return values.iter().map(String::as_bytes).collect();
		}
		Self::lookup(&self.bin_attrs, attr)
			.map(|values| values.iter().map(Vec::as_slice).collect())
			.unwrap_or_default()
	}
}
