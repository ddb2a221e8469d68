//! Decoding of Active Directory attribute value syntaxes.
//!
//! Binary attributes such as `objectSid` and `objectGUID` decode into their
//! documented layouts. Integer timestamps (`accountExpires`, `pwdLastSet`,
//! `lockoutTime`) count 100 ns intervals since 1601-01-01 UTC. Textual
//! timestamps (`whenCreated`, `whenChanged`) use the generalized time syntax.

use std::{fmt, net::Ipv4Addr};

use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Configuration for which variant of ISO8601 to use for parsing generalized
/// time values, as defined by
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` in RFC4517
/// section 3.1.13. The fraction and the trailing `Z` are handled separately.
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]");

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// 100 ns intervals per second.
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// Errors that can occur when decoding attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	/// A binary value had the wrong length for its syntax.
	#[error("invalid {kind} length {len}")]
	Length {
		/// The syntax being decoded
		kind: &'static str,
		/// The length that was found
		len: usize,
	},
	/// A textual value could not be parsed.
	#[error("malformed {kind} value {value:?}")]
	Malformed {
		/// The syntax being decoded
		kind: &'static str,
		/// The offending value
		value: String,
	},
}

/// A Windows security identifier, as stored in `objectSid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
	/// Revision level, always 1 in practice
	pub revision: u8,
	/// 48 bit identifier authority
	pub authority: u64,
	/// Sub-authorities, the last one being the relative identifier
	pub sub_authorities: Vec<u32>,
}

impl Sid {
	/// Decode the binary layout: revision, sub-authority count, 6 byte big
	/// endian authority, then little endian 32 bit sub-authorities.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
		let length_error = DecodeError::Length { kind: "SID", len: bytes.len() };
		if bytes.len() < 8 {
			return Err(length_error);
		}
		let count = usize::from(bytes[1]);
		if bytes.len() != 8 + 4 * count {
			return Err(length_error);
		}
		let authority = bytes[2..8].iter().fold(0_u64, |acc, b| acc << 8 | u64::from(*b));
		let sub_authorities = bytes[8..]
			.chunks_exact(4)
			.map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
			.collect();
		Ok(Self { revision: bytes[0], authority, sub_authorities })
	}

	/// The relative identifier, i.e. the last sub-authority.
	#[must_use]
	pub fn rid(&self) -> Option<u32> {
		self.sub_authorities.last().copied()
	}
}

impl fmt::Display for Sid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "S-{}-", self.revision)?;
		if self.authority >= 1 << 32 {
			write!(f, "0x{:012X}", self.authority)?;
		} else {
			write!(f, "{}", self.authority)?;
		}
		for sub in &self.sub_authorities {
			write!(f, "-{sub}")?;
		}
		Ok(())
	}
}

/// An object GUID, as stored in `objectGUID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; 16]);

impl Guid {
	/// Wrap the 16 raw bytes of a GUID.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
		let raw: [u8; 16] = bytes
			.try_into()
			.map_err(|_| DecodeError::Length { kind: "GUID", len: bytes.len() })?;
		Ok(Self(raw))
	}

	/// The raw bytes in directory order.
	#[must_use]
	pub fn as_bytes(&self) -> &[u8; 16] {
		&self.0
	}

	/// The value escaped byte by byte for an equality filter, e.g.
	/// `(objectGUID=\a1\b2...)`.
	#[must_use]
	pub fn to_filter_value(&self) -> String {
		self.0.iter().map(|b| format!("\\{b:02x}")).collect()
	}
}

impl fmt::Display for Guid {
	/// The registry form: the first three groups are little endian.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let b = &self.0;
		write!(
			f,
			"{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
			b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13], b[14],
			b[15]
		)
	}
}

/// Convert a FILETIME integer to a point in time. `0` and `i64::MAX` are the
/// "never" sentinels and yield `None`.
#[must_use]
pub fn filetime_to_datetime(filetime: i64) -> Option<OffsetDateTime> {
	if filetime == 0 || filetime == i64::MAX {
		return None;
	}
	let seconds = filetime / FILETIME_TICKS_PER_SECOND - FILETIME_EPOCH_OFFSET;
	OffsetDateTime::from_unix_timestamp(seconds).ok()
}

/// Convert a point in time to a FILETIME integer.
#[must_use]
pub fn datetime_to_filetime(datetime: OffsetDateTime) -> i64 {
	(datetime.unix_timestamp() + FILETIME_EPOCH_OFFSET) * FILETIME_TICKS_PER_SECOND
}

/// Parse a FILETIME attribute value.
pub fn parse_filetime(value: &str) -> Result<Option<OffsetDateTime>, DecodeError> {
	let filetime = value
		.trim()
		.parse::<i64>()
		.map_err(|_| DecodeError::Malformed { kind: "FILETIME", value: value.to_owned() })?;
	Ok(filetime_to_datetime(filetime))
}

/// Parse a generalized time value such as `20130516200520.0Z`.
pub fn parse_generalized_time(value: &str) -> Result<OffsetDateTime, DecodeError> {
	let malformed = || DecodeError::Malformed { kind: "generalized time", value: value.to_owned() };
	let body = value.strip_suffix('Z').ok_or_else(malformed)?;
	let whole = body.split(['.', ',']).next().unwrap_or(body);
	Ok(PrimitiveDateTime::parse(whole, &TIME_FORMAT).map_err(|_| malformed())?.assume_utc())
}

/// Convert the signed 32 bit integer used by `msRADIUSFramedIPAddress` to an
/// IPv4 address. Values above `i32::MAX` written by other tools are accepted.
pub fn int2ip(value: &str) -> Result<Ipv4Addr, DecodeError> {
	let malformed = || DecodeError::Malformed { kind: "IPv4 integer", value: value.to_owned() };
	let int = value.trim().parse::<i64>().map_err(|_| malformed())?;
	let unsigned = if int < 0 { int + (1_i64 << 32) } else { int };
	u32::try_from(unsigned).map(Ipv4Addr::from).map_err(|_| malformed())
}

/// Convert an IPv4 address to the signed 32 bit integer stored by AD.
#[must_use]
pub fn ip2int(ip: Ipv4Addr) -> i32 {
	i32::from_be_bytes(ip.octets())
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::net::Ipv4Addr;

	use time::macros::datetime;

	use super::{
		datetime_to_filetime, filetime_to_datetime, int2ip, ip2int, parse_filetime,
		parse_generalized_time, DecodeError, Guid, Sid,
	};

	#[test]
	fn sid_decoding() {
		// S-1-5-21-3623811015-3361044348-30300820-1013
		let bytes = [
			1, 5, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 0xc7, 0xf6, 0xfe, 0xd7, 0x7c, 0xa5, 0x55, 0xc8, 0x94,
			0x5c, 0xce, 0x01, 0xf5, 0x03, 0, 0,
		];
		let sid = Sid::from_bytes(&bytes).unwrap();
		assert_eq!(sid.to_string(), "S-1-5-21-3623811015-3361044348-30300820-1013");
		assert_eq!(sid.rid(), Some(1013));

		assert_eq!(
			Sid::from_bytes(&bytes[..20]),
			Err(DecodeError::Length { kind: "SID", len: 20 })
		);
		assert!(Sid::from_bytes(&[1]).is_err());
	}

	#[test]
	fn guid_decoding() {
		let bytes = [
			0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
			0xff,
		];
		let guid = Guid::from_bytes(&bytes).unwrap();
		assert_eq!(guid.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
		assert!(guid.to_filter_value().starts_with(r"\33\22\11\00"));
		assert!(Guid::from_bytes(&bytes[1..]).is_err());
	}

	#[test]
	fn filetime_conversions() {
		assert_eq!(filetime_to_datetime(0), None);
		assert_eq!(filetime_to_datetime(i64::MAX), None);
		let epoch = filetime_to_datetime(116_444_736_000_000_000).unwrap();
		assert_eq!(epoch.unix_timestamp(), 0);
		let t = datetime!(2024-03-01 12:00:00 UTC);
		assert_eq!(filetime_to_datetime(datetime_to_filetime(t)), Some(t));
		assert_eq!(parse_filetime("9223372036854775807").unwrap(), None);
		assert!(parse_filetime("soon").is_err());
	}

	#[test]
	fn generalized_time() {
		assert_eq!(
			parse_generalized_time("20130516200520.0Z").unwrap(),
			datetime!(2013-05-16 20:05:20 UTC)
		);
		assert_eq!(
			parse_generalized_time("20130516200520Z").unwrap(),
			datetime!(2013-05-16 20:05:20 UTC)
		);
		assert!(parse_generalized_time("20130516200520").is_err());
	}

	#[test]
	fn ip_conversions() {
		assert_eq!(int2ip("-1062731519").unwrap(), Ipv4Addr::new(192, 168, 1, 1));
		assert_eq!(int2ip("167772161").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
		assert_eq!(int2ip("3232235777").unwrap(), Ipv4Addr::new(192, 168, 1, 1));
		assert!(int2ip("4294967296").is_err());
		assert!(int2ip("ten").is_err());
		assert_eq!(ip2int(Ipv4Addr::new(192, 168, 1, 1)), -1_062_731_519);
		assert_eq!(ip2int(Ipv4Addr::new(10, 0, 0, 1)), 167_772_161);
	}
}
