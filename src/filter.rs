//! LDAP search filters ([RFC 4515]).
//!
//! Filters are built as a [`Filter`] tree and serialized with [`Display`],
//! which escapes every assertion value. Filter strings supplied by callers
//! are checked with [`Filter::parse`] before they are sent to a server.
//!
//! [RFC 4515]: https://www.rfc-editor.org/rfc/rfc4515
//! [`Display`]: std::fmt::Display

use std::fmt;

use thiserror::Error;

/// Matching rule OID for a bitwise AND comparison of an integer attribute
/// (`LDAP_MATCHING_RULE_BIT_AND`).
pub const MATCHING_RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";

/// Errors that can occur when parsing a filter string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
	/// The filter string was empty.
	#[error("empty filter")]
	Empty,
	/// The filter string ended in the middle of an expression.
	#[error("unexpected end of filter")]
	UnexpectedEnd,
	/// A character that is not valid at its position.
	#[error("unexpected character {0:?} at offset {1}")]
	Unexpected(char, usize),
	/// Characters after the end of the outermost expression.
	#[error("trailing characters after filter at offset {0}")]
	Trailing(usize),
	/// A `\` not followed by two hex digits.
	#[error("invalid escape sequence at offset {0}")]
	InvalidEscape(usize),
}

/// An LDAP search filter expression.
///
/// Assertion values are kept as raw bytes, so filters on binary attributes
/// such as `objectGUID` or `objectSid` are represented exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
	/// All sub-filters must match.
	And(Vec<Filter>),
	/// At least one sub-filter must match.
	Or(Vec<Filter>),
	/// The sub-filter must not match.
	Not(Box<Filter>),
	/// `(attr=value)`
	Equal(String, Vec<u8>),
	/// `(attr~=value)`
	Approx(String, Vec<u8>),
	/// `(attr>=value)`
	GreaterOrEqual(String, Vec<u8>),
	/// `(attr<=value)`
	LessOrEqual(String, Vec<u8>),
	/// `(attr=*)`
	Present(String),
	/// `(attr=initial*any*any*final)`
	Substring {
		/// Attribute to match
		attribute: String,
		/// Required prefix
		initial: Option<Vec<u8>>,
		/// Substrings that must appear in order
		any: Vec<Vec<u8>>,
		/// Required suffix
		last: Option<Vec<u8>>,
	},
	/// `(attr:dn:rule:=value)`, where the attribute or the rule may be
	/// missing but not both.
	Extensible {
		/// Attribute to match
		attribute: Option<String>,
		/// Whether the attributes of the DN take part in the match
		dn_attributes: bool,
		/// Matching rule OID
		rule: Option<String>,
		/// Assertion value
		value: Vec<u8>,
	},
}

impl Filter {
	/// `(attribute=value)`
	#[must_use]
	pub fn eq(attribute: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
		Filter::Equal(attribute.into(), value.into())
	}

	/// `(attribute=*)`
	#[must_use]
	pub fn present(attribute: impl Into<String>) -> Self {
		Filter::Present(attribute.into())
	}

	/// `(attribute:1.2.840.113556.1.4.803:=mask)`, true when every bit of
	/// `mask` is set.
	#[must_use]
	pub fn bit_and(attribute: impl Into<String>, mask: u32) -> Self {
		Filter::Extensible {
			attribute: Some(attribute.into()),
			dn_attributes: false,
			rule: Some(MATCHING_RULE_BIT_AND.to_owned()),
			value: mask.to_string().into_bytes(),
		}
	}

	/// `(attribute=*value*)`
	#[must_use]
	pub fn contains(attribute: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
		Filter::Substring {
			attribute: attribute.into(),
			initial: None,
			any: vec![value.into()],
			last: None,
		}
	}

	/// `(&...)`
	#[must_use]
	pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
		Filter::And(filters.into_iter().collect())
	}

	/// `(|...)`
	#[must_use]
	pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
		Filter::Or(filters.into_iter().collect())
	}

	/// `(!...)`
	#[must_use]
	pub fn not(filter: Filter) -> Self {
		Filter::Not(Box::new(filter))
	}

	/// Parse a filter string. A single item without surrounding parentheses,
	/// such as `objectClass=user`, is accepted as well.
	pub fn parse(input: &str) -> Result<Self, FilterError> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(FilterError::Empty);
		}
		let wrapped;
		let source = if trimmed.starts_with('(') {
			trimmed
		} else {
			wrapped = format!("({trimmed})");
			&wrapped
		};
		let mut parser = Parser { input: source.as_bytes(), pos: 0 };
		let filter = parser.filter()?;
		if parser.pos != parser.input.len() {
			return Err(FilterError::Trailing(parser.pos));
		}
		Ok(filter)
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Filter::And(filters) => write_set(f, '&', filters),
			Filter::Or(filters) => write_set(f, '|', filters),
			Filter::Not(filter) => write!(f, "(!{filter})"),
			Filter::Equal(a, v) => write!(f, "({a}={})", escape_bytes(v)),
			Filter::Approx(a, v) => write!(f, "({a}~={})", escape_bytes(v)),
			Filter::GreaterOrEqual(a, v) => write!(f, "({a}>={})", escape_bytes(v)),
			Filter::LessOrEqual(a, v) => write!(f, "({a}<={})", escape_bytes(v)),
			Filter::Present(a) => write!(f, "({a}=*)"),
			Filter::Substring { attribute, initial, any, last } => {
				write!(f, "({attribute}=")?;
				if let Some(initial) = initial {
					f.write_str(&escape_bytes(initial))?;
				}
				f.write_str("*")?;
				for part in any {
					write!(f, "{}*", escape_bytes(part))?;
				}
				if let Some(last) = last {
					f.write_str(&escape_bytes(last))?;
				}
				f.write_str(")")
			}
			Filter::Extensible { attribute, dn_attributes, rule, value } => {
				f.write_str("(")?;
				if let Some(attribute) = attribute {
					f.write_str(attribute)?;
				}
				if *dn_attributes {
					f.write_str(":dn")?;
				}
				if let Some(rule) = rule {
					write!(f, ":{rule}")?;
				}
				write!(f, ":={})", escape_bytes(value))
			}
		}
	}
}

/// Write `(op sub sub ...)`.
fn write_set(f: &mut fmt::Formatter<'_>, op: char, filters: &[Filter]) -> fmt::Result {
	write!(f, "({op}")?;
	for filter in filters {
		write!(f, "{filter}")?;
	}
	f.write_str(")")
}

/// Escape an assertion value: `( ) \ *` and NUL become `\XX` hex escapes.
#[must_use]
pub fn escape(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'(' => out.push_str("\\28"),
			')' => out.push_str("\\29"),
			'\\' => out.push_str("\\5c"),
			'*' => out.push_str("\\2a"),
			'\0' => out.push_str("\\00"),
			_ => out.push(c),
		}
	}
	out
}

/// Escape a raw assertion value. UTF-8 text is escaped like [`escape`];
/// anything else is written as `\XX` for every byte outside printable ASCII.
#[must_use]
pub fn escape_bytes(value: &[u8]) -> String {
	if let Ok(text) = std::str::from_utf8(value) {
		return escape(text);
	}
	let mut out = String::with_capacity(value.len() * 3);
	for &b in value {
		if (b.is_ascii_graphic() || b == b' ') && !matches!(b, b'(' | b')' | b'\\' | b'*') {
			out.push(char::from(b));
		} else {
			out.push_str(&format!("\\{b:02x}"));
		}
	}
	out
}

/// Recursive descent parser over the filter bytes.
struct Parser<'a> {
	/// The complete filter string
	input: &'a [u8],
	/// Current offset
	pos: usize,
}

impl Parser<'_> {
	/// Current byte.
	fn peek(&self) -> Result<u8, FilterError> {
		self.input.get(self.pos).copied().ok_or(FilterError::UnexpectedEnd)
	}

	/// Consume `expected` or fail.
	fn expect(&mut self, expected: u8) -> Result<(), FilterError> {
		let c = self.peek()?;
		if c != expected {
			return Err(FilterError::Unexpected(char::from(c), self.pos));
		}
		self.pos += 1;
		Ok(())
	}

	/// `filter = "(" filtercomp ")"`
	fn filter(&mut self) -> Result<Filter, FilterError> {
		self.expect(b'(')?;
		let filter = match self.peek()? {
			b'&' => {
				self.pos += 1;
				Filter::And(self.list()?)
			}
			b'|' => {
				self.pos += 1;
				Filter::Or(self.list()?)
			}
			b'!' => {
				self.pos += 1;
				Filter::Not(Box::new(self.filter()?))
			}
			_ => self.item()?,
		};
		self.expect(b')')?;
		Ok(filter)
	}

	/// One or more filters.
	fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
		let mut filters = Vec::new();
		while self.peek()? == b'(' {
			filters.push(self.filter()?);
		}
		if filters.is_empty() {
			return Err(FilterError::Unexpected(char::from(self.peek()?), self.pos));
		}
		Ok(filters)
	}

	/// Simple, present, substring and extensible items.
	fn item(&mut self) -> Result<Filter, FilterError> {
		let start = self.pos;
		while !matches!(self.peek()?, b'=' | b'~' | b'>' | b'<' | b':' | b'(' | b')') {
			self.pos += 1;
		}
		let attribute = self.text(start, self.pos)?;
		if self.peek()? == b':' {
			return self.extensible((!attribute.is_empty()).then_some(attribute));
		}
		if attribute.is_empty() {
			return Err(FilterError::Unexpected(char::from(self.peek()?), self.pos));
		}
		match self.peek()? {
			b'~' | b'>' | b'<' => {
				let op = self.peek()?;
				self.pos += 1;
				self.expect(b'=')?;
				let value = self.value()?;
				Ok(match op {
					b'~' => Filter::Approx(attribute, value),
					b'>' => Filter::GreaterOrEqual(attribute, value),
					_ => Filter::LessOrEqual(attribute, value),
				})
			}
			b'=' => {
				self.pos += 1;
				self.equality_or_substring(attribute)
			}
			c => Err(FilterError::Unexpected(char::from(c), self.pos)),
		}
	}

	/// `[attr] [":dn"] [":" rule] ":=" value`, at the first `:`.
	fn extensible(&mut self, attribute: Option<String>) -> Result<Filter, FilterError> {
		let mut dn_attributes = false;
		let mut rule = None;
		loop {
			self.expect(b':')?;
			if self.peek()? == b'=' {
				self.pos += 1;
				break;
			}
			let start = self.pos;
			while !matches!(self.peek()?, b':' | b'=' | b'(' | b')') {
				self.pos += 1;
			}
			let segment = self.text(start, self.pos)?;
			if segment.eq_ignore_ascii_case("dn") && !dn_attributes && rule.is_none() {
				dn_attributes = true;
			} else if !segment.is_empty() && rule.is_none() {
				rule = Some(segment);
			} else {
				return Err(FilterError::Unexpected(char::from(self.peek()?), self.pos));
			}
		}
		if attribute.is_none() && rule.is_none() {
			return Err(FilterError::Unexpected('=', self.pos - 1));
		}
		let value = self.value()?;
		Ok(Filter::Extensible { attribute, dn_attributes, rule, value })
	}

	/// The part after `attr=`: a plain value, `*`, or a substring pattern.
	fn equality_or_substring(&mut self, attribute: String) -> Result<Filter, FilterError> {
		let mut parts = vec![self.value()?];
		while self.peek()? == b'*' {
			self.pos += 1;
			parts.push(self.value()?);
		}
		if parts.len() == 1 {
			return Ok(Filter::Equal(attribute, parts.remove(0)));
		}
		if parts.len() == 2 && parts.iter().all(Vec::is_empty) {
			return Ok(Filter::Present(attribute));
		}
		let last = parts.pop().filter(|s| !s.is_empty());
		let first = parts.remove(0);
		let initial = (!first.is_empty()).then_some(first);
		let any = parts.into_iter().filter(|s| !s.is_empty()).collect();
		Ok(Filter::Substring { attribute, initial, any, last })
	}

	/// An assertion value with `\XX` escapes decoded, up to `*` or `)`.
	fn value(&mut self) -> Result<Vec<u8>, FilterError> {
		let mut out = Vec::new();
		loop {
			match self.peek()? {
				b'*' | b')' => break,
				b'(' => return Err(FilterError::Unexpected('(', self.pos)),
				b'\\' => {
					let hex = self
						.input
						.get(self.pos + 1..self.pos + 3)
						.and_then(|h| std::str::from_utf8(h).ok())
						.and_then(|h| u8::from_str_radix(h, 16).ok())
						.ok_or(FilterError::InvalidEscape(self.pos))?;
					out.push(hex);
					self.pos += 3;
				}
				c => {
					out.push(c);
					self.pos += 1;
				}
			}
		}
		Ok(out)
	}

	/// A slice of the input as a string.
	fn text(&self, start: usize, end: usize) -> Result<String, FilterError> {
		std::str::from_utf8(&self.input[start..end])
			.map(str::to_owned)
			.map_err(|_| FilterError::Unexpected('\u{fffd}', start))
	}
}
