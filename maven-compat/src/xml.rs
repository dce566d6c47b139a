//! A minimal pull-style reader for the small, machine-generated XML subset
//! used by Maven repository metadata.
//!
//! It understands prologs, comments, start/end/empty tags and character
//! entities. Attributes are tolerated but not exposed; text consisting only
//! of whitespace (indentation) is skipped. That is sufficient for every
//! document this crate parses, and keeps strictness where it matters:
//! malformed input is rejected with a positioned error instead of being
//! guessed at.

use std::borrow::Cow;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of document")]
    UnexpectedEof,

    #[error("malformed tag at byte {0}")]
    MalformedTag(usize),

    #[error("unknown entity `&{0};`")]
    UnknownEntity(String),

    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },

    #[error("expected element <{expected}>, found {found}")]
    UnexpectedEvent { expected: String, found: String },
}

#[derive(Debug, PartialEq, Eq)]
pub enum Event<'a> {
    Open(&'a str),
    Close(&'a str),
    Text(Cow<'a, str>),
}

pub struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    /// Set when an empty-element tag (`<foo/>`) was read; the matching
    /// close event is emitted on the following call.
    pending_close: Option<&'a str>,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            pending_close: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Returns the next significant event, or None at end of input.
    pub fn next_event(&mut self) -> Result<Option<Event<'a>>, Error> {
        if let Some(name) = self.pending_close.take() {
            return Ok(Some(Event::Close(name)));
        }

        loop {
            if self.rest().is_empty() {
                return Ok(None);
            }

            if let Some(rest) = self.rest().strip_prefix("<?") {
                let end = rest.find("?>").ok_or(Error::UnexpectedEof)?;
                self.pos += 2 + end + 2;
                continue;
            }
            if let Some(rest) = self.rest().strip_prefix("<!--") {
                let end = rest.find("-->").ok_or(Error::UnexpectedEof)?;
                self.pos += 4 + end + 3;
                continue;
            }
            if self.rest().starts_with('<') {
                return self.read_tag().map(Some);
            }

            // Text run, up to the next tag.
            let end = self.rest().find('<').unwrap_or(self.rest().len());
            let raw = &self.rest()[..end];
            self.pos += end;
            if raw.trim().is_empty() {
                continue;
            }
            return Ok(Some(Event::Text(unescape(raw.trim())?)));
        }
    }

    fn read_tag(&mut self) -> Result<Event<'a>, Error> {
        let start = self.pos;
        let end = self.rest().find('>').ok_or(Error::UnexpectedEof)?;
        let inner = &self.rest()[1..end];
        self.pos += end + 1;

        if let Some(name) = inner.strip_prefix('/') {
            let name = name.trim();
            if !is_name(name) {
                return Err(Error::MalformedTag(start));
            }
            return Ok(Event::Close(name));
        }

        let (inner, empty) = match inner.strip_suffix('/') {
            Some(s) => (s, true),
            None => (inner, false),
        };

        // Split off attributes; only the element name is of interest.
        let name = inner.split_ascii_whitespace().next().unwrap_or_default();
        if !is_name(name) {
            return Err(Error::MalformedTag(start));
        }

        if empty {
            self.pending_close = Some(name);
        }
        Ok(Event::Open(name))
    }

    /// Requires the next event to open `name`.
    pub fn expect_open(&mut self, name: &str) -> Result<(), Error> {
        match self.next_event()? {
            Some(Event::Open(n)) if n == name => Ok(()),
            other => Err(Error::UnexpectedEvent {
                expected: name.to_string(),
                found: describe(other),
            }),
        }
    }

    /// Reads the text content of the element just opened as `name`, up to
    /// and including its closing tag. An immediate close yields "".
    pub fn text_close(&mut self, name: &str) -> Result<String, Error> {
        match self.next_event()? {
            Some(Event::Text(t)) => match self.next_event()? {
                Some(Event::Close(n)) if n == name => Ok(t.into_owned()),
                other => Err(Error::UnexpectedEvent {
                    expected: format!("</{}>", name),
                    found: describe(other),
                }),
            },
            Some(Event::Close(n)) if n == name => Ok(String::new()),
            other => Err(Error::UnexpectedEvent {
                expected: format!("text or </{}>", name),
                found: describe(other),
            }),
        }
    }

    /// Consumes events until the element opened as `name` is balanced out.
    pub fn skip_element(&mut self, name: &str) -> Result<(), Error> {
        let mut depth = 0usize;
        loop {
            match self.next_event()?.ok_or(Error::UnexpectedEof)? {
                Event::Open(_) => depth += 1,
                Event::Close(n) => {
                    if depth == 0 {
                        if n == name {
                            return Ok(());
                        }
                        return Err(Error::MismatchedClose {
                            expected: name.to_string(),
                            found: n.to_string(),
                        });
                    }
                    depth -= 1;
                }
                Event::Text(_) => {}
            }
        }
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

fn describe(ev: Option<Event<'_>>) -> String {
    match ev {
        None => "end of document".to_string(),
        Some(Event::Open(n)) => format!("<{}>", n),
        Some(Event::Close(n)) => format!("</{}>", n),
        Some(Event::Text(t)) => format!("text {:?}", t),
    }
}

fn unescape(raw: &str) -> Result<Cow<'_, str>, Error> {
    if !raw.contains('&') {
        return Ok(Cow::Borrowed(raw));
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];
        let end = rest.find(';').ok_or(Error::UnexpectedEof)?;
        let entity = &rest[..end];
        out.push(match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => return Err(Error::UnknownEntity(entity.to_string())),
        });
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

/// Escapes text for element content.
pub fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['&', '<', '>']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_document() {
        let mut cur = Cursor::new("<?xml version=\"1.0\"?>\n<a>\n  <b>x &amp; y</b>\n  <c/>\n</a>");
        assert_eq!(Some(Event::Open("a")), cur.next_event().unwrap());
        assert_eq!(Some(Event::Open("b")), cur.next_event().unwrap());
        assert_eq!(
            Some(Event::Text(Cow::Borrowed("x & y"))),
            cur.next_event().unwrap()
        );
        assert_eq!(Some(Event::Close("b")), cur.next_event().unwrap());
        assert_eq!(Some(Event::Open("c")), cur.next_event().unwrap());
        assert_eq!(Some(Event::Close("c")), cur.next_event().unwrap());
        assert_eq!(Some(Event::Close("a")), cur.next_event().unwrap());
        assert_eq!(None, cur.next_event().unwrap());
    }

    #[test]
    fn skip_unknown_subtree() {
        let mut cur = Cursor::new("<a><junk><deep>1</deep></junk><b>2</b></a>");
        cur.expect_open("a").unwrap();
        assert_eq!(Some(Event::Open("junk")), cur.next_event().unwrap());
        cur.skip_element("junk").unwrap();
        assert_eq!(Some(Event::Open("b")), cur.next_event().unwrap());
        assert_eq!("2", cur.text_close("b").unwrap());
    }

    #[test]
    fn rejects_unknown_entity() {
        let mut cur = Cursor::new("<a>&nope;</a>");
        cur.expect_open("a").unwrap();
        assert_eq!(
            Err(Error::UnknownEntity("nope".to_string())),
            cur.next_event()
        );
    }

    #[test]
    fn rejects_malformed_tag() {
        let mut cur = Cursor::new("<1bad>x</1bad>");
        assert!(matches!(cur.next_event(), Err(Error::MalformedTag(_))));
    }
}
