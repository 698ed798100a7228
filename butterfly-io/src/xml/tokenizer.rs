//! Streaming tag tokenizer
//!
//! Splits the input into `<name attr="value" ...>` fragments. Text between
//! tags, processing instructions, comments and doctype declarations are
//! skipped; OSM XML carries all of its data in attributes.

use std::io::{BufRead, ErrorKind};

use butterfly_common::{Error, Result};

use super::escape::unescape;

const FORMAT: &str = "xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    /// `<name ...>`
    Open,
    /// `</name>`
    Close,
    /// `<name .../>`
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub kind: TagKind,
    /// Byte offset of the `<`
    pub offset: u64,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub(crate) struct Tokenizer<R> {
    input: R,
    offset: u64,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(input: R) -> Self {
        Self { input, offset: 0 }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        loop {
            match self.input.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let b = self.peek()?;
        if b.is_some() {
            self.input.consume(1);
            self.offset += 1;
        }
        Ok(b)
    }

    fn require_byte(&mut self, start: u64) -> Result<u8> {
        self.next_byte()?
            .ok_or_else(|| Error::malformed(FORMAT, start, "end of input inside a tag"))
    }

    /// Skip to the next `<`; false at end of input
    fn skip_to_tag(&mut self) -> Result<bool> {
        loop {
            let (found, used) = {
                let buf = loop {
                    match self.input.fill_buf() {
                        Ok(buf) => break buf,
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                };
                if buf.is_empty() {
                    return Ok(false);
                }
                match buf.iter().position(|&b| b == b'<') {
                    Some(i) => (true, i + 1),
                    None => (false, buf.len()),
                }
            };
            self.input.consume(used);
            self.offset += used as u64;
            if found {
                return Ok(true);
            }
        }
    }

    /// Consume input up to and including `terminator`
    fn skip_past(&mut self, terminator: &[u8], start: u64) -> Result<()> {
        let mut matched = 0;
        while matched < terminator.len() {
            let b = self.require_byte(start)?;
            if b == terminator[matched] {
                matched += 1;
            } else {
                matched = usize::from(b == terminator[0]);
            }
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(b) = self.peek()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.next_byte()?;
        }
        Ok(())
    }

    fn read_name(&mut self, first: u8, start: u64) -> Result<String> {
        let mut name = vec![first];
        loop {
            match self.peek()? {
                Some(b) if b.is_ascii_whitespace() || matches!(b, b'/' | b'>' | b'=') => break,
                Some(b) => {
                    name.push(b);
                    self.next_byte()?;
                }
                None => return Err(Error::malformed(FORMAT, start, "end of input inside a tag")),
            }
        }
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// Next element tag, `None` at end of input
    pub fn next_tag(&mut self) -> Result<Option<Tag>> {
        loop {
            if !self.skip_to_tag()? {
                return Ok(None);
            }
            let start = self.offset - 1;
            let first = self.require_byte(start)?;
            match first {
                b'?' => self.skip_past(b"?>", start)?,
                b'!' => {
                    if self.peek()? == Some(b'-') {
                        self.skip_past(b"--", start)?;
                        self.skip_past(b"-->", start)?;
                    } else {
                        self.skip_past(b">", start)?;
                    }
                }
                b'/' => {
                    let first = self.require_byte(start)?;
                    let name = self.read_name(first, start)?;
                    self.skip_past(b">", start)?;
                    return Ok(Some(Tag {
                        name,
                        attrs: Vec::new(),
                        kind: TagKind::Close,
                        offset: start,
                    }));
                }
                _ => return self.read_element(first, start).map(Some),
            }
        }
    }

    fn read_element(&mut self, first: u8, start: u64) -> Result<Tag> {
        let name = self.read_name(first, start)?;
        let mut attrs = Vec::new();
        loop {
            self.skip_whitespace()?;
            match self.require_byte(start)? {
                b'>' => {
                    return Ok(Tag {
                        name,
                        attrs,
                        kind: TagKind::Open,
                        offset: start,
                    })
                }
                b'/' => {
                    if self.require_byte(start)? != b'>' {
                        return Err(Error::malformed(FORMAT, start, "'/' not followed by '>'"));
                    }
                    return Ok(Tag {
                        name,
                        attrs,
                        kind: TagKind::Empty,
                        offset: start,
                    });
                }
                b => {
                    let key = self.read_name(b, start)?;
                    self.skip_whitespace()?;
                    if self.require_byte(start)? != b'=' {
                        return Err(Error::malformed(
                            FORMAT,
                            start,
                            format!("attribute '{key}' without value in <{name}>"),
                        ));
                    }
                    self.skip_whitespace()?;
                    let quote = self.require_byte(start)?;
                    if quote != b'"' && quote != b'\'' {
                        return Err(Error::malformed(
                            FORMAT,
                            start,
                            format!("unquoted value of '{key}' in <{name}>"),
                        ));
                    }
                    let mut raw = Vec::new();
                    loop {
                        let b = self.require_byte(start)?;
                        if b == quote {
                            break;
                        }
                        raw.push(b);
                    }
                    let raw = String::from_utf8_lossy(&raw);
                    attrs.push((key, unescape(&raw).into_owned()));
                }
            }
        }
    }
}
