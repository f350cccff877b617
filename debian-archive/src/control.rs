// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file primitives.

Control files are RFC-822-style documents consisting of *stanzas*: blocks of
`Field: value` lines terminated by a blank line. Continuation lines begin with
a space; a continuation line containing only `.` denotes an intended blank
line inside a multi-line value.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html> for the
canonical definition.
*/

use {
    crate::error::{ArchiveError, Result},
    serde::{Deserialize, Serialize},
    std::io::{BufRead, Write},
};

/// A single stanza: an ordered list of fields.
///
/// Field names are case-insensitive on read and case-preserving on write.
/// A stanza holds a single occurrence of each field; setting an existing
/// field replaces its value.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Obtain the value of the named field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Set a field, replacing any existing value under the same name.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some(entry) = self
            .fields
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Remove a field, returning its value when present.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        let pos = self
            .fields
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;

        Some(self.fields.remove(pos).1)
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Serialize the stanza, emitting fields named in `canonical` first (in
    /// that order), then remaining fields in insertion order.
    ///
    /// A trailing newline terminates the last field; the blank separator line
    /// between stanzas is the caller's responsibility.
    pub fn write_to<W: Write>(&self, writer: &mut W, canonical: &[&str]) -> std::io::Result<()> {
        let mut written = vec![false; self.fields.len()];

        for name in canonical {
            if let Some(pos) = self
                .fields
                .iter()
                .position(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                write_field(writer, &self.fields[pos].0, &self.fields[pos].1)?;
                written[pos] = true;
            }
        }

        for (pos, (name, value)) in self.fields.iter().enumerate() {
            if !written[pos] {
                write_field(writer, name, value)?;
            }
        }

        Ok(())
    }

    pub fn to_string_canonical(&self, canonical: &[&str]) -> String {
        let mut buf = Vec::new();
        self.write_to(&mut buf, canonical)
            .expect("write to Vec cannot fail");

        String::from_utf8(buf).expect("stanza fields are valid UTF-8")
    }
}

fn write_field<W: Write>(writer: &mut W, name: &str, value: &str) -> std::io::Result<()> {
    writer.write_all(name.as_bytes())?;
    writer.write_all(b":")?;

    // Multi-line values embed their own leading whitespace per line; empty
    // interior lines are escaped as ` .`.
    if value.is_empty() {
        writer.write_all(b"\n")
    } else {
        for (i, line) in value.split('\n').enumerate() {
            if i == 0 {
                if !line.is_empty() {
                    writer.write_all(b" ")?;
                    writer.write_all(line.as_bytes())?;
                }
            } else if line.is_empty() {
                writer.write_all(b" .")?;
            } else {
                writer.write_all(b" ")?;
                writer.write_all(line.as_bytes())?;
            }
            writer.write_all(b"\n")?;
        }

        Ok(())
    }
}

/// Canonical field order for binary package stanzas in `Packages` indexes.
pub const CANONICAL_BINARY: &[&str] = &[
    "Package",
    "Source",
    "Version",
    "Architecture",
    "Essential",
    "Priority",
    "Section",
    "Maintainer",
    "Original-Maintainer",
    "Installed-Size",
    "Provides",
    "Pre-Depends",
    "Depends",
    "Recommends",
    "Suggests",
    "Conflicts",
    "Breaks",
    "Replaces",
    "Enhances",
    "Filename",
    "Size",
    "MD5sum",
    "SHA1",
    "SHA256",
    "SHA512",
    "Description",
    "Homepage",
];

/// Canonical field order for source package stanzas in `Sources` indexes.
pub const CANONICAL_SOURCE: &[&str] = &[
    "Package",
    "Binary",
    "Version",
    "Maintainer",
    "Original-Maintainer",
    "Uploaders",
    "Build-Depends",
    "Build-Depends-Indep",
    "Architecture",
    "Standards-Version",
    "Format",
    "Directory",
    "Files",
    "Checksums-Sha1",
    "Checksums-Sha256",
    "Checksums-Sha512",
    "Homepage",
];

/// Canonical field order for `Release` files.
pub const CANONICAL_RELEASE: &[&str] = &[
    "Origin",
    "Label",
    "Archive",
    "Suite",
    "Version",
    "Codename",
    "Date",
    "Valid-Until",
    "Architectures",
    "Architecture",
    "Components",
    "Component",
    "Description",
    "Acquire-By-Hash",
    "NotAutomatic",
    "ButAutomaticUpgrades",
    "MD5Sum",
    "SHA1",
    "SHA256",
    "SHA512",
];

/// Holds parsing state for control files.
///
/// Instances are fed lines of text and periodically emit [Stanza] instances
/// as blank lines complete them.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    stanza: Stanza,
    field: Option<String>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// If the line terminates an in-progress stanza, that stanza is returned.
    pub fn write_line(&mut self, line: &str) -> Result<Option<Stanza>> {
        let is_empty_line = line.trim().is_empty();
        let is_continuation = (line.starts_with(' ') || line.starts_with('\t')) && !is_empty_line;

        let current_field = self.field.take();

        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.stanza.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.stanza))
            });
        }

        match (current_field, is_continuation) {
            // A new field begins; flush the one on the stack.
            (Some(v), false) => {
                self.flush_field(v)?;
                self.field = Some(line.trim_end_matches('\n').to_string());
                Ok(None)
            }
            (None, false) => {
                self.field = Some(line.trim_end_matches('\n').to_string());
                Ok(None)
            }
            // Continuation of the field on the stack.
            (Some(v), true) => {
                let content = line.trim_end_matches('\n');
                let content = content.strip_prefix(' ').unwrap_or(content);
                // ` .` escapes an intended blank line.
                let content = if content == "." { "" } else { content };

                self.field = Some(format!("{}\n{}", v, content));
                Ok(None)
            }
            (None, true) => Err(ArchiveError::ControlParse(format!(
                "continuation line without a field: '{}'",
                line.trim_end()
            ))),
        }
    }

    /// Finish parsing, consuming self.
    pub fn finish(mut self) -> Result<Option<Stanza>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.stanza.is_empty() {
            None
        } else {
            Some(self.stanza)
        })
    }

    fn flush_field(&mut self, v: String) -> Result<()> {
        let (name, value) = v.split_once(':').ok_or_else(|| {
            ArchiveError::ControlParse(format!("error parsing line '{}'; missing colon", v))
        })?;

        // Only the first line is trimmed; continuation lines were normalized
        // as they arrived.
        let (first, rest) = match value.split_once('\n') {
            Some((first, rest)) => (first.trim(), Some(rest)),
            None => (value.trim(), None),
        };

        let value = match rest {
            Some(rest) => format!("{}\n{}", first, rest),
            None => first.to_string(),
        };

        self.stanza.set_field(name.to_string(), value);

        Ok(())
    }
}

/// A streaming reader of [Stanza]s.
///
/// Instances can be consumed as an iterator; each call attempts to read one
/// full stanza from the underlying reader.
pub struct StanzaReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> StanzaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn get_next(&mut self) -> Result<Option<Stanza>> {
        let mut parser = self.parser.take().expect("parser present until EOF");

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;

            if bytes_read != 0 {
                if let Some(stanza) = parser.write_line(&line)? {
                    self.parser.replace(parser);
                    return Ok(Some(stanza));
                }
            } else {
                return parser.finish();
            }
        }
    }
}

impl<R: BufRead> Iterator for StanzaReader<R> {
    type Item = Result<Stanza>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.parser.is_none() {
            None
        } else {
            match self.get_next() {
                Ok(Some(stanza)) => Some(Ok(stanza)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        }
    }
}
