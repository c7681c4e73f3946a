//! Plain message records.

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Where an attachment's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Content held in memory.
    Data(Bytes),
    /// File read lazily while the body is streamed.
    Path(PathBuf),
}

/// A file or alternative body part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Content source.
    pub source: Source,
    /// MIME type, e.g. `application/pdf`.
    pub content_type: String,
    /// File name offered to the recipient.
    pub name: Option<String>,
    /// Alternative rendering of the text body (e.g. HTML) rather than a file.
    pub alternative: bool,
}

impl Attachment {
    /// Attachment from in-memory content.
    #[must_use]
    pub fn data(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            source: Source::Data(content.into()),
            content_type: content_type.into(),
            name: None,
            alternative: false,
        }
    }

    /// Attachment read from `path` when the message is sent.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Self {
            source: Source::Path(path),
            content_type: content_type.into(),
            name,
            alternative: false,
        }
    }

    /// An HTML alternative to the text body.
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self::data(html.into(), "text/html; charset=utf-8").alternative()
    }

    /// Sets the file name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks this as an alternative rendering of the body.
    #[must_use]
    pub const fn alternative(mut self) -> Self {
        self.alternative = true;
        self
    }
}

/// A message described field by field.
///
/// Address fields hold header values and may list several mailboxes
/// (`a@x.com, "B" <b@y.com>`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    /// `From` header.
    pub from: Option<String>,
    /// `To` header.
    pub to: Option<String>,
    /// `Cc` header.
    pub cc: Option<String>,
    /// `Bcc` recipients; used for the envelope, never written to the body.
    pub bcc: Option<String>,
    /// `Reply-To` header.
    pub reply_to: Option<String>,
    /// Envelope sender overriding `From` for `MAIL FROM`.
    pub return_path: Option<String>,
    /// `Subject` header.
    pub subject: Option<String>,
    /// Plain-text body.
    pub text: Option<String>,
    /// Attachments and alternative parts.
    pub attachments: Vec<Attachment>,
    /// Additional headers, written in order.
    pub headers: Vec<(String, String)>,
}

impl Draft {
    /// Starts a draft from `from`.
    #[must_use]
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            ..Self::default()
        }
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl AsRef<str>) -> Self {
        append(&mut self.to, recipient.as_ref());
        self
    }

    /// Adds a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, recipient: impl AsRef<str>) -> Self {
        append(&mut self.cc, recipient.as_ref());
        self
    }

    /// Adds a `Bcc` recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: impl AsRef<str>) -> Self {
        append(&mut self.bcc, recipient.as_ref());
        self
    }

    /// Sets `Reply-To`.
    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Sets the envelope return path.
    #[must_use]
    pub fn return_path(mut self, address: impl Into<String>) -> Self {
        self.return_path = Some(address.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Adds an extra header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Checks that the draft could become a sendable message: it has a
    /// sender, at least one of to/cc/bcc, and either a text body or an
    /// alternative attachment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first missing piece.
    pub fn check(&self) -> Result<()> {
        if is_blank(self.from.as_deref()) {
            return Err(Error::Validation("missing sender".into()));
        }
        if [&self.to, &self.cc, &self.bcc].iter().all(|field| is_blank(field.as_deref())) {
            return Err(Error::Validation("no recipients".into()));
        }
        if self.text.is_none() && !self.attachments.iter().any(|a| a.alternative) {
            return Err(Error::Validation(
                "no body: needs text or an alternative attachment".into(),
            ));
        }
        Ok(())
    }
}

fn append(field: &mut Option<String>, value: &str) {
    match field {
        Some(list) if !list.trim().is_empty() => {
            list.push_str(", ");
            list.push_str(value);
        }
        _ => *field = Some(value.to_string()),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
