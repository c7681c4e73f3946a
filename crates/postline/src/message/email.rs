//! The built-in message entity and its MIME rendering.

use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use super::body::{BodyStream, BodyWriter, DEFAULT_CAPACITY};
use super::draft::{Attachment, Draft, Source};
use super::Message;
use crate::address::{self, Mailbox};

/// Raw bytes per base64 line (encodes to 76 columns).
const LINE_BYTES: usize = 57;

/// Raw bytes read from an attachment file per body chunk.
const READ_BYTES: usize = LINE_BYTES * 64;

const TEXT_HEADERS: &str =
    "Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An email ready to be queued.
///
/// Built from a [`Draft`]; creation stamps the `Date` and `Message-ID`
/// headers so every send attempt produces the same message.
#[derive(Debug, Clone)]
pub struct Email {
    draft: Draft,
    date: DateTime<Utc>,
    message_id: String,
}

impl Email {
    /// Creates an email from a draft.
    ///
    /// This never fails; [`Message::validate`] reports problems later.
    #[must_use]
    pub fn new(draft: Draft) -> Self {
        let date = Utc::now();
        let domain = address::parse_optional(draft.from.as_deref())
            .first()
            .and_then(|m| m.address.rsplit_once('@').map(|(_, d)| d.to_string()))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        let message_id = format!("<{}@{domain}>", unique_token(date));

        Self {
            draft,
            date,
            message_id,
        }
    }

    /// The draft this email was built from.
    #[must_use]
    pub const fn draft(&self) -> &Draft {
        &self.draft
    }

    /// `Message-ID` header value, including angle brackets.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// `Date` header value.
    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    fn check(&self) -> Result<(), String> {
        self.draft.check().map_err(|err| match err {
            crate::Error::Validation(reason) => reason,
            other => other.to_string(),
        })?;

        let draft = &self.draft;
        for (name, value) in [
            ("From", &draft.from),
            ("To", &draft.to),
            ("Cc", &draft.cc),
            ("Bcc", &draft.bcc),
            ("Reply-To", &draft.reply_to),
            ("Return-Path", &draft.return_path),
            ("Subject", &draft.subject),
        ] {
            if value.as_deref().is_some_and(has_line_break) {
                return Err(format!("header {name} contains a line break"));
            }
        }
        for (name, value) in &draft.headers {
            if has_line_break(name) || has_line_break(value) || name.contains(':') {
                return Err(format!("header {name:?} is malformed"));
            }
        }

        let senders = address::parse_optional(draft.from.as_deref());
        if senders.is_empty() {
            return Err("missing sender".into());
        }
        let recipients: Vec<Mailbox> = [&draft.to, &draft.cc, &draft.bcc]
            .into_iter()
            .flat_map(|field| address::parse_optional(field.as_deref()))
            .collect();
        if recipients.is_empty() {
            return Err("no recipients".into());
        }
        let return_path = address::parse_optional(draft.return_path.as_deref());
        if let Some(bad) = senders
            .iter()
            .chain(&recipients)
            .chain(&return_path)
            .find(|m| !m.is_well_formed())
        {
            return Err(format!("malformed address: {}", bad.address));
        }
        Ok(())
    }

    fn header_block(&self) -> String {
        let draft = &self.draft;
        let mut head = String::new();
        let _ = write!(head, "Date: {}\r\n", self.date.to_rfc2822());
        let _ = write!(head, "Message-ID: {}\r\n", self.message_id);
        for (name, value) in [
            ("From", &draft.from),
            ("To", &draft.to),
            ("Cc", &draft.cc),
            ("Reply-To", &draft.reply_to),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                let _ = write!(head, "{name}: {}\r\n", value.trim());
            }
        }
        if let Some(subject) = &draft.subject {
            let _ = write!(head, "Subject: {}\r\n", encode_header(subject));
        }
        for (name, value) in &draft.headers {
            let _ = write!(head, "{name}: {}\r\n", encode_header(value));
        }
        head.push_str("MIME-Version: 1.0\r\n");
        head
    }

    /// Writes the whole message to `out`.
    async fn render(&self, out: &BodyWriter) -> io::Result<()> {
        let mut head = self.header_block();
        let (alternatives, files): (Vec<&Attachment>, Vec<&Attachment>) =
            self.draft.attachments.iter().partition(|a| a.alternative);

        let mixed = (!files.is_empty()).then(|| boundary(self.date, "mixed"));
        if let Some(mixed) = &mixed {
            let _ = write!(
                head,
                "Content-Type: multipart/mixed; boundary=\"{mixed}\"\r\n\r\n--{mixed}\r\n"
            );
        }

        if alternatives.is_empty() {
            head.push_str(TEXT_HEADERS);
            head.push_str("\r\n");
            push_text(&mut head, self.draft.text.as_deref().unwrap_or_default());
            emit(out, head).await?;
        } else {
            let alt = boundary(self.date, "alt");
            let _ = write!(
                head,
                "Content-Type: multipart/alternative; boundary=\"{alt}\"\r\n\r\n"
            );
            if let Some(text) = &self.draft.text {
                let _ = write!(head, "--{alt}\r\n{TEXT_HEADERS}\r\n");
                push_text(&mut head, text);
            }
            emit(out, head).await?;
            for part in alternatives {
                emit(out, format!("--{alt}\r\n{}\r\n", part_headers(part))).await?;
                emit_content(out, part).await?;
            }
            emit(out, format!("--{alt}--\r\n")).await?;
        }

        if let Some(mixed) = mixed {
            for part in files {
                emit(out, format!("--{mixed}\r\n{}\r\n", part_headers(part))).await?;
                emit_content(out, part).await?;
            }
            emit(out, format!("--{mixed}--\r\n")).await?;
        }
        Ok(())
    }
}

impl From<Draft> for Email {
    fn from(draft: Draft) -> Self {
        Self::new(draft)
    }
}

impl Message for Email {
    async fn validate(&self) -> Result<(), String> {
        self.check()
    }

    fn from(&self) -> Option<&str> {
        self.draft.from.as_deref()
    }

    fn to(&self) -> Option<&str> {
        self.draft.to.as_deref()
    }

    fn cc(&self) -> Option<&str> {
        self.draft.cc.as_deref()
    }

    fn bcc(&self) -> Option<&str> {
        self.draft.bcc.as_deref()
    }

    fn return_path(&self) -> Option<&str> {
        self.draft.return_path.as_deref()
    }

    fn body(&self) -> BodyStream {
        let (writer, stream) = BodyStream::channel(DEFAULT_CAPACITY);
        let email = self.clone();
        tokio::spawn(async move {
            if let Err(err) = email.render(&writer).await {
                tracing::debug!(message_id = %email.message_id, error = %err, "body production failed");
                writer.fail(err).await;
            }
        });
        stream
    }
}

async fn emit(out: &BodyWriter, chunk: impl Into<Bytes>) -> io::Result<()> {
    if out.chunk(chunk).await {
        Ok(())
    } else {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "body consumer went away"))
    }
}

async fn emit_content(out: &BodyWriter, part: &Attachment) -> io::Result<()> {
    match &part.source {
        Source::Data(data) => {
            for block in data.chunks(READ_BYTES) {
                emit(out, base64_lines(block)).await?;
            }
            Ok(())
        }
        Source::Path(path) => emit_file(out, path).await,
    }
}

async fn emit_file(out: &BodyWriter, path: &Path) -> io::Result<()> {
    let annotate = |err: io::Error| io::Error::new(err.kind(), format!("{}: {err}", path.display()));
    let mut file = tokio::fs::File::open(path).await.map_err(annotate)?;
    let mut buf = vec![0u8; READ_BYTES];
    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await.map_err(annotate)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled > 0 {
            emit(out, base64_lines(&buf[..filled])).await?;
        }
        if filled < buf.len() {
            return Ok(());
        }
    }
}

fn part_headers(part: &Attachment) -> String {
    let mut headers = String::new();
    let _ = write!(headers, "Content-Type: {}", part.content_type);
    if let Some(name) = &part.name {
        let _ = write!(headers, "; name=\"{}\"", quote_param(name));
    }
    headers.push_str("\r\nContent-Transfer-Encoding: base64\r\n");
    if !part.alternative {
        headers.push_str("Content-Disposition: attachment");
        if let Some(name) = &part.name {
            let _ = write!(headers, "; filename=\"{}\"", quote_param(name));
        }
        headers.push_str("\r\n");
    }
    headers
}

fn base64_lines(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len() / 3 * 4 + data.len() / LINE_BYTES * 2 + 8);
    for line in data.chunks(LINE_BYTES) {
        STANDARD.encode_string(line, &mut encoded);
        encoded.push_str("\r\n");
    }
    encoded
}

fn push_text(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push_str("\r\n");
    }
}

fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

fn quote_param(value: &str) -> String {
    encode_header(&value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

fn unique_token(date: DateTime<Utc>) -> String {
    let nanos = date.timestamp_nanos_opt().unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}.{seq:x}.{:x}", std::process::id())
}

fn boundary(date: DateTime<Utc>, kind: &str) -> String {
    format!("=_postline_{kind}_{}", unique_token(date))
}
