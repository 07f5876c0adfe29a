//! Outbound control-channel replies.
//!
//! A [`Reply`] is a numeric code plus one or more message lines. Lines are
//! not materialised into a single string: the sender walks them through a
//! token-based continuation protocol ([`Reply::next_line`]), so a reply
//! backed by a lazy [`LineSource`] can stream arbitrarily many lines.
//! Multi-line replies use the dash continuation format of RFC 959:
//! `211-first`, unprefixed body lines, `211 last`.

/// Opaque cursor into a reply's line sequence.
///
/// Obtained from [`ReplyLine::token`]; pass it back to [`Reply::next_line`]
/// to resume where the previous call stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineToken(u64);

/// One step of the line protocol.
#[derive(Debug)]
pub struct ReplyLine {
    text: Option<String>,
    next: Option<LineToken>,
}

impl ReplyLine {
    /// The formatted line to write, if this step produced one.
    #[must_use]
    pub fn text(&self) -> Option<&str> { self.text.as_deref() }

    /// Token for the following line; `None` once the reply is exhausted.
    #[must_use]
    pub fn token(&self) -> Option<LineToken> { self.next }
}

/// Lazily produced body lines for streaming replies.
pub trait LineSource: Send + Sync {
    /// The body line at `index`, or `None` past the end.
    fn line_at(&self, index: u64) -> Option<String>;
}

impl<F> LineSource for F
where
    F: Fn(u64) -> Option<String> + Send + Sync,
{
    fn line_at(&self, index: u64) -> Option<String> { self(index) }
}

enum Body {
    Message(String),
    List {
        first: String,
        lines: Vec<String>,
        last: String,
    },
    Stream {
        first: String,
        lines: Box<dyn LineSource>,
        last: String,
    },
}

/// A response queued for delivery to the client.
pub struct Reply {
    code: u16,
    body: Body,
    pause: bool,
}

impl Reply {
    /// Single-line reply.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            body: Body::Message(message.into()),
            pause: false,
        }
    }

    /// Multi-line reply with a fixed set of body lines.
    #[must_use]
    pub fn with_lines(
        code: u16,
        first: impl Into<String>,
        lines: Vec<String>,
        last: impl Into<String>,
    ) -> Self {
        Self {
            code,
            body: Body::List {
                first: first.into(),
                lines,
                last: last.into(),
            },
            pause: false,
        }
    }

    /// Multi-line reply whose body lines come from a lazy source.
    #[must_use]
    pub fn with_source(
        code: u16,
        first: impl Into<String>,
        lines: Box<dyn LineSource>,
        last: impl Into<String>,
    ) -> Self {
        Self {
            code,
            body: Body::Stream {
                first: first.into(),
                lines,
                last: last.into(),
            },
            pause: false,
        }
    }

    /// Mark this reply as pausing the sender once written, used right before
    /// a transport change such as a TLS handshake.
    #[must_use]
    pub fn pausing(mut self) -> Self {
        self.pause = true;
        self
    }

    /// The three-digit reply code.
    #[must_use]
    pub fn code(&self) -> u16 { self.code }

    /// Whether the sender must pause after writing this reply.
    #[must_use]
    pub fn pauses_sender(&self) -> bool { self.pause }

    /// Produce the line after `token`, or the first line for `None`.
    #[must_use]
    pub fn next_line(&self, token: Option<LineToken>) -> ReplyLine {
        let index = token.map_or(0, |LineToken(i)| i);
        match &self.body {
            Body::Message(message) => ReplyLine {
                text: (index == 0).then(|| format!("{} {message}", self.code)),
                next: None,
            },
            Body::List { first, lines, last } => {
                let text = if index == 0 {
                    Some(format!("{}-{first}", self.code))
                } else if let Some(line) = lines.get(usize::try_from(index - 1).unwrap_or(usize::MAX))
                {
                    Some(format!(" {line}"))
                } else if index == lines.len() as u64 + 1 {
                    Some(format!("{} {last}", self.code))
                } else {
                    None
                };
                let next = (index <= lines.len() as u64).then(|| LineToken(index + 1));
                ReplyLine { text, next }
            }
            Body::Stream { first, lines, last } => {
                if index == 0 {
                    return ReplyLine {
                        text: Some(format!("{}-{first}", self.code)),
                        next: Some(LineToken(1)),
                    };
                }
                match lines.line_at(index - 1) {
                    Some(line) => ReplyLine {
                        text: Some(format!(" {line}")),
                        next: Some(LineToken(index + 1)),
                    },
                    None => ReplyLine {
                        text: Some(format!("{} {last}", self.code)),
                        next: None,
                    },
                }
            }
        }
    }

    /// Collect every line, mostly useful in tests and logging.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut step = self.next_line(None);
        loop {
            if let Some(text) = step.text() {
                out.push(text.to_owned());
            }
            match step.token() {
                Some(token) => step = self.next_line(Some(token)),
                None => break,
            }
        }
        out
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Reply");
        s.field("code", &self.code).field("pause", &self.pause);
        match &self.body {
            Body::Message(message) => s.field("message", message).finish(),
            Body::List { first, lines, .. } => s
                .field("first", first)
                .field("lines", &lines.len())
                .finish(),
            Body::Stream { first, .. } => s.field("first", first).field("lines", &"..").finish(),
        }
    }
}
