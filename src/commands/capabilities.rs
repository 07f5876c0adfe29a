//! Capability discovery and option verbs.
//!
//! `OPTS` and `SITE` are the two extensible hosts: their sub-verbs resolve
//! to registered [`CommandExtension`]s, and an extension may override the
//! host's login requirement (`OPTS UTF8` works before login, `SITE UTIME`
//! does not).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};

use crate::{
    control::SecureControlFeature,
    encoding::TextEncoding,
    error::ProtocolError,
    handler::{CommandContext, CommandExtension, CommandHandler},
    reply::Reply,
};

/// Listing facts `OPTS MLST` may select.
pub const KNOWN_FACTS: &[&str] = &["type", "size", "modify", "perm"];

/// Per-connection selection of `MLST` listing facts.
pub struct MlstFactsFeature {
    facts: Mutex<Vec<String>>,
}

impl Default for MlstFactsFeature {
    /// Starts with every known fact active.
    fn default() -> Self {
        Self {
            facts: Mutex::new(KNOWN_FACTS.iter().map(|&f| f.to_owned()).collect()),
        }
    }
}

impl MlstFactsFeature {
    /// The currently selected facts, in selection order.
    #[must_use]
    pub fn facts(&self) -> Vec<String> {
        self.facts.lock().expect("fact selection lock poisoned").clone()
    }

    /// Replace the selection.
    pub fn set_facts(&self, facts: Vec<String>) {
        *self.facts.lock().expect("fact selection lock poisoned") = facts;
    }
}

/// `FEAT`: announce the extension set as a multi-line 211 reply.
pub struct FeatHandler;

#[async_trait]
impl CommandHandler for FeatHandler {
    fn names(&self) -> &'static [&'static str] { &["FEAT"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let mut lines = vec![
            "EPRT".to_owned(),
            "EPSV".to_owned(),
            "MDTM".to_owned(),
            format!(
                "MLST {}",
                KNOWN_FACTS.iter().map(|fact| format!("{fact}*;")).collect::<String>(),
            ),
            "REST STREAM".to_owned(),
            "SIZE".to_owned(),
            "UTF8".to_owned(),
        ];
        let secure = context.session().features().require::<SecureControlFeature>();
        if secure.is_configured() {
            lines.insert(0, "AUTH TLS".to_owned());
            lines.insert(1, "PBSZ".to_owned());
            lines.insert(2, "PROT".to_owned());
        }
        Ok(Some(Reply::with_lines(
            211,
            context.text("Extensions supported:"),
            lines,
            "END",
        )))
    }
}

/// `OPTS UTF8`: switch the control channel to UTF-8.
pub struct OptsUtf8Extension;

#[async_trait]
impl CommandExtension for OptsUtf8Extension {
    fn names(&self) -> &'static [&'static str] { &["UTF8", "UTF-8"] }

    fn login_required(&self) -> Option<bool> { Some(false) }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        match context.command().argument().trim().to_ascii_uppercase().as_str() {
            "ON" => context.session().encoding().set(TextEncoding::Utf8),
            // A bare `OPTS UTF8` leaves the encoding as it is.
            "" => {}
            _ => {
                return Ok(Some(Reply::new(
                    501,
                    context.text("Syntax error in parameters or arguments."),
                )));
            }
        }
        Ok(Some(Reply::new(200, context.text("Command okay."))))
    }
}

/// `OPTS MLST`: select the listing facts.
pub struct OptsMlstExtension;

#[async_trait]
impl CommandExtension for OptsMlstExtension {
    fn names(&self) -> &'static [&'static str] { &["MLST"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let feature = context
            .session()
            .features()
            .get_or_insert_with(MlstFactsFeature::default);

        let mut selected = Vec::new();
        for fact in context
            .command()
            .argument()
            .split(';')
            .filter(|fact| !fact.is_empty())
        {
            if !KNOWN_FACTS.contains(&fact.to_ascii_lowercase().as_str()) {
                return Ok(Some(Reply::new(
                    501,
                    context.text("Syntax error in parameters or arguments."),
                )));
            }
            selected.push(fact.to_ascii_lowercase());
        }
        feature.set_facts(selected);
        Ok(Some(Reply::new(200, context.text("Command okay."))))
    }
}

/// `OPTS` host handler.
pub struct OptsHandler;

#[async_trait]
impl CommandHandler for OptsHandler {
    fn names(&self) -> &'static [&'static str] { &["OPTS"] }

    fn extensions(&self) -> Vec<Arc<dyn CommandExtension>> {
        vec![Arc::new(OptsUtf8Extension), Arc::new(OptsMlstExtension)]
    }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        Ok(Some(Reply::new(501, context.text("Option not supported."))))
    }
}

fn parse_timestamp(value: &str) -> Option<std::time::SystemTime> {
    let parsed = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S").ok()?;
    let timestamp = Utc.from_utc_datetime(&parsed);
    Some(timestamp.into())
}

fn strip_quotes(path: &str) -> &str {
    if path.len() >= 2 && path.starts_with('"') && path.ends_with('"') {
        &path[1..path.len() - 1]
    } else {
        path
    }
}

/// `SITE UTIME`: set an entry's timestamps.
///
/// Accepts the two-part ProFTPD form (`timestamp path`) and the five-part
/// form (`path access modify create UTC`); only the modification time is
/// applied.
pub struct SiteUtimeExtension;

#[async_trait]
impl CommandExtension for SiteUtimeExtension {
    fn names(&self) -> &'static [&'static str] { &["UTIME"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let argument = context.command().argument().trim();
        if argument.is_empty() {
            return Ok(Some(Reply::new(501, context.text("No file name."))));
        }

        let syntax_error =
            || Reply::new(501, context.text("Syntax error in parameters or arguments."));

        let (path, modified, done_text) = if argument.to_ascii_uppercase().ends_with(" UTC") {
            // path access modify create UTC
            let mut parts: Vec<&str> = argument.split_whitespace().collect();
            parts.pop();
            if parts.len() < 4 {
                return Ok(Some(syntax_error()));
            }
            let create = parts.pop().unwrap_or_default();
            let modify = parts.pop().unwrap_or_default();
            let access = parts.pop().unwrap_or_default();
            if parse_timestamp(access).is_none() || parse_timestamp(create).is_none() {
                return Ok(Some(syntax_error()));
            }
            let Some(modified) = parse_timestamp(modify) else {
                return Ok(Some(syntax_error()));
            };
            (parts.join(" "), modified, "Timestamps set.")
        } else {
            let Some((timestamp, path)) = argument.split_once(' ') else {
                return Ok(Some(syntax_error()));
            };
            let Some(modified) = parse_timestamp(timestamp) else {
                return Ok(Some(syntax_error()));
            };
            (path.to_owned(), modified, "Modification time set.")
        };

        let path = strip_quotes(path.trim()).to_owned();
        if path.is_empty() {
            return Ok(Some(Reply::new(501, context.text("No file name."))));
        }

        let resolved = context.resolve_path(&path);
        context.filesystem()?.set_modified(&resolved, modified).await?;
        Ok(Some(Reply::new(220, context.text(done_text))))
    }
}

/// `SITE` host handler.
pub struct SiteHandler;

#[async_trait]
impl CommandHandler for SiteHandler {
    fn names(&self) -> &'static [&'static str] { &["SITE"] }

    fn extensions(&self) -> Vec<Arc<dyn CommandExtension>> { vec![Arc::new(SiteUtimeExtension)] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        Ok(Some(Reply::new(500, context.text("SITE command not supported."))))
    }
}
