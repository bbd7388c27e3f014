//! Request description: validated server URL, verb, headers and the
//! immutable descriptor a connection freezes at arm time.

use bytes::Bytes;
use url::Url;

use crate::protocol::DriverError;

/// Validated server endpoint: scheme, host and port.
///
/// The scheme is kept verbatim; it is resolved to a transport kind when the
/// owning connection arms, so an unrecognized scheme fails at arm time, not
/// here. Malformed input fails here, at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    scheme: String,
    host: String,
    port: u16,
}

impl ServerUrl {
    pub fn parse(input: &str) -> Result<Self, DriverError> {
        let parsed =
            Url::parse(input).map_err(|e| DriverError::InvalidUrl(format!("{input}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DriverError::InvalidUrl(format!("{input}: missing host")))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| DriverError::InvalidUrl(format!("{input}: missing port")))?;
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// HTTP-style request verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verb {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Patch => "PATCH",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
        }
    }

    /// Whether requests with this verb may carry a payload body.
    pub fn carries_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch)
    }
}

/// Header options with unique, case-insensitively compared keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOpts {
    entries: Vec<(String, String)>,
}

impl HeaderOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one header; an existing key (compared case-insensitively) is
    /// overwritten.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Merges another set of headers; last write wins per key.
    pub fn merge(&mut self, other: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in other {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Draft request target: server URL, database name and resource path.
///
/// Mutated freely while the owning connection is configuring; completeness
/// is only enforced when the connection arms.
#[derive(Debug, Clone, Default)]
pub struct RequestTarget {
    server_url: Option<ServerUrl>,
    db_name: Option<String>,
    path: Option<String>,
}

impl RequestTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_server_url(&mut self, input: &str) -> Result<(), DriverError> {
        self.server_url = Some(ServerUrl::parse(input)?);
        Ok(())
    }

    pub fn set_db_name(&mut self, name: &str) -> Result<(), DriverError> {
        if name.is_empty() {
            return Err(DriverError::InvalidUrl(
                "database name must not be empty".to_string(),
            ));
        }
        self.db_name = Some(name.to_string());
        Ok(())
    }

    /// Sets the resource path, e.g. `/_api/document/testcol/123456`. The
    /// database name is injected separately when the wire path is built.
    pub fn set_path(&mut self, path: &str) {
        self.path = Some(if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        });
    }

    pub fn server_url(&self) -> Option<&ServerUrl> {
        self.server_url.as_ref()
    }

    pub fn db_name(&self) -> Option<&str> {
        self.db_name.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// First unset mandatory field, if any.
    pub(crate) fn missing_field(&self) -> Option<&'static str> {
        if self.server_url.is_none() {
            Some("serverUrl")
        } else if self.db_name.is_none() {
            Some("dbName")
        } else if self.path.is_none() {
            Some("path")
        } else {
            None
        }
    }
}

/// Immutable request description, built by the connection at arm time once
/// the draft target is complete.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    server_url: ServerUrl,
    db_name: String,
    path: String,
    verb: Verb,
    headers: HeaderOpts,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub(crate) fn from_parts(
        target: &RequestTarget,
        verb: Verb,
        headers: HeaderOpts,
        body: Option<Bytes>,
    ) -> Result<Self, DriverError> {
        if let Some(field) = target.missing_field() {
            return Err(DriverError::IncompleteRequest(field));
        }
        // missing_field checked every one of these
        let (Some(server_url), Some(db_name), Some(path)) =
            (&target.server_url, &target.db_name, &target.path)
        else {
            return Err(DriverError::IncompleteRequest("serverUrl"));
        };
        Ok(Self {
            server_url: server_url.clone(),
            db_name: db_name.clone(),
            path: path.clone(),
            verb,
            headers,
            body,
        })
    }

    pub fn server_url(&self) -> &ServerUrl {
        &self.server_url
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn headers(&self) -> &HeaderOpts {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Final database-scoped wire path: `/_db/<dbName><path>`.
    pub fn wire_path(&self) -> String {
        format!("/_db/{}{}", self.db_name, self.path)
    }
}
