//! The task descriptor accepted by the dispatch shim.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ValidationError;

/// Content type used for form-encoded task parameters.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const MAX_TASK_NAME_LEN: usize = 500;
const MAX_QUEUE_NAME_LEN: usize = 100;

/// `[A-Za-z0-9-]{1,max}`, plus `_` when `underscore` is set.
fn is_resource_id(value: &str, max_len: usize, underscore: bool) -> bool {
    !value.is_empty()
        && value.len() <= max_len
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || (underscore && b == b'_'))
}

/// HTTP method used to deliver a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// POST (the default).
    #[default]
    Post,
    /// GET.
    Get,
    /// HEAD.
    Head,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
    /// PATCH.
    Patch,
}

impl HttpMethod {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }

    /// Returns true if requests with this method carry a body.
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            other => Err(ValidationError::new(
                "method",
                format!("unsupported HTTP method '{other}'"),
            )),
        }
    }
}

/// A unit of deferred work.
///
/// Mirrors the legacy task constructor: a relative target URL, form
/// parameters, an optional dedup name, extra headers and an optional
/// schedule. Parameters keep insertion order and may repeat a key, which is
/// how list values are sent (`child_indexes=0&child_indexes=2`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Relative URL of the handler, e.g. `/_ah/pipeline/run`.
    pub url: Option<String>,
    /// HTTP method.
    #[serde(default)]
    pub method: HttpMethod,
    /// Form parameters in submission order.
    #[serde(default)]
    pub params: Vec<(String, String)>,
    /// Dedup name. Two submissions with the same name to the same queue are
    /// one logical task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Delay before the task may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown: Option<Duration>,
    /// Absolute earliest run time. Takes precedence over `countdown`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a POST task targeting `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Adds a single parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Adds a list parameter, encoded as one pair per value.
    #[must_use]
    pub fn with_param_list<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let key = key.into();
        self.params
            .extend(values.into_iter().map(|v| (key.clone(), v.into())));
        self
    }

    /// Sets the dedup name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Delays the task by `countdown`.
    #[must_use]
    pub const fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    /// Schedules the task for `eta`.
    #[must_use]
    pub const fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Derives a valid, deterministic task name from an arbitrary key.
    ///
    /// Useful when the natural dedup key contains characters that task
    /// names do not allow.
    #[must_use]
    pub fn dedup_name_for(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("t_{}", &digest[..40])
    }

    /// Checks the descriptor without contacting any backend.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ValidationError::missing("url"))?;
        if !url.starts_with('/') {
            return Err(ValidationError::new(
                "url",
                format!("expected a relative path starting with '/', got '{url}'"),
            ));
        }
        if let Some(name) = &self.name {
            if !is_resource_id(name, MAX_TASK_NAME_LEN, true) {
                return Err(ValidationError::new(
                    "name",
                    format!("'{name}' must be 1-500 characters of [A-Za-z0-9_-]"),
                ));
            }
        }
        if self.eta.is_none() {
            if let Some(countdown) = self.countdown {
                if countdown_deadline(Utc::now(), countdown).is_none() {
                    return Err(ValidationError::new(
                        "countdown",
                        format!("{}s is past the latest representable run time", countdown.as_secs()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns the parameters form-encoded.
    #[must_use]
    pub fn encoded_params(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }

    /// Returns the relative URL and body actually delivered.
    ///
    /// Methods with a body carry the parameters form-encoded in it; the
    /// others get them appended to the query string.
    #[must_use]
    pub fn payload(&self) -> (String, Vec<u8>) {
        let url = self.url.clone().unwrap_or_default();
        if self.params.is_empty() {
            return (url, Vec::new());
        }
        let encoded = self.encoded_params();
        if self.method.has_body() {
            (url, encoded.into_bytes())
        } else {
            let separator = if url.contains('?') { '&' } else { '?' };
            (format!("{url}{separator}{encoded}"), Vec::new())
        }
    }

    /// Returns the headers actually delivered, including the form content
    /// type when the body carries parameters.
    #[must_use]
    pub fn delivery_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if !self.params.is_empty() && self.method.has_body() {
            headers.push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }

    /// Resolves the earliest run time relative to `now`.
    #[must_use]
    pub fn schedule_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.eta
            .or_else(|| self.countdown.and_then(|d| countdown_deadline(now, d)))
    }
}

fn countdown_deadline(now: DateTime<Utc>, countdown: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(countdown)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

/// Converts a wall-clock time observed `offset` east of UTC into UTC.
pub fn eta_from_local(
    local: NaiveDateTime,
    offset: chrono::Duration,
) -> Result<DateTime<Utc>, ValidationError> {
    let zone = i32::try_from(offset.num_seconds())
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ValidationError::new("eta", format!("UTC offset {offset} is out of range")))?;
    local
        .and_local_timezone(zone)
        .single()
        .map(|eta| eta.with_timezone(&Utc))
        .ok_or_else(|| ValidationError::new("eta", format!("{local} is not representable in UTC")))
}

/// Checks a queue name against the backend's naming rule.
pub fn validate_queue_name(queue_name: &str) -> Result<(), ValidationError> {
    if queue_name.is_empty() {
        return Err(ValidationError::missing("queue_name"));
    }
    if !is_resource_id(queue_name, MAX_QUEUE_NAME_LEN, false) {
        return Err(ValidationError::new(
            "queue_name",
            format!("'{queue_name}' must be 1-100 characters of [A-Za-z0-9-]"),
        ));
    }
    Ok(())
}
