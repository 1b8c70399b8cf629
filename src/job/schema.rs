//! # Job Request Schema
//!
//! The one closed schema shared by the HTTP submission path and the queue worker.
//!
//! ## Two checkpoints:
//! A request body is checked before it is enqueued, and the dequeued payload is checked again
//! before the pipeline touches it. Records in the queue directory are not trusted. Both checks go
//! through the same [`Validator`].
//!
//! ## Closed schema:
//! - Every field is enumerated; any extra key rejects the whole payload
//! - String enums (`input_format`, `output_format`, `channel_mode`) accept exact lowercase members
//! - Numeric enums (`bit_depth`) accept JSON numbers equal to a member, never strings
//! - URLs must be absolute and their host must pass the [`DomainMatcher`]
//! - `context` is opaque and may be any JSON value (absent becomes `null`)
//!
//! Rejection messages name the offending field and the expected/received shape, e.g.
//! `Invalid type of 'bit_depth'. Expected 'number', but received 'string'.`

use crate::job::domain::DomainMatcher;
use crate::job::error::JobError;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

/// Keys accepted in a submission body.
pub const REQUEST_FIELDS: [&str; 8] = [
    "input_url",
    "input_format",
    "output_format",
    "output_url",
    "channel_mode",
    "bit_depth",
    "notify_url",
    "context",
];

/// Extra key a dequeued job payload carries on top of [`REQUEST_FIELDS`].
pub const JOB_ID_FIELD: &str = "job_id";

/// Source container the caller declares for `input_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Wav,
    Flac,
    Mp3,
}

impl InputFormat {
    pub const ALL: [InputFormat; 3] = [InputFormat::Wav, InputFormat::Flac, InputFormat::Mp3];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Wav => "wav",
            InputFormat::Flac => "flac",
            InputFormat::Mp3 => "mp3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// Peaks artifact container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Dat,
    Json,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Dat, OutputFormat::Json];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Dat => "dat",
            OutputFormat::Json => "json",
        }
    }
}

/// Merge stereo into one peaks track, or emit one track per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Single,
    Multi,
}

impl ChannelMode {
    pub const ALL: [ChannelMode; 2] = [ChannelMode::Single, ChannelMode::Multi];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelMode::Single => "single",
            ChannelMode::Multi => "multi",
        }
    }
}

/// Sample bit depth of a peaks artifact. Serialized as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    pub const ALL: [BitDepth; 2] = [BitDepth::Eight, BitDepth::Sixteen];

    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }
}

impl Serialize for BitDepth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// A validated submission body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformRequest {
    pub input_url: Url,
    pub input_format: InputFormat,
    pub output_format: OutputFormat,
    pub output_url: Url,
    pub channel_mode: ChannelMode,
    pub bit_depth: BitDepth,
    pub notify_url: Url,
    pub context: Value,
}

/// A validated queue payload: the submission plus the id assigned when it was accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub job_id: String,
    #[serde(flatten)]
    pub request: WaveformRequest,
}

impl JobRequest {
    /// Stamp a fresh UUID v4 job id onto a validated submission.
    pub fn assign(request: WaveformRequest) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            request,
        }
    }

    /// The payload handed to the queue. Always round-trips through [`Validator::validate_job`].
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Pure checker for submission bodies and queue payloads.
#[derive(Debug, Clone)]
pub struct Validator {
    domains: DomainMatcher,
}

impl Validator {
    pub fn new(domains: DomainMatcher) -> Self {
        Self { domains }
    }

    pub fn domains(&self) -> &DomainMatcher {
        &self.domains
    }

    /// Validate an HTTP submission body (no `job_id` allowed).
    pub fn validate_request(&self, body: &Value) -> Result<WaveformRequest, JobError> {
        let fields = Fields::closed(body, &REQUEST_FIELDS)?;
        self.request_from(&fields)
    }

    /// Validate a dequeued job payload (`job_id` required, non-empty).
    pub fn validate_job(&self, payload: &Value) -> Result<JobRequest, JobError> {
        let mut allowed = REQUEST_FIELDS.to_vec();
        allowed.push(JOB_ID_FIELD);
        let fields = Fields::closed(payload, &allowed)?;

        let job_id = fields.string(JOB_ID_FIELD)?;
        if job_id.is_empty() {
            return Err(JobError::Validation(format!(
                "String '{}' must contain at least 1 character(s).",
                JOB_ID_FIELD
            )));
        }

        Ok(JobRequest {
            job_id: job_id.to_string(),
            request: self.request_from(&fields)?,
        })
    }

    /// Check a single URL value against the URL rules of the schema.
    pub fn validate_url(&self, field: &str, value: &Value) -> Result<Url, JobError> {
        let raw = match value {
            Value::String(s) => s,
            other => return Err(invalid_type(field, "string", other)),
        };

        let url = Url::parse(raw).map_err(|e| {
            JobError::Validation(format!("Invalid url for '{}': {}.", field, e))
        })?;

        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(JobError::Validation(format!(
                "Invalid url for '{}': an absolute URL with a host is required.",
                field
            )));
        }

        if !self.domains.is_url_allowed(&url) {
            return Err(JobError::Validation(format!(
                "Invalid domain for '{}': host '{}' is not allowed.",
                field,
                url.host_str().unwrap_or_default()
            )));
        }

        Ok(url)
    }

    fn request_from(&self, fields: &Fields<'_>) -> Result<WaveformRequest, JobError> {
        Ok(WaveformRequest {
            input_url: self.validate_url("input_url", fields.required("input_url")?)?,
            input_format: fields.string_enum("input_format", &InputFormat::ALL, |f| f.as_str())?,
            output_format: fields.string_enum("output_format", &OutputFormat::ALL, |f| f.as_str())?,
            output_url: self.validate_url("output_url", fields.required("output_url")?)?,
            channel_mode: fields.string_enum("channel_mode", &ChannelMode::ALL, |m| m.as_str())?,
            bit_depth: fields.numeric_enum("bit_depth", &BitDepth::ALL, |d| u64::from(d.bits()))?,
            notify_url: self.validate_url("notify_url", fields.required("notify_url")?)?,
            context: fields.optional("context").cloned().unwrap_or(Value::Null),
        })
    }
}

/// JSON type name used in rejection messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn invalid_type(field: &str, expected: &str, received: &Value) -> JobError {
    JobError::Validation(format!(
        "Invalid type of '{}'. Expected '{}', but received '{}'.",
        field,
        expected,
        type_name(received)
    ))
}

/// Field accessor over an object that has already passed the unknown-key check.
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// Accept `value` only if it is an object whose keys are all in `allowed`.
    pub(crate) fn closed(value: &'a Value, allowed: &[&str]) -> Result<Self, JobError> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(JobError::Validation(format!(
                    "Invalid type of payload. Expected 'object', but received '{}'.",
                    type_name(other)
                )))
            }
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !allowed.contains(&k.as_str()))
            .map(|k| format!("'{}'", k))
            .collect();

        if !unknown.is_empty() {
            return Err(JobError::Validation(format!(
                "Unrecognized key(s) in object: {}",
                unknown.join(", ")
            )));
        }

        Ok(Self { map })
    }

    pub(crate) fn optional(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field)
    }

    pub(crate) fn required(&self, field: &str) -> Result<&'a Value, JobError> {
        self.map.get(field).ok_or_else(|| {
            JobError::Validation(format!(
                "Invalid type of '{}'. Expected a value, but received 'undefined'.",
                field
            ))
        })
    }

    pub(crate) fn string(&self, field: &str) -> Result<&'a str, JobError> {
        match self.required(field)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(invalid_type(field, "string", other)),
        }
    }

    pub(crate) fn number(&self, field: &str) -> Result<f64, JobError> {
        match self.required(field)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| invalid_type(field, "number", &Value::Number(n.clone()))),
            other => Err(invalid_type(field, "number", other)),
        }
    }

    pub(crate) fn string_enum<T: Copy>(
        &self,
        field: &str,
        members: &[T],
        name: impl Fn(&T) -> &'static str,
    ) -> Result<T, JobError> {
        let received = self.string(field)?;
        members
            .iter()
            .copied()
            .find(|m| name(m) == received)
            .ok_or_else(|| {
                let expected: Vec<String> = members.iter().map(|m| format!("'{}'", name(m))).collect();
                JobError::Validation(format!(
                    "Invalid enum value for '{}'. Expected {}, received '{}'.",
                    field,
                    expected.join(" | "),
                    received
                ))
            })
    }

    pub(crate) fn numeric_enum<T: Copy>(
        &self,
        field: &str,
        members: &[T],
        value_of: impl Fn(&T) -> u64,
    ) -> Result<T, JobError> {
        let received = self.number(field)?;
        members
            .iter()
            .copied()
            .find(|m| value_of(m) as f64 == received)
            .ok_or_else(|| {
                let expected: Vec<String> = members.iter().map(|m| value_of(m).to_string()).collect();
                JobError::Validation(format!(
                    "Invalid enum value for '{}'. Expected {}, received {}.",
                    field,
                    expected.join(" | "),
                    received
                ))
            })
    }
}
