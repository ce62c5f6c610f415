//! Typed views of the Moodle web service payloads.
//!
//! Every record keeps the untouched upstream JSON in `raw`. Typed fields are
//! read leniently because Moodle versions disagree on ints vs bools vs
//! numeric strings.

use std::fmt;

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use zeroize::Zeroizing;

/// Token pair returned by `login/token.php`.
pub struct AcquiredToken {
    pub token: Zeroizing<String>,
    pub private_token: Option<Zeroizing<String>>,
}

impl fmt::Debug for AcquiredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredToken")
            .field("token", &"[REDACTED]")
            .field(
                "private_token",
                &self.private_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Result of `core_webservice_get_site_info`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteInfo {
    #[serde(deserialize_with = "required_i64")]
    pub userid: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub sitename: Option<String>,
    #[serde(default)]
    pub siteurl: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

/// One entry of `core_enrol_get_users_courses`.
#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    #[serde(deserialize_with = "required_i64")]
    pub id: i64,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub visible: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub startdate: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub enddate: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub categoryid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub category: Option<i64>,
    #[serde(skip)]
    pub raw: Value,
}

impl Course {
    /// Older sites report `category`, newer ones `categoryid`.
    pub fn category_id(&self) -> Option<i64> {
        self.categoryid.or(self.category)
    }
}

/// One assignment from `mod_assign_get_assignments`.
#[derive(Debug, Clone, Deserialize)]
pub struct Assignment {
    #[serde(deserialize_with = "required_i64")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub course: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duedate: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub allowsubmissionsfromdate: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub cutoffdate: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub grade: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub visible: Option<bool>,
    #[serde(skip)]
    pub raw: Value,
}

impl Assignment {
    /// Submission status carried by the record, if the site includes one.
    pub fn submission_status(&self) -> Option<&str> {
        self.raw
            .get("submissionstatus")
            .and_then(Value::as_str)
            .or_else(|| self.raw.get("status").and_then(Value::as_str))
            .or_else(|| {
                self.raw
                    .get("submission")
                    .and_then(|s| s.get("status"))
                    .and_then(Value::as_str)
            })
    }
}

/// One section of `core_course_get_contents`.
#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "records")]
    pub modules: Vec<Module>,
    #[serde(skip)]
    pub raw: Value,
}

/// A course module (resource, activity, link, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    #[serde(deserialize_with = "required_i64")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub modname: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub contents: Vec<FileDescriptor>,
    #[serde(skip)]
    pub raw: Value,
}

/// A downloadable file embedded in a module's `contents` list.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileDescriptor {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub fileurl: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub filesize: Option<i64>,
}

impl FileDescriptor {
    /// `fileurl` is what Moodle documents; some plugins only fill `url`.
    pub fn download_url(&self) -> Option<&str> {
        self.fileurl
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }

    /// Parse the descriptor list out of a stored module payload, skipping
    /// entries that are not objects.
    pub fn list_from_module(raw: &Value) -> Vec<FileDescriptor> {
        raw.get("contents")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Records that carry their own source JSON.
pub trait RawRecord: DeserializeOwned {
    fn set_raw(&mut self, raw: Value);

    fn from_raw(raw: Value) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_value(raw.clone())?;
        record.set_raw(raw);
        Ok(record)
    }
}

macro_rules! impl_raw_record {
    ($($ty:ty),* $(,)?) => {
        $(impl RawRecord for $ty {
            fn set_raw(&mut self, raw: Value) {
                self.raw = raw;
            }
        })*
    };
}

impl_raw_record!(SiteInfo, Course, Assignment, Section, Module);

fn records<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: RawRecord,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    values
        .into_iter()
        .map(|value| T::from_raw(value).map_err(serde::de::Error::custom))
        .collect()
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn required_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer id, got {value}")))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(value_as_i64))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(
        Option::<Value>::deserialize(deserializer)?.and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }),
    )
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(
        Option::<Value>::deserialize(deserializer)?.and_then(|value| match value {
            Value::Bool(b) => Some(b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }),
    )
}
