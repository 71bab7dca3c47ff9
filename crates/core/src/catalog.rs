//! Catalog identifiers and validated record drafts.
//!
//! Request bodies arrive as `*Input` types, which reject unknown fields.
//! `validate()` trims every string, turns empty optional strings into `None`
//! and enforces length bounds, producing a `*Draft` the metadata store can
//! persist without further checks.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::Date;
use time::macros::format_description;

/// Maximum length of a fish name.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum length of a scientific name.
pub const MAX_SCIENTIFIC_NAME_LEN: usize = 150;
/// Maximum length of tribe, location, method and category values.
///
/// Matches the search filter bound so every stored value stays searchable.
pub const MAX_FACET_LEN: usize = 50;
/// Maximum length of free-form notes and descriptions.
pub const MAX_NOTES_LEN: usize = 5000;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a database primary key. Keys start at 1.
            pub fn new(value: i64) -> Result<Self> {
                if value < 1 {
                    return Err(Error::InvalidId(format!(
                        "{} must be a positive integer, got {value}",
                        stringify!($name)
                    )));
                }
                Ok(Self(value))
            }

            /// Get the raw key.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let value = s.trim().parse::<i64>().map_err(|_| {
                    Error::InvalidId(format!("{} is not an integer: {s}", stringify!($name)))
                })?;
                Self::new(value)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

integer_id!(
    /// Primary key of a fish record.
    FishId
);
integer_id!(
    /// Primary key of a capture record.
    CaptureId
);
integer_id!(
    /// Primary key of a tribal classification.
    ClassificationId
);
integer_id!(
    /// Primary key of a media record.
    MediaId
);

fn required(field: &'static str, value: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, "is required"));
    }
    if trimmed.chars().count() > max {
        return Err(Error::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

fn optional(field: &'static str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max => Err(Error::validation(
            field,
            format!("must be at most {max} characters"),
        )),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(field: &'static str, value: &str) -> Result<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| Error::validation(field, "must be a date in YYYY-MM-DD format"))
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Fish create/update request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FishInput {
    /// Indigenous name.
    pub name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub description: Option<String>,
}

/// A validated fish record ready for persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FishDraft {
    pub name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub description: Option<String>,
}

impl FishInput {
    pub fn validate(&self) -> Result<FishDraft> {
        Ok(FishDraft {
            name: required("name", &self.name, MAX_NAME_LEN)?,
            scientific_name: optional(
                "scientific_name",
                self.scientific_name.as_deref(),
                MAX_SCIENTIFIC_NAME_LEN,
            )?,
            common_name: optional("common_name", self.common_name.as_deref(), MAX_NAME_LEN)?,
            description: optional("description", self.description.as_deref(), MAX_NOTES_LEN)?,
        })
    }
}

/// Capture record request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureInput {
    pub tribe: String,
    pub location: String,
    pub method: String,
    /// Date of the capture, `YYYY-MM-DD`.
    pub captured_on: Option<String>,
    pub notes: Option<String>,
}

/// A validated capture record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureDraft {
    pub tribe: String,
    pub location: String,
    pub method: String,
    pub captured_on: Option<Date>,
    pub notes: Option<String>,
}

impl CaptureInput {
    pub fn validate(&self) -> Result<CaptureDraft> {
        let captured_on = match self.captured_on.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(parse_date("captured_on", value)?),
        };

        Ok(CaptureDraft {
            tribe: required("tribe", &self.tribe, MAX_FACET_LEN)?,
            location: required("location", &self.location, MAX_FACET_LEN)?,
            method: required("method", &self.method, MAX_FACET_LEN)?,
            captured_on,
            notes: optional("notes", self.notes.as_deref(), MAX_NOTES_LEN)?,
        })
    }
}

/// Tribal classification request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationInput {
    pub tribe: String,
    /// The fish's name in the tribe's language.
    pub local_name: Option<String>,
    /// Food or taboo category assigned by the tribe.
    pub category: String,
    pub processing_method: Option<String>,
    pub notes: Option<String>,
}

/// A validated tribal classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassificationDraft {
    pub tribe: String,
    pub local_name: Option<String>,
    pub category: String,
    pub processing_method: Option<String>,
    pub notes: Option<String>,
}

impl ClassificationInput {
    pub fn validate(&self) -> Result<ClassificationDraft> {
        Ok(ClassificationDraft {
            tribe: required("tribe", &self.tribe, MAX_FACET_LEN)?,
            local_name: optional("local_name", self.local_name.as_deref(), MAX_NAME_LEN)?,
            category: required("category", &self.category, MAX_FACET_LEN)?,
            processing_method: optional(
                "processing_method",
                self.processing_method.as_deref(),
                MAX_NAME_LEN,
            )?,
            notes: optional("notes", self.notes.as_deref(), MAX_NOTES_LEN)?,
        })
    }
}
