use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::ValidationError;
use crate::models::SubmissionDraft;

const NAME_LEN: (usize, usize) = (2, 120);
const DESCRIPTION_MAX: usize = 2000;
const CONTACT_MAX: usize = 200;
const LIST_MAX_ITEMS: usize = 20;
const TAG_LEN: (usize, usize) = (1, 40);
const DISCIPLINE_LEN: (usize, usize) = (2, 20);

/// Body of `POST /submissions` as sent by the browser client.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmissionPayload {
    pub name: Option<Field<String>>,
    pub url: Option<Field<String>>,
    pub description: Option<Field<String>>,
    pub tags: Option<Field<Vec<String>>>,
    pub disciplines: Option<Field<Vec<String>>>,
    pub contact: Option<Field<String>>,
    pub page: Option<Field<String>>,
    pub captcha: Option<Field<Captcha>>,
}

/// A payload value that either has the expected shape or is kept as raw JSON,
/// so a wrongly typed field fails its own check instead of the whole body.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Field<T> {
    Valid(T),
    Invalid(Value),
}

/// Absent or null is `Ok(None)`; a value of the wrong type is `err`.
fn take<T>(field: Option<Field<T>>, err: ValidationError) -> Result<Option<T>, ValidationError> {
    match field {
        None => Ok(None),
        Some(Field::Valid(v)) => Ok(Some(v)),
        Some(Field::Invalid(_)) => Err(err),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Captcha {
    pub a: Option<Numeric>,
    pub b: Option<Numeric>,
    pub op: Option<String>,
    pub answer: Option<Numeric>,
}

/// The client reads the answer from a text box, so numbers may arrive as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<i64> {
        match self {
            Numeric::Int(n) => Some(*n),
            Numeric::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Numeric::Float(_) => None,
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Validate a payload field by field, in a fixed order, stopping at the
/// first failure.
pub fn validate_submission(payload: SubmissionPayload) -> Result<SubmissionDraft, ValidationError> {
    let name = take(payload.name, ValidationError::Name)?.unwrap_or_default();
    if !within(name.trim(), NAME_LEN.0, NAME_LEN.1) {
        return Err(ValidationError::Name);
    }

    let url = take(payload.url, ValidationError::Url)?.unwrap_or_default();
    if !is_http_url(url.trim()) {
        return Err(ValidationError::Url);
    }

    let description =
        take(payload.description, ValidationError::Description)?.unwrap_or_default();
    if !within(&description, 0, DESCRIPTION_MAX) {
        return Err(ValidationError::Description);
    }

    let contact = take(payload.contact, ValidationError::Contact)?.unwrap_or_default();
    if !within(&contact, 0, CONTACT_MAX) {
        return Err(ValidationError::Contact);
    }

    let tags = take(payload.tags, ValidationError::Tags)?.unwrap_or_default();
    let tags = normalize_list(tags, TAG_LEN).ok_or(ValidationError::Tags)?;
    let disciplines =
        take(payload.disciplines, ValidationError::Disciplines)?.unwrap_or_default();
    let disciplines =
        normalize_list(disciplines, DISCIPLINE_LEN).ok_or(ValidationError::Disciplines)?;

    let captcha = take(payload.captcha, ValidationError::Captcha)?.unwrap_or_default();
    if !check_captcha(&captcha) {
        return Err(ValidationError::Captcha);
    }

    // Not validated; a non-string page is dropped.
    let page = match payload.page {
        Some(Field::Valid(page)) => page.trim().to_string(),
        _ => String::new(),
    };

    Ok(SubmissionDraft {
        name: name.trim().to_string(),
        url: url.trim().to_string(),
        description,
        tags,
        disciplines,
        contact: contact.trim().to_string(),
        page,
    })
}

pub fn check_captcha(captcha: &Captcha) -> bool {
    if captcha.op.as_deref().unwrap_or("+") != "+" {
        return false;
    }
    let (Some(a), Some(b), Some(answer)) = (
        captcha.a.as_ref().and_then(Numeric::value),
        captcha.b.as_ref().and_then(Numeric::value),
        captcha.answer.as_ref().and_then(Numeric::value),
    ) else {
        return false;
    };
    a.checked_add(b) == Some(answer)
}

pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

fn within(s: &str, min: usize, max: usize) -> bool {
    let len = s.chars().count();
    len >= min && len <= max
}

fn normalize_list(items: Vec<String>, (min, max): (usize, usize)) -> Option<Vec<String>> {
    if items.len() > LIST_MAX_ITEMS {
        return None;
    }
    items
        .into_iter()
        .map(|item| {
            let trimmed = item.trim();
            within(trimmed, min, max).then(|| trimmed.to_string())
        })
        .collect()
}
