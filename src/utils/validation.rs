use crate::domain::model::PersonData;
use crate::utils::error::{EnrollmentError, FieldError, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// 收集多個欄位錯誤，最後一次回報
///
/// Errors of any other kind are not field errors: the first one is kept as is and
/// returned by `finish` instead of the collected fields.
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<FieldError>,
    failure: Option<EnrollmentError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, result: Result<()>) {
        if let Err(e) = result {
            match e {
                EnrollmentError::ValidationError { errors } => self.errors.extend(errors),
                other => {
                    self.failure.get_or_insert(other);
                }
            }
        }
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Re-roots every collected error under `prefix`, e.g. `beneficiaries[2]`.
    pub fn nest(&mut self, prefix: &str, nested: ValidationReport) {
        if let Some(failure) = nested.failure {
            self.failure.get_or_insert(failure);
        }
        self.errors.extend(
            nested
                .errors
                .into_iter()
                .map(|e| FieldError::new(format!("{}.{}", prefix, e.field), e.message)),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.failure.is_none()
    }

    pub fn finish(self) -> Result<()> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(EnrollmentError::ValidationError {
                errors: self.errors,
            })
        }
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(EnrollmentError::validation(field_name, "URL cannot be empty"));
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(EnrollmentError::validation(
                field_name,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(e) => Err(EnrollmentError::validation(
            field_name,
            format!("Invalid URL format: {}", e),
        )),
    }
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EnrollmentError::validation(
            field_name,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| EnrollmentError::validation(field_name, "Field is required"))
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EnrollmentError::validation(
            field_name,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

fn document_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{4,20}$").expect("static regex"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

pub fn validate_document_number(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;
    if !document_number_pattern().is_match(value.trim()) {
        return Err(EnrollmentError::validation(
            field_name,
            "Document number must be 4-20 letters, digits or '-'",
        ));
    }
    Ok(())
}

pub fn validate_email(field_name: &str, value: &str) -> Result<()> {
    if !email_pattern().is_match(value.trim()) {
        return Err(EnrollmentError::validation(
            field_name,
            format!("'{}' is not a valid email address", value),
        ));
    }
    Ok(())
}

pub fn validate_date_order(
    field_name: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<()> {
    if end <= start {
        return Err(EnrollmentError::validation(
            field_name,
            format!("End date {} must be after start date {}", end, start),
        ));
    }
    Ok(())
}

/// 驗證一位人員的必填欄位 (titular 與 beneficiary 共用)
pub fn person_report(person: &PersonData, today: NaiveDate) -> ValidationReport {
    let mut report = ValidationReport::new();

    report.check(validate_non_empty_string("document_type", &person.document_type));
    report.check(validate_document_number("document_number", &person.document_number));
    report.check(validate_non_empty_string("first_name", &person.first_name));
    report.check(validate_non_empty_string("last_name", &person.last_name));

    match validate_required_field("birth_date", &person.birth_date) {
        Ok(birth_date) if *birth_date > today => {
            report.push("birth_date", "Birth date cannot be in the future")
        }
        Ok(_) => {}
        Err(e) => report.check(Err(e)),
    }

    if let Some(email) = person.email.as_deref().filter(|e| !e.trim().is_empty()) {
        report.check(validate_email("email", email));
    }

    report
}

impl Validate for PersonData {
    fn validate(&self) -> Result<()> {
        person_report(self, chrono::Local::now().date_naive()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_person() -> PersonData {
        PersonData {
            document_type: "DNI".to_string(),
            document_number: "40112233".to_string(),
            first_name: "Lucia".to_string(),
            last_name: "Paredes".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1988, 4, 12),
            email: Some("lucia@example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("api.base_url", "https://example.com").is_ok());
        assert!(validate_url("api.base_url", "http://example.com").is_ok());
        assert!(validate_url("api.base_url", "").is_err());
        assert!(validate_url("api.base_url", "invalid-url").is_err());
        assert!(validate_url("api.base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_document_number() {
        assert!(validate_document_number("document_number", "40112233").is_ok());
        assert!(validate_document_number("document_number", "AB-1234").is_ok());
        assert!(validate_document_number("document_number", "12").is_err());
        assert!(validate_document_number("document_number", "12 34 56").is_err());
        assert!(validate_document_number("document_number", "   ").is_err());
    }

    #[test]
    fn test_person_report_collects_every_missing_field() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let report = person_report(&PersonData::default(), today);
        let err = report.finish().unwrap_err();
        let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"document_type"));
        assert!(fields.contains(&"document_number"));
        assert!(fields.contains(&"first_name"));
        assert!(fields.contains(&"last_name"));
        assert!(fields.contains(&"birth_date"));
    }

    #[test]
    fn test_person_report_rejects_future_birth_and_bad_email() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut person = complete_person();
        assert!(person_report(&person, today).finish().is_ok());

        person.birth_date = NaiveDate::from_ymd_opt(2030, 1, 1);
        person.email = Some("not-an-email".to_string());
        let err = person_report(&person, today).finish().unwrap_err();
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn test_nested_report_prefixes_fields() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut person = complete_person();
        person.first_name.clear();

        let mut report = ValidationReport::new();
        report.nest("beneficiaries[1]", person_report(&person, today));
        let err = report.finish().unwrap_err();
        assert_eq!(err.field_errors()[0].field, "beneficiaries[1].first_name");
    }

    #[test]
    fn test_report_keeps_non_field_errors_intact() {
        let mut report = ValidationReport::new();
        report.push("start_date", "Field 'start_date' is required");
        report.check(Err(EnrollmentError::InvalidConfiguration {
            message: "beneficiary capacity must be non-negative, got -1".to_string(),
        }));
        assert!(!report.is_empty());

        let err = report.finish().unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidConfiguration { .. }));
        assert!(err.field_errors().is_empty());
    }

    #[test]
    fn test_validate_date_order() {
        let start = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert!(validate_date_order("end_date", start, end).is_err());
        assert!(validate_date_order("end_date", start, start).is_err());
        assert!(validate_date_order("end_date", end, start).is_ok());
    }
}
