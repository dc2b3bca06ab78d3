use crate::types::{AttributePath, Diagnostic, Diagnostics, Dynamic};

/// Validators run on known, non-null configured values only
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics);
}

fn report(diagnostics: &mut Diagnostics, path: &AttributePath, summary: String, detail: String) {
    diagnostics.push(Diagnostic::error(summary, Some(detail)).with_attribute(path.clone()));
}

pub struct StringLengthValidator {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl StringLengthValidator {
    pub fn between(min: usize, max: usize) -> Box<dyn Validator> {
        Box::new(Self {
            min: Some(min),
            max: Some(max),
        })
    }
}

impl Validator for StringLengthValidator {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Some(s) = value.as_string() {
            let len = s.chars().count();
            if let Some(min) = self.min {
                if len < min {
                    report(
                        diagnostics,
                        path,
                        format!("{} must have minimum length of {}", path, min),
                        format!("Got length {}", len),
                    );
                }
            }
            if let Some(max) = self.max {
                if len > max {
                    report(
                        diagnostics,
                        path,
                        format!("{} must have maximum length of {}", path, max),
                        format!("Got length {}", len),
                    );
                }
            }
        }
    }
}

pub struct StringPatternValidator {
    pub pattern: Result<regex::Regex, regex::Error>,
    pub description: String,
}

impl StringPatternValidator {
    /// A pattern that fails to compile rejects every value it sees
    pub fn new(pattern: &str, description: &str) -> Box<dyn Validator> {
        Box::new(Self {
            pattern: regex::Regex::new(pattern),
            description: description.to_string(),
        })
    }
}

impl Validator for StringPatternValidator {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Some(s) = value.as_string() {
            let pattern = match &self.pattern {
                Ok(pattern) => pattern,
                Err(e) => {
                    report(
                        diagnostics,
                        path,
                        format!("{} has an invalid validation pattern", path),
                        e.to_string(),
                    );
                    return;
                }
            };
            if !pattern.is_match(s) {
                report(
                    diagnostics,
                    path,
                    format!("{} {}", path, self.description),
                    format!("Value '{}' does not match pattern", s),
                );
            }
        }
    }
}

pub struct OneOfValidator {
    pub allowed: Vec<String>,
}

impl OneOfValidator {
    pub fn new(allowed: &[&str]) -> Box<dyn Validator> {
        Box::new(Self {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl Validator for OneOfValidator {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Some(s) = value.as_string() {
            if !self.allowed.iter().any(|a| a == s) {
                report(
                    diagnostics,
                    path,
                    format!("{} must be one of: {}", path, self.allowed.join(", ")),
                    format!("Got '{}'", s),
                );
            }
        }
    }
}

pub struct NumberRangeValidator {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumberRangeValidator {
    pub fn between(min: f64, max: f64) -> Box<dyn Validator> {
        Box::new(Self {
            min: Some(min),
            max: Some(max),
        })
    }

    pub fn at_least(min: f64) -> Box<dyn Validator> {
        Box::new(Self {
            min: Some(min),
            max: None,
        })
    }
}

impl Validator for NumberRangeValidator {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Some(n) = value.as_number() {
            if let Some(min) = self.min {
                if n < min {
                    report(
                        diagnostics,
                        path,
                        format!("{} must be at least {}", path, min),
                        format!("Got {}", n),
                    );
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    report(
                        diagnostics,
                        path,
                        format!("{} must be at most {}", path, max),
                        format!("Got {}", n),
                    );
                }
            }
        }
    }
}

pub struct ListLengthValidator {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl ListLengthValidator {
    pub fn at_most(max: usize) -> Box<dyn Validator> {
        Box::new(Self {
            min: None,
            max: Some(max),
        })
    }
}

impl Validator for ListLengthValidator {
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Dynamic::List(items) = value {
            if let Some(min) = self.min {
                if items.len() < min {
                    report(
                        diagnostics,
                        path,
                        format!("{} must have at least {} items", path, min),
                        format!("Got {} items", items.len()),
                    );
                }
            }
            if let Some(max) = self.max {
                if items.len() > max {
                    report(
                        diagnostics,
                        path,
                        format!("{} must have at most {} items", path, max),
                        format!("Got {} items", items.len()),
                    );
                }
            }
        }
    }
}

/// Wraps a closure for one-off checks that do not deserve their own type
pub struct FnValidator<F>
where
    F: Fn(&Dynamic) -> Option<String> + Send + Sync,
{
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Dynamic) -> Option<String> + Send + Sync + 'static,
{
    pub fn create(check: F) -> Box<dyn Validator> {
        Box::new(Self { check })
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Dynamic) -> Option<String> + Send + Sync,
{
    fn validate(&self, value: &Dynamic, path: &AttributePath, diagnostics: &mut Diagnostics) {
        if let Some(message) = (self.check)(value) {
            report(
                diagnostics,
                path,
                format!("{} is invalid", path),
                message,
            );
        }
    }
}
