use error_stack::Report;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;

/// Returns the fully qualified `vendor/class=name` form of a device name.
pub fn qualified_name(vendor: &str, class: &str, name: &str) -> String {
    format!("{vendor}/{class}={name}")
}

/// Splits a fully qualified device name into its vendor, class and name.
pub fn parse_qualified_name(device: &str) -> NvcdiResult<(String, String, String)> {
    let invalid = |message: &str| {
        Report::new(NvcdiError::spec(format!(
            "invalid qualified device name {device:?}: {message}"
        )))
    };
    let (kind, name) = device
        .split_once('=')
        .ok_or_else(|| invalid("missing device name"))?;
    let (vendor, class) = kind
        .split_once('/')
        .ok_or_else(|| invalid("missing vendor/class"))?;
    validate_vendor_name(vendor)?;
    validate_class_name(class)?;
    validate_device_name(name)?;
    Ok((vendor.to_string(), class.to_string(), name.to_string()))
}

pub fn validate_vendor_name(vendor: &str) -> NvcdiResult<()> {
    validate_kind_part("vendor", vendor, &['-', '_', '.'])
}

pub fn validate_class_name(class: &str) -> NvcdiResult<()> {
    validate_kind_part("class", class, &['-', '_', '.'])
}

pub fn validate_device_name(name: &str) -> NvcdiResult<()> {
    let Some(first) = name.chars().next() else {
        return Err(Report::new(NvcdiError::spec("empty device name")));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(Report::new(NvcdiError::spec(format!(
            "invalid device name {name:?}: should start with a letter or digit"
        ))));
    }
    check_chars("device", name, &['-', '_', '.', ':'])
}

fn validate_kind_part(what: &str, value: &str, extra: &[char]) -> NvcdiResult<()> {
    let Some(first) = value.chars().next() else {
        return Err(Report::new(NvcdiError::spec(format!("empty {what} name"))));
    };
    if !first.is_ascii_alphabetic() {
        return Err(Report::new(NvcdiError::spec(format!(
            "invalid {what} name {value:?}: should start with a letter"
        ))));
    }
    check_chars(what, value, extra)
}

fn check_chars(what: &str, value: &str, extra: &[char]) -> NvcdiResult<()> {
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !extra.contains(c))
    {
        return Err(Report::new(NvcdiError::spec(format!(
            "invalid character {c:?} in {what} name {value:?}"
        ))));
    }
    if value.chars().last().is_some_and(|c| !c.is_ascii_alphanumeric()) {
        return Err(Report::new(NvcdiError::spec(format!(
            "invalid {what} name {value:?}: should end with a letter or digit"
        ))));
    }
    Ok(())
}
