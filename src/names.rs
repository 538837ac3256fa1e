//! Validation of the names that appear on the bus.
//!
//! Interface, error and member names are part of the wire contract, so
//! they are checked once when an interface or error type is declared.

use crate::error::{Error, Result};

/// Length limits for validated names.
pub mod limits {
    /// Maximum length of any bus name.
    pub const MAX_NAME_LENGTH: usize = 255;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const NAME_EMPTY: &str = "name cannot be empty";
    pub const NAME_TOO_LONG: &str = "name exceeds maximum length";
    pub const NAME_TOO_FEW_ELEMENTS: &str = "name needs at least two '.'-separated elements";
    pub const ELEMENT_INVALID: &str =
        "name element must start with a letter or '_' (allowed: A-Z, a-z, 0-9, _)";
    pub const BUS_NAME_INVALID: &str =
        "bus name element contains invalid characters (allowed: A-Z, a-z, 0-9, _, -)";
}

fn is_element(element: &str, extra: &[char]) -> bool {
    let mut chars = element.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || extra.contains(&first))
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c))
}

fn check_length(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::declaration(format!("{kind} {}", errmsg::NAME_EMPTY)));
    }
    if name.len() > limits::MAX_NAME_LENGTH {
        return Err(Error::declaration(format!(
            "{kind} {} (max: {}, got: {})",
            errmsg::NAME_TOO_LONG,
            limits::MAX_NAME_LENGTH,
            name.len()
        )));
    }
    Ok(())
}

/// Validate an interface name such as `org.example.Foo`.
///
/// Rules:
/// - 1 to 255 characters
/// - At least two elements separated by `.`
/// - Each element starts with a letter or `_` and contains `[A-Za-z0-9_]`
pub fn validate_interface_name(name: &str) -> Result<()> {
    check_length("interface name", name)?;
    let elements: Vec<&str> = name.split('.').collect();
    if elements.len() < 2 {
        return Err(Error::declaration(format!(
            "interface name '{name}': {}",
            errmsg::NAME_TOO_FEW_ELEMENTS
        )));
    }
    if !elements.iter().all(|e| is_element(e, &[])) {
        return Err(Error::declaration(format!(
            "interface name '{name}': {}",
            errmsg::ELEMENT_INVALID
        )));
    }
    Ok(())
}

/// Error names follow the interface name rules.
pub fn validate_error_name(name: &str) -> Result<()> {
    validate_interface_name(name)
        .map_err(|_| Error::declaration(format!("'{name}' is not a valid error name")))
}

/// Validate a method, property or signal name (a single element).
pub fn validate_member_name(name: &str) -> Result<()> {
    check_length("member name", name)?;
    if !is_element(name, &[]) {
        return Err(Error::declaration(format!(
            "member name '{name}': {}",
            errmsg::ELEMENT_INVALID
        )));
    }
    Ok(())
}

/// Validate a unique (`:1.42`) or well-known (`org.example.Service`) bus name.
pub fn validate_bus_name(name: &str) -> Result<()> {
    check_length("bus name", name)?;
    if let Some(unique) = name.strip_prefix(':') {
        let valid = unique.split('.').count() >= 2
            && unique
                .split('.')
                .all(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        if valid {
            return Ok(());
        }
        return Err(Error::declaration(format!(
            "bus name '{name}': {}",
            errmsg::BUS_NAME_INVALID
        )));
    }
    let elements: Vec<&str> = name.split('.').collect();
    if elements.len() < 2 {
        return Err(Error::declaration(format!(
            "bus name '{name}': {}",
            errmsg::NAME_TOO_FEW_ELEMENTS
        )));
    }
    if !elements.iter().all(|e| is_element(e, &['-'])) {
        return Err(Error::declaration(format!(
            "bus name '{name}': {}",
            errmsg::BUS_NAME_INVALID
        )));
    }
    Ok(())
}

/// Convert a snake_case local name to the PascalCase remote convention.
///
/// Each `_`-separated segment is title-cased: `test_int` becomes `TestInt`.
pub fn to_remote_name(local: &str) -> String {
    local
        .split('_')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_interface_names() {
        assert!(validate_interface_name("org.example.Foo").is_ok());
        assert!(validate_interface_name("_a.b_2").is_ok());
    }

    #[test]
    fn test_invalid_interface_names() {
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("org").is_err());
        assert!(validate_interface_name("org..Foo").is_err());
        assert!(validate_interface_name("org.1example").is_err());
        assert!(validate_interface_name("org.exa-mple").is_err());
        assert!(validate_interface_name(&format!("a.{}", "b".repeat(300))).is_err());
    }

    #[test]
    fn test_member_names() {
        assert!(validate_member_name("Upper").is_ok());
        assert!(validate_member_name("_private").is_ok());
        assert!(validate_member_name("").is_err());
        assert!(validate_member_name("Up.per").is_err());
        assert!(validate_member_name("9lives").is_err());
    }

    #[test]
    fn test_bus_names() {
        assert!(validate_bus_name(":1.42").is_ok());
        assert!(validate_bus_name("org.example-app.Service").is_ok());
        assert!(validate_bus_name(":1").is_err());
        assert!(validate_bus_name("service").is_err());
    }

    #[test]
    fn test_to_remote_name() {
        assert_eq!(to_remote_name("upper"), "Upper");
        assert_eq!(to_remote_name("test_int"), "TestInt");
        assert_eq!(to_remote_name("read_only"), "ReadOnly");
        assert_eq!(to_remote_name("x"), "X");
    }
}
