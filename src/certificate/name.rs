use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{error_codes, KeyStoreError};

/// A distinguished name: common name plus optional organisation attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name {
    common_name: String,
    organization: Option<String>,
    organizational_unit: Option<String>,
    country: Option<String>,
}

impl Name {
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            organization: None,
            organizational_unit: None,
            country: None,
        }
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization = Some(organization.to_string());
        self
    }

    pub fn with_organizational_unit(mut self, unit: &str) -> Self {
        self.organizational_unit = Some(unit.to_string());
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn organizational_unit(&self) -> Option<&str> {
        self.organizational_unit.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN={}", self.common_name)?;
        if let Some(o) = &self.organization {
            write!(f, ", O={}", o)?;
        }
        if let Some(ou) = &self.organizational_unit {
            write!(f, ", OU={}", ou)?;
        }
        if let Some(c) = &self.country {
            write!(f, ", C={}", c)?;
        }
        Ok(())
    }
}

/// Parses `CN=..., O=..., OU=..., C=...`; attribute order is free, `CN` is required
impl FromStr for Name {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            KeyStoreError::data(
                &format!("invalid name '{}': {}", s, reason),
                error_codes::ENCODING_FAILED,
            )
        };

        let mut common_name = None;
        let mut name = Name::new("");
        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid("attribute without '='"))?;
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid("empty attribute value"));
            }
            match key.trim().to_ascii_uppercase().as_str() {
                "CN" => common_name = Some(value.to_string()),
                "O" => name.organization = Some(value.to_string()),
                "OU" => name.organizational_unit = Some(value.to_string()),
                "C" => name.country = Some(value.to_string()),
                other => return Err(invalid(&format!("unknown attribute '{}'", other))),
            }
        }
        name.common_name = common_name.ok_or_else(|| invalid("missing CN"))?;
        Ok(name)
    }
}
