use std::fmt::Display;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Manufacturer and family
    pub man_family: Manufacturer,
    /// Manufacturer string
    pub manufacturer: String,
    /// Model string
    pub model: String,
    /// Serial number
    pub serial: Option<String>,
    /// Version number (as reported by *IDN?)
    pub version: Option<String>,
}
impl ModelInfo {
    pub fn from_idn(idn: &str) -> Result<Self> {
        let idn_sep: Vec<_> = idn.trim().split(',').map(str::trim).collect();
        if idn_sep.len() < 2 || idn_sep[0].is_empty() {
            return Err(Error::BadResponse(format!("Invalid *IDN? response: {idn}")));
        }

        Ok(Self {
            man_family: Manufacturer::from_idn(&idn_sep),
            manufacturer: idn_sep[0].to_string(),
            model: idn_sep[1].to_string(),
            serial: idn_sep
                .get(2)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            version: idn_sep
                .get(3)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        })
    }
}
impl Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)?;
        if let Some(serial) = &self.serial {
            write!(f, " (S/N {serial})")?;
        }
        if let Some(version) = &self.version {
            write!(f, " v{version}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Manufacturer {
    /// Unknown manufacturer
    Unknown,
    /// Hioki
    Hioki(HiokiFamily),
    /// Keysight, also includes Agilent and HP
    Keysight,
    /// Rigol
    Rigol,
    /// Siglent
    Siglent,
}
impl Manufacturer {
    fn from_idn(idn: &[&str]) -> Self {
        let man = idn[0].to_lowercase();

        if man.contains("hioki") {
            Self::Hioki(HiokiFamily::from_idn(idn))
        } else if man.contains("keysight") || man.contains("agilent") || man.contains("hewlett")
        {
            Self::Keysight
        } else if man.contains("rigol") {
            Self::Rigol
        } else if man.contains("siglent") {
            Self::Siglent
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HiokiFamily {
    Unknown,
    /// Hioki LR8450 memory hilogger
    LR8450,
    /// Hioki LR8400 series memory hilogger
    LR8400,
    /// Hioki MR6000 memory recorder
    MR6000,
}
impl HiokiFamily {
    fn from_idn(idn: &[&str]) -> Self {
        let model = idn[1].to_lowercase();

        if model.contains("lr845") {
            Self::LR8450
        } else if model.contains("lr84") {
            Self::LR8400
        } else if model.contains("mr60") {
            Self::MR6000
        } else {
            Self::Unknown
        }
    }
}
