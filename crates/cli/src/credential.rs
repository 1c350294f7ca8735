// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ITSM system types and the credential field sets they accept.
//!
//! Credentials live only for the active submission. Secret values never
//! appear in `Debug` output and are dropped from the draft kept for
//! correction after a failed round.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Target ITSM system of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    ServicenowItsm,
    JiraItsm,
    /// A system type this build has no field set for. Accepted with a
    /// free-form field set.
    #[serde(other)]
    Unsupported,
}

/// One input field of a system's credential form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub secret: bool,
    pub required: bool,
}

const SERVICENOW_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "instance_url", label: "Instance URL", secret: false, required: true },
    FieldSpec { name: "username", label: "Username", secret: false, required: true },
    FieldSpec { name: "password", label: "Password", secret: true, required: true },
];

const JIRA_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "url", label: "Jira URL", secret: false, required: true },
    FieldSpec { name: "email", label: "Email", secret: false, required: true },
    FieldSpec { name: "api_token", label: "API token", secret: true, required: true },
];

/// Name fragments that mark a free-form field as secret.
const SECRET_HINTS: &[&str] = &["password", "token", "secret", "key"];

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServicenowItsm => "servicenow_itsm",
            Self::JiraItsm => "jira_itsm",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ServicenowItsm => "ServiceNow",
            Self::JiraItsm => "Jira Service Management",
            Self::Unsupported => "ITSM system",
        }
    }

    /// Form fields for this system, in display order.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::ServicenowItsm => SERVICENOW_FIELDS,
            Self::JiraItsm => JIRA_FIELDS,
            Self::Unsupported => &[],
        }
    }

    /// Whether `field` holds a secret for this system.
    pub fn is_secret(&self, field: &str) -> bool {
        match self.fields().iter().find(|f| f.name == field) {
            Some(spec) => spec.secret,
            None => {
                let lower = field.to_lowercase();
                SECRET_HINTS.iter().any(|hint| lower.contains(hint))
            }
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entered credentials for one system.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    system_type: SystemType,
    fields: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(system_type: SystemType, fields: BTreeMap<String, String>) -> Self {
        Self { system_type, fields }
    }

    /// Parse a flat JSON object of string values, e.g.
    /// `{"instance_url": "...", "username": "...", "password": "..."}`.
    pub fn from_json(system_type: SystemType, json: &str) -> anyhow::Result<Self> {
        let fields: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("credentials must be a JSON object of strings: {e}"))?;
        Ok(Self::new(system_type, fields))
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// True when there is nothing to submit: no fields, or only blank values.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }

    /// Required fields of the system's form that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.system_type
            .fields()
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| self.get(spec.name).is_none_or(|v| v.trim().is_empty()))
            .map(|spec| spec.name)
            .collect()
    }

    /// Copy with secret fields removed, used to re-populate the form after
    /// a failed attempt.
    pub fn retained_draft(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| !self.system_type.is_secret(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { system_type: self.system_type, fields }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let shown = if self.system_type.is_secret(k) { "***" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("Credentials")
            .field("system_type", &self.system_type)
            .field("fields", &redacted)
            .finish()
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
