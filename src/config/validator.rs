//! Advisory configuration validation.
//!
//! Findings are hints for the operator. They never block command generation
//! or a start request.

use crate::models::Configuration;
use regex::Regex;
use std::fmt;

/// How serious an advisory finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Invalid,
}

/// A single field-level finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAdvisory {
    pub field: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl FieldAdvisory {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        FieldAdvisory {
            field,
            severity: Severity::Invalid,
            message: message.into(),
        }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        FieldAdvisory {
            field,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Invalid => "invalid",
        };
        write!(f, "{} [{}]: {}", self.field, tag, self.message)
    }
}

/// Validate the model path: required, absolute-looking, no traversal.
pub fn validate_model_path(path: &str) -> Option<FieldAdvisory> {
    let path = path.trim();
    if path.is_empty() {
        return Some(FieldAdvisory::invalid("modelPath", "model path is empty"));
    }
    if path.contains("..") {
        return Some(FieldAdvisory::invalid("modelPath", "model path must not contain '..'"));
    }
    if path.contains(":\\") {
        return Some(FieldAdvisory::warning("modelPath", "Windows path, prefer the /mnt/ form"));
    }
    if !(path.starts_with('/') || path.starts_with('~')) {
        return Some(FieldAdvisory::warning("modelPath", "use an absolute path or the /mnt/ prefix"));
    }
    None
}

/// Device selector: digits separated by commas, e.g. "0,1,2,3".
pub fn validate_cuda_devices(devices: &str) -> Option<FieldAdvisory> {
    let devices = devices.trim();
    if devices.is_empty() {
        return None;
    }
    let valid = devices
        .split(',')
        .all(|d| !d.trim().is_empty() && d.trim().chars().all(|c| c.is_ascii_digit()));
    if valid {
        None
    } else {
        Some(FieldAdvisory::invalid("cudaDevices", "expected a list like 0,1,2,3"))
    }
}

/// Package-environment name: letters, digits, underscore, dot, hyphen.
pub fn validate_env_name(name: &str) -> Option<FieldAdvisory> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match Regex::new(r"^[a-zA-Z0-9_.-]+$") {
        Ok(re) if re.is_match(name) => None,
        Ok(_) => Some(FieldAdvisory::invalid(
            "condaEnv",
            "only letters, digits, underscore, dot and hyphen are allowed",
        )),
        Err(_) => None,
    }
}

/// Run every advisory rule against a configuration.
pub fn validate_configuration(config: &Configuration) -> Vec<FieldAdvisory> {
    let mut findings = Vec::new();

    findings.extend(validate_model_path(&config.model_path));
    findings.extend(validate_cuda_devices(&config.cuda_devices));
    findings.extend(validate_env_name(&config.conda_env));

    if !(1..=65535).contains(&config.port) {
        findings.push(FieldAdvisory::invalid("port", "port must be between 1 and 65535"));
    }
    if !(1..=8).contains(&config.tensor_parallel) {
        findings.push(FieldAdvisory::invalid("tensorParallel", "tensor parallel size must be between 1 and 8"));
    }
    if !(0.1..=1.0).contains(&config.gpu_memory_utilization) {
        findings.push(FieldAdvisory::invalid(
            "gpuMemoryUtilization",
            "memory fraction must be between 0.1 and 1.0",
        ));
    }

    let max_len = config.max_model_len.trim();
    if !max_len.is_empty() && !matches!(max_len.parse::<u64>(), Ok(n) if n > 0) {
        findings.push(FieldAdvisory::invalid("maxModelLen", "max model length must be a positive integer"));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_only_flags_model_path() {
        let findings = validate_configuration(&Configuration::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field, "modelPath");
        assert_eq!(findings[0].severity, Severity::Invalid);
    }

    #[test]
    fn test_model_path_rules() {
        assert!(validate_model_path("/mnt/models/m1").is_none());
        assert!(validate_model_path("~/models/m1").is_none());
        assert_eq!(validate_model_path("/mnt/../etc").unwrap().severity, Severity::Invalid);
        assert_eq!(validate_model_path("D:\\models").unwrap().severity, Severity::Warning);
        assert_eq!(validate_model_path("models/m1").unwrap().severity, Severity::Warning);
    }

    #[test]
    fn test_cuda_devices_rules() {
        assert!(validate_cuda_devices("").is_none());
        assert!(validate_cuda_devices("0,1").is_none());
        assert!(validate_cuda_devices("0, 1").is_none());
        assert!(validate_cuda_devices("0,,1").is_some());
        assert!(validate_cuda_devices("gpu0").is_some());
    }

    #[test]
    fn test_env_name_rules() {
        assert!(validate_env_name("vllm-0.6_py3.11").is_none());
        assert!(validate_env_name("bad name").is_some());
    }

    #[test]
    fn test_numeric_ranges() {
        let mut config = Configuration::default();
        config.model_path = "/mnt/models/m1".to_string();
        config.port = 70000;
        config.tensor_parallel = 16;
        config.gpu_memory_utilization = 1.5;
        config.max_model_len = "-3".to_string();

        let fields: Vec<&str> = validate_configuration(&config).iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["port", "tensorParallel", "gpuMemoryUtilization", "maxModelLen"]);
    }
}
