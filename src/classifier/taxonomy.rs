//! Error taxonomy and the fixed impact tables keyed by error type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type assigned by classification.
///
/// The built-in variants cover the failure classes the recovery engine has
/// dedicated strategies for. `Custom` carries caller-registered types so new
/// patterns can be added at runtime without a code change; such types pick up
/// the default profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorType {
    Authentication,
    Authorization,
    Validation,
    RateLimit,
    Network,
    Database,
    Internal,
    NotFound,
    MemoryLeak,
    SuspiciousActivity,
    WorkflowExecution,
    DataIntegrity,
    Configuration,
    Custom(String),
}

impl ErrorType {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::Authentication => "authentication",
            ErrorType::Authorization => "authorization",
            ErrorType::Validation => "validation",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Network => "network",
            ErrorType::Database => "database",
            ErrorType::Internal => "internal",
            ErrorType::NotFound => "not_found",
            ErrorType::MemoryLeak => "memory_leak",
            ErrorType::SuspiciousActivity => "suspicious_activity",
            ErrorType::WorkflowExecution => "workflow_execution",
            ErrorType::DataIntegrity => "data_integrity",
            ErrorType::Configuration => "configuration",
            ErrorType::Custom(name) => name.as_str(),
        }
    }

    /// Impact profile for this type.
    pub fn profile(&self) -> TypeProfile {
        use Complexity::*;
        use ImpactLevel::*;

        let (category, business, user, complexity, minutes) = match self {
            ErrorType::Authentication => (ErrorCategory::Security, Medium, High, Simple, 15),
            ErrorType::Authorization => (ErrorCategory::Security, Medium, Medium, Simple, 30),
            ErrorType::Validation => (ErrorCategory::UserInput, Low, Low, Simple, 5),
            ErrorType::RateLimit => (ErrorCategory::Capacity, Medium, Medium, Simple, 10),
            ErrorType::Network => (ErrorCategory::Infrastructure, High, High, Moderate, 20),
            ErrorType::Database => (ErrorCategory::Data, High, High, Complex, 45),
            ErrorType::Internal => (ErrorCategory::Application, Medium, Medium, Moderate, 60),
            ErrorType::NotFound => (ErrorCategory::UserInput, Low, Low, Simple, 5),
            ErrorType::MemoryLeak => (ErrorCategory::Performance, High, Medium, Complex, 120),
            ErrorType::SuspiciousActivity => {
                (ErrorCategory::Security, Critical, Low, Complex, 90)
            }
            ErrorType::WorkflowExecution => {
                (ErrorCategory::Integration, Medium, Low, Moderate, 30)
            }
            ErrorType::DataIntegrity => (ErrorCategory::Data, Critical, Medium, Complex, 90),
            ErrorType::Configuration => {
                (ErrorCategory::Application, High, Medium, Moderate, 30)
            }
            ErrorType::Custom(_) => return TypeProfile::default(),
        };

        TypeProfile {
            category,
            business_impact: business,
            user_impact: user,
            technical_complexity: complexity,
            estimated_resolution_minutes: minutes,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorType {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "authentication" => ErrorType::Authentication,
            "authorization" => ErrorType::Authorization,
            "validation" => ErrorType::Validation,
            "rate_limit" => ErrorType::RateLimit,
            "network" => ErrorType::Network,
            "database" => ErrorType::Database,
            "internal" => ErrorType::Internal,
            "not_found" => ErrorType::NotFound,
            "memory_leak" => ErrorType::MemoryLeak,
            "suspicious_activity" => ErrorType::SuspiciousActivity,
            "workflow_execution" => ErrorType::WorkflowExecution,
            "data_integrity" => ErrorType::DataIntegrity,
            "configuration" => ErrorType::Configuration,
            _ => ErrorType::Custom(value),
        }
    }
}

impl From<&str> for ErrorType {
    fn from(value: &str) -> Self {
        ErrorType::from(value.to_string())
    }
}

impl From<ErrorType> for String {
    fn from(value: ErrorType) -> Self {
        value.as_str().to_string()
    }
}

/// Severity of a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Security,
    UserInput,
    Capacity,
    Infrastructure,
    Data,
    Application,
    Performance,
    Integration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Derived impact fields for one error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeProfile {
    pub category: ErrorCategory,
    pub business_impact: ImpactLevel,
    pub user_impact: ImpactLevel,
    pub technical_complexity: Complexity,
    pub estimated_resolution_minutes: u32,
}

impl Default for TypeProfile {
    fn default() -> Self {
        Self {
            category: ErrorCategory::Application,
            business_impact: ImpactLevel::Medium,
            user_impact: ImpactLevel::Medium,
            technical_complexity: Complexity::Moderate,
            estimated_resolution_minutes: 30,
        }
    }
}
