use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Runtime assumed when a create request does not name one.
pub const DEFAULT_RUNTIME: &str = "python3.11";

/// Worker pool a runtime string is routed to.
///
/// Minor version strings collapse into one family: `python3.11`, `python`
/// and `pypy3` all share the Python queue partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeFamily {
    Python,
    JavaScript,
}

impl RuntimeFamily {
    /// Partition used for runtimes no family recognises. Those runtimes have
    /// no dedicated worker pool, so they land on the JavaScript workers.
    pub const FALLBACK: RuntimeFamily = RuntimeFamily::JavaScript;

    pub const ALL: [RuntimeFamily; 2] = [RuntimeFamily::Python, RuntimeFamily::JavaScript];

    /// Recognise a runtime string, or `None` if it belongs to no family.
    pub fn classify(runtime: &str) -> Option<Self> {
        let runtime = runtime.trim().to_ascii_lowercase();
        if runtime.starts_with("python") || runtime.starts_with("pypy") {
            Some(RuntimeFamily::Python)
        } else if runtime == "javascript" || runtime == "js" || runtime.starts_with("node") {
            Some(RuntimeFamily::JavaScript)
        } else {
            None
        }
    }

    /// Family for a runtime string, with the deterministic fallback applied.
    pub fn for_runtime(runtime: &str) -> Self {
        Self::classify(runtime).unwrap_or(Self::FALLBACK)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeFamily::Python => "python",
            RuntimeFamily::JavaScript => "javascript",
        }
    }

    /// Name of the durable queue partition for this family.
    pub fn queue_name(&self) -> String {
        format!("execution_queue:{}", self.as_str())
    }

    pub fn source_extension(&self) -> &'static str {
        match self {
            RuntimeFamily::Python => ".py",
            RuntimeFamily::JavaScript => ".js",
        }
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::classify(s).ok_or_else(|| format!("unknown runtime family: {}", s))
    }
}

/// Declared input parameter of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub key: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// Registered function metadata.
///
/// `code_locator` starts out empty and is bound exactly once after the code
/// blob has been written. `code` is only populated on single-function reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_event: Option<Value>,
    #[serde(default)]
    pub params: Vec<FunctionParam>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    pub fn family(&self) -> RuntimeFamily {
        RuntimeFamily::for_runtime(&self.runtime)
    }

    /// Storage key for this function's source, e.g. `functions/<id>.py`.
    pub fn default_code_locator(&self) -> String {
        format!("functions/{}{}", self.id, self.family().source_extension())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateFunctionRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub params: Vec<FunctionParam>,
    #[serde(default)]
    pub sample_event: Option<Value>,
    #[serde(default)]
    pub code: String,
}
