use serde::Deserialize;
use serde_json::json;

use crate::llm::SchemaHint;
use crate::workflow::task::{ChangeSet, EditKind, FileEdit};
use crate::workflow::types::{FileLocation, ReviewIssue, ReviewResult, Severity};
use crate::workflow::validator::OutputSchema;

/// Code changes proposed by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeGeneration {
    pub files: Vec<FileEdit>,
    pub explanation: String,
}

impl CodeGeneration {
    pub fn into_change_set(self) -> (ChangeSet, String) {
        (self.files, self.explanation)
    }
}

impl OutputSchema for CodeGeneration {
    fn hint() -> SchemaHint {
        SchemaHint {
            name: "submit_code_changes",
            description: "Submit the complete set of file changes that resolves the task.",
            schema: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "description": "List of file changes",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {
                                    "type": "string",
                                    "description": "File path relative to repository root"
                                },
                                "content": {
                                    "type": "string",
                                    "description": "Complete file content (empty for deletions)"
                                },
                                "action": {
                                    "type": "string",
                                    "enum": ["create", "modify", "delete"],
                                    "description": "What to do with the file"
                                }
                            },
                            "required": ["path", "content", "action"]
                        }
                    },
                    "explanation": {
                        "type": "string",
                        "description": "Brief explanation of changes"
                    }
                },
                "required": ["files", "explanation"]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.files.is_empty() {
            return Err("`files` must contain at least one change".to_string());
        }

        let mut seen: Vec<&str> = Vec::new();
        for (i, file) in self.files.iter().enumerate() {
            let path = file.path.trim();
            if path.is_empty() {
                return Err(format!("files[{i}].path is empty"));
            }
            if path.ends_with('/') {
                return Err(format!("files[{i}].path `{path}` names a directory"));
            }
            if path.split(|c| c == '/' || c == '\\').any(|segment| segment == "..") {
                return Err(format!("files[{i}].path `{path}` leaves the repository"));
            }
            if seen.contains(&path) {
                return Err(format!("files[{i}].path `{path}` appears more than once"));
            }
            if file.kind == EditKind::Modify && file.content.is_empty() {
                return Err(format!(
                    "files[{i}] modifies `{path}` without content; send the complete file"
                ));
            }
            seen.push(path);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewFinding {
    pub severity: Severity,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line: Option<u64>,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Structured review of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeReview {
    pub assessment: String,
    #[serde(default)]
    pub issues: Vec<ReviewFinding>,
    pub requirements_met: bool,
    #[serde(default)]
    pub requirements_notes: String,
    pub approved: bool,
}

impl CodeReview {
    pub fn into_review_result(self) -> ReviewResult {
        let summary = if self.requirements_notes.trim().is_empty() {
            self.assessment
        } else {
            format!("{}\n\n{}", self.assessment, self.requirements_notes)
        };

        ReviewResult {
            approved: self.approved,
            requirements_met: self.requirements_met,
            summary,
            issues: self
                .issues
                .into_iter()
                .map(|f| ReviewIssue {
                    severity: f.severity,
                    location: (!f.file_path.trim().is_empty()).then(|| FileLocation {
                        path: f.file_path,
                        line: f.line,
                    }),
                    description: f.description,
                    suggestion: (!f.suggestion.trim().is_empty()).then_some(f.suggestion),
                })
                .collect(),
        }
    }
}

impl OutputSchema for CodeReview {
    fn hint() -> SchemaHint {
        SchemaHint {
            name: "submit_review",
            description: "Submit the review verdict for the pull request.",
            schema: json!({
                "type": "object",
                "properties": {
                    "assessment": {
                        "type": "string",
                        "description": "Overall assessment of the changes"
                    },
                    "issues": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "severity": {"type": "string", "enum": ["error", "warning", "info"]},
                                "file_path": {"type": "string"},
                                "line": {"type": ["integer", "null"]},
                                "description": {"type": "string"},
                                "suggestion": {"type": "string"}
                            },
                            "required": ["severity", "file_path", "description"]
                        }
                    },
                    "requirements_met": {
                        "type": "boolean",
                        "description": "Whether the implementation meets the issue requirements"
                    },
                    "requirements_notes": {"type": "string"},
                    "approved": {
                        "type": "boolean",
                        "description": "Whether the PR should be approved"
                    }
                },
                "required": ["assessment", "issues", "requirements_met", "approved"]
            }),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.assessment.trim().is_empty() {
            return Err("`assessment` is empty".to_string());
        }
        if self.approved && self.issues.iter().any(|i| i.severity == Severity::Error) {
            return Err("`approved` is true but the review lists error-severity issues".to_string());
        }
        if let Some(i) = self.issues.iter().position(|i| i.description.trim().is_empty()) {
            return Err(format!("issues[{i}].description is empty"));
        }
        Ok(())
    }
}
