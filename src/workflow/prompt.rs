use crate::platform::state::visible_body;
use crate::platform::types::{Issue, PullRequest};
use crate::workflow::task::{EditKind, FileEdit, TaskContext};
use crate::workflow::types::CiAnalysis;

const MAX_DIFF_CHARS: usize = 10_000;

pub fn system_prompt_for_code(repo_full_name: &str, protected: &[String]) -> String {
    format!(
        r#"You are Patcher, an expert software engineer working on repository `{repo_full_name}`.

You produce complete file contents, never partial patches. Follow the existing code style and patterns in the repository and make minimal, focused changes.

These paths are protected and any change touching them is rejected as a whole:
{protected_list}"#,
        protected_list = protected
            .iter()
            .map(|p| format!("- `{p}`"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

pub fn system_prompt_for_review(repo_full_name: &str) -> String {
    format!(
        r#"You are Patcher, a careful code reviewer for repository `{repo_full_name}`.

Judge correctness, security, performance and style, and whether the change meets the linked requirements. Report each problem once with the most specific location you can give. Changes to CI/CD configuration or GitHub Actions workflows are always an error."#
    )
}

fn context_section(context: &TaskContext) -> String {
    let mut sections = Vec::new();

    if !context.languages().is_empty() {
        let languages = context
            .languages()
            .iter()
            .map(|(lang, count)| format!("{lang} ({count} files)"))
            .collect::<Vec<_>>()
            .join(", ");
        sections.push(format!("**Languages:** {languages}"));
    }

    for note in context.notes() {
        sections.push(note.clone());
    }

    for excerpt in context.excerpts() {
        sections.push(format!("### `{}`\n```\n{}\n```", excerpt.path, excerpt.content));
    }

    sections.join("\n\n")
}

fn issue_section(issue: &Issue) -> String {
    let comments = issue.format_comments();
    let mut section = format!("Issue #{}: {}\n{}", issue.number, issue.title, issue.body);
    if !comments.is_empty() {
        section.push_str(&format!("\n\n**Comments:**\n{comments}"));
    }
    section
}

pub fn generation_prompt(issue: &Issue, context: &TaskContext) -> String {
    format!(
        r#"Implement the changes for this issue.

{issue}

## Codebase Analysis
{analysis}

Generate the complete content for each file that needs to be created or modified.
For each file, specify:
- path: the file path relative to repository root
- content: complete file content
- action: 'create' for new files, 'modify' for existing files, 'delete' to remove a file

IMPORTANT:
- Do NOT create or modify CI workflow files
- Focus only on source code, tests, and documentation"#,
        issue = issue_section(issue),
        analysis = context_section(context),
    )
}

/// Fix prompt for one cycle. CI failures take precedence over review
/// feedback when both are present.
pub fn fix_prompt(
    issue: Option<&Issue>,
    pr: &PullRequest,
    ci: Option<&CiAnalysis>,
    previous: &[FileEdit],
    context: &TaskContext,
) -> String {
    let requirements = match issue {
        Some(issue) => format!("Original {}", issue_section(issue)),
        None => format!(
            "Pull request #{}: {}\n{}",
            pr.number,
            pr.title,
            visible_body(&pr.body)
        ),
    };

    let target = match ci.filter(|ci| ci.has_failures()) {
        Some(ci) => format!(
            r#"## CI Failures
{failures}

Analyze each failure and fix it. For lint errors fix the exact line; for type errors fix the annotations; for test failures fix the implementation unless the test contradicts the requirements.

IMPORTANT: Only fix what's needed to pass CI. Don't refactor or add features."#,
            failures = ci.describe_failures()
        ),
        None => format!(
            "## Review Feedback\n{}\n\nAddress every feedback point.",
            context
                .feedback()
                .iter()
                .map(|f| format!("- {f}"))
                .collect::<Vec<_>>()
                .join("\n")
        ),
    };

    let last_round = previous
        .iter()
        .filter(|f| f.kind != EditKind::Delete)
        .map(|f| format!("### `{}`\n```\n{}\n```", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let last_round = if last_round.is_empty() {
        String::new()
    } else {
        format!("## Last Committed Version\n{last_round}\n\n")
    };

    format!(
        r#"Fix the code on branch `{branch}`.

{requirements}

{target}

{last_round}## Current Code
{analysis}

Generate the fixed content for each file that needs changes.
For each file, specify:
- path: the file path
- content: complete fixed file content
- action: 'modify' for existing files, 'create' or 'delete' when needed"#,
        branch = pr.head_branch,
        analysis = context_section(context),
    )
}

pub fn review_prompt(
    pr: &PullRequest,
    issue: Option<&Issue>,
    diff: &str,
    ci: &CiAnalysis,
) -> String {
    let diff = if diff.chars().count() > MAX_DIFF_CHARS {
        let truncated: String = diff.chars().take(MAX_DIFF_CHARS).collect();
        format!("{truncated}\n... (diff truncated)")
    } else {
        diff.to_string()
    };

    let issue_context = issue
        .map(|issue| format!("\n## Requirements\n{}\n", issue_section(issue)))
        .unwrap_or_default();

    let ci_context = if ci.has_failures() {
        format!("CI: failing checks\n{}", ci.describe_failures())
    } else if ci.is_pending() {
        format!("CI: still running ({})", ci.pending.join(", "))
    } else {
        "CI: all checks passed.".to_string()
    };

    format!(
        r#"Review this pull request diff.

PR Title: {title}
PR Description: {body}
{issue_context}
{ci_context}

Diff:
```diff
{diff}
```

Provide:
1. Overall assessment of the implementation
2. Any issues found (bugs, security, performance, style) with severity 'error', 'warning' or 'info', file path, line when known, and a suggestion
3. Whether the implementation meets the requirements
4. Whether the PR should be approved"#,
        title = pr.title,
        body = visible_body(&pr.body),
    )
}
