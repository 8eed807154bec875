use crate::platform::types;

/// Map octocrab Issue to our platform Issue type.
pub fn map_issue(
    issue: &octocrab::models::issues::Issue,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        comments: comments.into_iter().map(map_comment).collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}

pub fn map_pull_request(pr: octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        head_branch: pr.head.ref_field,
        head_sha: pr.head.sha,
        base_branch: pr.base.ref_field,
    }
}

/// Map one entry of the check-runs listing.
pub fn map_check_run(run: &serde_json::Value) -> types::CiCheck {
    let status = run["status"].as_str().unwrap_or("queued");
    let conclusion = run["conclusion"].as_str();
    let output = [run["output"]["title"].as_str(), run["output"]["summary"].as_str()]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    types::CiCheck {
        name: run["name"].as_str().unwrap_or("unknown").to_string(),
        state: types::CheckState::from_check_run(status, conclusion),
        output: (!output.is_empty()).then_some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::CheckState;
    use serde_json::json;

    #[test]
    fn test_map_check_run() {
        let failed = map_check_run(&json!({
            "name": "tests",
            "status": "completed",
            "conclusion": "failure",
            "output": {"title": "2 failed", "summary": "test_a, test_b"}
        }));
        assert_eq!(failed.name, "tests");
        assert_eq!(failed.state, CheckState::Failure);
        assert_eq!(failed.output.as_deref(), Some("2 failed\ntest_a, test_b"));

        let running = map_check_run(&json!({"name": "lint", "status": "in_progress"}));
        assert_eq!(running.state, CheckState::Pending);
        assert!(running.output.is_none());
    }
}
