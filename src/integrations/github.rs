//! GitHub integration.
//!
//! REST and GraphQL client for everything the bot needs from GitHub: issue
//! comments, repository contents used as the state backend, collaborator
//! permissions and Projects iterations.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::ContentError;
use crate::workflow::{
    Comment, CommentPoster, CommentStream, ContentStore, Iteration, IterationLookup, StoredContent,
};

const DEFAULT_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    /// GitHub API token
    token: String,
    /// REST base URL, `https://api.github.com` or `https://host/api/v3`
    api_url: String,
    /// Branch used for reads and writes through the contents API
    state_ref: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

/// A GitHub user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Username/login
    pub login: String,
    /// User type (User, Bot, etc.)
    #[serde(rename = "type", default)]
    pub user_type: String,
}

/// A comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    /// Comment ID
    pub id: u64,
    /// Comment body
    #[serde(default)]
    pub body: Option<String>,
    /// Comment author; absent for deleted accounts
    #[serde(default)]
    pub user: Option<User>,
    /// Created timestamp
    #[serde(default)]
    pub created_at: String,
}

impl From<IssueComment> for Comment {
    fn from(comment: IssueComment) -> Self {
        let (author, author_type) = comment
            .user
            .map_or_else(|| ("ghost".to_string(), "User".to_string()), |u| (u.login, u.user_type));
        Self {
            id: comment.id,
            author,
            author_type,
            body: comment.body.unwrap_or_default(),
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContentsFile,
}

#[derive(Debug, Deserialize)]
struct PutContentsFile {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IterationNode {
    id: String,
    title: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
}

/// Result type for GitHub operations.
pub type GitHubResult<T> = Result<T, GitHubError>;

/// Error types for GitHub operations.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("GraphQL error: {0}")]
    GraphQL(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl GitHubClient {
    /// Create a new GitHub client for the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            state_ref: None,
            client: reqwest::Client::new(),
        }
    }

    /// Use another API root (GitHub Enterprise, tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Read and write state on this branch instead of the default branch.
    pub fn with_state_ref(mut self, state_ref: Option<String>) -> Self {
        self.state_ref = state_ref.filter(|r| !r.trim().is_empty());
        self
    }

    /// Get the REST URL for a repository path.
    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!("{}/repos/{owner}/{repo}/{path}", self.api_url)
    }

    /// GraphQL endpoint that belongs to the REST root.
    fn graphql_url(&self) -> String {
        match self.api_url.strip_suffix("/v3") {
            Some(root) => format!("{root}/graphql"),
            None => format!("{}/graphql", self.api_url),
        }
    }

    /// Make an authenticated request.
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "gsdbot")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Parse error response from GitHub API.
    async fn parse_error(&self, response: reqwest::Response) -> GitHubError {
        let status = response.status().as_u16();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|s| s == "0");

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| format!("HTTP {status}"));

        match status {
            401 => GitHubError::Unauthorized,
            403 | 429 if rate_limited || status == 429 => GitHubError::RateLimited,
            404 => GitHubError::NotFound(message),
            409 | 422 => GitHubError::Conflict(message),
            _ => GitHubError::Api { status, message },
        }
    }

    /// List every comment on an issue, following pagination.
    pub async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> GitHubResult<Vec<IssueComment>> {
        let mut comments = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(
                owner,
                repo,
                &format!("issues/{issue_number}/comments?per_page={PAGE_SIZE}&page={page}"),
            );
            let response = self.request(reqwest::Method::GET, &url).send().await?;
            if !response.status().is_success() {
                return Err(self.parse_error(response).await);
            }

            let batch: Vec<IssueComment> = response.json().await?;
            let done = batch.len() < PAGE_SIZE;
            comments.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        tracing::debug!(issue = issue_number, count = comments.len(), "Listed issue comments");
        Ok(comments)
    }

    /// Add a comment to an issue.
    pub async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> GitHubResult<IssueComment> {
        let url = self.repo_url(owner, repo, &format!("issues/{issue_number}/comments"));
        let payload = serde_json::json!({ "body": body });

        let response = self.request(reqwest::Method::POST, &url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let comment: IssueComment = response.json().await?;
        Ok(comment)
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> String {
        let encoded: Vec<String> =
            path.split('/').map(|segment| urlencoding::encode(segment).into_owned()).collect();
        self.repo_url(owner, repo, &format!("contents/{}", encoded.join("/")))
    }

    /// Read a file through the contents API. `None` when it does not exist.
    pub async fn get_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> GitHubResult<Option<StoredContent>> {
        let mut url = self.contents_url(owner, repo, path);
        if let Some(reference) = &self.state_ref {
            url = format!("{url}?ref={}", urlencoding::encode(reference));
        }

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let file: ContentsResponse = response
            .json()
            .await
            .map_err(|e| GitHubError::Decode(format!("{path} is not a file: {e}")))?;
        if file.kind != "file" {
            return Err(GitHubError::Decode(format!("{path} is a {}, not a file", file.kind)));
        }

        let packed: String = file.content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64.decode(packed).map_err(|e| GitHubError::Decode(e.to_string()))?;
        let content = String::from_utf8(bytes).map_err(|e| GitHubError::Decode(e.to_string()))?;
        Ok(Some(StoredContent { content, revision: file.sha }))
    }

    /// Create or update a file through the contents API.
    ///
    /// `sha` must be the current blob sha when the file exists. Returns the
    /// new blob sha.
    pub async fn put_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> GitHubResult<String> {
        let url = self.contents_url(owner, repo, path);
        let mut payload = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
        });
        if let Some(sha) = sha {
            payload["sha"] = serde_json::json!(sha);
        }
        if let Some(branch) = &self.state_ref {
            payload["branch"] = serde_json::json!(branch);
        }

        let response = self.request(reqwest::Method::PUT, &url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let written: PutContentsResponse = response.json().await?;
        Ok(written.content.sha)
    }

    /// A user's permission on the repository: `admin`, `maintain`, `write`,
    /// `triage`, `read` or `none`.
    pub async fn collaborator_permission(
        &self,
        owner: &str,
        repo: &str,
        user: &str,
    ) -> GitHubResult<String> {
        let url = self.repo_url(
            owner,
            repo,
            &format!("collaborators/{}/permission", urlencoding::encode(user)),
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok("none".to_string());
        }
        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let permission: PermissionResponse = response.json().await?;
        Ok(permission.permission)
    }

    /// Run a GraphQL query and return its `data`.
    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> GitHubResult<serde_json::Value> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response =
            self.request(reqwest::Method::POST, &self.graphql_url()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }

        let mut result: serde_json::Value = response.json().await?;

        // Check for GraphQL errors
        if let Some(first_error) =
            result.get("errors").and_then(|e| e.as_array()).and_then(|e| e.first())
        {
            let message =
                first_error.get("message").and_then(|m| m.as_str()).unwrap_or("Unknown error");
            return Err(GitHubError::GraphQL(message.to_string()));
        }

        Ok(result.get_mut("data").map(serde_json::Value::take).unwrap_or_default())
    }

    /// Iterations of a Projects (v2) board owned by an organization or user.
    /// `None` when neither owns a project with that number.
    pub async fn project_iterations(
        &self,
        owner: &str,
        project_number: u64,
    ) -> GitHubResult<Option<Vec<Iteration>>> {
        let variables = serde_json::json!({ "login": owner, "number": project_number });
        for owner_kind in ["organization", "user"] {
            match self.graphql(&iteration_query(owner_kind), variables.clone()).await {
                Ok(data) => {
                    let project = &data[owner_kind]["projectV2"];
                    if !project.is_null() {
                        return Ok(Some(collect_iterations(project)));
                    }
                }
                Err(GitHubError::GraphQL(message)) => {
                    tracing::debug!(owner, kind = owner_kind, error = %message, "No project here");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Find an iteration by title, ignoring case.
    pub async fn iteration_by_title(
        &self,
        owner: &str,
        project_number: u64,
        title: &str,
    ) -> GitHubResult<Option<Iteration>> {
        let Some(iterations) = self.project_iterations(owner, project_number).await? else {
            tracing::warn!(owner, project = project_number, "Project not found");
            return Ok(None);
        };
        let wanted = title.trim();
        Ok(iterations.into_iter().find(|i| i.title.trim().eq_ignore_ascii_case(wanted)))
    }
}

/// Whether `actual` grants at least `required`.
pub fn permission_allows(actual: &str, required: &str) -> bool {
    fn rank(permission: &str) -> u8 {
        match permission.trim().to_lowercase().as_str() {
            "admin" => 5,
            "maintain" => 4,
            "write" | "push" => 3,
            "triage" => 2,
            "read" | "pull" => 1,
            _ => 0,
        }
    }
    rank(actual) >= rank(required).max(1)
}

fn iteration_query(owner_kind: &str) -> String {
    format!(
        r#"query($login: String!, $number: Int!) {{
  {owner_kind}(login: $login) {{
    projectV2(number: $number) {{
      fields(first: 50) {{
        nodes {{
          ... on ProjectV2IterationField {{
            configuration {{
              iterations {{ id title startDate duration }}
              completedIterations {{ id title startDate duration }}
            }}
          }}
        }}
      }}
    }}
  }}
}}"#
    )
}

fn collect_iterations(project: &serde_json::Value) -> Vec<Iteration> {
    let Some(nodes) = project["fields"]["nodes"].as_array() else {
        return Vec::new();
    };
    nodes
        .iter()
        .flat_map(|node| {
            let config = &node["configuration"];
            [&config["iterations"], &config["completedIterations"]]
        })
        .filter_map(|list| list.as_array())
        .flatten()
        .filter_map(|item| serde_json::from_value::<IterationNode>(item.clone()).ok())
        .map(|node| Iteration {
            id: node.id,
            title: node.title,
            start_date: node.start_date,
            duration: node.duration,
        })
        .collect()
}

fn content_error(path: &str, err: GitHubError) -> ContentError {
    match err {
        GitHubError::Conflict(_) => ContentError::Conflict { path: path.to_string() },
        other => ContentError::Backend(other.to_string()),
    }
}

#[async_trait]
impl ContentStore for GitHubClient {
    async fn get(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<StoredContent>, ContentError> {
        self.get_contents(owner, repo, path).await.map_err(|e| content_error(path, e))
    }

    async fn put(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
        message: &str,
    ) -> Result<String, ContentError> {
        self.put_contents(owner, repo, path, content, revision, message)
            .await
            .map_err(|e| content_error(path, e))
    }
}

#[async_trait]
impl CommentStream for GitHubClient {
    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> anyhow::Result<Vec<Comment>> {
        let comments = self.list_issue_comments(owner, repo, issue_number).await?;
        Ok(comments.into_iter().map(Comment::from).collect())
    }
}

#[async_trait]
impl CommentPoster for GitHubClient {
    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        let comment = self.create_comment(owner, repo, issue_number, body).await?;
        tracing::debug!(issue = issue_number, comment = comment.id, "Posted comment");
        Ok(())
    }
}

#[async_trait]
impl IterationLookup for GitHubClient {
    async fn find_iteration(
        &self,
        owner: &str,
        project_number: u64,
        title: &str,
    ) -> anyhow::Result<Option<Iteration>> {
        Ok(self.iteration_by_title(owner, project_number, title).await?)
    }
}
